//! Compiled view cache.
//!
//! One [`ViewCache`] serves one contract set. Entries are keyed by source
//! location and [`CompileMode`], so the full and metadata-only programs of
//! a view share the same expiry logic.
//!
//! # Concurrency
//!
//! Each key owns a slot with its own build lock. A lookup that finds a
//! fresh record never blocks on compilation; a lookup that has to compile
//! takes the slot's build lock, so concurrent misses for the same key
//! result in one compilation while the others wait for its result.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicI64;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use super::CompiledView;
use super::error::ViewResult;
use super::policy::ExpiryPolicy;
use crate::core::{Millis, SourceLocation};
use crate::debug;

/// Which program a cache entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompileMode {
    /// Whole template.
    Full,
    /// Only the `f:metadata` subtree.
    MetadataOnly,
}

impl CompileMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::MetadataOnly => "metadata",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub location: SourceLocation,
    pub mode: CompileMode,
}

impl CacheKey {
    pub fn new(location: SourceLocation, mode: CompileMode) -> Self {
        Self { location, mode }
    }
}

// ============================================================================
// Record
// ============================================================================

/// One compiled view plus the data its expiry policy needs.
///
/// Records are replaced, never mutated, apart from the next-check time of
/// periodic records.
pub struct TemplateCacheRecord {
    view: Arc<CompiledView>,
    created_at: Millis,
    last_modified: Millis,
    refresh_ms: Millis,
    next_refresh: Option<AtomicI64>,
}

impl TemplateCacheRecord {
    /// `last_modified` is 0 when not tracked. The next-check time only
    /// exists for a positive `refresh_ms`.
    pub fn new(view: Arc<CompiledView>, created_at: Millis, last_modified: Millis, refresh_ms: Millis) -> Self {
        let next_refresh = (refresh_ms > 0).then(|| AtomicI64::new(created_at.saturating_add(refresh_ms)));
        Self {
            view,
            created_at,
            last_modified,
            refresh_ms,
            next_refresh,
        }
    }

    #[inline]
    pub fn view(&self) -> &Arc<CompiledView> {
        &self.view
    }

    #[inline]
    pub fn created_at(&self) -> Millis {
        self.created_at
    }

    #[inline]
    pub fn last_modified(&self) -> Millis {
        self.last_modified
    }

    #[inline]
    pub fn refresh_ms(&self) -> Millis {
        self.refresh_ms
    }

    #[inline]
    pub fn next_refresh(&self) -> Option<&AtomicI64> {
        self.next_refresh.as_ref()
    }
}

impl fmt::Debug for TemplateCacheRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateCacheRecord")
            .field("alias", &self.view.alias())
            .field("created_at", &self.created_at)
            .field("last_modified", &self.last_modified)
            .field("next_refresh", &self.next_refresh)
            .finish()
    }
}

// ============================================================================
// Cache
// ============================================================================

#[derive(Default)]
struct Slot {
    record: RwLock<Option<Arc<TemplateCacheRecord>>>,
    build: Mutex<()>,
}

impl Slot {
    fn current(&self) -> Option<Arc<TemplateCacheRecord>> {
        self.record.read().clone()
    }
}

/// Keyed store of compiled views guarded by an expiry policy.
pub struct ViewCache {
    policy: Arc<dyn ExpiryPolicy>,
    slots: DashMap<CacheKey, Arc<Slot>>,
}

impl ViewCache {
    pub fn new(policy: Arc<dyn ExpiryPolicy>) -> Self {
        Self {
            policy,
            slots: DashMap::new(),
        }
    }

    /// Cached view for `key`, compiling it with `build` on a miss or after
    /// expiry.
    ///
    /// A failed build leaves no record behind.
    pub fn get<F>(&self, key: &CacheKey, build: F) -> ViewResult<Arc<CompiledView>>
    where
        F: FnOnce() -> ViewResult<TemplateCacheRecord>,
    {
        if !self.policy.caches() {
            return build().map(|record| record.view);
        }

        let slot = Arc::clone(self.slots.entry(key.clone()).or_default().value());

        let seen = slot.current();
        if let Some(record) = &seen
            && !self.policy.is_expired(&key.location, record)
        {
            return Ok(Arc::clone(&record.view));
        }

        let _building = slot.build.lock();

        // Someone else replaced the record while we waited.
        if let Some(current) = slot.current() {
            let unchanged = seen.as_ref().is_some_and(|s| Arc::ptr_eq(s, &current));
            if !unchanged {
                return Ok(Arc::clone(&current.view));
            }
        }

        match build() {
            Ok(record) => {
                let record = Arc::new(record);
                debug!(
                    "cache";
                    "{} {} ({})",
                    if seen.is_some() { "recompiled" } else { "compiled" },
                    record.view.alias(),
                    key.mode.as_str()
                );
                *slot.record.write() = Some(Arc::clone(&record));
                Ok(Arc::clone(&record.view))
            }
            Err(e) => {
                *slot.record.write() = None;
                self.slots
                    .remove_if(key, |_, held| Arc::ptr_eq(held, &slot) && held.record.read().is_none());
                Err(e)
            }
        }
    }

    /// Whether a record exists for `key`. Always false when nothing is cached.
    pub fn is_cached(&self, key: &CacheKey) -> bool {
        self.policy.caches()
            && self
                .slots
                .get(key)
                .is_some_and(|slot| slot.record.read().is_some())
    }

    pub fn remove(&self, key: &CacheKey) {
        self.slots.remove(key);
    }

    pub fn clear(&self) {
        self.slots.clear();
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.record.read().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ViewCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewCache")
            .field("policy", &self.policy)
            .field("entries", &self.len())
            .finish()
    }
}
