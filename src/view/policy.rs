//! Expiry policies for cached views.
//!
//! The cache itself is policy-agnostic: it asks an [`ExpiryPolicy`] whether
//! a record is still good, and whether records are kept at all.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use super::cache::TemplateCacheRecord;
use crate::core::{Clock, Millis, SourceLocation};
use crate::debug;
use crate::resource::ResourceResolver;

/// Decides when a cached record must be recompiled.
pub trait ExpiryPolicy: Send + Sync + fmt::Debug {
    /// Whether `record` (compiled from `location`) must be replaced.
    ///
    /// May update the record's next-check time as a side effect.
    fn is_expired(&self, location: &SourceLocation, record: &TemplateCacheRecord) -> bool;

    /// Whether records are stored at all.
    fn caches(&self) -> bool {
        true
    }
}

/// Interval 0: nothing is cached, every lookup compiles.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysRefresh;

impl ExpiryPolicy for AlwaysRefresh {
    fn is_expired(&self, _: &SourceLocation, _: &TemplateCacheRecord) -> bool {
        true
    }

    fn caches(&self) -> bool {
        false
    }
}

/// Negative interval: compiled once, kept forever.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverRefresh;

impl ExpiryPolicy for NeverRefresh {
    fn is_expired(&self, _: &SourceLocation, _: &TemplateCacheRecord) -> bool {
        false
    }
}

/// Positive interval: re-stat the source at most once per interval and
/// expire when it changed since compilation.
#[derive(Debug, Clone)]
pub struct PeriodicRefresh {
    resolver: Arc<dyn ResourceResolver>,
    clock: Arc<dyn Clock>,
}

impl PeriodicRefresh {
    pub fn new(resolver: Arc<dyn ResourceResolver>, clock: Arc<dyn Clock>) -> Self {
        Self { resolver, clock }
    }
}

impl ExpiryPolicy for PeriodicRefresh {
    fn is_expired(&self, location: &SourceLocation, record: &TemplateCacheRecord) -> bool {
        let Some(next) = record.next_refresh() else {
            return false;
        };
        let now = self.clock.now_millis();
        let due = next.load(Ordering::Acquire);
        if now <= due {
            return false;
        }

        // Advance first so concurrent lookups skip the stat; the loser of
        // the race treats the record as fresh.
        let advanced = now.saturating_add(record.refresh_ms());
        if next
            .compare_exchange(due, advanced, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let modified = self.resolver.last_modified(location);
        let expired = modified > record.last_modified();
        debug!(
            "cache";
            "checked {}: modified {} vs {}, next check @{}{}",
            location,
            modified,
            record.last_modified(),
            advanced,
            if expired { " (expired)" } else { "" }
        );
        expired
    }
}

/// Pick the policy for a refresh interval in milliseconds.
pub fn policy_for(
    refresh_ms: Millis,
    resolver: Arc<dyn ResourceResolver>,
    clock: Arc<dyn Clock>,
) -> Arc<dyn ExpiryPolicy> {
    match refresh_ms {
        0 => Arc::new(AlwaysRefresh),
        ms if ms < 0 => Arc::new(NeverRefresh),
        _ => Arc::new(PeriodicRefresh::new(resolver, clock)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ManualClock;
    use crate::resource::MemoryResolver;
    use crate::view::CompiledView;

    fn record(resolver: &MemoryResolver, created_at: Millis, refresh_ms: Millis) -> TemplateCacheRecord {
        let location = resolver.location("/a.xhtml");
        let view = CompiledView::empty(location, "/a.xhtml", created_at, refresh_ms);
        TemplateCacheRecord::new(Arc::new(view), created_at, 100, refresh_ms)
    }

    #[test]
    fn test_periodic_requires_due_and_modified() {
        let resolver = Arc::new(MemoryResolver::new());
        resolver.insert("/a.xhtml", "<p/>", 100);
        let clock = Arc::new(ManualClock::new(0));
        let policy = PeriodicRefresh::new(resolver.clone(), clock.clone());
        let location = resolver.location("/a.xhtml");
        let rec = record(&resolver, 0, 1_000);

        // not due yet
        clock.set(500);
        assert!(!policy.is_expired(&location, &rec));

        // due but untouched
        clock.set(1_500);
        assert!(!policy.is_expired(&location, &rec));
        assert_eq!(rec.next_refresh().unwrap().load(Ordering::SeqCst), 2_500);

        // touched, but the throttle holds until the next boundary
        resolver.touch("/a.xhtml", 200);
        clock.set(2_000);
        assert!(!policy.is_expired(&location, &rec));
        clock.set(2_600);
        assert!(policy.is_expired(&location, &rec));
    }

    #[test]
    fn test_policy_for_interval() {
        let resolver: Arc<dyn ResourceResolver> = Arc::new(MemoryResolver::new());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
        assert!(!policy_for(0, resolver.clone(), clock.clone()).caches());
        assert!(policy_for(-1, resolver.clone(), clock.clone()).caches());
        assert!(policy_for(2_000, resolver, clock).caches());
    }

    #[test]
    fn test_never_and_always() {
        let resolver = MemoryResolver::new();
        let location = resolver.location("/a.xhtml");
        let rec = record(&resolver, 0, -1);
        assert!(!NeverRefresh.is_expired(&location, &rec));
        assert!(AlwaysRefresh.is_expired(&location, &rec));
        assert!(rec.next_refresh().is_none());
    }
}
