//! Phase listeners.
//!
//! The registry is copy-on-write: every phase iterates over the snapshot it
//! loaded, so listeners added or removed mid-request take effect on the
//! next phase.

use std::sync::Arc;

use arc_swap::ArcSwap;

use super::phase::PhaseId;
use super::request::RequestContext;
use crate::debug;

/// Callback around the phases it is registered for.
pub trait PhaseListener: Send + Sync {
    /// Phase to observe; [`PhaseId::Any`] observes all of them.
    fn phase_id(&self) -> PhaseId;

    fn before_phase(&self, _phase: PhaseId, _ctx: &mut RequestContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn after_phase(&self, _phase: PhaseId, _ctx: &mut RequestContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Name used in diagnostics.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

pub type Listeners = Arc<Vec<Arc<dyn PhaseListener>>>;

#[inline]
fn same(a: &Arc<dyn PhaseListener>, b: &Arc<dyn PhaseListener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Registered listeners in registration order.
pub struct PhaseListeners {
    inner: ArcSwap<Vec<Arc<dyn PhaseListener>>>,
}

impl Default for PhaseListeners {
    fn default() -> Self {
        Self {
            inner: ArcSwap::from_pointee(Vec::new()),
        }
    }
}

impl PhaseListeners {
    /// Register `listener`; registering the same instance twice is ignored.
    pub fn add(&self, listener: Arc<dyn PhaseListener>) {
        let mut added = true;
        self.inner.rcu(|current| {
            if current.iter().any(|l| same(l, &listener)) {
                added = false;
                return Arc::clone(current);
            }
            added = true;
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(Arc::clone(&listener));
            Arc::new(next)
        });
        if added {
            debug!("lifecycle"; "added phase listener {} for {}", listener.name(), listener.phase_id());
        } else {
            debug!("lifecycle"; "duplicate phase listener {} ignored", listener.name());
        }
    }

    pub fn remove(&self, listener: &Arc<dyn PhaseListener>) {
        let mut removed = false;
        self.inner.rcu(|current| {
            removed = current.iter().any(|l| same(l, listener));
            if !removed {
                return Arc::clone(current);
            }
            Arc::new(current.iter().filter(|l| !same(l, listener)).cloned().collect())
        });
        if removed {
            debug!("lifecycle"; "removed phase listener {}", listener.name());
        }
    }

    #[inline]
    pub fn snapshot(&self) -> Listeners {
        self.inner.load_full()
    }

    pub fn len(&self) -> usize {
        self.inner.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(PhaseId);

    impl PhaseListener for Noop {
        fn phase_id(&self) -> PhaseId {
            self.0
        }
    }

    #[test]
    fn test_duplicates_are_ignored() {
        let listeners = PhaseListeners::default();
        let a: Arc<dyn PhaseListener> = Arc::new(Noop(PhaseId::Any));
        let b: Arc<dyn PhaseListener> = Arc::new(Noop(PhaseId::RenderResponse));

        listeners.add(Arc::clone(&a));
        listeners.add(Arc::clone(&a));
        listeners.add(Arc::clone(&b));
        assert_eq!(listeners.len(), 2);

        listeners.remove(&a);
        let snapshot = listeners.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].phase_id(), PhaseId::RenderResponse);
    }

    #[test]
    fn test_snapshot_is_stable() {
        let listeners = PhaseListeners::default();
        let before = listeners.snapshot();
        listeners.add(Arc::new(Noop(PhaseId::Any)));
        assert!(before.is_empty());
        assert_eq!(listeners.snapshot().len(), 1);
    }
}
