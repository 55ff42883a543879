//! Idle-unload witness accounting.
//!
//! An external idle-timeout manager powers the accelerator down when no
//! request is active. Callers hold a witness for the duration of a request so
//! the manager keeps the device resident. The witness is a guard object:
//! release happens on drop, on every exit path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared witness count for the idle-unload lifecycle.
///
/// Clones share the same underlying count, so a lease can be handed to both
/// the pipeline and the component observing idleness.
#[derive(Debug, Clone, Default)]
pub struct IdleLease {
    witnesses: Arc<AtomicUsize>,
}

impl IdleLease {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a witness. The accelerator must stay resident until the
    /// returned guard is dropped.
    #[must_use = "the witness is released as soon as the guard is dropped"]
    pub fn witness(&self) -> WitnessGuard {
        let prior = self.witnesses.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(active = prior + 1, "idle witness acquired");
        WitnessGuard {
            witnesses: Arc::clone(&self.witnesses),
        }
    }

    /// Number of currently held witnesses.
    pub fn active_witnesses(&self) -> usize {
        self.witnesses.load(Ordering::SeqCst)
    }

    /// True when no request is holding the accelerator.
    pub fn is_idle(&self) -> bool {
        self.active_witnesses() == 0
    }
}

/// RAII guard for one witness.
#[derive(Debug)]
pub struct WitnessGuard {
    witnesses: Arc<AtomicUsize>,
}

impl Drop for WitnessGuard {
    fn drop(&mut self) {
        let prior = self.witnesses.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(active = prior.saturating_sub(1), "idle witness released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_witness_scopes_count() {
        let lease = IdleLease::new();
        assert!(lease.is_idle());
        {
            let _guard = lease.witness();
            assert_eq!(lease.active_witnesses(), 1);
            {
                let _nested = lease.witness();
                assert_eq!(lease.active_witnesses(), 2);
            }
            assert_eq!(lease.active_witnesses(), 1);
        }
        assert!(lease.is_idle());
    }

    #[test]
    fn test_witness_released_on_error_path() {
        let lease = IdleLease::new();

        fn failing_call(lease: &IdleLease) -> Result<(), &'static str> {
            let _guard = lease.witness();
            Err("generation failed")
        }

        assert!(failing_call(&lease).is_err());
        assert!(lease.is_idle());
    }

    #[test]
    fn test_clones_share_count() {
        let lease = IdleLease::new();
        let observer = lease.clone();
        let _guard = lease.witness();
        assert_eq!(observer.active_witnesses(), 1);
    }
}
