use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Process-wide switch for built-in event dispatch
///
/// While a command or legacy call is running, dispatch is suppressed so a
/// script cannot re-trigger the same event class from inside its own
/// handler. Clones share the same switch.
#[derive(Debug, Clone)]
pub struct DispatchGate {
    enabled: Arc<AtomicBool>,
}

impl DispatchGate {
    pub fn new() -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Whether events may currently be dispatched
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Suppress dispatch until the returned guard is dropped.
    ///
    /// The previous state is restored on drop, so nested suppressions unwind
    /// correctly and a panic inside the guarded call still restores it.
    pub fn suppress(&self) -> DispatchSuppression {
        let previous = self.enabled.swap(false, Ordering::SeqCst);
        DispatchSuppression {
            enabled: Arc::clone(&self.enabled),
            previous,
        }
    }

    /// Run `f` with dispatch suppressed
    pub fn while_suppressed<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = self.suppress();
        f()
    }
}

impl Default for DispatchGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard returned by [`DispatchGate::suppress`]
#[must_use = "dispatch is re-enabled as soon as the guard is dropped"]
pub struct DispatchSuppression {
    enabled: Arc<AtomicBool>,
    previous: bool,
}

impl Drop for DispatchSuppression {
    fn drop(&mut self) {
        self.enabled.store(self.previous, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suppress_and_restore() {
        let gate = DispatchGate::new();
        assert!(gate.is_enabled());
        {
            let _guard = gate.suppress();
            assert!(!gate.is_enabled());
        }
        assert!(gate.is_enabled());
    }

    #[test]
    fn test_nested_suppression_restores_outer_state() {
        let gate = DispatchGate::new();
        let outer = gate.suppress();
        {
            let _inner = gate.suppress();
            assert!(!gate.is_enabled());
        }
        // Still suppressed by the outer guard
        assert!(!gate.is_enabled());
        drop(outer);
        assert!(gate.is_enabled());
    }

    #[test]
    fn test_restored_after_panic() {
        let gate = DispatchGate::new();
        let inner = gate.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            inner.while_suppressed(|| panic!("script blew up"));
        }));
        assert!(result.is_err());
        assert!(gate.is_enabled());
    }

    #[test]
    fn test_clones_share_state() {
        let gate = DispatchGate::new();
        let other = gate.clone();
        let value = gate.while_suppressed(|| other.is_enabled());
        assert!(!value);
        assert!(other.is_enabled());
    }
}
