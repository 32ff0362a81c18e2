/// Default number of host ticks between the first unsaved write and the flush
pub const DEFAULT_SAVE_DEBOUNCE_TICKS: u32 = 200;

/// Tick-driven debounce for blob flushes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveTimer {
    /// Nothing waiting to be written
    #[default]
    Idle,
    /// A flush is due once `remaining` reaches zero
    Pending { remaining: u32 },
}

impl SaveTimer {
    /// Start the countdown if idle. Returns `false` when a flush was already
    /// pending, in which case the write coalesces into it.
    pub fn arm(&mut self, ticks: u32) -> bool {
        match self {
            SaveTimer::Idle => {
                *self = SaveTimer::Pending {
                    remaining: ticks.max(1),
                };
                true
            }
            SaveTimer::Pending { .. } => false,
        }
    }

    /// Advance one tick. Returns `true` exactly once per pending window, on
    /// the tick that should flush.
    pub fn tick(&mut self) -> bool {
        match self {
            SaveTimer::Idle => false,
            SaveTimer::Pending { remaining } => {
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 {
                    *self = SaveTimer::Idle;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Drop any pending window. Returns `true` if one was pending.
    pub fn take_pending(&mut self) -> bool {
        std::mem::take(self).is_pending()
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, SaveTimer::Pending { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_ticks_do_nothing() {
        let mut timer = SaveTimer::default();
        assert!(!timer.tick());
        assert_eq!(timer, SaveTimer::Idle);
    }

    #[test]
    fn test_fires_once_after_window() {
        let mut timer = SaveTimer::Idle;
        assert!(timer.arm(3));
        assert!(!timer.tick());
        assert!(!timer.tick());
        assert!(timer.tick());
        assert!(!timer.tick());
        assert!(!timer.is_pending());
    }

    #[test]
    fn test_rearm_inside_window_keeps_deadline() {
        let mut timer = SaveTimer::Idle;
        timer.arm(2);
        timer.tick();
        assert!(!timer.arm(2));
        assert!(timer.tick());
    }

    #[test]
    fn test_zero_length_window_fires_next_tick() {
        let mut timer = SaveTimer::Idle;
        timer.arm(0);
        assert!(timer.tick());
    }

    #[test]
    fn test_take_pending() {
        let mut timer = SaveTimer::Idle;
        assert!(!timer.take_pending());
        timer.arm(DEFAULT_SAVE_DEBOUNCE_TICKS);
        assert!(timer.take_pending());
        assert_eq!(timer, SaveTimer::Idle);
    }
}
