use std::cmp::min;
use std::time::Duration;

/// Delay sequence for retrying START while the receiver reports BUSY: starts at an initial
///  delay and grows by a configurable factor (in eighths) per step up to a ceiling.
pub struct ExponentialBackoff {
    next_delay: Duration,

    config_initial_delay: Duration,
    config_max_delay: Duration,
    config_factor_eighths: u32,
}

impl ExponentialBackoff {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        let result = ExponentialBackoff {
            next_delay: initial_delay,
            config_initial_delay: initial_delay,
            config_max_delay: max_delay,
            config_factor_eighths: 8*2,
        };

        assert!(result.config_factor_eighths >= 8);

        result
    }

    /// returns the delay to wait now, and advances to the following one
    #[must_use]
    pub fn next_delay(&mut self) -> Duration {
        let result = min(self.next_delay, self.config_max_delay);

        self.next_delay = (result * self.config_factor_eighths) / 8;
        self.next_delay = min(self.next_delay, self.config_max_delay);
        result
    }

    pub fn reset(&mut self) {
        self.next_delay = self.config_initial_delay;
    }
}
