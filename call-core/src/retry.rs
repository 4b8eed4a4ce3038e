use chrono::Duration;

/// Bounded exponential backoff.
///
/// Attempt `0` is the first try and never waits. Retries wait
/// `initial_delay * factor^(n-1)`, capped at `max_delay`, until
/// `max_attempts` tries have been made.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            factor: 1.5,
            max_delay: Duration::seconds(10),
        }
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// How long to wait before try number `attempt`, `None` once the budget
    /// is spent.
    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        if attempt == 0 {
            return Some(Duration::zero());
        }
        let scale = self.factor.powi(attempt as i32 - 1);
        let millis = self.initial_delay.num_milliseconds() as f64 * scale;
        let cap = self.max_delay.num_milliseconds();
        Some(Duration::milliseconds((millis as i64).min(cap)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::milliseconds(200))
    }
}
