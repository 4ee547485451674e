//! Exponential backoff used when the sync stream has to be re-opened.

use std::time::Duration;

/// Parameters of the exponential backoff policy.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Base backoff time in seconds.
    pub base_seconds: f64,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Exponential factor applied on error count increments.
    pub factor: f64,
    /// Number of consecutive successful sessions required to decrease the error count.
    pub recovery_interval: usize,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_seconds: 1.0,
            max_backoff: Duration::from_secs(30),
            factor: 2.0,
            recovery_interval: 1,
        }
    }
}

/// Tracks the state of the exponential backoff algorithm.
#[derive(Debug)]
pub struct BackoffState {
    config: BackoffConfig,
    error_count: usize,
    success_streak: usize,
}

impl BackoffState {
    /// Creates a new tracker with the supplied configuration.
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            error_count: 0,
            success_streak: 0,
        }
    }

    /// Registers a failure and returns the recommended delay before retrying.
    pub fn register_error(&mut self) -> Duration {
        self.success_streak = 0;
        self.error_count = self.error_count.saturating_add(1);
        let exponent = self.error_count.saturating_sub(1);
        // powi takes an i32; anything past the cap is clamped by max_backoff anyway.
        let capped_exponent = exponent.min(100) as i32;
        let backoff_secs = self.config.base_seconds * self.config.factor.powi(capped_exponent);
        let capped = backoff_secs
            .min(self.config.max_backoff.as_secs_f64())
            .max(0.0);
        Duration::from_secs_f64(capped)
    }

    /// Registers a success and decreases the error count once the streak is long enough.
    pub fn register_success(&mut self) {
        if self.config.recovery_interval == 0 {
            self.error_count = 0;
            self.success_streak = 0;
            return;
        }

        self.success_streak = self.success_streak.saturating_add(1);
        if self.success_streak >= self.config.recovery_interval {
            self.error_count = 0;
            self.success_streak = 0;
        }
    }

    /// Number of failures since the last recovery.
    pub fn error_count(&self) -> usize {
        self.error_count
    }
}
