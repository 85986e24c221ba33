//! Exponential backoff with jitter for broker reconnection.

use std::time::Duration;

use rand::Rng;

/// Reconnection backoff configuration.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Exponential backoff calculator with jitter.
pub struct ReconnectBackoff {
    config: BackoffConfig,
    current_delay_ms: u64,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconnectBackoff {
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    pub fn with_config(config: BackoffConfig) -> Self {
        let initial = config.initial_delay_ms;
        Self {
            config,
            current_delay_ms: initial,
        }
    }

    /// Delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current_delay_ms;

        let next = (base as f64 * self.config.multiplier).min(self.config.max_delay_ms as f64);
        self.current_delay_ms = next as u64;

        let jittered = if self.config.jitter_factor > 0.0 {
            let range = base as f64 * self.config.jitter_factor;
            let jitter = rand::rng().random_range(-range..=range);
            (base as f64 + jitter).max(1.0) as u64
        } else {
            base
        };

        Duration::from_millis(jittered)
    }

    /// Reset after a successful connection.
    pub fn reset(&mut self) {
        self.current_delay_ms = self.config.initial_delay_ms;
    }
}
