//! Session layer configuration.

use std::time::Duration;

/// Timing knobs shared by both orchestrators.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// A pending negotiation older than this is cancelled by `expire_stale`.
    pub negotiation_timeout: Duration,
    /// Period of the background expiry sweeper.
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            negotiation_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5),
        }
    }
}

impl SessionConfig {
    pub fn with_negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}
