use std::time::Duration;

use conduit_core::ScriptLimits;

/// Server-level configuration for the channel processing pipeline.
///
/// Controls script and delivery timeouts, fan-out width, and the resource
/// bounds handed to the script engine.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Upper bound on one filter or transformer run, in milliseconds.
    pub script_timeout_ms: u64,
    /// Upper bound on one destination send, in milliseconds.
    pub dispatch_timeout_ms: u64,
    /// Destinations delivered concurrently for a single message.
    pub max_concurrent_deliveries: usize,
    /// Limits enforced inside the script engine itself.
    pub script_limits: ScriptLimits,
}

impl ServerConfig {
    #[must_use]
    pub fn script_timeout(&self) -> Duration {
        Duration::from_millis(self.script_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            script_timeout_ms: 5_000,
            dispatch_timeout_ms: 10_000,
            max_concurrent_deliveries: 8,
            script_limits: ScriptLimits::default(),
        }
    }
}
