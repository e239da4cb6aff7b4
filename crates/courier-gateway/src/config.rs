use std::time::Duration;

use courier_core::address::DEFAULT_COUNTRY_CODE;

/// Reconnect policy for transient transport failures.
#[derive(Clone, Debug)]
pub struct ReconnectPolicy {
    /// Fixed delay between attempts.
    pub delay: Duration,
    /// Attempts before giving up. 0 means retry forever.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(3),
            max_attempts: 10,
        }
    }
}

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Country code prepended by address normalization.
    pub default_country_code: String,
    /// How long `start` waits for a QR challenge or a connection before
    /// returning whatever state was reached.
    pub start_wait: Duration,
    pub reconnect: ReconnectPolicy,
    /// Capacity of the session-event broadcast channel.
    pub event_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_country_code: DEFAULT_COUNTRY_CODE.to_string(),
            start_wait: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
            event_capacity: 256,
        }
    }
}
