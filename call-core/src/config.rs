use chrono::Duration;

use crate::retry::RetryPolicy;

/// Tunables of the call layer.
///
/// Build with `CallConfig::default()` and adjust with the `with_*` methods.
#[derive(Clone, Debug)]
pub struct CallConfig {
    /// STUN/TURN urls handed to the peer connection.
    pub ice_servers: Vec<String>,
    /// Audio input to capture from, `None` lets the browser pick.
    pub input_device: Option<String>,
    /// How often an established connection is probed.
    pub health_probe_interval: Duration,
    /// How long a degraded connection may take to recover before it counts
    /// as failed.
    pub degraded_timeout: Duration,
    /// Upper bound from call start until the first usable network path.
    pub negotiation_timeout: Duration,
    /// Signals held back while the relay is unreachable. Oldest are dropped
    /// first.
    pub outbox_capacity: usize,
    /// Starting remote audio playback.
    pub playback_retry: RetryPolicy,
    /// Re-opening the relay connection.
    pub relay_retry: RetryPolicy,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_owned()],
            input_device: None,
            health_probe_interval: Duration::seconds(2),
            degraded_timeout: Duration::seconds(10),
            negotiation_timeout: Duration::seconds(30),
            outbox_capacity: 64,
            playback_retry: RetryPolicy::new(5, Duration::milliseconds(250)),
            relay_retry: RetryPolicy::new(8, Duration::milliseconds(500))
                .with_max_delay(Duration::seconds(15)),
        }
    }
}

impl CallConfig {
    pub fn with_ice_servers(mut self, urls: Vec<String>) -> Self {
        self.ice_servers = urls;
        self
    }

    pub fn with_input_device(mut self, device_id: Option<String>) -> Self {
        self.input_device = device_id;
        self
    }

    pub fn with_health_probe_interval(mut self, interval: Duration) -> Self {
        self.health_probe_interval = interval;
        self
    }

    pub fn with_degraded_timeout(mut self, timeout: Duration) -> Self {
        self.degraded_timeout = timeout;
        self
    }

    pub fn with_negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout = timeout;
        self
    }

    pub fn with_outbox_capacity(mut self, capacity: usize) -> Self {
        self.outbox_capacity = capacity;
        self
    }

    pub fn with_playback_retry(mut self, policy: RetryPolicy) -> Self {
        self.playback_retry = policy;
        self
    }

    pub fn with_relay_retry(mut self, policy: RetryPolicy) -> Self {
        self.relay_retry = policy;
        self
    }
}
