//! Runtime configuration for the hub and its HTTP listener.

use std::time::Duration;

use pulse_settings::PulseSettings;

/// Resolved, strongly-typed hub configuration.
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` = auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Interval between server Ping frames.
    pub ping_interval: Duration,
    /// Close after this long without any inbound frame.
    pub liveness_timeout: Duration,
    /// Interval between analytics pushes.
    pub analytics_interval: Duration,
    /// Period handed to the analytics source.
    pub analytics_period: String,
    /// Interval between job-status polls.
    pub job_poll_interval: Duration,
    /// Per-connection outbox depth.
    pub outbox_capacity: usize,
    /// Budget for flushing queued messages while closing.
    pub close_grace: Duration,
}

impl HubConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &PulseSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_connections: settings.server.max_connections,
            max_message_size: settings.server.max_message_size,
            ping_interval: settings.hub.ping_interval(),
            liveness_timeout: settings.hub.liveness_timeout(),
            analytics_interval: settings.hub.analytics_interval(),
            analytics_period: settings.hub.analytics_period.clone(),
            job_poll_interval: settings.hub.job_poll_interval(),
            outbox_capacity: settings.hub.outbox_capacity,
            close_grace: settings.hub.close_grace(),
        }
    }
}

impl Default for HubConfig {
    /// Settings defaults, bound to `127.0.0.1:0` for tests and embedding.
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            ..Self::from_settings(&PulseSettings::default())
        }
    }
}
