//! Hub timing and buffering settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Keepalive, ticker and outbox settings for the notification hub.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Interval between server-initiated Ping frames.
    pub ping_interval_secs: u64,
    /// Close a connection when nothing was received for this long.
    pub liveness_timeout_secs: u64,
    /// Interval between analytics snapshot pushes.
    pub analytics_interval_secs: u64,
    /// Period passed to the analytics collaborator (e.g. `24h`).
    pub analytics_period: String,
    /// Interval between job-status polls.
    pub job_poll_interval_secs: u64,
    /// Per-connection outbound queue depth. Pushes beyond it are dropped.
    pub outbox_capacity: usize,
    /// How long a closing connection may spend flushing its outbox.
    pub close_grace_ms: u64,
}

impl HubSettings {
    /// Ping interval as a [`Duration`].
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Liveness timeout as a [`Duration`].
    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_secs)
    }

    /// Analytics interval as a [`Duration`].
    pub fn analytics_interval(&self) -> Duration {
        Duration::from_secs(self.analytics_interval_secs)
    }

    /// Job poll interval as a [`Duration`].
    pub fn job_poll_interval(&self) -> Duration {
        Duration::from_secs(self.job_poll_interval_secs)
    }

    /// Close grace period as a [`Duration`].
    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            ping_interval_secs: 30,
            liveness_timeout_secs: 60,
            analytics_interval_secs: 10,
            analytics_period: "24h".to_string(),
            job_poll_interval_secs: 2,
            outbox_capacity: 256,
            close_grace_ms: 2_000,
        }
    }
}
