//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file may contain any subset of fields; missing fields keep their defaults.

mod hub;
mod server;

pub use hub::*;
pub use server::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "hub": { "outboxCapacity": 512 },
///   "upstream": { "baseUrl": "http://platform.internal" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PulseSettings {
    /// HTTP listener settings.
    pub server: ServerSettings,
    /// Hub timing and buffering.
    pub hub: HubSettings,
    /// Upstream platform collaborators.
    pub upstream: UpstreamSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl PulseSettings {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let hub = &self.hub;
        if hub.outbox_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "hub.outboxCapacity must be at least 1".into(),
            ));
        }
        if hub.ping_interval_secs == 0
            || hub.analytics_interval_secs == 0
            || hub.job_poll_interval_secs == 0
        {
            return Err(SettingsError::InvalidValue(
                "hub intervals must be at least 1 second".into(),
            ));
        }
        if hub.liveness_timeout_secs <= hub.ping_interval_secs {
            return Err(SettingsError::InvalidValue(format!(
                "hub.livenessTimeoutSecs ({}) must exceed hub.pingIntervalSecs ({})",
                hub.liveness_timeout_secs, hub.ping_interval_secs
            )));
        }
        if self.server.max_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxConnections must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn partial_json_keeps_defaults() {
        let settings: PulseSettings =
            serde_json::from_str(r#"{"hub":{"outboxCapacity":8}}"#).unwrap();
        assert_eq!(settings.hub.outbox_capacity, 8);
        assert_eq!(settings.hub.ping_interval_secs, 30);
        assert_eq!(settings.server.host, "0.0.0.0");
    }

    #[test]
    fn camel_case_on_the_wire() {
        let json = serde_json::to_value(PulseSettings::default()).unwrap();
        assert!(json["hub"]["livenessTimeoutSecs"].is_number());
        assert!(json["server"]["maxConnections"].is_number());
        assert!(json["upstream"]["baseUrl"].is_string());
    }

    #[test]
    fn zero_outbox_rejected() {
        let mut settings = PulseSettings::default();
        settings.hub.outbox_capacity = 0;
        assert_matches!(settings.validate(), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn liveness_must_exceed_ping() {
        let mut settings = PulseSettings::default();
        settings.hub.liveness_timeout_secs = 30;
        assert_matches!(settings.validate(), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn zero_interval_rejected() {
        let mut settings = PulseSettings::default();
        settings.hub.job_poll_interval_secs = 0;
        assert!(settings.validate().is_err());
    }
}
