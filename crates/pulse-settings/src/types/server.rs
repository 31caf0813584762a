//! Server, upstream and logging settings.
//!
//! Grouped here because they are small and all concern the process edge.

use serde::{Deserialize, Serialize};

/// HTTP / WebSocket listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` = auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections across all tenants.
    pub max_connections: usize,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
            max_connections: 10_000,
            max_message_size: 64 * 1024,
        }
    }
}

/// Upstream platform collaborator settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpstreamSettings {
    /// Base URL of the platform API serving analytics and job status.
    pub base_url: String,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            timeout_ms: 5_000,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// `compact` or `json`.
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults() {
        let s = ServerSettings::default();
        assert_eq!(s.host, "0.0.0.0");
        assert_eq!(s.port, 8090);
        assert_eq!(s.max_message_size, 65_536);
    }

    #[test]
    fn upstream_defaults() {
        let u = UpstreamSettings::default();
        assert!(u.base_url.starts_with("http://"));
        assert_eq!(u.timeout_ms, 5_000);
    }

    #[test]
    fn logging_defaults() {
        let l = LoggingSettings::default();
        assert_eq!(l.level, "info");
        assert_eq!(l.format, "compact");
    }
}
