//! # pulse-settings
//!
//! Configuration for the Pulse notification hub.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`PulseSettings::default()`]
//! 2. **Settings file**: `~/.pulse/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `PULSE_*` overrides (highest priority)
//!
//! Settings are loaded once by the binary and passed down explicitly; there
//! is no global instance.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = PulseSettings::default();
        let _path = settings_path();
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = PulseSettings::default();
        assert_eq!(settings.server.port, 8090);
        assert_eq!(settings.hub.ping_interval_secs, 30);
        assert_eq!(settings.hub.liveness_timeout_secs, 60);
        assert_eq!(settings.hub.analytics_interval_secs, 10);
        assert_eq!(settings.hub.job_poll_interval_secs, 2);
        assert_eq!(settings.logging.level, "info");
        assert!(settings.validate().is_ok());
    }
}
