//! # pulse-hubd
//!
//! Pulse notification hub binary: loads settings, wires the upstream
//! collaborators and starts the HTTP/WebSocket server.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use pulse_core::logging::{LogFormat, init_subscriber};
use pulse_core::{AnalyticsSource, JobStatusSource};
use pulse_server::collaborators::{HttpCollaborators, InMemoryAnalytics, InMemoryJobs};
use pulse_server::{HubConfig, PulseServer};
use pulse_settings::PulseSettings;

/// Pulse real-time notification hub.
#[derive(Parser, Debug)]
#[command(name = "pulse-hubd", about = "Pulse real-time notification hub")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `$PULSE_SETTINGS` or `~/.pulse/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Maximum concurrent connections (overrides settings).
    #[arg(long)]
    max_connections: Option<usize>,

    /// Serve without an upstream platform, using in-memory collaborators.
    #[arg(long)]
    offline: bool,
}

impl Cli {
    fn settings_path(&self) -> PathBuf {
        self.settings
            .clone()
            .unwrap_or_else(pulse_settings::settings_path)
    }

    /// Apply CLI overrides on top of loaded settings.
    fn hub_config(&self, settings: &PulseSettings) -> HubConfig {
        let mut config = HubConfig::from_settings(settings);
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(max) = self.max_connections {
            config.max_connections = max;
        }
        config
    }
}

type Collaborators = (Arc<dyn AnalyticsSource>, Arc<dyn JobStatusSource>);

fn collaborators(settings: &PulseSettings, offline: bool) -> Result<Collaborators> {
    if offline {
        tracing::warn!("offline mode: analytics and job status served from memory");
        return Ok((Arc::new(InMemoryAnalytics::new()), Arc::new(InMemoryJobs::new())));
    }
    let http = HttpCollaborators::new(
        settings.upstream.base_url.clone(),
        Duration::from_millis(settings.upstream.timeout_ms),
    )
    .context("Failed to build upstream HTTP client")?;
    tracing::info!(base_url = http.base_url(), "upstream collaborators configured");
    let http = Arc::new(http);
    Ok((http.clone(), http))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // Settings come first: they carry the log level.
    let settings_path = args.settings_path();
    let settings = pulse_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;

    init_subscriber(
        &settings.logging.level,
        LogFormat::parse(&settings.logging.format),
    );

    let metrics_handle = pulse_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let (analytics, jobs) = collaborators(&settings, args.offline)?;
    let config = args.hub_config(&settings);
    let close_grace = config.close_grace;
    let server = PulseServer::new(config, analytics, jobs, metrics_handle);

    let (addr, handle) = server
        .listen()
        .await
        .context("Failed to bind server")?;
    tracing::info!("Pulse hub listening on http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.hub().shutdown();
    if !server.hub().wait_until_drained(close_grace * 2).await {
        tracing::warn!(
            remaining = server.hub().registry().len(),
            "connections still open after close grace"
        );
    }
    let _ = handle.await;

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_defer_to_settings() {
        let cli = Cli::parse_from(["pulse-hubd"]);
        assert!(cli.host.is_none());
        assert!(cli.port.is_none());
        assert!(!cli.offline);
        let config = cli.hub_config(&PulseSettings::default());
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8090);
    }

    #[test]
    fn cli_overrides_settings() {
        let cli = Cli::parse_from([
            "pulse-hubd",
            "--host",
            "127.0.0.1",
            "--port",
            "0",
            "--max-connections",
            "5",
        ]);
        let config = cli.hub_config(&PulseSettings::default());
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 0);
        assert_eq!(config.max_connections, 5);
    }

    #[test]
    fn cli_explicit_settings_path() {
        let cli = Cli::parse_from(["pulse-hubd", "--settings", "/tmp/pulse.json"]);
        assert_eq!(cli.settings_path(), PathBuf::from("/tmp/pulse.json"));
    }

    #[test]
    fn offline_collaborators_need_no_upstream() {
        assert!(collaborators(&PulseSettings::default(), true).is_ok());
    }

    #[tokio::test]
    async fn server_boots_from_settings_file_and_shuts_down() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"host": "127.0.0.1", "port": 0}}"#).unwrap();

        let settings = pulse_settings::load_settings_from_path(&path).unwrap();
        let cli = Cli::parse_from(["pulse-hubd", "--offline"]);
        let (analytics, jobs) = collaborators(&settings, cli.offline).unwrap();
        let server = PulseServer::new(
            cli.hub_config(&settings),
            analytics,
            jobs,
            pulse_server::metrics::detached_handle(),
        );
        let (addr, handle) = server.listen().await.unwrap();

        let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        assert_eq!(resp.status(), 200);

        server.hub().shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("shutdown timed out")
            .expect("join error");
    }
}
