//! # pulse-server
//!
//! Axum HTTP + `WebSocket` notification hub.
//!
//! - `WebSocket` gateway: per-tenant event streams and per-job status streams
//! - Connection registry with tenant and job indexes
//! - Filtered event fan-out with a bounded, drop-newest outbox per connection
//! - Per-tenant analytics ticker and per-connection job-status poller
//! - Keepalive supervision, graceful shutdown, health and Prometheus metrics

#![deny(unsafe_code)]

pub mod api;
pub mod collaborators;
pub mod config;
pub mod health;
pub mod hub;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::HubConfig;
pub use hub::NotificationHub;
pub use server::PulseServer;
