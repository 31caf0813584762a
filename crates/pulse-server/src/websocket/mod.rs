//! WebSocket connection management, supervision, fan-out and background
//! publishers.

pub mod analytics;
pub mod broadcast;
pub mod connection;
pub mod heartbeat;
pub mod job_bridge;
pub mod registry;
pub mod session;
