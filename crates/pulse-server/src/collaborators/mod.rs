//! Collaborator implementations: HTTP clients for the upstream platform and
//! in-memory sources for tests and local runs.

pub mod http;
pub mod memory;

pub use http::HttpCollaborators;
pub use memory::{InMemoryAnalytics, InMemoryJobs};
