//! # pulse-core
//!
//! Foundation types shared by every Pulse crate.
//!
//! - **Branded IDs**: `ConnectionId`, `TenantId`, `UserId`, `JobId`, `EventId`
//! - **Events**: [`LiveEvent`], the immutable ingested domain occurrence
//! - **Filters**: [`StreamFilter`] and the pure matcher used for fan-out
//! - **Envelopes**: [`Envelope`], the JSON object pushed to WebSocket clients
//! - **Jobs**: [`JobStatus`] / [`JobState`] as returned by the status collaborator
//! - **Collaborators**: async traits for the analytics and job-status sources
//! - **Errors**: `HubError` hierarchy via `thiserror`
//! - **Logging**: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod collaborators;
pub mod envelope;
pub mod errors;
pub mod event;
pub mod filter;
pub mod ids;
pub mod job;
pub mod logging;

pub use collaborators::{AnalyticsSource, JobStatusSource};
pub use envelope::{Envelope, MessageType};
pub use errors::{CollaboratorError, FilterError, HubError, Result};
pub use event::LiveEvent;
pub use filter::{FilterQuery, StreamFilter};
pub use ids::{ConnectionId, EventId, JobId, TenantId, UserId};
pub use job::{JobState, JobStatus};
