//! HTTP surface: `WebSocket` upgrade handlers, producer ingestion endpoints,
//! request identity and the error-to-response mapping.

pub mod errors;
pub mod events;
pub mod identity;
pub mod ws;

pub use errors::ApiError;
pub use identity::Identity;
