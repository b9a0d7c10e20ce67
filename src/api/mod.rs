//! HTTP surface of the pipeline: the trigger entry points, payload
//! classification, and error-to-status mapping.

pub mod error;
pub mod router;
pub mod server;
pub mod trigger;

pub use error::ApiError;
pub use router::app_router;
pub use server::{start_server, ServerHandle};
