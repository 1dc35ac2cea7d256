//! HTTP intake surface for the Minerva research engine: request handlers,
//! WebSocket progress streaming, and the background worker pool that binds
//! accepted tasks to orchestrations.

pub mod config;
pub mod http;
pub mod worker;
pub mod ws;

pub use config::Args;
pub use http::{router, ApiError, AppState};
pub use worker::TaskRunner;
