//! Flowchat Gateway HTTP API Server
//!
//! Serves chat turns (JSON or SSE), follow-up pickup, execution polling and health.

pub mod api_error;
pub mod chat_api;
pub mod client;
pub mod health_api;
pub mod server;

pub use server::{build_router, cors_layer, start_server, GatewayState};
