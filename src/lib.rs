//! Git upload-pack proxy library.
//!
//! Relays git-upload-pack negotiations from Smart HTTP clients to a backend
//! RPC service over a correlated sidechannel, under a hard per-exchange
//! deadline.

pub mod backend;
pub mod config;
pub mod git;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::ProxyConfig;
pub use git::{UploadPackBridge, UploadPackError};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use resilience::DeadlineController;
