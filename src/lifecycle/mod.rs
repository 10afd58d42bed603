//! Lifecycle subsystem.
//!
//! # Data Flow
//! ```text
//! main → signals.rs (Ctrl+C / SIGTERM)
//!      → shutdown.rs (broadcast)
//!      → HttpServer::run stops accepting, drains in-flight exchanges
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
