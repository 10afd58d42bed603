//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID + trace layers)
//!     → request.rs (repository path, Git-Protocol, body reader)
//!     → [backend locator picks the backend]
//!     → git::UploadPackBridge streams into the response adapter
//!     → server.rs commits headers on first byte or maps the failure to a status
//! ```

pub mod request;
pub mod server;

pub use request::{RequestIdExt, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
