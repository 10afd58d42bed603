//! Git smart HTTP subsystem (upload-pack).
//!
//! # Data Flow
//! ```text
//! HTTP request body
//!     → upload_pack.rs (bridge: deadline, RPC start, sidechannel open)
//!     → copy.rs inbound loop  (body → sidechannel, half-close at EOF)
//!     → copy.rs outbound loop (sidechannel → response.rs adapter)
//!     → upload_pack.rs awaits loops + RPC reply, closes sidechannel
//!     → error.rs (one classified outcome)
//! ```

pub mod copy;
pub mod error;
pub mod response;
pub mod upload_pack;

pub use copy::{CopyError, CopyResult, Direction};
pub use error::{OutcomeKind, TransportError, UploadPackError};
pub use response::HttpResponseWriter;
pub use upload_pack::{UploadPackBridge, UploadPackRequest, UploadPackSummary};
