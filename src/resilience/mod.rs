//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Upload-pack request:
//!     → deadline.rs (controller derives an ExchangeContext from the timeout)
//!     → context shared by the RPC wait, the sidechannel and both copy loops
//!     → first cancellation reason is kept (deadline / client abort / done)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every suspension point races the context
//! - One shared cancellation handle per exchange, never one timer per call
//! - Timeout errors are distinct from other errors

pub mod deadline;

pub use deadline::{CancelReason, DeadlineController, ExchangeContext, FinishGuard};
