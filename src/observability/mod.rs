//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Bridge / server / config reload produce:
//!     → logging.rs (tracing subscriber, text or JSON)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → stdout log aggregation
//!     → Prometheus scrape endpoint
//! ```
//!
//! # Design Decisions
//! - Request ID and sidechannel ID are logged as structured fields
//! - Metrics are cheap and silently dropped when no exporter is installed

pub mod logging;
pub mod metrics;
