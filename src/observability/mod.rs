//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Domain servers, registry, router
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → diagnostics endpoint (/debug/metrics, Prometheus text)
//! ```
//!
//! # Design Decisions
//! - Structured fields (server, domain, stream_id) on every event
//! - Metric updates are cheap and safe without a recorder

pub mod logging;
pub mod metrics;
