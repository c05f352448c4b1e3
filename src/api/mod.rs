//! API layer
//!
//! HTTP handlers for:
//! - Well-known discovery (WebFinger, NodeInfo links, host-meta)
//! - Local note objects
//! - Metrics (Prometheus)
//!
//! Federation routes themselves are not listed here: they are resolved at
//! request time by the runtime through [`crate::bridge::federation_entry`].

pub mod metrics;
mod objects;
mod wellknown;

pub use metrics::metrics_router;
pub use objects::objects_router;
pub use wellknown::wellknown_router;
