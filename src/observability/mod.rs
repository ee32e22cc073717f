//! Observability: structured logging, security event emission and
//! Prometheus metrics.

pub mod metrics;
pub mod security;
#[cfg(feature = "server")]
mod tracing_init;

#[cfg(feature = "server")]
pub use tracing_init::*;
