#[macro_use]
mod log_macros;

pub mod cluster;
pub mod error;
pub mod metrics;
pub mod tracing_init;

pub use cluster::{Cluster, ClusterBuilder};
pub use error::{RuntimeError, RuntimeReason, RuntimeResult};
pub use metrics::FlowMetrics;
