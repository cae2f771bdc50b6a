pub mod cluster;
pub mod flow;
pub mod logging;
pub mod stream;
pub mod types;
pub mod unit;
pub mod validate;

pub use cluster::ClusterConfig;
pub use flow::AugConfig;
pub use logging::{LogDomain, LogFormat, LoggingConfig};
pub use stream::StreamConfig;
pub use types::HumanDuration;
pub use unit::UnitConfig;
