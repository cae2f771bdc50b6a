use std::time::Duration;

use serde::Deserialize;

use crate::types::HumanDuration;

/// Unit-layer configuration. All fields have defaults so the entire `[unit]`
/// section may be omitted from `augflow.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UnitConfig {
    /// Upper bound on waiting for a worker's reply to a routed call. A
    /// worker that dies mid-call surfaces within this bound.
    pub cast_timeout: HumanDuration,
    /// Default idle TTL for simple workers; `"0s"` disables idle expiry.
    pub worker_ttl: HumanDuration,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            cast_timeout: Duration::from_secs(5).into(),
            worker_ttl: Duration::from_secs(30).into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = UnitConfig::default();
        assert_eq!(cfg.cast_timeout.as_duration(), Duration::from_secs(5));
        assert_eq!(cfg.worker_ttl.as_duration(), Duration::from_secs(30));
    }
}
