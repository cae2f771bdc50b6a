use std::time::Duration;

use serde::Deserialize;

use crate::types::HumanDuration;

/// Stream (sink) configuration. All fields have defaults so the entire
/// `[stream]` section may be omitted from `augflow.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Per-pull task budget: how many element tasks each `next` call may
    /// launch, and therefore the size of a full chunk.
    pub chunk_size: usize,
    /// Quiescence window after the last emitter drains, within which late
    /// `emit` calls can still revive the stream.
    pub done_timeout: HumanDuration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: 200,
            done_timeout: Duration::from_millis(200).into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = StreamConfig::default();
        assert_eq!(cfg.chunk_size, 200);
        assert_eq!(cfg.done_timeout.as_duration(), Duration::from_millis(200));
    }
}
