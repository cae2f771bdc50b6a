use std::collections::HashSet;

use crate::flow::AugConfig;

/// Cross-field validation run after TOML parsing.
pub fn validate(config: &AugConfig) -> anyhow::Result<()> {
    if config.stream.chunk_size == 0 {
        anyhow::bail!("stream.chunk_size must be >= 1");
    }

    if config.cluster.nodes.is_empty() {
        anyhow::bail!("cluster.nodes must list at least one node");
    }
    let mut seen = HashSet::new();
    for node in &config.cluster.nodes {
        if node.is_empty() {
            anyhow::bail!("cluster.nodes must not contain empty names");
        }
        if !seen.insert(node.as_str()) {
            anyhow::bail!("cluster.nodes contains duplicate node {node:?}");
        }
    }

    if config.unit.cast_timeout.is_zero() {
        anyhow::bail!("unit.cast_timeout must be > 0");
    }

    Ok(())
}
