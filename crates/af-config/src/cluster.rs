use serde::Deserialize;

/// Cluster topology: the named set of nodes this process hosts routers for.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Node names. Each node gets exactly one unit router.
    pub nodes: Vec<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            nodes: vec!["local".to_string()],
        }
    }
}
