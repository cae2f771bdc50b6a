use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::cluster::ClusterConfig;
use crate::logging::LoggingConfig;
use crate::stream::StreamConfig;
use crate::unit::UnitConfig;
use crate::validate;

// ---------------------------------------------------------------------------
// Raw TOML structure (intermediate representation)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(default)]
struct AugConfigRaw {
    cluster: ClusterConfig,
    stream: StreamConfig,
    unit: UnitConfig,
    logging: LoggingConfig,
}

impl Default for AugConfigRaw {
    fn default() -> Self {
        Self {
            cluster: ClusterConfig::default(),
            stream: StreamConfig::default(),
            unit: UnitConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// AugConfig (resolved, validated)
// ---------------------------------------------------------------------------

/// Top-level configuration, typically loaded from `augflow.toml`. Every
/// section is optional; an empty file yields a single-node cluster with the
/// documented stream and unit defaults.
#[derive(Debug)]
pub struct AugConfig {
    pub cluster: ClusterConfig,
    pub stream: StreamConfig,
    pub unit: UnitConfig,
    pub logging: LoggingConfig,
}

impl AugConfig {
    /// Read and parse an `augflow.toml` file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.as_ref().display()))?;
        content.parse()
    }
}

impl Default for AugConfig {
    fn default() -> Self {
        Self {
            cluster: ClusterConfig::default(),
            stream: StreamConfig::default(),
            unit: UnitConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl FromStr for AugConfig {
    type Err = anyhow::Error;

    /// Parse a TOML string into a resolved, validated [`AugConfig`].
    fn from_str(toml_str: &str) -> anyhow::Result<Self> {
        let raw: AugConfigRaw = toml::from_str(toml_str)?;

        let config = AugConfig {
            cluster: raw.cluster,
            stream: raw.stream,
            unit: raw.unit,
            logging: raw.logging,
        };

        validate::validate(&config)?;

        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
