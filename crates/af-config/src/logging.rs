use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

// ---------------------------------------------------------------------------
// LogDomain
// ---------------------------------------------------------------------------

/// The event domains the runtime's log macros tag every event with.
///
/// Verbosity can be tuned per domain (see [`LoggingConfig::domains`]): the
/// runtime reads the `domain` field off each event and applies the matching
/// override before the event reaches any output layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogDomain {
    /// Cluster lifecycle: boot, topology, shutdown.
    Sys,
    /// Stream and pipeline flow.
    Pipe,
    /// Router and worker layer.
    Unit,
    /// Configuration handling.
    Conf,
}

impl LogDomain {
    pub const ALL: [LogDomain; 4] = [
        LogDomain::Sys,
        LogDomain::Pipe,
        LogDomain::Unit,
        LogDomain::Conf,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LogDomain::Sys => "sys",
            LogDomain::Pipe => "pipe",
            LogDomain::Unit => "unit",
            LogDomain::Conf => "conf",
        }
    }

    /// Parse the value of a `domain` event field. Events tagged with
    /// anything else (or nothing) are outside the domain system.
    pub fn from_field(value: &str) -> Option<Self> {
        match value {
            "sys" => Some(LogDomain::Sys),
            "pipe" => Some(LogDomain::Pipe),
            "unit" => Some(LogDomain::Unit),
            "conf" => Some(LogDomain::Conf),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// LoggingConfig
// ---------------------------------------------------------------------------

/// Logging configuration. Everything has a default, so the `[logging]`
/// section may be omitted from `augflow.toml` entirely.
///
/// Verbosity is controlled in two stages: `level` is the base filter for
/// every event, and `domains` tightens or loosens individual event domains:
///
/// ```toml
/// [logging]
/// level = "info"
///
/// [logging.domains]
/// unit = "debug"   # chatty router/worker tracing
/// sys  = "warn"    # quiet lifecycle noise
/// ```
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base level filter (`"error"` through `"trace"`).
    pub level: String,
    /// Per-domain verbosity overrides, matched against the `domain` field
    /// the runtime log macros inject.
    pub domains: HashMap<LogDomain, String>,
    /// Optional file for log output. A relative path resolves against the
    /// config file's parent directory.
    pub file: Option<PathBuf>,
    /// Output format: `plain` (human-readable) or `json` (structured).
    pub format: LogFormat,
}

impl LoggingConfig {
    /// Effective level for events tagged with `domain`.
    pub fn domain_level(&self, domain: LogDomain) -> &str {
        self.domains
            .get(&domain)
            .map(String::as_str)
            .unwrap_or(&self.level)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            domains: HashMap::new(),
            file: None,
            format: LogFormat::Plain,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Plain,
    Json,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
