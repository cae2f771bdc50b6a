use std::collections::HashMap;
use std::fmt::{self as stdfmt, Write as _};
use std::path::Path;

use anyhow::Result;
use tracing::field::{Field, Visit};
use tracing::level_filters::LevelFilter;
use tracing::{Event, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::{FormatTime, SystemTime};
use tracing_subscriber::fmt::{self, FmtContext, FormatEvent};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use af_config::{LogDomain, LogFormat, LoggingConfig};

// ---------------------------------------------------------------------------
// DomainFormat — promotes the `domain` field to a `[domain]` prefix
// ---------------------------------------------------------------------------

/// Event formatter rendering the `domain` field injected by the `af_*!`
/// macros as a `[domain]` prefix instead of burying it among key=value
/// pairs:
///
/// ```text
/// 2026-08-01T10:02:44Z  INFO [sys] cluster started nodes=2
/// ```
///
/// Events without a `domain` field (e.g. from dependencies or the `log`
/// bridge) are rendered without the prefix.
pub struct DomainFormat {
    timer: SystemTime,
}

impl DomainFormat {
    pub fn new() -> Self {
        Self { timer: SystemTime }
    }
}

impl Default for DomainFormat {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, N> FormatEvent<S, N> for DomainFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'writer> fmt::FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: fmt::format::Writer<'_>,
        event: &Event<'_>,
    ) -> stdfmt::Result {
        if self.timer.format_time(&mut writer).is_err() {
            write!(writer, "<unknown time>")?;
        }
        write!(writer, " {:>5} ", event.metadata().level())?;

        let mut visitor = DomainExtractor::default();
        event.record(&mut visitor);

        if let Some(ref domain) = visitor.domain {
            write!(writer, "[{domain}] ")?;
        }
        write!(writer, "{}", visitor.message)?;
        if !visitor.other_fields.is_empty() {
            write!(writer, " {}", visitor.other_fields)?;
        }
        writeln!(writer)
    }
}

// ---------------------------------------------------------------------------
// DomainExtractor — separates domain/message from the other fields
// ---------------------------------------------------------------------------

#[derive(Default)]
struct DomainExtractor {
    domain: Option<String>,
    message: String,
    other_fields: String,
}

impl DomainExtractor {
    fn push_separator(&mut self) {
        if !self.other_fields.is_empty() {
            self.other_fields.push(' ');
        }
    }
}

impl Visit for DomainExtractor {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "domain" => self.domain = Some(value.to_string()),
            "message" => self.message = value.to_string(),
            name => {
                self.push_separator();
                write!(&mut self.other_fields, "{name}={value:?}").ok();
            }
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn stdfmt::Debug) {
        match field.name() {
            "domain" => {
                let s = format!("{value:?}");
                self.domain = Some(s.trim_matches('"').to_string());
            }
            "message" => {
                write!(&mut self.message, "{value:?}").ok();
            }
            name => {
                self.push_separator();
                write!(&mut self.other_fields, "{name}={value:?}").ok();
            }
        }
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.push_separator();
        write!(&mut self.other_fields, "{}={value}", field.name()).ok();
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.push_separator();
        write!(&mut self.other_fields, "{}={value}", field.name()).ok();
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.push_separator();
        write!(&mut self.other_fields, "{}={value}", field.name()).ok();
    }
}

// ---------------------------------------------------------------------------
// DomainGate — per-domain verbosity from `[logging.domains]`
// ---------------------------------------------------------------------------

/// Global gate applying the per-domain levels of
/// [`LoggingConfig::domains`]. An event tagged `domain = "unit"` passes
/// only if its level fits the configured maximum for `unit`; untagged
/// events (dependencies, the `log` bridge) and domains without an override
/// fall through to the base filter on the output layers.
struct DomainGate {
    levels: HashMap<LogDomain, LevelFilter>,
}

impl DomainGate {
    fn from_config(config: &LoggingConfig) -> Result<Self> {
        let mut levels = HashMap::new();
        for (domain, level) in &config.domains {
            let filter: LevelFilter = level.parse().map_err(|_| {
                anyhow::anyhow!(
                    "invalid level {level:?} for log domain {:?}",
                    domain.as_str()
                )
            })?;
            levels.insert(*domain, filter);
        }
        Ok(Self { levels })
    }
}

impl<S: Subscriber> Layer<S> for DomainGate {
    fn event_enabled(&self, event: &Event<'_>, _ctx: Context<'_, S>) -> bool {
        if self.levels.is_empty() {
            return true;
        }
        let mut field = DomainField::default();
        event.record(&mut field);
        let Some(domain) = field.value.as_deref().and_then(LogDomain::from_field) else {
            return true;
        };
        match self.levels.get(&domain) {
            Some(max) => event.metadata().level() <= max,
            None => true,
        }
    }
}

/// Visitor that reads only the `domain` field off an event.
#[derive(Default)]
struct DomainField {
    value: Option<String>,
}

impl Visit for DomainField {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "domain" {
            self.value = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn stdfmt::Debug) {
        if field.name() == "domain" {
            let s = format!("{value:?}");
            self.value = Some(s.trim_matches('"').to_string());
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Initialise the `tracing` subscriber stack from [`LoggingConfig`].
///
/// The stack is: the domain gate (per-domain verbosity), then a stderr
/// layer under the base level filter, then an optional unfiltered
/// non-blocking file layer. When a file layer is configured, the returned
/// [`WorkerGuard`] must stay alive for the life of the process; dropping it
/// flushes and closes the writer.
///
/// `RUST_LOG` takes precedence over the configured base level. `log`
/// records from `af-core` flow in through tracing-subscriber's
/// `tracing-log` bridge.
pub fn init_tracing(config: &LoggingConfig, base_dir: &Path) -> Result<Option<WorkerGuard>> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(&config.level)
            .map_err(|e| anyhow::anyhow!("invalid log level {:?}: {e}", config.level))?
    };
    let gate = DomainGate::from_config(config)?;
    let is_json = config.format == LogFormat::Json;

    let Some(ref file_path) = config.file else {
        // stderr only
        if is_json {
            tracing_subscriber::registry()
                .with(gate)
                .with(
                    fmt::layer()
                        .json()
                        .with_target(false)
                        .with_writer(std::io::stderr)
                        .with_filter(filter),
                )
                .init();
        } else {
            tracing_subscriber::registry()
                .with(gate)
                .with(
                    fmt::layer()
                        .event_format(DomainFormat::new())
                        .with_writer(std::io::stderr)
                        .with_filter(filter),
                )
                .init();
        }
        af_conf!(debug, format = ?config.format, "tracing initialised");
        return Ok(None);
    };

    // stderr + non-blocking file layer
    let resolved = if file_path.is_relative() {
        base_dir.join(file_path)
    } else {
        file_path.clone()
    };
    let file_name = resolved
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("log file path has no file name"))?
        .to_os_string();
    let dir = resolved
        .parent()
        .ok_or_else(|| anyhow::anyhow!("log file path has no parent directory"))?;
    std::fs::create_dir_all(dir)?;

    let file_appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    if is_json {
        tracing_subscriber::registry()
            .with(gate)
            .with(
                fmt::layer()
                    .json()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .with_filter(filter),
            )
            .with(
                fmt::layer()
                    .json()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(non_blocking),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(gate)
            .with(
                fmt::layer()
                    .event_format(DomainFormat::new())
                    .with_writer(std::io::stderr)
                    .with_filter(filter),
            )
            .with(
                fmt::layer()
                    .event_format(DomainFormat::new())
                    .with_ansi(false)
                    .with_writer(non_blocking),
            )
            .init();
    }
    af_conf!(debug, format = ?config.format, file = %resolved.display(), "tracing initialised");
    Ok(Some(guard))
}
