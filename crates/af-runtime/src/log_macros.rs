/// Domain-tagged logging macros.
///
/// Every runtime event belongs to one of four domains, carried as a
/// `domain` field: the formatter promotes it to a `[domain]` prefix and the
/// per-domain verbosity gate filters on it (`LoggingConfig::domains`).
/// One macro per domain keeps the tag next to the code that owns it; the
/// first argument names the `tracing` level macro to dispatch to, the rest
/// is any tracing-compatible field syntax:
///
/// ```ignore
/// af_sys!(info, nodes = 2, "cluster started");
/// af_unit!(warn, spec = %spec, error = %e, "cast failed");
/// ```

/// Cluster lifecycle events: boot, topology, shutdown.
macro_rules! af_sys {
    ($level:ident, $($rest:tt)*) => {
        tracing::$level!(domain = "sys", $($rest)*)
    };
}

/// Stream and pipeline flow events.
macro_rules! af_pipe {
    ($level:ident, $($rest:tt)*) => {
        tracing::$level!(domain = "pipe", $($rest)*)
    };
}

/// Router and worker layer events.
macro_rules! af_unit {
    ($level:ident, $($rest:tt)*) => {
        tracing::$level!(domain = "unit", $($rest)*)
    };
}

/// Configuration handling events.
macro_rules! af_conf {
    ($level:ident, $($rest:tt)*) => {
        tracing::$level!(domain = "conf", $($rest)*)
    };
}
