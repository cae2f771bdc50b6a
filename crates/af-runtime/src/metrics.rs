use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared runtime metrics store.
///
/// Counters are lock-free atomics updated from the cast path and cluster
/// lifecycle; hosts snapshot or render them on their own schedule.
#[derive(Default)]
pub struct FlowMetrics {
    casts_total: AtomicU64,
    cast_errors_total: AtomicU64,
    calls_total: AtomicU64,
    pipelines_attached: AtomicU64,
}

impl FlowMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_casts(&self) {
        self.casts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cast_errors(&self) {
        self.cast_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_calls(&self) {
        self.calls_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_pipelines_attached(&self) {
        self.pipelines_attached.fetch_add(1, Ordering::Relaxed);
    }

    pub fn casts(&self) -> u64 {
        self.casts_total.load(Ordering::Relaxed)
    }

    pub fn cast_errors(&self) -> u64 {
        self.cast_errors_total.load(Ordering::Relaxed)
    }

    pub fn calls(&self) -> u64 {
        self.calls_total.load(Ordering::Relaxed)
    }

    pub fn pipelines(&self) -> u64 {
        self.pipelines_attached.load(Ordering::Relaxed)
    }

    /// Render all counters in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(512);
        let counters = [
            ("augflow_casts_total", self.casts()),
            ("augflow_cast_errors_total", self.cast_errors()),
            ("augflow_calls_total", self.calls()),
            ("augflow_pipelines_attached", self.pipelines()),
        ];
        for (name, value) in counters {
            let _ = writeln!(out, "# TYPE {name} counter");
            let _ = writeln!(out, "{name} {value}");
        }
        out
    }
}
