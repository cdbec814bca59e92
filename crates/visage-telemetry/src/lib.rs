mod metrics;

pub use metrics::{HistogramSummary, MetricValue, MetricsRecorder};

use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "visage_engine" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON-formatted log lines instead of human-readable ones.
    pub json_output: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json_output: false,
        }
    }
}

/// Handle returned by `init_telemetry` — owns the metrics recorder.
pub struct TelemetryGuard {
    metrics: Arc<MetricsRecorder>,
}

impl TelemetryGuard {
    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }
}

/// Initialize the telemetry subsystem. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let mut filter_str = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);
    if config.json_output {
        builder.json().init();
    } else {
        builder.init();
    }

    TelemetryGuard {
        metrics: Arc::new(MetricsRecorder::new()),
    }
}

/// Build a recorder without touching the global subscriber (tests, embedding).
pub fn recorder_only() -> Arc<MetricsRecorder> {
    Arc::new(MetricsRecorder::new())
}
