mod aggregate;
mod archive;
mod session;

pub use aggregate::{HistogramSummary, OperatorMetrics, OperatorSnapshot};
pub use archive::{ArchiveError, ArchiveTotals, ArchivedSummary, SummaryArchive};
pub use session::{
    AgentPerformance, ErrorRecord, HandoffRecord, SessionSummary, SessionTelemetry, TelemetryEvent,
};

use std::path::PathBuf;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "vita_llm" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Where closed-session summaries are archived. `None` disables the archive.
    pub archive_path: Option<PathBuf>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
            archive_path: Some(vita_home().join("database/summaries.db")),
        }
    }
}

/// Handle returned by [`init_telemetry`]; owns the optional summary archive.
pub struct TelemetryGuard {
    archive: Option<SummaryArchive>,
    filter: String,
}

impl TelemetryGuard {
    pub fn archive(&self) -> Option<&SummaryArchive> {
        self.archive.as_ref()
    }

    /// The effective filter directive when RUST_LOG is unset.
    pub fn filter(&self) -> &str {
        &self.filter
    }
}

fn filter_directive(config: &TelemetryConfig) -> String {
    let mut filter_str = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    filter_str
}

/// Initialize the telemetry subsystem. Call once at startup.
///
/// Logs go to stderr so stdout stays free for conversation output.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let filter_str = filter_directive(&config);
    let env_filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter())
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter())
            .boxed()
    };

    if let Err(e) = tracing_subscriber::registry().with(fmt_layer).try_init() {
        eprintln!("vita-telemetry: subscriber already installed: {e}");
    }

    let archive = config.archive_path.as_ref().and_then(|path| match SummaryArchive::open(path) {
        Ok(archive) => Some(archive),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to open summary archive");
            None
        }
    });

    TelemetryGuard { archive, filter: filter_str }
}

/// `~/.vita`, falling back to `/tmp/.vita` without a home directory.
pub fn vita_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".vita")
}
