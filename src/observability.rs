//! tracing subscriber setup and the run-level events the CLI emits.

use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::backfill::{BackfillRequest, BackfillResult};
use crate::config::AppConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Single-line human-readable events.
    #[default]
    Compact,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "compact" | "text" => Some(Self::Compact),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Json => "json",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, e.g. `info` or `bitget_history=debug`.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("invalid log filter '{filter}': {message}")]
    InvalidFilter { filter: String, message: String },
    #[error("failed to install tracing subscriber: {0}")]
    Install(String),
}

/// Installs the global subscriber on stderr, keeping stdout for the report.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let filter = EnvFilter::try_new(&config.level).map_err(|err| LoggingInitError::InvalidFilter {
        filter: config.level.clone(),
        message: err.to_string(),
    })?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = match config.format {
        LogFormat::Compact => builder.compact().with_target(false).try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|err| LoggingInitError::Install(err.to_string()))
}

pub fn log_run_start(cfg: &AppConfig, req: &BackfillRequest) {
    info!(
        component = "bitget_history",
        event = "run.start",
        symbol = %req.symbol,
        granularity = %req.granularity,
        product_type = %req.product_type,
        start_date = ?req.start_date,
        mode = ?req.mode(),
        base_url = %cfg.http.base_url,
        pace_ms = cfg.backfill.pace_ms,
        max_batches = ?cfg.backfill.max_batches,
        log_format = cfg.logging.format.as_str()
    );
}

pub fn log_run_finish(req: &BackfillRequest, result: &BackfillResult) {
    match (result.series.first(), result.series.last()) {
        (Some(first), Some(last)) => info!(
            component = "bitget_history",
            event = "run.finish",
            symbol = %req.symbol,
            rows = result.series.len(),
            batches = result.batches_fetched,
            reason = result.stop_reason.as_str(),
            first = %first.timestamp,
            last = %last.timestamp
        ),
        _ => info!(
            component = "bitget_history",
            event = "run.finish",
            symbol = %req.symbol,
            rows = 0usize,
            batches = result.batches_fetched,
            reason = result.stop_reason.as_str()
        ),
    }
}
