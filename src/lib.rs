//! Bitget futures history-candle downloader.
//!
//! - `history_candles`: one bounded request to the history-candles endpoint
//! - `backfill`: backward pagination from an as-of instant to a start date
//! - `candles`: the ordered, de-duplicated series both of them produce
//! - `export`: CSV output
//! - `config`: `BITGET_*` environment settings

mod backfill;
mod candles;
mod config;
mod export;
mod history_candles;
mod observability;

pub use backfill::{
    fetch_history, fetch_history_with, parse_start_date, BackfillConfig, BackfillError,
    BackfillMode, BackfillObserver, BackfillRequest, BackfillResult, NoopObserver, Pacer,
    ProgressLogObserver, SleepPacer, StopReason,
};
pub use candles::{merge_batches, Candle, CandleSeries, MergedSeries};
pub use config::{
    AppConfig, ConfigError, ENV_BASE_URL, ENV_HTTP_TIMEOUT_MS, ENV_LOG_FORMAT, ENV_LOG_LEVEL,
    ENV_MAX_BATCHES, ENV_PACE_MS, ENV_USER_AGENT,
};
pub use export::{default_output_path, series_to_csv, write_series_csv, ExportError, CSV_HEADERS};
pub use history_candles::{
    decode_history_response, BatchFetcher, BatchOutcome, HistoryCandlesClient,
    HistoryCandlesConfig, HistoryCandlesError, HistoryCandlesRequest, HttpResponse,
    HttpTransport, ReqwestTransport, BITGET_API_BASE_URL, DEFAULT_PRODUCT_TYPE,
    HISTORY_CANDLES_PATH, KNOWN_GRANULARITIES, MAX_HISTORY_LIMIT,
};
pub use observability::{
    init_logging, log_run_finish, log_run_start, LogFormat, LoggingConfig, LoggingInitError,
};
