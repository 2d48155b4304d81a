//! Backward pagination over the history-candles endpoint.
//!
//! Without a start date a single un-bounded batch is fetched. With one, batches
//! are requested with a decreasing `endTime` cursor until the endpoint runs out
//! of data, a request fails, or the oldest candle reaches the start date; the
//! batches are then merged, de-duplicated, sorted and trimmed to the start date.

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use tracing::{info, warn};

use crate::candles::{merge_batches, CandleSeries};
use crate::history_candles::{
    BatchFetcher, BatchOutcome, HistoryCandlesClient, HistoryCandlesConfig, HistoryCandlesError,
    HistoryCandlesRequest, DEFAULT_PRODUCT_TYPE,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillRequest {
    pub symbol: String,
    pub granularity: String,
    pub product_type: String,
    pub start_date: Option<NaiveDate>,
}

impl BackfillRequest {
    pub fn new(symbol: impl Into<String>, granularity: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            granularity: granularity.into(),
            product_type: DEFAULT_PRODUCT_TYPE.to_string(),
            start_date: None,
        }
    }

    pub fn with_product_type(mut self, product_type: impl Into<String>) -> Self {
        self.product_type = product_type.into();
        self
    }

    pub fn with_start_date(mut self, start_date: NaiveDate) -> Self {
        self.start_date = Some(start_date);
        self
    }

    pub fn mode(&self) -> BackfillMode {
        if self.start_date.is_some() {
            BackfillMode::FullBackfill
        } else {
            BackfillMode::LatestOnly
        }
    }

    /// UTC midnight of the start date, in epoch milliseconds.
    pub fn start_bound_ms(&self) -> Option<i64> {
        self.start_date
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|midnight| midnight.and_utc().timestamp_millis())
    }

    fn batch_request(&self) -> HistoryCandlesRequest {
        HistoryCandlesRequest::new(
            self.symbol.clone(),
            self.granularity.clone(),
            self.product_type.clone(),
        )
    }
}

/// Parses a `YYYY-MM-DD` start date.
pub fn parse_start_date(raw: &str) -> Result<NaiveDate, BackfillError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| BackfillError::InvalidStartDate {
        value: raw.to_string(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillMode {
    LatestOnly,
    FullBackfill,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Single-batch mode finished with data.
    LatestOnly,
    /// The endpoint answered "no data".
    NoData,
    /// The oldest candle reached the start date.
    ReachedStart,
    /// A request after the first successful batch failed.
    FetchFailed(String),
    /// The endpoint returned candles newer than the requested cursor.
    CursorStalled { end_time_ms: i64, oldest_ms: i64 },
    /// `BackfillConfig::max_batches` was reached.
    MaxBatches,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LatestOnly => "latest_only",
            Self::NoData => "no_data",
            Self::ReachedStart => "reached_start",
            Self::FetchFailed(_) => "fetch_failed",
            Self::CursorStalled { .. } => "cursor_stalled",
            Self::MaxBatches => "max_batches",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillConfig {
    /// Delay between consecutive batch requests.
    pub pace_ms: u64,
    /// Upper bound on successful batches; `None` pages until a stop condition.
    /// At least one batch is always requested.
    pub max_batches: Option<u32>,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            pace_ms: 200,
            max_batches: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackfillResult {
    pub series: CandleSeries,
    pub mode: BackfillMode,
    pub stop_reason: StopReason,
    pub batches_fetched: u32,
    pub duplicates_removed: u64,
    pub rows_before_start_removed: u64,
}

#[derive(Debug, Error)]
pub enum BackfillError {
    #[error("invalid start date '{value}', expected YYYY-MM-DD")]
    InvalidStartDate { value: String },
    #[error("HTTP client setup failed: {0}")]
    ClientSetup(#[source] HistoryCandlesError),
    #[error("first batch request failed: {0}")]
    FirstBatchFailed(#[source] HistoryCandlesError),
}

/// Called between batch requests, never after the last one.
pub trait Pacer {
    fn pace(&mut self);
}

impl<F> Pacer for F
where
    F: FnMut(),
{
    fn pace(&mut self) {
        self()
    }
}

/// Blocks the calling thread for a fixed delay.
#[derive(Debug, Clone, Copy)]
pub struct SleepPacer {
    delay: std::time::Duration,
}

impl SleepPacer {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay: std::time::Duration::from_millis(delay_ms),
        }
    }
}

impl Pacer for SleepPacer {
    fn pace(&mut self) {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
    }
}

/// Progress hooks. All methods default to no-ops.
pub trait BackfillObserver {
    fn on_request(&mut self, _iteration: u32, _end_time_ms: Option<i64>) {}
    fn on_batch(&mut self, _iteration: u32, _batch: &CandleSeries) {}
    fn on_stop(&mut self, _reason: &StopReason) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl BackfillObserver for NoopObserver {}

/// Reports each iteration as a tracing event.
#[derive(Debug, Clone)]
pub struct ProgressLogObserver {
    symbol: String,
}

impl ProgressLogObserver {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
        }
    }
}

impl BackfillObserver for ProgressLogObserver {
    fn on_request(&mut self, iteration: u32, end_time_ms: Option<i64>) {
        let before = end_time_ms
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "latest".to_string());
        info!(
            component = "backfill",
            event = "backfill.request",
            symbol = %self.symbol,
            iteration,
            before = %before
        );
    }

    fn on_batch(&mut self, iteration: u32, batch: &CandleSeries) {
        info!(
            component = "backfill",
            event = "backfill.batch",
            symbol = %self.symbol,
            iteration,
            rows = batch.len(),
            oldest_ms = ?batch.oldest_timestamp_ms(),
            newest_ms = ?batch.newest_timestamp_ms()
        );
    }

    fn on_stop(&mut self, reason: &StopReason) {
        info!(
            component = "backfill",
            event = "backfill.stop",
            symbol = %self.symbol,
            reason = reason.as_str()
        );
    }
}

/// Runs a backfill against the live endpoint, anchored at the current time.
pub fn fetch_history(
    req: &BackfillRequest,
    http_cfg: &HistoryCandlesConfig,
    cfg: &BackfillConfig,
) -> Result<BackfillResult, BackfillError> {
    let client = HistoryCandlesClient::new(http_cfg).map_err(BackfillError::ClientSetup)?;
    let mut pacer = SleepPacer::new(cfg.pace_ms);
    let mut observer = ProgressLogObserver::new(req.symbol.clone());
    fetch_history_with(&client, req, Utc::now(), cfg, &mut pacer, &mut observer)
}

/// Runs a backfill with an explicit fetcher, as-of instant, pacer and observer.
///
/// A failure of the very first request is an error. A failure of any later
/// request stops paging and the batches gathered so far are returned.
pub fn fetch_history_with<F, P, O>(
    fetcher: &F,
    req: &BackfillRequest,
    as_of: DateTime<Utc>,
    cfg: &BackfillConfig,
    pacer: &mut P,
    observer: &mut O,
) -> Result<BackfillResult, BackfillError>
where
    F: BatchFetcher + ?Sized,
    P: Pacer + ?Sized,
    O: BackfillObserver + ?Sized,
{
    let Some(start_bound_ms) = req.start_bound_ms() else {
        return fetch_latest(fetcher, req, observer);
    };

    info!(
        component = "backfill",
        event = "backfill.start",
        symbol = %req.symbol,
        granularity = %req.granularity,
        product_type = %req.product_type,
        start_bound_ms,
        as_of_ms = as_of.timestamp_millis()
    );

    let mut cursor = as_of.timestamp_millis();
    let mut batches: Vec<CandleSeries> = Vec::new();
    let mut iteration = 0u32;

    let stop_reason = loop {
        iteration += 1;
        observer.on_request(iteration, Some(cursor));

        let batch_req = req.batch_request().with_end_time_ms(cursor);
        let batch = match fetcher.fetch_batch(&batch_req) {
            Ok(BatchOutcome::Candles(batch)) => batch,
            Ok(BatchOutcome::NoData) => break StopReason::NoData,
            Err(err) if batches.is_empty() => {
                warn!(
                    component = "backfill",
                    event = "backfill.first_batch_failed",
                    symbol = %req.symbol,
                    error = %err
                );
                return Err(BackfillError::FirstBatchFailed(err));
            }
            Err(err) => {
                warn!(
                    component = "backfill",
                    event = "backfill.batch_failed",
                    symbol = %req.symbol,
                    iteration,
                    end_time_ms = cursor,
                    error = %err
                );
                break StopReason::FetchFailed(err.to_string());
            }
        };
        let Some(oldest_ms) = batch.oldest_timestamp_ms() else {
            break StopReason::NoData;
        };

        observer.on_batch(iteration, &batch);
        batches.push(batch);

        if oldest_ms > cursor {
            break StopReason::CursorStalled {
                end_time_ms: cursor,
                oldest_ms,
            };
        }
        // endTime is inclusive at millisecond resolution
        cursor = oldest_ms.saturating_sub(1);

        if oldest_ms <= start_bound_ms {
            break StopReason::ReachedStart;
        }
        if cfg
            .max_batches
            .is_some_and(|max| batches.len() as u64 >= u64::from(max))
        {
            break StopReason::MaxBatches;
        }

        pacer.pace();
    };

    observer.on_stop(&stop_reason);
    let batches_fetched = batches.len() as u32;
    let merged = merge_batches(batches, Some(start_bound_ms));

    info!(
        component = "backfill",
        event = "backfill.finish",
        symbol = %req.symbol,
        reason = stop_reason.as_str(),
        batches_fetched,
        rows = merged.series.len(),
        duplicates_removed = merged.duplicates_removed,
        rows_before_start_removed = merged.rows_before_start_removed
    );

    Ok(BackfillResult {
        series: merged.series,
        mode: BackfillMode::FullBackfill,
        stop_reason,
        batches_fetched,
        duplicates_removed: merged.duplicates_removed,
        rows_before_start_removed: merged.rows_before_start_removed,
    })
}

fn fetch_latest<F, O>(
    fetcher: &F,
    req: &BackfillRequest,
    observer: &mut O,
) -> Result<BackfillResult, BackfillError>
where
    F: BatchFetcher + ?Sized,
    O: BackfillObserver + ?Sized,
{
    observer.on_request(1, None);
    let outcome = fetcher
        .fetch_batch(&req.batch_request())
        .map_err(BackfillError::FirstBatchFailed)?;

    let (series, stop_reason) = match outcome {
        BatchOutcome::Candles(series) if !series.is_empty() => {
            observer.on_batch(1, &series);
            (series, StopReason::LatestOnly)
        }
        _ => (CandleSeries::new(), StopReason::NoData),
    };
    observer.on_stop(&stop_reason);

    info!(
        component = "backfill",
        event = "backfill.finish",
        symbol = %req.symbol,
        reason = stop_reason.as_str(),
        batches_fetched = u32::from(!series.is_empty()),
        rows = series.len()
    );

    Ok(BackfillResult {
        batches_fetched: u32::from(!series.is_empty()),
        series,
        mode: BackfillMode::LatestOnly,
        stop_reason,
        duplicates_removed: 0,
        rows_before_start_removed: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_bound_is_utc_midnight() {
        let req = BackfillRequest::new("BTCUSDT", "1D")
            .with_start_date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(req.start_bound_ms(), Some(1_704_067_200_000));
        assert_eq!(req.mode(), BackfillMode::FullBackfill);
        assert_eq!(BackfillRequest::new("BTCUSDT", "1D").mode(), BackfillMode::LatestOnly);
    }

    #[test]
    fn parse_start_date_rejects_other_formats() {
        assert_eq!(
            parse_start_date("2024-03-05").unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
        );
        assert!(matches!(
            parse_start_date("05/03/2024").unwrap_err(),
            BackfillError::InvalidStartDate { .. }
        ));
    }

    #[test]
    fn closures_act_as_pacers() {
        let mut calls = 0;
        {
            let mut pacer = || calls += 1;
            pacer.pace();
            pacer.pace();
        }
        assert_eq!(calls, 2);
    }
}
