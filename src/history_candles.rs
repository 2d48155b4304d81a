//! Single-batch access to the Bitget mix-market history-candles endpoint.

use chrono::{TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::candles::{Candle, CandleSeries};

pub const BITGET_API_BASE_URL: &str = "https://api.bitget.com";
pub const HISTORY_CANDLES_PATH: &str = "/api/v2/mix/market/history-candles";
/// Largest `limit` the endpoint accepts, also the default.
pub const MAX_HISTORY_LIMIT: u32 = 200;
pub const DEFAULT_PRODUCT_TYPE: &str = "usdt-futures";

/// Granularities documented for the endpoint. Requests pass any value through
/// untouched; the CLI warns when one is not listed here.
pub const KNOWN_GRANULARITIES: [&str; 13] = [
    "1m", "3m", "5m", "15m", "30m", "1H", "4H", "6H", "12H", "1D", "3D", "1W", "1M",
];

const SUCCESS_CODE: &str = "00000";
const NO_DATA_MSG: &str = "no data";
const ROW_COLUMNS: usize = 7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryCandlesRequest {
    pub symbol: String,
    pub granularity: String,
    pub product_type: String,
    pub limit: u32,
    pub start_time_ms: Option<i64>,
    pub end_time_ms: Option<i64>,
}

impl HistoryCandlesRequest {
    pub fn new(
        symbol: impl Into<String>,
        granularity: impl Into<String>,
        product_type: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            granularity: granularity.into(),
            product_type: product_type.into(),
            limit: MAX_HISTORY_LIMIT,
            start_time_ms: None,
            end_time_ms: None,
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_start_time_ms(mut self, start_time_ms: i64) -> Self {
        self.start_time_ms = Some(start_time_ms);
        self
    }

    pub fn with_end_time_ms(mut self, end_time_ms: i64) -> Self {
        self.end_time_ms = Some(end_time_ms);
        self
    }

    pub fn validate(&self) -> Result<(), HistoryCandlesError> {
        if self.symbol.trim().is_empty() {
            return Err(HistoryCandlesError::InvalidRequest(
                "symbol must not be empty".to_string(),
            ));
        }
        if self.limit == 0 || self.limit > MAX_HISTORY_LIMIT {
            return Err(HistoryCandlesError::InvalidRequest(format!(
                "limit must be within 1..={MAX_HISTORY_LIMIT}, got {}",
                self.limit
            )));
        }
        if let (Some(start), Some(end)) = (self.start_time_ms, self.end_time_ms) {
            if end < start {
                return Err(HistoryCandlesError::InvalidRequest(format!(
                    "endTime {end} precedes startTime {start}"
                )));
            }
        }
        Ok(())
    }

    /// Query parameters in the order the endpoint documents them.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("symbol", self.symbol.clone()),
            ("granularity", self.granularity.clone()),
            ("productType", self.product_type.clone()),
            ("limit", self.limit.to_string()),
        ];
        if let Some(start) = self.start_time_ms {
            pairs.push(("startTime", start.to_string()));
        }
        if let Some(end) = self.end_time_ms {
            pairs.push(("endTime", end.to_string()));
        }
        pairs
    }
}

/// Successful result of one request: either candles or the endpoint's
/// explicit "no data" answer.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    Candles(CandleSeries),
    NoData,
}

impl BatchOutcome {
    pub fn into_series(self) -> CandleSeries {
        match self {
            Self::Candles(series) => series,
            Self::NoData => CandleSeries::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryCandlesConfig {
    pub base_url: String,
    pub http_timeout_ms: u64,
    pub user_agent: String,
}

impl Default for HistoryCandlesConfig {
    fn default() -> Self {
        Self {
            base_url: BITGET_API_BASE_URL.to_string(),
            http_timeout_ms: 15_000,
            user_agent: concat!("bitget_history/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum HistoryCandlesError {
    #[error("invalid history-candles request: {0}")]
    InvalidRequest(String),
    #[error("HTTP client build error: {0}")]
    HttpClientBuild(String),
    #[error("HTTP request failed for {url}: {message}")]
    HttpRequest { url: String, message: String },
    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("candle row has {found} columns, expected at least {expected}")]
    InvalidRowColumns { found: usize, expected: usize },
    #[error("failed to parse field {field} value '{value}'")]
    ParseField { field: &'static str, value: String },
    #[error("candle timestamp out of range: {0}")]
    InvalidTimestamp(i64),
    #[error("API error {code}: {msg}")]
    Api { code: String, msg: String },
}

/// One bounded request against the history-candles endpoint.
pub trait BatchFetcher {
    fn fetch_batch(&self, req: &HistoryCandlesRequest)
        -> Result<BatchOutcome, HistoryCandlesError>;
}

impl<F> BatchFetcher for F
where
    F: Fn(&HistoryCandlesRequest) -> Result<BatchOutcome, HistoryCandlesError>,
{
    fn fetch_batch(
        &self,
        req: &HistoryCandlesRequest,
    ) -> Result<BatchOutcome, HistoryCandlesError> {
        self(req)
    }
}

/// Status and body of one HTTP exchange, before any envelope decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Byte-level GET underneath [`HistoryCandlesClient`].
pub trait HttpTransport {
    fn get(&self, url: &reqwest::Url) -> Result<HttpResponse, HistoryCandlesError>;
}

pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new(cfg: &HistoryCandlesConfig) -> Result<Self, HistoryCandlesError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_millis(cfg.http_timeout_ms))
            .user_agent(cfg.user_agent.clone())
            .build()
            .map_err(|err| HistoryCandlesError::HttpClientBuild(err.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&self, url: &reqwest::Url) -> Result<HttpResponse, HistoryCandlesError> {
        let transport_error = |err: reqwest::Error| HistoryCandlesError::HttpRequest {
            url: url.to_string(),
            message: err.to_string(),
        };

        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(transport_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().map_err(transport_error)?;

        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

pub struct HistoryCandlesClient<T = ReqwestTransport> {
    transport: T,
    base_url: String,
}

impl HistoryCandlesClient<ReqwestTransport> {
    pub fn new(cfg: &HistoryCandlesConfig) -> Result<Self, HistoryCandlesError> {
        Ok(Self::with_transport(cfg, ReqwestTransport::new(cfg)?))
    }
}

impl<T: HttpTransport> HistoryCandlesClient<T> {
    pub fn with_transport(cfg: &HistoryCandlesConfig, transport: T) -> Self {
        Self {
            transport,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn endpoint_url(
        &self,
        req: &HistoryCandlesRequest,
    ) -> Result<reqwest::Url, HistoryCandlesError> {
        let raw = format!("{}{HISTORY_CANDLES_PATH}", self.base_url);
        let mut url = reqwest::Url::parse(&raw).map_err(|err| {
            HistoryCandlesError::InvalidRequest(format!("invalid base url '{raw}': {err}"))
        })?;
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in req.query_pairs() {
                query.append_pair(key, &value);
            }
        }
        Ok(url)
    }
}

impl<T: HttpTransport> BatchFetcher for HistoryCandlesClient<T> {
    fn fetch_batch(
        &self,
        req: &HistoryCandlesRequest,
    ) -> Result<BatchOutcome, HistoryCandlesError> {
        req.validate()?;
        let url = self.endpoint_url(req)?;
        debug!(
            component = "history_candles",
            event = "history_candles.request",
            symbol = %req.symbol,
            granularity = %req.granularity,
            product_type = %req.product_type,
            end_time_ms = ?req.end_time_ms,
            url = %url
        );

        let response = self.transport.get(&url)?;
        if !response.is_success() {
            // Bitget reports request errors as 4xx with a regular envelope.
            return Err(match decode_history_response(&response.body) {
                Err(err @ HistoryCandlesError::Api { .. }) => err,
                _ => HistoryCandlesError::HttpRequest {
                    url: url.to_string(),
                    message: format!("unexpected HTTP status {}", response.status),
                },
            });
        }

        let outcome = decode_history_response(&response.body)?;
        match &outcome {
            BatchOutcome::Candles(series) => debug!(
                component = "history_candles",
                event = "history_candles.batch",
                symbol = %req.symbol,
                rows = series.len(),
                oldest_ms = ?series.oldest_timestamp_ms(),
                newest_ms = ?series.newest_timestamp_ms()
            ),
            BatchOutcome::NoData => debug!(
                component = "history_candles",
                event = "history_candles.no_data",
                symbol = %req.symbol,
                end_time_ms = ?req.end_time_ms
            ),
        }
        Ok(outcome)
    }
}

#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    code: String,
    #[serde(default)]
    msg: String,
    // only read as rows once the code says success
    #[serde(default)]
    data: Value,
}

/// Decodes a response body into a batch. Any unparsable row fails the whole batch.
pub fn decode_history_response(body: &[u8]) -> Result<BatchOutcome, HistoryCandlesError> {
    let envelope: ResponseEnvelope = serde_json::from_slice(body)?;

    if envelope.code != SUCCESS_CODE {
        if envelope.msg.trim().eq_ignore_ascii_case(NO_DATA_MSG) {
            return Ok(BatchOutcome::NoData);
        }
        warn!(
            component = "history_candles",
            event = "history_candles.api_error",
            code = %envelope.code,
            msg = %envelope.msg
        );
        return Err(HistoryCandlesError::Api {
            code: envelope.code,
            msg: envelope.msg,
        });
    }

    let rows = match envelope.data {
        Value::Null => return Ok(BatchOutcome::NoData),
        Value::Array(rows) if rows.is_empty() => return Ok(BatchOutcome::NoData),
        Value::Array(rows) => rows,
        other => return Err(parse_field_error(&other, "data")),
    };

    let candles = rows
        .iter()
        .map(parse_candle_row)
        .collect::<Result<Vec<_>, _>>()?;
    let (series, duplicates_removed) = CandleSeries::from_rows(candles);
    if duplicates_removed > 0 {
        debug!(
            component = "history_candles",
            event = "history_candles.batch.duplicates",
            duplicates_removed
        );
    }

    Ok(BatchOutcome::Candles(series))
}

fn parse_candle_row(row: &Value) -> Result<Candle, HistoryCandlesError> {
    let row = row
        .as_array()
        .ok_or_else(|| parse_field_error(row, "row"))?;
    if row.len() < ROW_COLUMNS {
        return Err(HistoryCandlesError::InvalidRowColumns {
            found: row.len(),
            expected: ROW_COLUMNS,
        });
    }

    let ts_ms = json_i64(&row[0], "timestamp")?;
    let timestamp = Utc
        .timestamp_millis_opt(ts_ms)
        .single()
        .ok_or(HistoryCandlesError::InvalidTimestamp(ts_ms))?;

    Ok(Candle {
        timestamp,
        open: json_f64(&row[1], "open")?,
        high: json_f64(&row[2], "high")?,
        low: json_f64(&row[3], "low")?,
        close: json_f64(&row[4], "close")?,
        volume: json_f64(&row[5], "volume")?,
        quote_volume: json_f64(&row[6], "quote_volume")?,
    })
}

fn json_i64(value: &Value, field: &'static str) -> Result<i64, HistoryCandlesError> {
    if let Some(v) = value.as_i64() {
        return Ok(v);
    }
    value
        .as_str()
        .and_then(|text| text.trim().parse::<i64>().ok())
        .ok_or_else(|| parse_field_error(value, field))
}

fn json_f64(value: &Value, field: &'static str) -> Result<f64, HistoryCandlesError> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|v| v.is_finite())
        .ok_or_else(|| parse_field_error(value, field))
}

fn parse_field_error(value: &Value, field: &'static str) -> HistoryCandlesError {
    let value = match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    HistoryCandlesError::ParseField { field, value }
}
