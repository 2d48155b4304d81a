//! Run settings for the downloader, read from `BITGET_*` environment variables.
//!
//! Unset or blank variables keep the defaults of [`HistoryCandlesConfig`],
//! [`BackfillConfig`] and [`LoggingConfig`]. A variable that is set but does not
//! parse is an error naming the variable.

use std::env;

use thiserror::Error;

use crate::backfill::BackfillConfig;
use crate::history_candles::HistoryCandlesConfig;
use crate::observability::{LogFormat, LoggingConfig};

pub const ENV_BASE_URL: &str = "BITGET_BASE_URL";
pub const ENV_HTTP_TIMEOUT_MS: &str = "BITGET_HTTP_TIMEOUT_MS";
pub const ENV_USER_AGENT: &str = "BITGET_USER_AGENT";
pub const ENV_PACE_MS: &str = "BITGET_PACE_MS";
pub const ENV_MAX_BATCHES: &str = "BITGET_MAX_BATCHES";
pub const ENV_LOG_LEVEL: &str = "BITGET_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "BITGET_LOG_FORMAT";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppConfig {
    pub http: HistoryCandlesConfig,
    pub backfill: BackfillConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{key} must be {expected}, got '{value}'")]
    InvalidValue {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the settings from an arbitrary variable source.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let mut cfg = Self::default();

        if let Some(base_url) = var(ENV_BASE_URL) {
            cfg.http.base_url = base_url;
        }
        if let Some(raw) = var(ENV_HTTP_TIMEOUT_MS) {
            cfg.http.http_timeout_ms = parse_positive(ENV_HTTP_TIMEOUT_MS, &raw)?;
        }
        if let Some(user_agent) = var(ENV_USER_AGENT) {
            cfg.http.user_agent = user_agent;
        }

        if let Some(raw) = var(ENV_PACE_MS) {
            cfg.backfill.pace_ms = raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: ENV_PACE_MS,
                value: raw.clone(),
                expected: "a non-negative integer",
            })?;
        }
        if let Some(raw) = var(ENV_MAX_BATCHES) {
            let max = parse_positive(ENV_MAX_BATCHES, &raw)?;
            cfg.backfill.max_batches =
                Some(u32::try_from(max).map_err(|_| ConfigError::InvalidValue {
                    key: ENV_MAX_BATCHES,
                    value: raw.clone(),
                    expected: "at most 4294967295",
                })?);
        }

        if let Some(level) = var(ENV_LOG_LEVEL) {
            cfg.logging.level = level;
        }
        if let Some(raw) = var(ENV_LOG_FORMAT) {
            cfg.logging.format = LogFormat::parse(&raw).ok_or(ConfigError::InvalidValue {
                key: ENV_LOG_FORMAT,
                value: raw.clone(),
                expected: "one of compact, json",
            })?;
        }

        Ok(cfg)
    }
}

fn parse_positive(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.parse::<u64>()
        .ok()
        .filter(|value| *value > 0)
        .ok_or_else(|| ConfigError::InvalidValue {
            key,
            value: raw.to_string(),
            expected: "a positive integer",
        })
}
