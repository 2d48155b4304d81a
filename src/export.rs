//! CSV persistence for finalized candle series.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::candles::{Candle, CandleSeries};

pub const CSV_HEADERS: [&str; 7] = [
    "timestamp",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "quote_volume",
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("invalid output path: {0}")]
    InvalidOutputPath(PathBuf),
}

#[derive(Debug, Serialize)]
struct CsvRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    quote_volume: f64,
}

impl From<&Candle> for CsvRow {
    fn from(candle: &Candle) -> Self {
        Self {
            timestamp: candle.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
            volume: candle.volume,
            quote_volume: candle.quote_volume,
        }
    }
}

/// `{symbol}_{granularity}_{product_type}.csv` in the working directory.
pub fn default_output_path(symbol: &str, granularity: &str, product_type: &str) -> PathBuf {
    PathBuf::from(format!("{symbol}_{granularity}_{product_type}.csv"))
}

/// Renders the series as CSV text with a header row.
pub fn series_to_csv(series: &CandleSeries) -> Result<String, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    write_rows(&mut writer, series)?;
    let bytes = writer
        .into_inner()
        .map_err(|err| ExportError::Io(err.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Writes the series to `path`, creating parent directories. The file is
/// written next to the target and renamed into place.
pub fn write_series_csv(path: &Path, series: &CandleSeries) -> Result<(), ExportError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| ExportError::InvalidOutputPath(path.to_path_buf()))?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    {
        let file = fs::File::create(&tmp_path)?;
        let mut writer = csv::Writer::from_writer(file);
        write_rows(&mut writer, series)?;
        let file = writer
            .into_inner()
            .map_err(|err| ExportError::Io(err.into_error()))?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;

    info!(
        component = "export",
        event = "export.written",
        path = %path.display(),
        rows = series.len()
    );
    Ok(())
}

fn write_rows<W: std::io::Write>(
    writer: &mut csv::Writer<W>,
    series: &CandleSeries,
) -> Result<(), ExportError> {
    if series.is_empty() {
        writer.write_record(CSV_HEADERS)?;
    }
    for candle in series {
        writer.serialize(CsvRow::from(candle))?;
    }
    writer.flush()?;
    Ok(())
}
