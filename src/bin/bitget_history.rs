use std::path::PathBuf;

use bitget_history::{
    default_output_path, fetch_history, init_logging, log_run_finish, log_run_start,
    parse_start_date, write_series_csv, AppConfig, BackfillRequest, Candle, StopReason,
    DEFAULT_PRODUCT_TYPE, KNOWN_GRANULARITIES,
};
use chrono::NaiveDate;
use clap::Parser;

const PREVIEW_ROWS: usize = 5;

/// Download Bitget futures history candles into a CSV file.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// Trading pair, e.g. BTCUSDT
    symbol: String,

    /// Candle granularity, e.g. 5m, 1H, 1D (UTC-anchored variants such as 1Dutc are accepted)
    granularity: String,

    /// Product type, e.g. usdt-futures, coin-futures, usdc-futures
    #[arg(long, alias = "product_type", default_value = DEFAULT_PRODUCT_TYPE)]
    product_type: String,

    /// Fetch everything from this UTC date (YYYY-MM-DD); only the latest batch when omitted
    #[arg(long, alias = "start_date", value_parser = parse_start_date)]
    start_date: Option<NaiveDate>,

    /// Output CSV path; defaults to {symbol}_{granularity}_{product_type}.csv
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let cfg = AppConfig::from_env()?;
    init_logging(&cfg.logging)?;

    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&cli.symbol, &cli.granularity, &cli.product_type));
    let mut req =
        BackfillRequest::new(cli.symbol, cli.granularity).with_product_type(cli.product_type);
    if let Some(start_date) = cli.start_date {
        req = req.with_start_date(start_date);
    }

    log_run_start(&cfg, &req);
    println!("--- task ---");
    println!("symbol:       {}", req.symbol);
    println!("granularity:  {}", req.granularity);
    println!("product type: {}", req.product_type);
    match req.start_date {
        Some(date) => println!("start date:   {date}"),
        None => println!("start date:   latest batch only"),
    }
    println!("output:       {}", output.display());
    println!("------------\n");

    let base_granularity = req
        .granularity
        .strip_suffix("utc")
        .unwrap_or(req.granularity.as_str());
    if !KNOWN_GRANULARITIES.contains(&base_granularity) {
        println!(
            "note: granularity '{}' is not one of {}; sending it unchanged",
            req.granularity,
            KNOWN_GRANULARITIES.join(", ")
        );
    }

    let result = fetch_history(&req, &cfg.http, &cfg.backfill)?;
    log_run_finish(&req, &result);

    if result.series.is_empty() {
        println!("No candles returned for the requested range.");
        return Ok(());
    }

    write_series_csv(&output, &result.series)?;
    println!(
        "Fetched {} candles in {} batch(es), saved to {}",
        result.series.len(),
        result.batches_fetched,
        output.display()
    );
    if let StopReason::FetchFailed(message) = &result.stop_reason {
        println!("warning: paging stopped early after a failed request: {message}");
    }

    let rows = result.series.as_slice();
    println!("\n--- first {} rows ---", rows.len().min(PREVIEW_ROWS));
    for candle in rows.iter().take(PREVIEW_ROWS) {
        println!("{}", format_preview_row(candle));
    }
    println!("\n--- last {} rows ---", rows.len().min(PREVIEW_ROWS));
    for candle in &rows[rows.len().saturating_sub(PREVIEW_ROWS)..] {
        println!("{}", format_preview_row(candle));
    }

    Ok(())
}

fn format_preview_row(candle: &Candle) -> String {
    format!(
        "{}  o={} h={} l={} c={} v={} qv={}",
        candle.timestamp.format("%Y-%m-%d %H:%M:%S"),
        candle.open,
        candle.high,
        candle.low,
        candle.close,
        candle.volume,
        candle.quote_volume
    )
}
