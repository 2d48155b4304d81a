//! OHLCV candle records and the ordered, de-duplicated series built from them.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    /// Candle open time.
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Base-asset volume.
    pub volume: f64,
    /// Quote-asset volume.
    pub quote_volume: f64,
}

impl Candle {
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

/// Candles sorted strictly ascending by timestamp, at most one per timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandleSeries {
    candles: Vec<Candle>,
}

impl CandleSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sorts `rows` by timestamp and drops repeated timestamps, keeping the
    /// row that appeared first in `rows`. Returns the series and the number of
    /// rows dropped.
    pub fn from_rows(mut rows: Vec<Candle>) -> (Self, u64) {
        // stable: equal timestamps keep arrival order
        rows.sort_by_key(Candle::timestamp_ms);

        let mut candles: Vec<Candle> = Vec::with_capacity(rows.len());
        let mut duplicates_removed = 0u64;
        for row in rows {
            if candles
                .last()
                .map(|existing| existing.timestamp == row.timestamp)
                .unwrap_or(false)
            {
                duplicates_removed += 1;
            } else {
                candles.push(row);
            }
        }

        (Self { candles }, duplicates_removed)
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn as_slice(&self) -> &[Candle] {
        &self.candles
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Candle> {
        self.candles.iter()
    }

    pub fn first(&self) -> Option<&Candle> {
        self.candles.first()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn oldest_timestamp_ms(&self) -> Option<i64> {
        self.first().map(Candle::timestamp_ms)
    }

    pub fn newest_timestamp_ms(&self) -> Option<i64> {
        self.last().map(Candle::timestamp_ms)
    }

    /// Drops every candle strictly before `bound_ms`. Returns how many were dropped.
    fn retain_from(&mut self, bound_ms: i64) -> u64 {
        let cut = self
            .candles
            .partition_point(|candle| candle.timestamp_ms() < bound_ms);
        self.candles.drain(..cut);
        cut as u64
    }
}

impl<'a> IntoIterator for &'a CandleSeries {
    type Item = &'a Candle;
    type IntoIter = std::slice::Iter<'a, Candle>;

    fn into_iter(self) -> Self::IntoIter {
        self.candles.iter()
    }
}

impl IntoIterator for CandleSeries {
    type Item = Candle;
    type IntoIter = std::vec::IntoIter<Candle>;

    fn into_iter(self) -> Self::IntoIter {
        self.candles.into_iter()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergedSeries {
    pub series: CandleSeries,
    pub duplicates_removed: u64,
    pub rows_before_start_removed: u64,
}

/// Concatenates batches in arrival order, de-duplicates by timestamp (the
/// earliest-arriving row wins), sorts ascending and drops rows before
/// `start_bound_ms` when one is given.
///
/// Running it again on its own output yields the same series.
pub fn merge_batches<I>(batches: I, start_bound_ms: Option<i64>) -> MergedSeries
where
    I: IntoIterator<Item = CandleSeries>,
{
    let rows: Vec<Candle> = batches.into_iter().flatten().collect();
    let (mut series, duplicates_removed) = CandleSeries::from_rows(rows);
    let rows_before_start_removed = match start_bound_ms {
        Some(bound) => series.retain_from(bound),
        None => 0,
    };

    MergedSeries {
        series,
        duplicates_removed,
        rows_before_start_removed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candle(ts_ms: i64, close: f64) -> Candle {
        Candle {
            timestamp: Utc.timestamp_millis_opt(ts_ms).single().unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
            quote_volume: close,
        }
    }

    fn timestamps(series: &CandleSeries) -> Vec<i64> {
        series.iter().map(Candle::timestamp_ms).collect()
    }

    #[test]
    fn from_rows_sorts_and_keeps_first_arrival_on_duplicates() {
        let (series, dupes) = CandleSeries::from_rows(vec![
            candle(3_000, 3.0),
            candle(1_000, 1.0),
            candle(3_000, 99.0),
            candle(2_000, 2.0),
        ]);

        assert_eq!(dupes, 1);
        assert_eq!(timestamps(&series), vec![1_000, 2_000, 3_000]);
        assert_eq!(series.last().unwrap().close, 3.0);
        assert_eq!(series.oldest_timestamp_ms(), Some(1_000));
        assert_eq!(series.newest_timestamp_ms(), Some(3_000));
    }

    #[test]
    fn merge_filters_rows_before_start_bound() {
        let (a, _) = CandleSeries::from_rows(vec![candle(5_000, 5.0), candle(6_000, 6.0)]);
        let (b, _) = CandleSeries::from_rows(vec![candle(3_000, 3.0), candle(4_000, 4.0)]);

        let merged = merge_batches(vec![a, b], Some(4_000));
        assert_eq!(timestamps(&merged.series), vec![4_000, 5_000, 6_000]);
        assert_eq!(merged.rows_before_start_removed, 1);
        assert_eq!(merged.duplicates_removed, 0);
    }

    #[test]
    fn merge_is_idempotent() {
        let (a, _) = CandleSeries::from_rows(vec![candle(5_000, 5.0), candle(6_000, 6.0)]);
        let (b, _) = CandleSeries::from_rows(vec![
            candle(4_000, 4.0),
            candle(5_000, 50.0),
            candle(2_000, 2.0),
        ]);

        let once = merge_batches(vec![a, b], Some(3_000));
        let twice = merge_batches(vec![once.series.clone()], Some(3_000));

        assert_eq!(once.series, twice.series);
        assert_eq!(twice.duplicates_removed, 0);
        assert_eq!(twice.rows_before_start_removed, 0);
        // batch a arrived first, so its 5_000 row survives
        assert_eq!(once.series.as_slice()[1].close, 5.0);
    }

    #[test]
    fn merge_of_nothing_is_empty() {
        let merged = merge_batches(Vec::<CandleSeries>::new(), Some(0));
        assert!(merged.series.is_empty());
        assert_eq!(merged.series, CandleSeries::new());
    }
}
