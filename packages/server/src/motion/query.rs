//! Time-range reads over the parsed artifact.

use common::motion::{DeviceClock, JsonlGzReader, Row};
use common::storage::{ObjectStore, StorageError};
use serde::Serialize;
use tracing::debug;

pub const MIN_POINTS: usize = 100;
pub const MAX_POINTS: usize = 5000;
pub const DEFAULT_POINTS: usize = 2000;

pub fn clamp_max_points(requested: Option<usize>) -> usize {
    requested
        .unwrap_or(DEFAULT_POINTS)
        .clamp(MIN_POINTS, MAX_POINTS)
}

/// Keep `max_points` evenly spread items, always including the first and
/// last. Item `i` of the output is input `round(i * (n - 1) / (max_points - 1))`.
///
/// Inputs no longer than `max_points` are returned unchanged.
pub fn downsample<T>(items: Vec<T>, max_points: usize) -> Vec<T> {
    let n = items.len();
    if n <= max_points {
        return items;
    }
    if max_points < 2 {
        return items.into_iter().take(max_points).collect();
    }

    let span = (n - 1) as u64;
    let steps = (max_points - 1) as u64;
    let mut picks = (0..max_points as u64)
        .map(|i| ((2 * i * span + steps) / (2 * steps)) as usize)
        .peekable();

    let mut out = Vec::with_capacity(max_points);
    for (idx, item) in items.into_iter().enumerate() {
        if picks.peek() == Some(&idx) {
            out.push(item);
            picks.next();
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryPoint {
    /// Unix epoch milliseconds of the frame timestamp.
    pub time_ms: i64,
    #[serde(flatten)]
    pub row: Row,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeResult {
    /// Frames inside the range before downsampling.
    pub matched: usize,
    pub points: Vec<QueryPoint>,
}

/// Frames of `parsed_key` whose timestamps fall in `[start_ms, end_ms]`,
/// reduced to at most `max_points`.
///
/// The whole artifact is scanned; only the output is bounded. Rows whose
/// timestamp cannot be interpreted are skipped.
pub async fn query_range(
    store: &dyn ObjectStore,
    parsed_key: &str,
    clock: &DeviceClock,
    start_ms: i64,
    end_ms: i64,
    max_points: usize,
) -> Result<RangeResult, StorageError> {
    let mut reader = JsonlGzReader::new(store.get_stream(parsed_key).await?);
    let mut matched = Vec::new();
    let mut skipped = 0usize;

    while let Some(rows) = reader.next_batch().await? {
        for row in rows {
            let time_ms = row
                .get("ulint_data")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<u64>().ok())
                .and_then(|ts| clock.frame_epoch_ms(ts));
            match time_ms {
                Some(t) if (start_ms..=end_ms).contains(&t) => {
                    matched.push(QueryPoint { time_ms: t, row })
                }
                Some(_) => {}
                None => skipped += 1,
            }
        }
    }

    if skipped > 0 {
        debug!(key = parsed_key, skipped, "Rows without a usable timestamp");
    }

    let total = matched.len();
    Ok(RangeResult {
        matched: total,
        points: downsample(matched, max_points),
    })
}
