//! Time-range planning for MetricsQL range queries: step selection,
//! slicing a range into sub-windows, and the metadata attached to results.

use serde::Serialize;

pub const DEFAULT_STEP_SECONDS: u64 = 60;
pub const DEFAULT_MAX_POINTS_PER_SLICE: u64 = 8000;
pub const MIN_POINTS_PER_SLICE: u64 = 100;
/// Initial attempt plus three step-doubling retries.
pub const MAX_SLICE_ATTEMPTS: u32 = 4;

const ONE_DAY_SECONDS: u64 = 24 * 3600;
const ONE_MONTH_SECONDS: u64 = 30 * ONE_DAY_SECONDS;

/// Parse a purely numeric epoch-seconds string. Anything else (relative
/// expressions like `now-1h`, signs, decimals, blanks) is `None`.
pub fn parse_epoch_seconds(value: &str) -> Option<u64> {
    let v = value.trim();
    if v.is_empty() || !v.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    v.parse().ok()
}

/// Half-open `[start, end)` in whole epoch seconds; `end > start` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: u64,
    pub end: u64,
}

impl TimeRange {
    pub fn new(start: u64, end: u64) -> Option<Self> {
        (end > start).then_some(Self { start, end })
    }

    /// Both bounds must be numeric and ordered; otherwise the range is unspecified.
    pub fn parse(start: &str, end: &str) -> Option<Self> {
        Self::new(parse_epoch_seconds(start)?, parse_epoch_seconds(end)?)
    }

    pub fn duration_seconds(&self) -> u64 {
        self.end - self.start
    }
}

/// Resolution recommended for a span: minutes up to a day, hours up to a month, days beyond.
pub fn recommended_step(duration_seconds: u64) -> u64 {
    if duration_seconds <= ONE_DAY_SECONDS {
        60
    } else if duration_seconds <= ONE_MONTH_SECONDS {
        3600
    } else {
        86400
    }
}

/// Step actually sent upstream. Auto-downsampling only ever coarsens the request.
pub fn effective_step(requested_step: u64, duration_seconds: Option<u64>, auto_downsample: bool) -> u64 {
    let step = requested_step.max(1);
    match duration_seconds {
        Some(duration) if auto_downsample => step.max(recommended_step(duration)),
        _ => step,
    }
}

pub fn clamp_max_points(max_points_per_slice: u64) -> u64 {
    max_points_per_slice.max(MIN_POINTS_PER_SLICE)
}

/// One `[start, end)` sub-window of a sharded query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSlice {
    pub start: u64,
    pub end: u64,
}

impl TimeSlice {
    pub fn width(&self) -> u64 {
        self.end - self.start
    }
}

/// Partition `[start, end)` into contiguous windows of `step * max_points_per_slice`
/// seconds. The last window is truncated at `end`. Empty when `start >= end`.
pub fn build_slices(start: u64, end: u64, step: u64, max_points_per_slice: u64) -> Vec<TimeSlice> {
    let window = step
        .max(1)
        .saturating_mul(clamp_max_points(max_points_per_slice));
    let mut slices = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let slice_end = cursor.saturating_add(window).min(end);
        slices.push(TimeSlice {
            start: cursor,
            end: slice_end,
        });
        cursor = slice_end;
    }
    slices
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    Single,
    Sharded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardMeta {
    pub slice_count: usize,
    pub max_points_per_slice: u64,
    /// Step that succeeded for each slice, in slice order.
    pub slice_steps: Vec<u64>,
}

/// Describes how a smart query was executed; attached as `meta`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryMeta {
    pub requested_step: u64,
    pub effective_step: u64,
    pub duration_seconds: Option<u64>,
    pub mode: QueryMode,
    #[serde(flatten)]
    pub sharding: Option<ShardMeta>,
}

impl QueryMeta {
    pub fn single(requested_step: u64, effective_step: u64, duration_seconds: Option<u64>) -> Self {
        Self {
            requested_step,
            effective_step,
            duration_seconds,
            mode: QueryMode::Single,
            sharding: None,
        }
    }

    pub fn sharded(
        requested_step: u64,
        effective_step: u64,
        duration_seconds: Option<u64>,
        sharding: ShardMeta,
    ) -> Self {
        Self {
            requested_step,
            effective_step,
            duration_seconds,
            mode: QueryMode::Sharded,
            sharding: Some(sharding),
        }
    }
}
