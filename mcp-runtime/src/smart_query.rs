//! MetricsQL queries that survive the upstream point limit.
//!
//! One unsharded attempt runs first. A 406 rejection on a numeric time range
//! falls back to fetching contiguous slices sequentially, widening the step
//! per slice, and merging the matrices back together.

use opsramp_core::error::ApiError;
use opsramp_core::matrix::{merge_matrix_responses, normalize_response, with_meta};
use opsramp_core::query::{
    DEFAULT_MAX_POINTS_PER_SLICE, DEFAULT_STEP_SECONDS, MAX_SLICE_ATTEMPTS, QueryMeta, ShardMeta,
    TimeRange, TimeSlice, build_slices, clamp_max_points, effective_step, parse_epoch_seconds,
};
use serde_json::{Map, Value};

use crate::client::{Headers, MetricsQuery, OpsRampClient};

#[derive(Debug, Clone)]
pub struct SmartQueryRequest {
    pub tenant_id: String,
    pub query: String,
    /// Epoch seconds, or any expression the upstream understands (no sharding then).
    pub start: String,
    pub end: String,
    pub step: u64,
    pub auto_downsample: bool,
    pub enable_sharding: bool,
    pub max_points_per_slice: u64,
}

impl SmartQueryRequest {
    pub fn new(
        tenant_id: impl Into<String>,
        query: impl Into<String>,
        start: impl Into<String>,
        end: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            query: query.into(),
            start: start.into(),
            end: end.into(),
            step: DEFAULT_STEP_SECONDS,
            auto_downsample: true,
            enable_sharding: true,
            max_points_per_slice: DEFAULT_MAX_POINTS_PER_SLICE,
        }
    }
}

/// Only a data-limit rejection on a known numeric range is worth slicing.
fn should_shard(err: &ApiError, enable_sharding: bool, range: Option<TimeRange>) -> bool {
    err.is_data_limit() && enable_sharding && range.is_some()
}

struct SlicedResult {
    responses: Vec<Value>,
    slice_steps: Vec<u64>,
}

impl OpsRampClient {
    /// Run a range query, downsampling and sharding as needed.
    ///
    /// The payload comes back with a `meta` object describing how it was fetched.
    /// Failures other than the data-limit rejection propagate unchanged.
    pub async fn smart_query(&self, request: &SmartQueryRequest, headers: &Headers) -> Result<Value, ApiError> {
        let parsed_start = parse_epoch_seconds(&request.start);
        let parsed_end = parse_epoch_seconds(&request.end);
        let range = match (parsed_start, parsed_end) {
            (Some(start), Some(end)) => TimeRange::new(start, end),
            _ => None,
        };
        let duration = range.map(|r| r.duration_seconds());
        let step = effective_step(request.step, duration, request.auto_downsample);

        let single = MetricsQuery {
            query: request.query.clone(),
            start: Some(parsed_start.map_or_else(|| request.start.clone(), |s| s.to_string())),
            end: Some(parsed_end.map_or_else(|| request.end.clone(), |e| e.to_string())),
            step: Some(step),
        };
        let err = match self.query_metricsql(&request.tenant_id, &single, headers).await {
            Ok(data) => {
                tracing::info!(tenant_id = %request.tenant_id, step, mode = "single", "smart query complete");
                return Ok(with_meta(data, &QueryMeta::single(request.step, step, duration)));
            }
            Err(err) => err,
        };

        if !should_shard(&err, request.enable_sharding, range) {
            return Err(err);
        }
        let Some(range) = range else {
            return Err(ApiError::shape(
                "start/end must be epoch seconds to shard a query",
            ));
        };

        let max_points = clamp_max_points(request.max_points_per_slice);
        let slices = build_slices(range.start, range.end, step, max_points);
        tracing::warn!(
            tenant_id = %request.tenant_id,
            start = range.start,
            end = range.end,
            step,
            slices = slices.len(),
            "query exceeded data limit; sharding time range"
        );

        let sliced = self
            .fetch_slices(request, &slices, step, headers)
            .await?;
        let merged = merge_matrix_responses(sliced.responses.iter());
        let meta = QueryMeta::sharded(
            request.step,
            step,
            duration,
            ShardMeta {
                slice_count: slices.len(),
                max_points_per_slice: max_points,
                slice_steps: sliced.slice_steps,
            },
        );
        tracing::info!(
            tenant_id = %request.tenant_id,
            mode = "sharded",
            slice_count = slices.len(),
            "smart query complete"
        );
        Ok(with_meta(merged, &meta))
    }

    /// Fetch slices in order; the first failing slice fails the whole call.
    async fn fetch_slices(
        &self,
        request: &SmartQueryRequest,
        slices: &[TimeSlice],
        step: u64,
        headers: &Headers,
    ) -> Result<SlicedResult, ApiError> {
        let mut responses = Vec::with_capacity(slices.len());
        let mut slice_steps = Vec::with_capacity(slices.len());
        for slice in slices {
            let (data, used_step) = self.fetch_slice(request, *slice, step, headers).await?;
            responses.push(Value::Object(data));
            slice_steps.push(used_step);
        }
        Ok(SlicedResult {
            responses,
            slice_steps,
        })
    }

    /// Query one slice, doubling the step on each data-limit rejection.
    /// Returns the normalized payload and the step that succeeded.
    async fn fetch_slice(
        &self,
        request: &SmartQueryRequest,
        slice: TimeSlice,
        initial_step: u64,
        headers: &Headers,
    ) -> Result<(Map<String, Value>, u64), ApiError> {
        let mut step = initial_step;
        let mut attempt = 1;
        loop {
            let query = MetricsQuery {
                query: request.query.clone(),
                start: Some(slice.start.to_string()),
                end: Some(slice.end.to_string()),
                step: Some(step),
            };
            match self.query_metricsql(&request.tenant_id, &query, headers).await {
                Ok(data) => return Ok((normalize_response(data), step)),
                Err(err)
                    if err.is_data_limit()
                        && request.auto_downsample
                        && attempt < MAX_SLICE_ATTEMPTS =>
                {
                    let next_step = step.saturating_mul(2);
                    tracing::warn!(
                        slice_start = slice.start,
                        slice_end = slice.end,
                        attempt,
                        step,
                        next_step,
                        "slice exceeded data limit; widening step"
                    );
                    step = next_step;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsramp_core::error::ApiErrorKind;
    use serde_json::Value;

    fn rejection(status: u16) -> ApiError {
        ApiError::from_response("GET", "/metricsql", status, Value::Null)
    }

    #[test]
    fn defaults_match_tool_contract() {
        let request = SmartQueryRequest::new("t", "up", "0", "60");
        assert_eq!(request.step, 60);
        assert!(request.auto_downsample);
        assert!(request.enable_sharding);
        assert_eq!(request.max_points_per_slice, 8000);
    }

    #[test]
    fn shards_only_on_data_limit_with_range() {
        let range = TimeRange::new(0, 604_800);
        assert!(should_shard(&rejection(406), true, range));
        assert!(!should_shard(&rejection(406), false, range));
        assert!(!should_shard(&rejection(406), true, None));
        assert!(!should_shard(&rejection(500), true, range));
        assert!(!should_shard(&rejection(400), true, range));
        let auth = ApiError::auth("denied", 401, Value::Null);
        assert_eq!(auth.kind, ApiErrorKind::Auth);
        assert!(!should_shard(&auth, true, range));
    }
}
