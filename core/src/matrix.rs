//! Merging of partial MetricsQL matrix responses.
//!
//! Upstream payloads are decoded leniently: anything that is not shaped like a
//! series or a `[timestamp, value]` point contributes nothing instead of failing.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::query::QueryMeta;

/// Label-set of a series. Sorted keys make its JSON form canonical.
pub type LabelSet = BTreeMap<String, Value>;

/// One `[timestamp, value]` point, kept in its upstream representation.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: Value,
    pub value: Value,
    at: f64,
}

impl Sample {
    /// `None` for anything other than a list of at least two items with a numeric timestamp.
    pub fn decode(point: &Value) -> Option<Self> {
        let items = point.as_array()?;
        let (timestamp, value) = (items.first()?, items.get(1)?);
        let at = match timestamp {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        Some(Self {
            timestamp: timestamp.clone(),
            value: value.clone(),
            at,
        })
    }

    /// Points with the same textual timestamp collapse into one.
    fn dedupe_key(&self) -> String {
        match &self.timestamp {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub metric: LabelSet,
    pub samples: Vec<Sample>,
}

/// Result of decoding one entry of `data.result`.
#[derive(Debug, Clone, PartialEq)]
pub enum SeriesEntry {
    Valid(Series),
    Malformed,
}

impl SeriesEntry {
    pub fn decode(entry: &Value) -> Self {
        let Some(obj) = entry.as_object() else {
            return SeriesEntry::Malformed;
        };
        let metric = obj
            .get("metric")
            .and_then(Value::as_object)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        let mut samples: Vec<Sample> = obj
            .get("values")
            .and_then(Value::as_array)
            .map(|points| points.iter().filter_map(Sample::decode).collect())
            .unwrap_or_default();
        if let Some(single) = obj.get("value").and_then(Sample::decode) {
            samples.push(single);
        }

        SeriesEntry::Valid(Series { metric, samples })
    }
}

/// Series found under `data.result`; empty when either level has the wrong shape.
pub fn extract_series(response: &Value) -> Vec<Series> {
    let Some(result) = response
        .get("data")
        .and_then(Value::as_object)
        .and_then(|data| data.get("result"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };
    result
        .iter()
        .filter_map(|entry| match SeriesEntry::decode(entry) {
            SeriesEntry::Valid(series) => Some(series),
            SeriesEntry::Malformed => None,
        })
        .collect()
}

pub fn canonical_key(metric: &LabelSet) -> String {
    serde_json::to_string(metric).unwrap_or_default()
}

#[derive(Debug)]
struct Bucket {
    metric: LabelSet,
    samples: Vec<Sample>,
    positions: HashMap<String, usize>,
}

impl Bucket {
    fn put(&mut self, sample: Sample) {
        let key = sample.dedupe_key();
        match self.positions.get(&key) {
            Some(&pos) => self.samples[pos] = sample,
            None => {
                self.positions.insert(key, self.samples.len());
                self.samples.push(sample);
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct MatrixSeries {
    metric: LabelSet,
    values: Vec<(Value, Value)>,
}

/// Accumulates series across responses, grouped by label-set.
///
/// Responses must be absorbed in chronological slice order: a point whose
/// timestamp was already seen replaces the earlier one.
#[derive(Debug, Default)]
pub struct MatrixMerger {
    index: HashMap<String, usize>,
    buckets: Vec<Bucket>,
}

impl MatrixMerger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn absorb(&mut self, response: &Value) {
        for series in extract_series(response) {
            self.absorb_series(series);
        }
    }

    pub fn absorb_series(&mut self, series: Series) {
        let Series { metric, samples } = series;
        let key = canonical_key(&metric);
        let buckets = &mut self.buckets;
        let pos = *self.index.entry(key).or_insert_with(|| {
            buckets.push(Bucket {
                metric,
                samples: Vec::new(),
                positions: HashMap::new(),
            });
            buckets.len() - 1
        });
        let bucket = &mut self.buckets[pos];
        for sample in samples {
            bucket.put(sample);
        }
    }

    pub fn series_count(&self) -> usize {
        self.buckets.len()
    }

    /// Matrix payload with each series' points sorted ascending by timestamp.
    pub fn finish(self) -> Value {
        let result: Vec<MatrixSeries> = self
            .buckets
            .into_iter()
            .map(|bucket| {
                let mut samples = bucket.samples;
                samples.sort_by(|a, b| a.at.total_cmp(&b.at));
                MatrixSeries {
                    metric: bucket.metric,
                    values: samples
                        .into_iter()
                        .map(|s| (s.timestamp, s.value))
                        .collect(),
                }
            })
            .collect();
        json!({
            "status": "success",
            "data": {
                "resultType": "matrix",
                "result": serde_json::to_value(result).unwrap_or_else(|_| Value::Array(Vec::new())),
            }
        })
    }
}

pub fn merge_matrix_responses<'a>(responses: impl IntoIterator<Item = &'a Value>) -> Value {
    let mut merger = MatrixMerger::new();
    for response in responses {
        merger.absorb(response);
    }
    merger.finish()
}

/// Mapping responses pass through; anything else is wrapped as `{status, data}`.
pub fn normalize_response(data: Value) -> Map<String, Value> {
    match data {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("status".to_string(), Value::String("success".to_string()));
            map.insert("data".to_string(), other);
            map
        }
    }
}

pub fn with_meta(payload: Value, meta: &QueryMeta) -> Value {
    let mut map = normalize_response(payload);
    map.insert(
        "meta".to_string(),
        serde_json::to_value(meta).unwrap_or(Value::Null),
    );
    Value::Object(map)
}
