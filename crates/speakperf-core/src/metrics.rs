//! Aggregation of the k6 `--out json` stream into per-endpoint samples.

use crate::model::MetricSample;
use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;

#[derive(Deserialize)]
struct Line {
    #[serde(rename = "type")]
    kind: String,
    metric: String,
    #[serde(default)]
    data: Option<PointData>,
}

#[derive(Deserialize)]
struct PointData {
    time: Option<String>,
    value: Option<f64>,
    #[serde(default)]
    tags: BTreeMap<String, serde_json::Value>,
}

struct Acc {
    duration_sum: f64,
    duration_n: u64,
    min: f64,
    max: f64,
    failed_sum: f64,
    failed_n: u64,
    requests: u64,
}

impl Default for Acc {
    fn default() -> Self {
        Self {
            duration_sum: 0.0,
            duration_n: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            failed_sum: 0.0,
            failed_n: 0,
            requests: 0,
        }
    }
}

impl Acc {
    fn record_duration(&mut self, value: f64) {
        self.duration_sum += value;
        self.duration_n += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }
}

/// Reads NDJSON points; unparseable lines and non-point records are skipped.
/// Endpoints come out sorted by key.
pub fn aggregate<R: BufRead>(reader: R) -> Vec<MetricSample> {
    let mut per_endpoint: BTreeMap<String, Acc> = BTreeMap::new();
    let mut first: Option<DateTime<FixedOffset>> = None;
    let mut last: Option<DateTime<FixedOffset>> = None;

    for line in reader.lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(parsed) = serde_json::from_str::<Line>(line) else {
            continue;
        };
        if parsed.kind != "Point" {
            continue;
        }
        let Some(data) = parsed.data else { continue };
        let Some(value) = data.value else { continue };
        let Some(endpoint) = endpoint_key(&data.tags) else {
            continue;
        };

        if let Some(t) = data
            .time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        {
            first = Some(first.map_or(t, |f| f.min(t)));
            last = Some(last.map_or(t, |l| l.max(t)));
        }

        let acc = per_endpoint.entry(endpoint).or_default();
        match parsed.metric.as_str() {
            "http_req_duration" => acc.record_duration(value),
            "http_req_failed" => {
                acc.failed_sum += value;
                acc.failed_n += 1;
            }
            "http_reqs" => acc.requests += value.max(0.0) as u64,
            _ => {}
        }
    }

    let span_secs = match (first, last) {
        (Some(f), Some(l)) => ((l - f).num_milliseconds() as f64 / 1000.0).max(1.0),
        _ => 1.0,
    };

    per_endpoint
        .into_iter()
        .filter(|(_, acc)| acc.duration_n > 0)
        .map(|(endpoint, acc)| {
            let n = acc.duration_n as f64;
            let requests = if acc.requests > 0 {
                acc.requests as f64
            } else {
                n
            };
            let error_rate = if acc.failed_n > 0 {
                acc.failed_sum / acc.failed_n as f64
            } else {
                0.0
            };
            MetricSample {
                endpoint,
                avg_response_time: acc.duration_sum / n,
                min_response_time: acc.min,
                max_response_time: acc.max,
                error_rate,
                requests_per_second: requests / span_secs,
            }
        })
        .collect()
}

/// A missing output file means the tool produced no points.
pub fn aggregate_file(path: &Path) -> std::io::Result<Vec<MetricSample>> {
    match std::fs::File::open(path) {
        Ok(f) => Ok(aggregate(std::io::BufReader::new(f))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

fn endpoint_key(tags: &BTreeMap<String, serde_json::Value>) -> Option<String> {
    if let Some(url) = tags.get("url").and_then(|v| v.as_str()) {
        if let Ok(parsed) = reqwest::Url::parse(url) {
            return Some(parsed.path().to_string());
        }
    }
    tags.get("name")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from)
}
