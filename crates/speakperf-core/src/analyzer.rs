//! SLA and history analysis of a recorded run.

use crate::errors::{PerfError, PerfResult};
use crate::storage::store::Store;
use serde::Serialize;
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryComparison {
    NoData,
    Delta { historical_avg: f64, percent: f64 },
}

impl HistoryComparison {
    /// Percentage change of `current` against `historical`. Missing, zero or
    /// non-finite baselines count as no data.
    pub fn compute(current: f64, historical: Option<f64>) -> Self {
        match historical {
            Some(h) if h.is_finite() && h != 0.0 => {
                let percent = (current - h) / h * 100.0;
                if percent.is_finite() {
                    HistoryComparison::Delta {
                        historical_avg: h,
                        percent,
                    }
                } else {
                    HistoryComparison::NoData
                }
            }
            _ => HistoryComparison::NoData,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointAnalysis {
    pub endpoint: String,
    pub avg_response_time: f64,
    pub error_rate: f64,
    pub sla_response_time_ms: Option<f64>,
    pub sla_error_rate: Option<f64>,
    pub response_time_violation: bool,
    pub error_rate_violation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<HistoryComparison>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub run_id: i64,
    pub complete: bool,
    pub endpoints: Vec<EndpointAnalysis>,
}

impl AnalysisReport {
    pub fn has_violations(&self) -> bool {
        self.endpoints
            .iter()
            .any(|e| e.response_time_violation || e.error_rate_violation)
    }

    pub fn render(&self) -> String {
        let mut out = String::from("# Performance Analysis\n\n");
        let _ = writeln!(out, "## Run ID: {}\n", self.run_id);
        if !self.complete {
            out.push_str("_Run did not complete; no results were recorded._\n\n");
        }
        if self.endpoints.is_empty() {
            out.push_str("No metrics recorded for this run.\n");
            return out;
        }
        for e in &self.endpoints {
            let _ = writeln!(out, "### {}", e.endpoint);
            let _ = writeln!(out, "- Avg Response Time: {:.2} ms", e.avg_response_time);
            let _ = writeln!(out, "- Error Rate: {:.2}%", e.error_rate * 100.0);
            if e.response_time_violation {
                let _ = writeln!(
                    out,
                    "- SLA VIOLATION: Response time exceeds {} ms",
                    e.sla_response_time_ms.unwrap_or_default()
                );
            }
            if e.error_rate_violation {
                let _ = writeln!(
                    out,
                    "- SLA VIOLATION: Error rate exceeds {:.1}%",
                    e.sla_error_rate.unwrap_or_default() * 100.0
                );
            }
            match &e.history {
                Some(HistoryComparison::Delta { percent, .. }) => {
                    let _ = writeln!(out, "- Response time: {percent:+.1}% vs historical average");
                }
                Some(HistoryComparison::NoData) => {
                    out.push_str("- Response time: no historical data\n");
                }
                None => {}
            }
            out.push('\n');
        }
        out
    }
}

pub fn analyze(store: &Store, run_id: i64, compare_history: bool) -> PerfResult<AnalysisReport> {
    let run = store
        .run(run_id)
        .map_err(PerfError::store)?
        .ok_or_else(|| PerfError::not_found("test run", run_id))?;
    let samples = store.metrics_for_run(run_id).map_err(PerfError::store)?;

    let mut endpoints = Vec::with_capacity(samples.len());
    for s in samples {
        let sla = store
            .endpoint_by_path(&s.endpoint)
            .map_err(PerfError::store)?;
        let sla_rt = sla.as_ref().and_then(|e| e.sla_response_time_ms);
        let sla_err = sla.as_ref().and_then(|e| e.sla_error_rate);

        let history = if compare_history {
            let hist = store
                .historical_average(&s.endpoint, run_id)
                .map_err(PerfError::store)?;
            Some(HistoryComparison::compute(s.avg_response_time, hist))
        } else {
            None
        };

        endpoints.push(EndpointAnalysis {
            response_time_violation: sla_rt.is_some_and(|limit| s.avg_response_time > limit),
            error_rate_violation: sla_err.is_some_and(|limit| s.error_rate > limit),
            endpoint: s.endpoint,
            avg_response_time: s.avg_response_time,
            error_rate: s.error_rate,
            sla_response_time_ms: sla_rt,
            sla_error_rate: sla_err,
            history,
        });
    }

    Ok(AnalysisReport {
        run_id,
        complete: run.is_complete(),
        endpoints,
    })
}
