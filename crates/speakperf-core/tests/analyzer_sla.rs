use speakperf_core::analyzer::{analyze, HistoryComparison};
use speakperf_core::model::{MetricSample, SessionStatus, TestKind};
use speakperf_core::storage::store::Store;

fn sample(endpoint: &str, avg: f64, error_rate: f64) -> MetricSample {
    MetricSample {
        endpoint: endpoint.to_string(),
        avg_response_time: avg,
        min_response_time: avg,
        max_response_time: avg,
        error_rate,
        requests_per_second: 10.0,
    }
}

struct Fixture {
    store: Store,
    test_id: i64,
}

impl Fixture {
    fn new() -> Self {
        let store = Store::memory().unwrap();
        store.init_schema().unwrap();
        let file = store.store_compose_file("c.yml", "services: {}").unwrap();
        let sid = store
            .create_session(file.id, "s", SessionStatus::Running)
            .unwrap();
        let spec_id = store
            .record_spec(sid, None, "http://localhost:8080/openapi.json", None, None)
            .unwrap();
        store
            .record_endpoint(spec_id, "/api/orders", "GET", Some(500.0), Some(0.05))
            .unwrap();
        let test = store.record_test(sid, "t", TestKind::Load, "script").unwrap();
        Self {
            store,
            test_id: test.id,
        }
    }

    fn run_with(&self, samples: &[MetricSample]) -> i64 {
        let run_id = self.store.create_run(self.test_id, 10, "30s").unwrap();
        self.store.complete_run(run_id, "ok").unwrap();
        self.store.record_metrics(run_id, samples).unwrap();
        run_id
    }
}

#[test]
fn response_time_over_sla_is_flagged() {
    let f = Fixture::new();
    let run = f.run_with(&[sample("/api/orders", 600.0, 0.01)]);

    let report = analyze(&f.store, run, false).unwrap();
    let e = &report.endpoints[0];
    assert!(e.response_time_violation);
    assert!(!e.error_rate_violation);
    assert!(e.history.is_none());
    assert!(report.has_violations());
    assert!(report.render().contains("Response time exceeds 500 ms"));
}

#[test]
fn response_time_under_sla_is_not_flagged() {
    let f = Fixture::new();
    let run = f.run_with(&[sample("/api/orders", 400.0, 0.10)]);

    let report = analyze(&f.store, run, false).unwrap();
    let e = &report.endpoints[0];
    assert!(!e.response_time_violation);
    assert!(e.error_rate_violation);
}

#[test]
fn endpoint_without_sla_record_is_never_a_violation() {
    let f = Fixture::new();
    let run = f.run_with(&[sample("/unknown", 99_999.0, 1.0)]);

    let report = analyze(&f.store, run, true).unwrap();
    let e = &report.endpoints[0];
    assert!(!e.response_time_violation && !e.error_rate_violation);
    assert_eq!(e.sla_response_time_ms, None);
}

#[test]
fn no_history_reports_no_data_instead_of_nan() {
    let f = Fixture::new();
    let run = f.run_with(&[sample("/api/orders", 300.0, 0.0)]);

    let report = analyze(&f.store, run, true).unwrap();
    assert_eq!(report.endpoints[0].history, Some(HistoryComparison::NoData));
    let text = report.render();
    assert!(text.contains("no historical data"));
    assert!(!text.contains("NaN") && !text.contains("inf"));
}

#[test]
fn history_delta_uses_other_runs_only() {
    let f = Fixture::new();
    f.run_with(&[sample("/api/orders", 100.0, 0.0)]);
    f.run_with(&[sample("/api/orders", 300.0, 0.0)]);
    let current = f.run_with(&[sample("/api/orders", 300.0, 0.0)]);

    let report = analyze(&f.store, current, true).unwrap();
    match &report.endpoints[0].history {
        Some(HistoryComparison::Delta {
            historical_avg,
            percent,
        }) => {
            assert_eq!(*historical_avg, 200.0);
            assert_eq!(*percent, 50.0);
        }
        other => panic!("expected delta, got {other:?}"),
    }
}

#[test]
fn unknown_run_is_not_found() {
    let f = Fixture::new();
    let err = analyze(&f.store, 4242, false).unwrap_err();
    assert_eq!(err.code(), "E_NOT_FOUND");
}
