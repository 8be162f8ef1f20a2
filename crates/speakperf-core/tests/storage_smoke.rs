use speakperf_core::compose::ComposeService;
use speakperf_core::model::{MetricSample, SessionStatus, TestKind};
use speakperf_core::storage::store::Store;
use tempfile::tempdir;

fn sample(endpoint: &str, avg: f64) -> MetricSample {
    MetricSample {
        endpoint: endpoint.to_string(),
        avg_response_time: avg,
        min_response_time: avg / 2.0,
        max_response_time: avg * 2.0,
        error_rate: 0.01,
        requests_per_second: 20.0,
    }
}

#[test]
fn test_storage_smoke_lifecycle() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("perf_test.db");

    // 1. Open store (init schema)
    let store = Store::open(&db_path)?;
    store.init_schema()?;

    // 2. Compose file + session + service
    let file = store.store_compose_file("./docker-compose.yml", "services: {}\n")?;
    let sid = store.create_session(file.id, "session-1", SessionStatus::Initialized)?;
    store.record_service(
        sid,
        &ComposeService {
            name: "web".into(),
            image: Some("nginx".into()),
            ports: vec!["8080:80".into()],
            ..Default::default()
        },
    )?;
    assert_eq!(
        store.compose_content_for_session(sid)?.as_deref(),
        Some("services: {}\n")
    );
    assert_eq!(store.services_for_session(sid)?[0].host_port().as_deref(), Some("8080"));

    // 3. Test + run + metrics
    let test = store.record_test(sid, "api-test", TestKind::Load, "export default function () {}")?;
    let run_id = store.create_run(test.id, 10, "30s")?;
    assert!(!store.run(run_id)?.unwrap().is_complete());

    store.complete_run(run_id, "raw k6 output")?;
    store.record_metrics(run_id, &[sample("/", 100.0), sample("/api/health", 40.0)])?;
    let run = store.run(run_id)?.unwrap();
    assert!(run.is_complete());
    assert_eq!(run.raw_results.as_deref(), Some("raw k6 output"));
    assert!(store.complete_run(run_id, "again").is_err());

    // 4. Reopen: everything persisted
    drop(store);
    let store = Store::open(&db_path)?;
    store.init_schema()?;
    assert_eq!(store.metrics_for_run(run_id)?.len(), 2);
    assert_eq!(store.count_rows("test_sessions")?, 1);
    assert!(store.count_rows("sqlite_master; DROP TABLE x").is_err());

    Ok(())
}

#[test]
fn identical_content_from_two_sources_is_stored_once() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;
    let content = "services:\n  web:\n    image: nginx\n";

    let a = store.store_compose_file("https://example.com/a.yml", content)?;
    let b = store.store_compose_file("/srv/b.yml", content)?;
    assert_eq!(a, b);
    assert_eq!(a.source, "https://example.com/a.yml");
    assert_eq!(store.count_rows("compose_files")?, 1);

    // sessions referencing the same file stay independent
    let s1 = store.create_session(a.id, "one", SessionStatus::Initialized)?;
    let s2 = store.create_session(b.id, "two", SessionStatus::Initialized)?;
    assert_ne!(s1, s2);
    assert_eq!(store.latest_session()?.unwrap().id, s2);

    let c = store.store_compose_file("/srv/b.yml", &format!("{content}\n"))?;
    assert_ne!(c.id, a.id);
    Ok(())
}

#[test]
fn session_status_is_forward_only_and_completes_once() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;
    let file = store.store_compose_file("c.yml", "services: {}")?;
    let sid = store.create_session(file.id, "s", SessionStatus::Initialized)?;

    assert!(store.session(sid)?.unwrap().completed_at.is_none());
    assert!(store.update_session_status(sid, SessionStatus::Running)?);
    assert!(store.update_session_status(sid, SessionStatus::Completed)?);
    let done = store.session(sid)?.unwrap();
    assert_eq!(done.status, SessionStatus::Completed);
    let completed_at = done.completed_at.clone().unwrap();

    assert!(!store.update_session_status(sid, SessionStatus::Failed)?);
    assert!(!store.update_session_status(sid, SessionStatus::Running)?);
    let after = store.session(sid)?.unwrap();
    assert_eq!(after.status, SessionStatus::Completed);
    assert_eq!(after.completed_at.unwrap(), completed_at);

    assert!(store.update_session_status(9999, SessionStatus::Running).is_err());
    Ok(())
}

#[test]
fn historical_average_excludes_the_current_run() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;
    let file = store.store_compose_file("c.yml", "services: {}")?;
    let sid = store.create_session(file.id, "s", SessionStatus::Running)?;
    let test = store.record_test(sid, "t", TestKind::Load, "script")?;

    let r1 = store.create_run(test.id, 1, "1s")?;
    let r2 = store.create_run(test.id, 1, "1s")?;
    let r3 = store.create_run(test.id, 1, "1s")?;
    store.record_metrics(r1, &[sample("/", 100.0)])?;
    store.record_metrics(r2, &[sample("/", 200.0)])?;
    store.record_metrics(r3, &[sample("/", 900.0), sample("/only-here", 5.0)])?;

    assert_eq!(store.historical_average("/", r3)?, Some(150.0));
    assert_eq!(store.historical_average("/only-here", r3)?, None);

    let history = store.history(Some("/"), 7)?;
    assert_eq!(history.len(), 3);
    assert_eq!(store.history(None, 7)?.len(), 4);

    let json = serde_json::to_value(&history[0])?;
    assert!(json.get("avgTime").is_some());
    assert!(json.get("errorRate").is_some());

    assert_eq!(store.recent_runs(20)?.len(), 3);
    assert_eq!(store.recent_sessions(20)?[0].id, sid);
    Ok(())
}

#[test]
fn history_window_beyond_calendar_returns_everything() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;
    let file = store.store_compose_file("c.yml", "services: {}")?;
    let sid = store.create_session(file.id, "s", SessionStatus::Running)?;
    let test = store.record_test(sid, "t", TestKind::Load, "script")?;
    let run = store.create_run(test.id, 1, "1s")?;
    store.record_metrics(run, &[sample("/", 100.0)])?;

    assert_eq!(store.history(None, 100_000_000)?.len(), 1);
    assert_eq!(store.history(Some("/"), u32::MAX)?.len(), 1);
    assert!(store.history(None, 0)?.is_empty());
    Ok(())
}
