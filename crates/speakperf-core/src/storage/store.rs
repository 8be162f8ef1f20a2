use crate::compose::ComposeService;
use crate::model::{
    ApiSpecRecord, ComposeFile, ComposeFileSummary, EndpointRecord, GeneratedTest, HistoryPoint,
    MetricSample, ServiceRecord, SessionStatus, SessionSummary, TestKind, TestRun,
    TestRunSummary, TestSession,
};
use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// SQLite-backed record of everything the orchestrator did.
///
/// Cloning shares the same connection. Every write completes before the
/// method returns.
#[derive(Clone)]
pub struct Store {
    pub conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path).context("failed to open sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        // independent sessions write concurrently from separate processes too
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(crate::storage::schema::DDL)
            .context("failed to apply schema")?;
        Ok(())
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("store connection mutex poisoned"))
    }

    // --- Compose files ---

    /// Stores compose content, reusing the existing row when the same bytes
    /// were stored before (from any source).
    pub fn store_compose_file(&self, source: &str, content: &str) -> anyhow::Result<ComposeFile> {
        let hash = crate::fingerprint::content_hash(content);
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO compose_files(source_url, content, hash, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(hash) DO NOTHING",
            params![source, content, hash, now_rfc3339()],
        )
        .context("insert compose file")?;
        let file = tx
            .query_row(
                "SELECT id, source_url, content, hash, created_at FROM compose_files WHERE hash = ?1",
                params![hash],
                map_compose_file,
            )
            .context("load compose file by hash")?;
        tx.commit()?;
        Ok(file)
    }

    pub fn compose_file(&self, id: i64) -> anyhow::Result<Option<ComposeFile>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, source_url, content, hash, created_at FROM compose_files WHERE id = ?1",
            params![id],
            map_compose_file,
        )
        .optional()
        .context("load compose file")
    }

    pub fn compose_content_for_session(&self, session_id: i64) -> anyhow::Result<Option<String>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT cf.content
             FROM compose_files cf
             JOIN test_sessions ts ON ts.compose_file_id = cf.id
             WHERE ts.id = ?1",
            params![session_id],
            |r| r.get(0),
        )
        .optional()
        .context("load compose content for session")
    }

    // --- Sessions ---

    pub fn create_session(
        &self,
        compose_file_id: i64,
        name: &str,
        status: SessionStatus,
    ) -> anyhow::Result<i64> {
        let conn = self.lock()?;
        let completed_at = status.is_terminal().then(now_rfc3339);
        conn.execute(
            "INSERT INTO test_sessions(compose_file_id, session_name, started_at, completed_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![compose_file_id, name, now_rfc3339(), completed_at, status.as_str()],
        )
        .context("insert session")?;
        Ok(conn.last_insert_rowid())
    }

    /// Moves a session forward. Returns `false` (and changes nothing) when the
    /// transition is not allowed from the current status.
    pub fn update_session_status(&self, session_id: i64, next: SessionStatus) -> anyhow::Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let current: Option<String> = tx
            .query_row(
                "SELECT status FROM test_sessions WHERE id = ?1",
                params![session_id],
                |r| r.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            anyhow::bail!("session {} does not exist", session_id);
        };
        let current = SessionStatus::parse(&current)
            .with_context(|| format!("unknown stored session status '{current}'"))?;

        if !current.can_transition_to(next) {
            tracing::debug!(
                event = "session_transition_refused",
                session_id,
                from = current.as_str(),
                to = next.as_str()
            );
            return Ok(false);
        }

        if next.is_terminal() {
            tx.execute(
                "UPDATE test_sessions SET status = ?1, completed_at = ?2
                 WHERE id = ?3 AND completed_at IS NULL",
                params![next.as_str(), now_rfc3339(), session_id],
            )?;
        } else {
            tx.execute(
                "UPDATE test_sessions SET status = ?1 WHERE id = ?2",
                params![next.as_str(), session_id],
            )?;
        }
        tx.commit()?;
        Ok(true)
    }

    pub fn session(&self, session_id: i64) -> anyhow::Result<Option<TestSession>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, compose_file_id, session_name, started_at, completed_at, status
             FROM test_sessions WHERE id = ?1",
            params![session_id],
            map_session,
        )
        .optional()
        .context("load session")
    }

    pub fn latest_session(&self) -> anyhow::Result<Option<TestSession>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, compose_file_id, session_name, started_at, completed_at, status
             FROM test_sessions ORDER BY id DESC LIMIT 1",
            [],
            map_session,
        )
        .optional()
        .context("load latest session")
    }

    // --- Services ---

    pub fn record_service(&self, session_id: i64, svc: &ComposeService) -> anyhow::Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO services(session_id, name, image, ports) VALUES (?1, ?2, ?3, ?4)",
            params![
                session_id,
                svc.name,
                svc.image.clone().unwrap_or_default(),
                serde_json::to_string(&svc.ports)?
            ],
        )
        .with_context(|| format!("insert service '{}'", svc.name))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn services_for_session(&self, session_id: i64) -> anyhow::Result<Vec<ServiceRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, name, image, ports FROM services
             WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                let ports: String = row.get(4)?;
                Ok(ServiceRecord {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    name: row.get(2)?,
                    image: row.get(3)?,
                    ports: serde_json::from_str(&ports).unwrap_or_default(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // --- Specs & endpoints ---

    pub fn record_spec(
        &self,
        session_id: i64,
        service_id: Option<i64>,
        spec_url: &str,
        content: Option<&str>,
        version: Option<&str>,
    ) -> anyhow::Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO api_specs(session_id, service_id, spec_url, spec_content, version, discovered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![session_id, service_id, spec_url, content, version, now_rfc3339()],
        )
        .context("insert api spec")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn spec(&self, spec_id: i64) -> anyhow::Result<Option<ApiSpecRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, session_id, service_id, spec_url, spec_content, version, discovered_at
             FROM api_specs WHERE id = ?1",
            params![spec_id],
            map_spec,
        )
        .optional()
        .context("load api spec")
    }

    pub fn specs_for_session(&self, session_id: i64) -> anyhow::Result<Vec<ApiSpecRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, service_id, spec_url, spec_content, version, discovered_at
             FROM api_specs WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![session_id], map_spec)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn record_endpoint(
        &self,
        spec_id: i64,
        path: &str,
        method: &str,
        sla_response_time_ms: Option<f64>,
        sla_error_rate: Option<f64>,
    ) -> anyhow::Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO endpoints(spec_id, path, method, sla_response_time, sla_error_rate)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![spec_id, path, method, sla_response_time_ms, sla_error_rate],
        )
        .context("insert endpoint")?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recently declared endpoint for a path; SLA columns may be null.
    pub fn endpoint_by_path(&self, path: &str) -> anyhow::Result<Option<EndpointRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, spec_id, path, method, sla_response_time, sla_error_rate
             FROM endpoints WHERE path = ?1 ORDER BY id DESC LIMIT 1",
            params![path],
            |row| {
                Ok(EndpointRecord {
                    id: row.get(0)?,
                    spec_id: row.get(1)?,
                    path: row.get(2)?,
                    method: row.get(3)?,
                    sla_response_time_ms: row.get(4)?,
                    sla_error_rate: row.get(5)?,
                })
            },
        )
        .optional()
        .context("load endpoint")
    }

    // --- Tests & runs ---

    pub fn record_test(
        &self,
        session_id: i64,
        name: &str,
        kind: TestKind,
        script: &str,
    ) -> anyhow::Result<GeneratedTest> {
        let conn = self.lock()?;
        let created_at = now_rfc3339();
        conn.execute(
            "INSERT INTO tests(session_id, name, type, script, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![session_id, name, kind.as_str(), script, created_at],
        )
        .context("insert test")?;
        Ok(GeneratedTest {
            id: conn.last_insert_rowid(),
            session_id,
            name: name.to_string(),
            kind,
            script: script.to_string(),
            created_at,
        })
    }

    pub fn test(&self, test_id: i64) -> anyhow::Result<Option<GeneratedTest>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, session_id, name, type, script, created_at FROM tests WHERE id = ?1",
            params![test_id],
            |row| {
                let kind: String = row.get(3)?;
                Ok(GeneratedTest {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    name: row.get(2)?,
                    kind: TestKind::parse(&kind).unwrap_or(TestKind::Load),
                    script: row.get(4)?,
                    created_at: row.get(5)?,
                })
            },
        )
        .optional()
        .context("load test")
    }

    /// Inserts the run row before the load tool starts, so an interrupted run
    /// still leaves an (incomplete) record.
    pub fn create_run(&self, test_id: i64, virtual_users: u32, duration: &str) -> anyhow::Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO test_runs(test_id, started_at, vus, duration) VALUES (?1, ?2, ?3, ?4)",
            params![test_id, now_rfc3339(), virtual_users, duration],
        )
        .context("insert test run")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn complete_run(&self, run_id: i64, raw_results: &str) -> anyhow::Result<()> {
        let conn = self.lock()?;
        let n = conn
            .execute(
                "UPDATE test_runs SET completed_at = ?1, results = ?2
                 WHERE id = ?3 AND completed_at IS NULL",
                params![now_rfc3339(), raw_results, run_id],
            )
            .context("complete test run")?;
        if n == 0 {
            anyhow::bail!("test run {} missing or already completed", run_id);
        }
        Ok(())
    }

    pub fn run(&self, run_id: i64) -> anyhow::Result<Option<TestRun>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, test_id, started_at, completed_at, vus, duration, results
             FROM test_runs WHERE id = ?1",
            params![run_id],
            |row| {
                Ok(TestRun {
                    id: row.get(0)?,
                    test_id: row.get(1)?,
                    started_at: row.get(2)?,
                    completed_at: row.get(3)?,
                    virtual_users: row.get(4)?,
                    duration: row.get(5)?,
                    raw_results: row.get(6)?,
                })
            },
        )
        .optional()
        .context("load test run")
    }

    // --- Metrics ---

    pub fn record_metrics(&self, run_id: i64, samples: &[MetricSample]) -> anyhow::Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO metrics(run_id, endpoint, avg_response_time, min_response_time,
                                     max_response_time, error_rate, requests_per_second)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for s in samples {
                stmt.execute(params![
                    run_id,
                    s.endpoint,
                    s.avg_response_time,
                    s.min_response_time,
                    s.max_response_time,
                    s.error_rate,
                    s.requests_per_second
                ])
                .with_context(|| format!("insert metrics for '{}'", s.endpoint))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn metrics_for_run(&self, run_id: i64) -> anyhow::Result<Vec<MetricSample>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT endpoint, avg_response_time, min_response_time, max_response_time,
                    error_rate, requests_per_second
             FROM metrics WHERE run_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok(MetricSample {
                    endpoint: row.get(0)?,
                    avg_response_time: row.get(1)?,
                    min_response_time: row.get(2)?,
                    max_response_time: row.get(3)?,
                    error_rate: row.get(4)?,
                    requests_per_second: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Mean `avg_response_time` for an endpoint over every run except
    /// `exclude_run_id`. `None` when no other run has a sample.
    pub fn historical_average(
        &self,
        endpoint: &str,
        exclude_run_id: i64,
    ) -> anyhow::Result<Option<f64>> {
        let conn = self.lock()?;
        let avg: Option<f64> = conn.query_row(
            "SELECT AVG(avg_response_time) FROM metrics WHERE endpoint = ?1 AND run_id != ?2",
            params![endpoint, exclude_run_id],
            |r| r.get(0),
        )?;
        Ok(avg)
    }

    /// Samples from runs started within the last `days` days, newest first.
    /// A window reaching past the representable calendar has no cutoff.
    pub fn history(&self, endpoint: Option<&str>, days: u32) -> anyhow::Result<Vec<HistoryPoint>> {
        let cutoff = chrono::Duration::try_days(i64::from(days))
            .and_then(|window| chrono::Utc::now().checked_sub_signed(window))
            .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true));
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT tr.started_at, m.endpoint, m.avg_response_time, m.error_rate, m.requests_per_second
             FROM metrics m
             JOIN test_runs tr ON m.run_id = tr.id
             WHERE (?1 IS NULL OR tr.started_at > ?1) AND (?2 IS NULL OR m.endpoint = ?2)
             ORDER BY tr.started_at DESC, m.id DESC",
        )?;
        let rows = stmt
            .query_map(params![cutoff, endpoint], |row| {
                Ok(HistoryPoint {
                    timestamp: row.get(0)?,
                    endpoint: row.get(1)?,
                    avg_time: row.get(2)?,
                    error_rate: row.get(3)?,
                    rps: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // --- Read-only summaries ---

    pub fn schema_tables(&self) -> anyhow::Result<Vec<(String, String)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT name, sql FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn recent_sessions(&self, limit: u32) -> anyhow::Result<Vec<SessionSummary>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT s.id, s.session_name, s.started_at, s.completed_at, s.status,
                    c.source_url, COUNT(DISTINCT sv.id)
             FROM test_sessions s
             LEFT JOIN compose_files c ON s.compose_file_id = c.id
             LEFT JOIN services sv ON sv.session_id = s.id
             GROUP BY s.id
             ORDER BY s.id DESC
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |r| {
                Ok(SessionSummary {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    started_at: r.get(2)?,
                    completed_at: r.get(3)?,
                    status: r.get(4)?,
                    source_url: r.get(5)?,
                    service_count: r.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn recent_compose_files(&self, limit: u32) -> anyhow::Result<Vec<ComposeFileSummary>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, source_url, hash, created_at, LENGTH(CAST(content AS BLOB))
             FROM compose_files ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |r| {
                Ok(ComposeFileSummary {
                    id: r.get(0)?,
                    source_url: r.get(1)?,
                    hash: r.get(2)?,
                    created_at: r.get(3)?,
                    size_bytes: r.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn recent_runs(&self, limit: u32) -> anyhow::Result<Vec<TestRunSummary>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT r.id, r.started_at, r.completed_at, r.vus, r.duration,
                    t.name, t.type, s.session_name
             FROM test_runs r
             JOIN tests t ON r.test_id = t.id
             JOIN test_sessions s ON t.session_id = s.id
             ORDER BY r.id DESC
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |r| {
                Ok(TestRunSummary {
                    id: r.get(0)?,
                    started_at: r.get(1)?,
                    completed_at: r.get(2)?,
                    vus: r.get(3)?,
                    duration: r.get(4)?,
                    test_name: r.get(5)?,
                    test_type: r.get(6)?,
                    session_name: r.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_rows(&self, table: &str) -> anyhow::Result<i64> {
        let conn = self.lock()?;
        // table names cannot be bound as parameters
        if !crate::storage::schema::TABLES.contains(&table) {
            anyhow::bail!("Invalid table name for count_rows: {}", table);
        }
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        let n: i64 = conn.query_row(&sql, [], |r| r.get(0))?;
        Ok(n)
    }
}

/// UTC timestamp with fixed millisecond precision, so stored values sort
/// lexically in time order.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn map_compose_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<ComposeFile> {
    Ok(ComposeFile {
        id: row.get(0)?,
        source: row.get(1)?,
        content: row.get(2)?,
        content_hash: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn map_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<TestSession> {
    let status: String = row.get(5)?;
    let status = SessionStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            format!("unknown session status '{status}'").into(),
        )
    })?;
    Ok(TestSession {
        id: row.get(0)?,
        compose_file_id: row.get(1)?,
        name: row.get(2)?,
        started_at: row.get(3)?,
        completed_at: row.get(4)?,
        status,
    })
}

fn map_spec(row: &rusqlite::Row<'_>) -> rusqlite::Result<ApiSpecRecord> {
    Ok(ApiSpecRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        service_id: row.get(2)?,
        spec_url: row.get(3)?,
        content: row.get(4)?,
        version: row.get(5)?,
        discovered_at: row.get(6)?,
    })
}
