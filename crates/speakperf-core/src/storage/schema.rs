pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS compose_files (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  source_url TEXT NOT NULL,
  content TEXT NOT NULL,
  hash TEXT NOT NULL UNIQUE,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS test_sessions (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  compose_file_id INTEGER NOT NULL REFERENCES compose_files(id),
  session_name TEXT NOT NULL,
  started_at TEXT NOT NULL,
  completed_at TEXT,
  status TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS services (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  session_id INTEGER NOT NULL REFERENCES test_sessions(id),
  name TEXT NOT NULL,
  image TEXT NOT NULL,
  ports TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS api_specs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  session_id INTEGER NOT NULL REFERENCES test_sessions(id),
  service_id INTEGER REFERENCES services(id),
  spec_url TEXT NOT NULL,
  spec_content TEXT,
  version TEXT,
  discovered_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS endpoints (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  spec_id INTEGER NOT NULL REFERENCES api_specs(id),
  path TEXT NOT NULL,
  method TEXT NOT NULL,
  sla_response_time REAL,
  sla_error_rate REAL
);

CREATE TABLE IF NOT EXISTS tests (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  session_id INTEGER NOT NULL REFERENCES test_sessions(id),
  name TEXT NOT NULL,
  type TEXT NOT NULL,
  script TEXT NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS test_runs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  test_id INTEGER NOT NULL REFERENCES tests(id),
  started_at TEXT NOT NULL,
  completed_at TEXT,
  vus INTEGER NOT NULL,
  duration TEXT NOT NULL,
  results TEXT
);

CREATE TABLE IF NOT EXISTS metrics (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id INTEGER NOT NULL REFERENCES test_runs(id),
  endpoint TEXT NOT NULL,
  avg_response_time REAL NOT NULL,
  min_response_time REAL NOT NULL,
  max_response_time REAL NOT NULL,
  error_rate REAL NOT NULL,
  requests_per_second REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_services_session ON services(session_id);
CREATE INDEX IF NOT EXISTS idx_api_specs_session ON api_specs(session_id);
CREATE INDEX IF NOT EXISTS idx_tests_session ON tests(session_id);
CREATE INDEX IF NOT EXISTS idx_test_runs_test ON test_runs(test_id);
CREATE INDEX IF NOT EXISTS idx_metrics_run ON metrics(run_id);
CREATE INDEX IF NOT EXISTS idx_metrics_endpoint ON metrics(endpoint);
CREATE INDEX IF NOT EXISTS idx_endpoints_path ON endpoints(path);
"#;

/// Tables whose row counts may be queried by name.
pub const TABLES: &[&str] = &[
    "compose_files",
    "test_sessions",
    "services",
    "api_specs",
    "endpoints",
    "tests",
    "test_runs",
    "metrics",
];
