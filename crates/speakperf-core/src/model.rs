use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComposeFile {
    pub id: i64,
    pub source: String,
    pub content: String,
    pub content_hash: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initialized,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Initialized => "initialized",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initialized" => Some(SessionStatus::Initialized),
            "running" => Some(SessionStatus::Running),
            "completed" => Some(SessionStatus::Completed),
            "failed" => Some(SessionStatus::Failed),
            "cancelled" => Some(SessionStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }

    /// Statuses only move forward; terminal statuses never change.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Initialized, Running)
                | (Initialized, Failed)
                | (Initialized, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestSession {
    pub id: i64,
    pub compose_file_id: i64,
    pub name: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceRecord {
    pub id: i64,
    pub session_id: i64,
    pub name: String,
    pub image: String,
    /// "host:container" mappings in declaration order.
    pub ports: Vec<String>,
}

impl ServiceRecord {
    pub fn host_port(&self) -> Option<String> {
        self.ports.first().and_then(|p| crate::compose::host_port(p))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiSpecRecord {
    pub id: i64,
    pub session_id: i64,
    pub service_id: Option<i64>,
    pub spec_url: String,
    pub content: Option<String>,
    pub version: Option<String>,
    pub discovered_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointRecord {
    pub id: i64,
    pub spec_id: i64,
    pub path: String,
    pub method: String,
    pub sla_response_time_ms: Option<f64>,
    pub sla_error_rate: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    Load,
    Stress,
    Spike,
    Browser,
}

impl TestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestKind::Load => "load",
            TestKind::Stress => "stress",
            TestKind::Spike => "spike",
            TestKind::Browser => "browser",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "load" => Some(TestKind::Load),
            "stress" => Some(TestKind::Stress),
            "spike" => Some(TestKind::Spike),
            "browser" => Some(TestKind::Browser),
            _ => None,
        }
    }
}

impl std::fmt::Display for TestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedTest {
    pub id: i64,
    pub session_id: i64,
    pub name: String,
    pub kind: TestKind,
    pub script: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestRun {
    pub id: i64,
    pub test_id: i64,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub virtual_users: u32,
    pub duration: String,
    pub raw_results: Option<String>,
}

impl TestRun {
    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Per-endpoint aggregate for one run. Times are milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSample {
    pub endpoint: String,
    pub avg_response_time: f64,
    pub min_response_time: f64,
    pub max_response_time: f64,
    pub error_rate: f64,
    pub requests_per_second: f64,
}

/// One row of `query_test_history`; field names are the wire names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryPoint {
    pub timestamp: String,
    pub endpoint: String,
    #[serde(rename = "avgTime")]
    pub avg_time: f64,
    #[serde(rename = "errorRate")]
    pub error_rate: f64,
    pub rps: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: i64,
    pub name: String,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    pub status: String,
    pub source_url: Option<String>,
    pub service_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeFileSummary {
    pub id: i64,
    pub source_url: String,
    pub hash: String,
    pub created_at: String,
    pub size_bytes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRunSummary {
    pub id: i64,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    pub vus: u32,
    pub duration: String,
    pub test_name: String,
    pub test_type: String,
    pub session_name: String,
}
