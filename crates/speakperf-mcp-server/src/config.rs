use speakperf_core::OrchestratorConfig;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub max_msg_bytes: usize,
    pub max_field_bytes: usize,
    pub cache_entries: u64,
    pub log_level: String,
    /// `None` means the default under the home directory.
    pub log_dir: Option<PathBuf>,
    pub db_path: PathBuf,
    pub work_dir: PathBuf,
    pub settle_secs: u64,
    pub probe_host: String,
    pub docker_bin: String,
    pub k6_bin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_msg_bytes: 1_000_000,
            max_field_bytes: 64_000,
            cache_entries: 64,
            log_level: "info".to_string(),
            log_dir: None,
            db_path: PathBuf::from("./perf_test.db"),
            work_dir: env::temp_dir(),
            settle_secs: 10,
            probe_host: "localhost".to_string(),
            docker_bin: "docker".to_string(),
            k6_bin: "k6".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| env::var(k).ok())
    }

    /// Same as [`ServerConfig::from_env`] with an injectable source. Values
    /// that fail to parse keep the default.
    pub fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(v) = get("MCP_LOG_LEVEL").filter(|v| !v.trim().is_empty()) {
            cfg.log_level = v;
        }
        if let Some(v) = get("MCP_LOG_DIR").filter(|v| !v.trim().is_empty()) {
            cfg.log_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("SPEAKPERF_DB").filter(|v| !v.trim().is_empty()) {
            cfg.db_path = PathBuf::from(v);
        }
        if let Some(v) = get("SPEAKPERF_WORK_DIR").filter(|v| !v.trim().is_empty()) {
            cfg.work_dir = PathBuf::from(v);
        }
        if let Some(n) = get("SPEAKPERF_SETTLE_SECS").and_then(|v| v.parse().ok()) {
            cfg.settle_secs = n;
        }
        if let Some(v) = get("SPEAKPERF_PROBE_HOST").filter(|v| !v.trim().is_empty()) {
            cfg.probe_host = v;
        }
        if let Some(v) = get("SPEAKPERF_DOCKER_BIN").filter(|v| !v.trim().is_empty()) {
            cfg.docker_bin = v;
        }
        if let Some(v) = get("SPEAKPERF_K6_BIN").filter(|v| !v.trim().is_empty()) {
            cfg.k6_bin = v;
        }
        if let Some(n) = get("SPEAKPERF_MAX_BYTES").and_then(|v| v.parse().ok()) {
            cfg.max_msg_bytes = n;
        }
        if let Some(n) = get("SPEAKPERF_MAX_FIELD_BYTES").and_then(|v| v.parse().ok()) {
            cfg.max_field_bytes = n;
        }
        cfg
    }

    /// Configured directory, else `~/.speak-perf-mcp/logs`, else `./logs`.
    pub fn resolved_log_dir(&self) -> PathBuf {
        if let Some(dir) = &self.log_dir {
            return dir.clone();
        }
        match dirs::home_dir() {
            Some(home) => home.join(".speak-perf-mcp").join("logs"),
            None => PathBuf::from("logs"),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            work_root: self.work_dir.clone(),
            settle_delay: Duration::from_secs(self.settle_secs),
            probe_host: self.probe_host.clone(),
        }
    }
}
