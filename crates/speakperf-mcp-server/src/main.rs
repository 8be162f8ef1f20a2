use anyhow::{Context, Result};
use clap::Parser;
use speakperf_core::compose::source::SourceResolver;
use speakperf_core::discovery::HttpProbe;
use speakperf_core::executor::K6;
use speakperf_core::runtime::DockerCompose;
use speakperf_core::storage::Store;
use speakperf_core::{Dependencies, Orchestrator};
use speakperf_mcp_server::config;
use speakperf_mcp_server::logging;
use speakperf_mcp_server::server::Server;
use speakperf_mcp_server::tools::ToolContext;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// SQLite result store; overrides SPEAKPERF_DB.
    #[arg(long)]
    db_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    // config loads from env before logging exists; no eprintln here
    let mut cfg = config::ServerConfig::from_env();
    if let Some(path) = args.db_path {
        cfg.db_path = path;
    }

    let _log_guard = logging::init_logging(&cfg);

    tracing::info!(event = "server_start", config = ?cfg);

    let store = Store::open(&cfg.db_path)
        .with_context(|| format!("failed to open result store {}", cfg.db_path.display()))?;
    store.init_schema().context("failed to initialize result store schema")?;

    let deps = Dependencies {
        store,
        resolver: SourceResolver::default(),
        runtime: Arc::new(DockerCompose {
            program: cfg.docker_bin.clone(),
        }),
        probe: Arc::new(HttpProbe::default()),
        load_tool: Arc::new(K6 {
            program: cfg.k6_bin.clone(),
        }),
        config: cfg.orchestrator_config(),
    };
    let orchestrator = Arc::new(Orchestrator::new(deps));
    let ctx = Arc::new(ToolContext::new(orchestrator, cfg));

    let res = Server::run(ctx).await;
    if let Err(e) = &res {
        tracing::error!(event = "server_stopped", error = %format!("{e:#}"));
    }
    res
}
