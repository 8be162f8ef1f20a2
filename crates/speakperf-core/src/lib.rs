//! Container test-lifecycle orchestration for performance testing.
//!
//! A compose source is resolved and stored, materialized into an isolated
//! runtime, probed for API specs, load-tested with generated k6 scripts and
//! torn down again. Everything that happened is recorded in SQLite.

pub mod analyzer;
pub mod compose;
pub mod discovery;
pub mod errors;
pub mod executor;
pub mod fingerprint;
pub mod generator;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod runtime;
pub mod storage;

pub use errors::{PerfError, PerfResult};
pub use orchestrator::{Dependencies, Orchestrator, OrchestratorConfig, Outcome, Report};
