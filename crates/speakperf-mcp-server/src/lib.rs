//! MCP stdio server exposing the SpeakPerf orchestrator as tools and
//! read-only resources.

pub mod cache;
pub mod config;
pub mod logging;
pub mod resources;
pub mod server;
pub mod tools;
