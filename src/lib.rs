//! Amphora Registry - library crate
//!
//! Governance and distribution plane for agentic artifacts: a catalogue of
//! versioned MCP server, agent, and skill descriptors, plus the reconciler
//! that turns deployment intent into running instances on a local docker
//! runtime or a Kubernetes cluster.

#[macro_use]
mod macros;

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod mcp;
pub mod models;
pub mod runtime;
pub mod services;
pub mod store;
pub mod telemetry;

pub use config::Config;
pub use error::{AppError, Result};
