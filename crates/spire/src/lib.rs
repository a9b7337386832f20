#![doc = include_str!("../README.md")]
//!
//! # Module Structure
//!
//! - [`config`]: Scenario configuration (`ScenarioConfig`, builder)
//! - [`defaults`]: In-container paths, ports, readiness markers
//! - [`template`]: Config rendering (`ConfigTemplateRenderer`, `ConfigModel`, `AgentConfigModel`)
//! - [`server`]: Server container spec, `EntryCreate` registration command
//! - [`agent`]: Agent container spec, cache-update log pattern
//! - [`workload`]: Workload container spec
//! - [`scenario`]: End-to-end state machine (`ScenarioOrchestrator`, `ResourceScope`)

pub mod agent;
pub mod config;
pub mod defaults;
pub mod scenario;
pub mod server;
pub mod template;
pub mod workload;

// --- Public API Re-exports ---

// Configuration
pub use config::{ScenarioConfig, ScenarioConfigBuilder};

// Templates
pub use template::{
    AGENT_TEMPLATE, AgentConfigModel, ConfigModel, ConfigTemplateRenderer, FederationEntry,
    SERVER_TEMPLATE, TemplateModel, render_str,
};

// Container specs
pub use agent::{agent_spec, svid_updated_pattern};
pub use server::{EntryCreate, parse_entry_id, server_spec};
pub use workload::{SVID_RECEIVED_PATTERN, workload_spec};

// Scenario
pub use scenario::{
    ResourceScope, ScenarioOrchestrator, ScenarioReport, ScenarioState, StepRecord,
};
