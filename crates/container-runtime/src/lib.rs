#![doc = include_str!("../README.md")]
//!
//! # Module Structure
//!
//! - [`error`]: Domain error types (`RuntimeError`)
//! - [`config`]: Runtime configuration (`RuntimeConfig`, builder, `PullPolicy`)
//! - [`docker`]: Container runtime abstraction (`ContainerRuntime` trait, `BollardRuntime`)
//! - [`spec`]: Container description (`ContainerSpec`, `Mount`, `OutputSink`)
//! - [`provisioner`]: Networks and volumes (`ResourceProvisioner`)
//! - [`launcher`]: Container lifecycle (`ContainerLauncher`, `RunningContainer`)
//! - [`log_watcher`]: Log readiness oracle (`LogWatcher`, `LogAssertion`, `Matched`)
//!
//! # Architecture
//!
//! ```text
//! ContainerSpec --build--> RunningContainer --start--> Started
//!                               |                        |
//!                          LogWatcher <---- logs ---- exec/logs
//!                               |
//!                        ContainerRuntime (bollard | mock)
//! ```

pub mod config;
pub mod docker;
pub mod error;
pub mod launcher;
pub mod log_watcher;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod provisioner;
pub mod spec;

// --- Public API Re-exports ---

// Configuration
pub use config::{PullPolicy, RuntimeConfig, RuntimeConfigBuilder};

// Error
pub use error::RuntimeError;

// Runtime API
pub use docker::{BollardRuntime, ContainerRuntime, ExecResult, LogChunk};

// Container description
pub use spec::{
    ContainerSpec, LogLine, LogStream, Mount, MountSource, NamespaceMode, OutputSink,
    SESSION_LABEL, unique_name,
};

// Resources
pub use provisioner::{
    NetworkResource, Provisioned, ResourceKind, ResourceProvisioner, VolumeResource,
};

// Lifecycle
pub use launcher::{ContainerLauncher, ContainerState, RunningContainer};

// Log watching
pub use log_watcher::{LogAssertion, LogCursor, LogWatcher, Matched};

#[cfg(any(test, feature = "test-util"))]
pub use mock::MockRuntime;
