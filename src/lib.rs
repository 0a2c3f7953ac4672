//! Process manager daemon for long-running application processes.

#![warn(unused_crate_dependencies)]
// These dependencies are only used in the binary (src/bin/main.rs)
// Test dependencies are only used in test code
#[cfg(test)]
use assert_cmd as _;
use libc as _;
// OpenSSL is only needed for static linking on Linux
#[cfg(target_os = "linux")]
use openssl_sys as _;
#[cfg(test)]
use predicates as _;
use strum as _;
use tracing_subscriber as _;

/// Shared adapter dispatch.
pub mod api;

/// CLI parsing.
pub mod cli;

/// Process specs and config loading.
pub mod config;

/// Daemon bootstrap and shutdown.
pub mod daemon;

/// Errors.
pub mod error;

/// In-process event bus.
pub mod events;

/// Health probing.
pub mod health;

/// Home directory layout.
pub mod home;

/// Local control channel.
pub mod ipc;

/// Log aggregation.
pub mod logs;

/// Metrics collection and downsampling.
pub mod metrics;

/// Core process types.
pub mod process;

/// Persistence layer.
pub mod store;

/// Process supervisor.
pub mod supervisor;

/// HTTP/WebSocket API.
pub mod web;

/// Scoped environment overrides for tests.
#[cfg(test)]
mod test_env;
