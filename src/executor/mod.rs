//! Host execution seam.
//!
//! The core reaches every host through this narrow capability surface.
//! Implementations may be local (same process, same filesystem) or remote;
//! the core never assumes behavior beyond these contracts.

pub mod local;

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use local::LocalExecutor;

/// Normalized OS information reported by a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsInfo {
    pub os: String,
    pub arch: String,
}

/// Output of a synchronous command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Interleaved stdout and stderr.
    pub output: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Minimal host capability surface consumed by the planner and applier.
#[async_trait]
pub trait HostExecutor: Send + Sync {
    /// Stateless reachability probe.
    async fn check_connectivity(&self) -> Result<()>;

    /// OS and architecture with normalized tokens.
    async fn os_info(&self) -> Result<OsInfo>;

    /// Whether `port` is bindable on the host's loopback.
    async fn check_port_available(&self, port: u16) -> Result<bool>;

    /// Free bytes at `path`, searching parent directories when the path
    /// does not exist yet.
    async fn disk_space(&self, path: &Path) -> Result<u64>;

    /// Create a directory (and parents). Idempotent.
    async fn create_directory(&self, path: &Path, mode: u32) -> Result<()>;

    /// Write or replace a file with the given bytes.
    async fn upload_content(&self, content: &[u8], path: &Path) -> Result<()>;

    /// Run a one-shot command and wait for it.
    async fn execute(&self, program: &str, args: &[String]) -> Result<CommandOutput>;

    /// Start a background process; returns once the process is spawned.
    async fn background(&self, program: &str, args: &[String]) -> Result<u32>;

    /// Whether a named user exists on the host. Optional for local
    /// executors; remote implementations use it for a warning-only check.
    async fn user_exists(&self, name: &str) -> Result<bool>;
}
