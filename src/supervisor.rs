//! Process supervisor adapter.
//!
//! The applier manages node processes through this seam: write the
//! supervisor configuration, start the daemon, and start or stop programs
//! by their stable names (`mongod-<port>`, `mongos-<port>`,
//! `config-<port>`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use tracing::debug;

use crate::executor::HostExecutor;

#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Write the supervisor configuration file.
    async fn write_config(&self, content: &str) -> Result<()>;

    /// Start the supervisor daemon for this cluster. Idempotent: a daemon
    /// already running against the same configuration is success.
    async fn start_daemon(&self) -> Result<()>;

    /// Start a program by name.
    async fn start_program(&self, name: &str) -> Result<()>;

    /// Stop a program by name.
    async fn stop_program(&self, name: &str) -> Result<()>;
}

/// Drives a supervisord instance through the host executor.
pub struct SupervisordAdapter {
    executor: Arc<dyn HostExecutor>,
    config_path: PathBuf,
}

impl SupervisordAdapter {
    pub fn new(executor: Arc<dyn HostExecutor>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            config_path: config_path.into(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    fn config_arg(&self) -> String {
        self.config_path.display().to_string()
    }

    async fn supervisorctl(&self, action: &str, name: &str) -> Result<()> {
        let args = vec![
            "-c".to_string(),
            self.config_arg(),
            action.to_string(),
            name.to_string(),
        ];
        let result = self.executor.execute("supervisorctl", &args).await?;
        // supervisorctl reports "already started" / "not running" on
        // stdout with a zero exit; both are fine for our idempotent use.
        if !result.success()
            && !result.output.contains("already started")
            && !result.output.contains("not running")
        {
            bail!(
                "supervisorctl {action} {name} failed (exit {}): {}",
                result.exit_code,
                result.output.trim()
            );
        }
        debug!(action, name, "supervisorctl ok");
        Ok(())
    }
}

#[async_trait]
impl Supervisor for SupervisordAdapter {
    async fn write_config(&self, content: &str) -> Result<()> {
        self.executor
            .upload_content(content.as_bytes(), &self.config_path)
            .await
    }

    async fn start_daemon(&self) -> Result<()> {
        let args = vec!["-c".to_string(), self.config_arg()];
        let result = self.executor.execute("supervisord", &args).await?;
        if !result.success() && !result.output.contains("already listening") {
            bail!(
                "supervisord failed to start (exit {}): {}",
                result.exit_code,
                result.output.trim()
            );
        }
        Ok(())
    }

    async fn start_program(&self, name: &str) -> Result<()> {
        self.supervisorctl("start", name).await
    }

    async fn stop_program(&self, name: &str) -> Result<()> {
        self.supervisorctl("stop", name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{CommandOutput, OsInfo};
    use std::sync::Mutex;

    /// Records executed commands and replies with a canned exit code.
    struct RecordingExecutor {
        calls: Mutex<Vec<(String, Vec<String>)>>,
        exit_code: i32,
        output: String,
    }

    impl RecordingExecutor {
        fn new(exit_code: i32, output: &str) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                exit_code,
                output: output.to_string(),
            }
        }
    }

    #[async_trait]
    impl HostExecutor for RecordingExecutor {
        async fn check_connectivity(&self) -> Result<()> {
            Ok(())
        }
        async fn os_info(&self) -> Result<OsInfo> {
            Ok(OsInfo {
                os: "linux".into(),
                arch: "amd64".into(),
            })
        }
        async fn check_port_available(&self, _port: u16) -> Result<bool> {
            Ok(true)
        }
        async fn disk_space(&self, _path: &Path) -> Result<u64> {
            Ok(u64::MAX)
        }
        async fn create_directory(&self, _path: &Path, _mode: u32) -> Result<()> {
            Ok(())
        }
        async fn upload_content(&self, _content: &[u8], _path: &Path) -> Result<()> {
            Ok(())
        }
        async fn execute(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
            self.calls
                .lock()
                .unwrap()
                .push((program.to_string(), args.to_vec()));
            Ok(CommandOutput {
                output: self.output.clone(),
                exit_code: self.exit_code,
            })
        }
        async fn background(&self, _program: &str, _args: &[String]) -> Result<u32> {
            Ok(1)
        }
        async fn user_exists(&self, _name: &str) -> Result<bool> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn start_program_invokes_supervisorctl() {
        let executor = Arc::new(RecordingExecutor::new(0, ""));
        let adapter = SupervisordAdapter::new(executor.clone(), "/v7.0.2/supervisor.ini");
        adapter.start_program("mongod-30000").await.unwrap();

        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "supervisorctl");
        assert!(calls[0].1.contains(&"start".to_string()));
        assert!(calls[0].1.contains(&"mongod-30000".to_string()));
    }

    #[tokio::test]
    async fn already_started_is_success() {
        let executor = Arc::new(RecordingExecutor::new(1, "mongod-30000: ERROR (already started)"));
        let adapter = SupervisordAdapter::new(executor, "/v/supervisor.ini");
        adapter.start_program("mongod-30000").await.unwrap();
    }

    #[tokio::test]
    async fn hard_failure_propagates() {
        let executor = Arc::new(RecordingExecutor::new(2, "no such file"));
        let adapter = SupervisordAdapter::new(executor, "/v/supervisor.ini");
        assert!(adapter.start_program("mongod-30000").await.is_err());
    }
}
