//! Local host executor: same process, same filesystem.

use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{CommandOutput, HostExecutor, OsInfo};

#[derive(Debug, Default, Clone)]
pub struct LocalExecutor;

impl LocalExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl HostExecutor for LocalExecutor {
    async fn check_connectivity(&self) -> Result<()> {
        Ok(())
    }

    async fn os_info(&self) -> Result<OsInfo> {
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            other => other,
        };
        let os = match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        Ok(OsInfo {
            os: os.to_string(),
            arch: arch.to_string(),
        })
    }

    async fn check_port_available(&self, port: u16) -> Result<bool> {
        let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, port);
        match TcpListener::bind(addr) {
            Ok(listener) => {
                drop(listener);
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    async fn disk_space(&self, path: &Path) -> Result<u64> {
        // Walk up until an existing directory is found; a cluster root that
        // has not been created yet still reports its filesystem.
        let mut probe: PathBuf = path.to_path_buf();
        while !probe.exists() {
            probe = match probe.parent() {
                Some(parent) => parent.to_path_buf(),
                None => break,
            };
        }
        fs2::available_space(&probe)
            .with_context(|| format!("failed to query free space at {}", probe.display()))
    }

    async fn create_directory(&self, path: &Path, mode: u32) -> Result<()> {
        tokio::fs::create_dir_all(path)
            .await
            .with_context(|| format!("failed to create {}", path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
                .await
                .with_context(|| format!("failed to set mode on {}", path.display()))?;
        }
        #[cfg(not(unix))]
        let _ = mode;
        Ok(())
    }

    async fn upload_content(&self, content: &[u8], path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("failed to write {}", path.display()))
    }

    async fn execute(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        debug!(program, ?args, "executing command");
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .with_context(|| format!("failed to run {program}"))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(CommandOutput {
            output: combined,
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn background(&self, program: &str, args: &[String]) -> Result<u32> {
        debug!(program, ?args, "starting background process");
        let child = Command::new(program)
            .args(args)
            .spawn()
            .with_context(|| format!("failed to start {program}"))?;
        child
            .id()
            .ok_or_else(|| anyhow!("{program} exited before a pid could be observed"))
    }

    async fn user_exists(&self, name: &str) -> Result<bool> {
        let result = self.execute("id", &["-u".to_string(), name.to_string()]).await?;
        Ok(result.success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn os_info_reports_normalized_tokens() {
        let info = LocalExecutor::new().os_info().await.unwrap();
        assert!(["linux", "darwin", "windows"].contains(&info.os.as_str()));
        assert!(["amd64", "arm64"].contains(&info.arch.as_str()));
    }

    #[tokio::test]
    async fn bound_port_reports_unavailable() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let executor = LocalExecutor::new();
        assert!(!executor.check_port_available(port).await.unwrap());
        drop(listener);
    }

    #[tokio::test]
    async fn disk_space_walks_to_existing_parent() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("not/created/yet");
        let free = LocalExecutor::new().disk_space(&missing).await.unwrap();
        assert!(free > 0);
    }

    #[tokio::test]
    async fn create_directory_is_idempotent() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a/b");
        let executor = LocalExecutor::new();
        executor.create_directory(&target, 0o755).await.unwrap();
        executor.create_directory(&target, 0o755).await.unwrap();
        assert!(target.is_dir());
    }

    #[tokio::test]
    async fn upload_content_creates_parents_and_replaces() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("conf/mongod.conf");
        let executor = LocalExecutor::new();
        executor.upload_content(b"one", &target).await.unwrap();
        executor.upload_content(b"two", &target).await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"two");
    }

    #[tokio::test]
    async fn execute_captures_output_and_code() {
        let executor = LocalExecutor::new();
        let result = executor
            .execute("sh", &["-c".to_string(), "echo hi; exit 3".to_string()])
            .await
            .unwrap();
        assert!(result.output.contains("hi"));
        assert_eq!(result.exit_code, 3);
        assert!(!result.success());
    }
}
