//! Shared test doubles: a simulated host and supervisor that track which
//! ports are "listening" so process starts observe realistic transitions
//! without real mongod processes.
#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use async_trait::async_trait;

use mongolift::executor::{CommandOutput, HostExecutor, OsInfo};
use mongolift::supervisor::Supervisor;

/// State shared between the simulated executor and supervisor.
#[derive(Default)]
pub struct SimState {
    pub listening: Mutex<HashSet<u16>>,
    pub started_programs: Mutex<Vec<String>>,
    pub stopped_programs: Mutex<Vec<String>>,
    /// Number of upcoming `start_program` calls that should fail.
    pub failing_starts: Mutex<usize>,
}

impl SimState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next_starts(&self, count: usize) {
        *self.failing_starts.lock().unwrap() = count;
    }

    pub fn start_count(&self) -> usize {
        self.started_programs.lock().unwrap().len()
    }
}

fn port_of(program: &str) -> Option<u16> {
    program.rsplit('-').next()?.parse().ok()
}

/// Host executor backed by the real filesystem and the simulated port set.
pub struct SimExecutor {
    state: Arc<SimState>,
}

impl SimExecutor {
    pub fn new(state: Arc<SimState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl HostExecutor for SimExecutor {
    async fn check_connectivity(&self) -> Result<()> {
        Ok(())
    }

    async fn os_info(&self) -> Result<OsInfo> {
        Ok(OsInfo {
            os: "linux".into(),
            arch: "amd64".into(),
        })
    }

    async fn check_port_available(&self, port: u16) -> Result<bool> {
        Ok(!self.state.listening.lock().unwrap().contains(&port))
    }

    async fn disk_space(&self, _path: &Path) -> Result<u64> {
        Ok(100 * 1024 * 1024 * 1024)
    }

    async fn create_directory(&self, path: &Path, _mode: u32) -> Result<()> {
        std::fs::create_dir_all(path)?;
        Ok(())
    }

    async fn upload_content(&self, content: &[u8], path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    async fn execute(&self, _program: &str, _args: &[String]) -> Result<CommandOutput> {
        Ok(CommandOutput {
            output: String::new(),
            exit_code: 0,
        })
    }

    async fn background(&self, _program: &str, _args: &[String]) -> Result<u32> {
        Ok(4242)
    }

    async fn user_exists(&self, _name: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Supervisor that flips the simulated port set when programs start.
pub struct SimSupervisor {
    state: Arc<SimState>,
    config_path: PathBuf,
}

impl SimSupervisor {
    pub fn new(state: Arc<SimState>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            state,
            config_path: config_path.into(),
        }
    }
}

#[async_trait]
impl Supervisor for SimSupervisor {
    async fn write_config(&self, content: &str) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.config_path, content)?;
        Ok(())
    }

    async fn start_daemon(&self) -> Result<()> {
        Ok(())
    }

    async fn start_program(&self, name: &str) -> Result<()> {
        {
            let mut failing = self.state.failing_starts.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                bail!("simulated supervisor failure starting {name}");
            }
        }
        self.state
            .started_programs
            .lock()
            .unwrap()
            .push(name.to_string());
        if let Some(port) = port_of(name) {
            self.state.listening.lock().unwrap().insert(port);
        }
        Ok(())
    }

    async fn stop_program(&self, name: &str) -> Result<()> {
        self.state
            .stopped_programs
            .lock()
            .unwrap()
            .push(name.to_string());
        if let Some(port) = port_of(name) {
            self.state.listening.lock().unwrap().remove(&port);
        }
        Ok(())
    }
}
