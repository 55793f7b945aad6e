//! Apply state persistence and checkpointing.
//!
//! The apply state is single-writer: the applier owns it for the duration
//! of a run and persists it after every transition. Checkpoints are
//! write-once copies of the state taken at phase boundaries; restoring one
//! yields a `paused` state pinned to the checkpointed phase.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::errors::{ApplyError, OperationFailure};
use crate::plan::{PhaseName, Plan};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStatus {
    #[default]
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

impl ApplyStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// One line of the execution log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub phase: PhaseName,
    pub operation_id: String,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A durable, immutable snapshot of the apply state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub phase: PhaseName,
    pub description: String,
    pub state_path: PathBuf,
}

/// The mutable record of an in-progress or finished apply run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyState {
    pub state_id: String,
    pub plan_id: String,
    pub cluster_name: String,
    pub operation: String,
    pub status: ApplyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<PhaseName>,
    #[serde(default)]
    pub operation_status: BTreeMap<String, OperationStatus>,
    #[serde(default)]
    pub execution_log: Vec<ExecutionLogEntry>,
    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<OperationFailure>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApplyState {
    pub fn for_plan(plan: &Plan) -> Self {
        let now = Utc::now();
        Self {
            state_id: Uuid::new_v4().to_string(),
            plan_id: plan.plan_id.clone(),
            cluster_name: plan.cluster_name.clone(),
            operation: plan.operation.clone(),
            status: ApplyStatus::Pending,
            current_phase: None,
            operation_status: BTreeMap::new(),
            execution_log: Vec::new(),
            checkpoints: Vec::new(),
            failure: None,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn transition(&mut self, status: ApplyStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn log(&mut self, phase: PhaseName, operation_id: &str, event: &str, message: Option<String>) {
        self.execution_log.push(ExecutionLogEntry {
            timestamp: Utc::now(),
            phase,
            operation_id: operation_id.to_string(),
            event: event.to_string(),
            message,
        });
        self.updated_at = Utc::now();
    }

    pub fn set_operation_status(&mut self, operation_id: &str, status: OperationStatus) {
        self.operation_status
            .insert(operation_id.to_string(), status);
        self.updated_at = Utc::now();
    }

    pub fn operation_completed(&self, operation_id: &str) -> bool {
        matches!(
            self.operation_status.get(operation_id),
            Some(OperationStatus::Completed)
        )
    }

}

/// File layout: one `<state_id>.json` per state, one
/// `<state_id>-checkpoint-<n>.json` per checkpoint.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn state_path(&self, state_id: &str) -> PathBuf {
        self.dir.join(format!("{state_id}.json"))
    }

    pub fn save(&self, state: &ApplyState) -> Result<(), ApplyError> {
        let path = self.state_path(&state.state_id);
        self.write_json(&path, state)
    }

    pub fn load(&self, state_id: &str) -> Result<ApplyState, ApplyError> {
        let path = self.state_path(state_id);
        if !path.exists() {
            return Err(ApplyError::StateNotFound(state_id.to_string()));
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))
            .map_err(ApplyError::Other)?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))
            .map_err(ApplyError::Other)
    }

    /// Snapshot the state into a write-once checkpoint file and append the
    /// checkpoint record.
    pub fn checkpoint(
        &self,
        state: &mut ApplyState,
        phase: PhaseName,
        description: &str,
    ) -> Result<Checkpoint, ApplyError> {
        let index = state.checkpoints.len();
        let path = self
            .dir
            .join(format!("{}-checkpoint-{index:02}.json", state.state_id));
        // The snapshot must round-trip to a state with the checkpointed
        // phase as its current phase.
        let mut snapshot = state.clone();
        snapshot.current_phase = Some(phase);
        self.write_json(&path, &snapshot)?;

        let checkpoint = Checkpoint {
            id: format!("{}-{index:02}", state.state_id),
            timestamp: Utc::now(),
            phase,
            description: description.to_string(),
            state_path: path,
        };
        state.checkpoints.push(checkpoint.clone());
        state.updated_at = Utc::now();
        self.save(state)?;
        debug!(checkpoint = %checkpoint.id, phase = %phase, "checkpoint written");
        Ok(checkpoint)
    }

    /// Restore the most recent checkpoint of a state as a paused state.
    pub fn restore_latest(&self, state_id: &str) -> Result<ApplyState, ApplyError> {
        let state = self.load(state_id)?;
        let checkpoint = state
            .checkpoints
            .last()
            .ok_or_else(|| ApplyError::CheckpointNotFound(state_id.to_string()))?;
        let content = std::fs::read_to_string(&checkpoint.state_path)
            .with_context(|| format!("failed to read {}", checkpoint.state_path.display()))
            .map_err(ApplyError::Other)?;
        let mut restored: ApplyState = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", checkpoint.state_path.display()))
            .map_err(ApplyError::Other)?;
        restored.transition(ApplyStatus::Paused);
        // Carry the full checkpoint history forward; checkpoint files
        // themselves are never rewritten.
        restored.checkpoints = state.checkpoints.clone();
        Ok(restored)
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), ApplyError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| ApplyError::StatePersist {
            path: self.dir.clone(),
            source: e.into(),
        })?;
        let json = serde_json::to_string_pretty(value).map_err(|e| ApplyError::StatePersist {
            path: path.to_path_buf(),
            source: e.into(),
        })?;
        std::fs::write(path, json).map_err(|e| ApplyError::StatePersist {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }
}
