//! The deploy plan model.
//!
//! A `Plan` is an immutable, phased, typed description of the operations
//! needed to reach a target cluster state. Operation kinds form a closed
//! tagged enum with per-kind parameter records; the applier dispatches on
//! the kind, and the declared `Change`s drive idempotence and post-hoc
//! verification.

pub mod planner;
pub mod resources;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::platform::Platform;
use crate::topology::{Node, Topology};
use crate::version::Variant;

pub use planner::{PlanRequest, Planner, ValidationCheck, ValidationResult};
pub use resources::ResourceEstimate;

/// Canonical deploy phases, totally ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseName {
    Prepare,
    Deploy,
    Initialize,
    Finalize,
}

impl PhaseName {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseName::Prepare => "prepare",
            PhaseName::Deploy => "deploy",
            PhaseName::Initialize => "initialize",
            PhaseName::Finalize => "finalize",
        }
    }

    pub fn all() -> [PhaseName; 4] {
        [
            PhaseName::Prepare,
            PhaseName::Deploy,
            PhaseName::Initialize,
            PhaseName::Finalize,
        ]
    }
}

impl std::fmt::Display for PhaseName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of operation kinds with their parameter records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationKind {
    DownloadBinary {
        variant: Variant,
        version: String,
        platform: Platform,
    },
    CreateDirectory {
        host: String,
        path: PathBuf,
    },
    CopyBinary {
        source: PathBuf,
        dest: PathBuf,
    },
    GenerateConfig {
        node: Node,
        path: PathBuf,
    },
    GenerateSupervisorConfig {
        path: PathBuf,
    },
    StartSupervisor,
    StartProcess {
        node: Node,
        program: String,
        config_file: PathBuf,
    },
    InitReplicaSet {
        name: String,
        members: Vec<Node>,
        config_server: bool,
    },
    WaitForReady {
        replica_set: String,
        members: Vec<Node>,
    },
    AddShard {
        replica_set: String,
        members: Vec<Node>,
    },
    VerifyHealth,
    SaveMetadata,
    CreateSymlink {
        target: PathBuf,
        link: PathBuf,
    },
}

impl OperationKind {
    /// The wire name of this kind, matching the serde tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            OperationKind::DownloadBinary { .. } => "download_binary",
            OperationKind::CreateDirectory { .. } => "create_directory",
            OperationKind::CopyBinary { .. } => "copy_binary",
            OperationKind::GenerateConfig { .. } => "generate_config",
            OperationKind::GenerateSupervisorConfig { .. } => "generate_supervisor_config",
            OperationKind::StartSupervisor => "start_supervisor",
            OperationKind::StartProcess { .. } => "start_process",
            OperationKind::InitReplicaSet { .. } => "init_replica_set",
            OperationKind::WaitForReady { .. } => "wait_for_ready",
            OperationKind::AddShard { .. } => "add_shard",
            OperationKind::VerifyHealth => "verify_health",
            OperationKind::SaveMetadata => "save_metadata",
            OperationKind::CreateSymlink { .. } => "create_symlink",
        }
    }
}

/// What an operation acts on; carried for display and diffing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl Target {
    pub fn cluster(name: &str) -> Self {
        Self {
            kind: "cluster".into(),
            name: name.into(),
            host: None,
            port: None,
        }
    }

    pub fn node(node: &Node) -> Self {
        Self {
            kind: "node".into(),
            name: node.name(),
            host: Some(node.host.clone()),
            port: Some(node.port),
        }
    }

    pub fn path(path: &std::path::Path) -> Self {
        Self {
            kind: "path".into(),
            name: path.display().to_string(),
            host: None,
            port: None,
        }
    }

    pub fn replica_set(name: &str) -> Self {
        Self {
            kind: "replica_set".into(),
            name: name.into(),
            host: None,
            port: None,
        }
    }
}

/// A check evaluated before an operation runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreCondition {
    pub id: String,
    pub description: String,
    #[serde(flatten)]
    pub check: CheckType,
    /// Required checks abort the operation; optional checks warn.
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check_type", rename_all = "snake_case")]
pub enum CheckType {
    FileExists { path: PathBuf },
    PortAvailable { host: String, port: u16 },
    ProcessRunning { name: String },
    VersionMatches { expected: String },
}

/// A declared effect of an operation, used for diffing and idempotence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub resource_type: String,
    pub resource_id: String,
    pub action: ChangeAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Create,
    Modify,
    Delete,
    Start,
    Stop,
}

impl Change {
    pub fn create(resource_type: &str, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            action: ChangeAction::Create,
        }
    }

    pub fn start(resource_type: &str, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            action: ChangeAction::Start,
        }
    }

    pub fn modify(resource_type: &str, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            action: ChangeAction::Modify,
        }
    }
}

/// One step of a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    #[serde(flatten)]
    pub kind: OperationKind,
    pub description: String,
    pub target: Target,
    #[serde(default)]
    pub pre_conditions: Vec<PreCondition>,
    #[serde(default)]
    pub changes: Vec<Change>,
    /// Whether this operation may run concurrently with its neighbors.
    #[serde(default)]
    pub parallel: bool,
}

impl Operation {
    pub fn new(id: impl Into<String>, kind: OperationKind, description: impl Into<String>, target: Target) -> Self {
        Self {
            id: id.into(),
            kind,
            description: description.into(),
            target,
            pre_conditions: Vec::new(),
            changes: Vec::new(),
            parallel: false,
        }
    }

    pub fn with_pre_condition(mut self, check: PreCondition) -> Self {
        self.pre_conditions.push(check);
        self
    }

    pub fn with_change(mut self, change: Change) -> Self {
        self.changes.push(change);
        self
    }

    pub fn parallel_safe(mut self) -> Self {
        self.parallel = true;
        self
    }
}

/// A totally ordered group of operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub name: PhaseName,
    pub description: String,
    pub order: u32,
    pub operations: Vec<Operation>,
    /// Soft estimate in seconds, used only for reporting.
    pub estimated_duration_secs: u64,
}

/// The immutable deploy plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub operation: String,
    pub cluster_name: String,
    pub created_at: DateTime<Utc>,
    pub version: String,
    pub variant: Variant,
    pub topology: Topology,
    pub validation: ValidationResult,
    pub dry_run: bool,
    pub phases: Vec<Phase>,
    pub resources: ResourceEstimate,
}

impl Plan {
    pub fn phase(&self, name: PhaseName) -> Option<&Phase> {
        self.phases.iter().find(|p| p.name == name)
    }

    pub fn operation_count(&self) -> usize {
        self.phases.iter().map(|p| p.operations.len()).sum()
    }

    /// All declared directory creations, in emission order.
    pub fn declared_directories(&self) -> Vec<&str> {
        self.phases
            .iter()
            .flat_map(|p| &p.operations)
            .flat_map(|op| &op.changes)
            .filter(|c| c.resource_type == "directory" && c.action == ChangeAction::Create)
            .map(|c| c.resource_id.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{MemberAttributes, NodeKind};

    fn sample_node() -> Node {
        Node {
            kind: NodeKind::Mongod,
            host: "localhost".into(),
            port: 30000,
            replica_set: Some("rs0".into()),
            data_dir: None,
            log_dir: None,
            member: MemberAttributes::default(),
        }
    }

    #[test]
    fn operation_kind_serializes_with_snake_case_tag() {
        let kind = OperationKind::InitReplicaSet {
            name: "rs0".into(),
            members: vec![sample_node()],
            config_server: false,
        };
        let json = serde_json::to_string(&kind).unwrap();
        assert!(json.contains("\"type\":\"init_replica_set\""));
        assert!(json.contains("\"name\":\"rs0\""));
    }

    #[test]
    fn type_name_matches_serde_tag() {
        let kind = OperationKind::StartSupervisor;
        let json = serde_json::to_string(&kind).unwrap();
        assert!(json.contains(kind.type_name()));
    }

    #[test]
    fn operation_round_trips_through_json() {
        let op = Operation::new(
            "start-mongod-30000",
            OperationKind::StartProcess {
                node: sample_node(),
                program: "mongod-30000".into(),
                config_file: PathBuf::from("/c/mongod.conf"),
            },
            "Start mongod on localhost:30000",
            Target::node(&sample_node()),
        )
        .with_pre_condition(PreCondition {
            id: "config-exists".into(),
            description: "config file rendered".into(),
            check: CheckType::FileExists {
                path: PathBuf::from("/c/mongod.conf"),
            },
            required: true,
        })
        .with_change(Change::start("process", "mongod-30000"));

        let json = serde_json::to_string(&op).unwrap();
        let parsed: Operation = serde_json::from_str(&json).unwrap();
        assert_eq!(op, parsed);
        assert!(parsed.pre_conditions[0].required);
    }

    #[test]
    fn phase_names_are_ordered() {
        assert!(PhaseName::Prepare < PhaseName::Deploy);
        assert!(PhaseName::Deploy < PhaseName::Initialize);
        assert!(PhaseName::Initialize < PhaseName::Finalize);
    }

    #[test]
    fn check_type_flattens_into_precondition() {
        let pc = PreCondition {
            id: "port-free".into(),
            description: "port 30000 bindable".into(),
            check: CheckType::PortAvailable {
                host: "localhost".into(),
                port: 30000,
            },
            required: true,
        };
        let json = serde_json::to_string(&pc).unwrap();
        assert!(json.contains("\"check_type\":\"port_available\""));
        assert!(json.contains("\"port\":30000"));
    }
}
