//! Durable cluster metadata and lifecycle operations.
//!
//! `meta.yaml` is written once at the end of a successful deploy and
//! updated only by the lifecycle verbs here: stop, start, destroy, and a
//! status probe. The record carries everything needed to operate the
//! cluster without re-planning: node layout, directories, and a
//! copy-pasteable connection command.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::orchestrator;
use crate::paths::ClusterPaths;
use crate::plan::Plan;
use crate::render::program_name;
use crate::supervisor::Supervisor;
use crate::topology::{Node, NodeKind, Topology, TopologyType};
use crate::version::Variant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployMode {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    Running,
    Stopped,
}

/// Per-node record in `meta.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub kind: NodeKind,
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica_set: Option<String>,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
}

/// The post-deploy durable record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterMetadata {
    pub name: String,
    pub version: String,
    pub variant: Variant,
    pub bin_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub status: ClusterStatus,
    pub deploy_mode: DeployMode,
    pub topology: Topology,
    pub nodes: Vec<NodeRecord>,
    pub connection_command: String,
}

impl ClusterMetadata {
    /// Build the record for a successfully applied plan.
    pub fn from_plan(plan: &Plan, cluster: &ClusterPaths, deploy_mode: DeployMode) -> Self {
        let nodes = plan
            .topology
            .nodes
            .iter()
            .map(|node| NodeRecord {
                kind: node.kind,
                host: node.host.clone(),
                port: node.port,
                replica_set: node.replica_set.clone(),
                data_dir: cluster.node_data_dir(node),
                log_dir: cluster.node_log_dir(&plan.version, node),
                config_dir: cluster.node_config_dir(&plan.version, node),
                config_file: cluster.node_config_file(&plan.version, node),
            })
            .collect();

        Self {
            name: plan.cluster_name.clone(),
            version: plan.version.clone(),
            variant: plan.variant,
            bin_path: cluster.bin_dir(&plan.version),
            created_at: Utc::now(),
            status: ClusterStatus::Running,
            deploy_mode,
            topology: plan.topology.clone(),
            nodes,
            connection_command: connection_command(&plan.topology),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let yaml = serde_yaml::to_string(self).context("failed to serialize cluster metadata")?;
        std::fs::write(path, yaml).with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_yaml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Supervisor program names in shutdown order: mongos first, then
    /// mongods, then config servers.
    fn programs_shutdown_order(&self) -> Vec<String> {
        let mut programs = Vec::new();
        for kind in [NodeKind::Mongos, NodeKind::Mongod, NodeKind::Config] {
            for node in self.topology.nodes_of_kind(kind) {
                programs.push(program_name(node));
            }
        }
        programs
    }
}

/// Synthesize the shell invocation recorded in `meta.yaml`.
pub fn connection_command(topology: &Topology) -> String {
    match topology.topology_type() {
        TopologyType::Sharded => {
            let mongos: Vec<&Node> = topology.nodes_of_kind(NodeKind::Mongos).collect();
            let hosts: Vec<String> = mongos.iter().map(|n| n.address()).collect();
            format!("mongosh mongodb://{}/", hosts.join(","))
        }
        TopologyType::ReplicaSet => {
            let sets = topology.replica_sets();
            match sets.first() {
                Some((name, members)) => {
                    let hosts: Vec<String> = members.iter().map(|n| n.address()).collect();
                    format!("mongosh \"mongodb://{}/?replicaSet={}\"", hosts.join(","), name)
                }
                None => "mongosh".to_string(),
            }
        }
        TopologyType::Standalone => match topology.nodes.first() {
            Some(node) => format!("mongosh mongodb://{}/", node.address()),
            None => "mongosh".to_string(),
        },
    }
}

/// Stop every node through the supervisor, routing processes first.
pub async fn stop_cluster(
    metadata: &mut ClusterMetadata,
    supervisor: &dyn Supervisor,
    metadata_path: &Path,
) -> Result<()> {
    for program in metadata.programs_shutdown_order() {
        supervisor.stop_program(&program).await?;
        println!("Stopped {program}");
    }
    metadata.status = ClusterStatus::Stopped;
    metadata.save(metadata_path)?;
    info!(cluster = %metadata.name, "cluster stopped");
    Ok(())
}

/// Start every node through the supervisor, stateful processes first.
pub async fn start_cluster(
    metadata: &mut ClusterMetadata,
    supervisor: &dyn Supervisor,
    metadata_path: &Path,
) -> Result<()> {
    let mut programs = metadata.programs_shutdown_order();
    programs.reverse();
    for program in programs {
        supervisor.start_program(&program).await?;
        println!("Started {program}");
    }
    metadata.status = ClusterStatus::Running;
    metadata.save(metadata_path)?;
    info!(cluster = %metadata.name, "cluster started");
    Ok(())
}

/// Stop the cluster and delete its directory. Refuses when the metadata
/// file cannot be read unless `force` is set.
pub async fn destroy_cluster(
    cluster: &ClusterPaths,
    supervisor: &dyn Supervisor,
    force: bool,
) -> Result<()> {
    let metadata_path = cluster.metadata_file();
    match ClusterMetadata::load(&metadata_path) {
        Ok(mut metadata) => {
            stop_cluster(&mut metadata, supervisor, &metadata_path).await?;
        }
        Err(err) if force => {
            println!("Warning: destroying without metadata ({err})");
        }
        Err(err) => bail!(
            "refusing to destroy {}: {err} (pass force to override)",
            cluster.root().display()
        ),
    }

    if cluster.root().exists() {
        std::fs::remove_dir_all(cluster.root())
            .with_context(|| format!("failed to delete {}", cluster.root().display()))?;
    }
    println!("Destroyed cluster at {}", cluster.root().display());
    Ok(())
}

/// Per-node reachability, reported by the status probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub kind: NodeKind,
    pub host: String,
    pub port: u16,
    pub reachable: bool,
}

/// Re-probe a deployed cluster from its metadata.
pub async fn cluster_status(metadata: &ClusterMetadata) -> Vec<NodeStatus> {
    let mut statuses = Vec::new();
    for node in &metadata.topology.nodes {
        let reachable = orchestrator::verify_health(&Topology::new(vec![node.clone()]))
            .await
            .is_ok();
        statuses.push(NodeStatus {
            kind: node.kind,
            host: node.host.clone(),
            port: node.port,
            reachable,
        });
    }
    statuses
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::MemberAttributes;

    fn node(kind: NodeKind, port: u16, rs: Option<&str>) -> Node {
        Node {
            kind,
            host: "localhost".into(),
            port,
            replica_set: rs.map(Into::into),
            data_dir: None,
            log_dir: None,
            member: MemberAttributes::default(),
        }
    }

    #[test]
    fn connection_command_for_standalone() {
        let topo = Topology::new(vec![node(NodeKind::Mongod, 30000, None)]);
        assert_eq!(connection_command(&topo), "mongosh mongodb://localhost:30000/");
    }

    #[test]
    fn connection_command_for_replica_set() {
        let topo = Topology::new(vec![
            node(NodeKind::Mongod, 30000, Some("rs0")),
            node(NodeKind::Mongod, 30001, Some("rs0")),
        ]);
        assert_eq!(
            connection_command(&topo),
            "mongosh \"mongodb://localhost:30000,localhost:30001/?replicaSet=rs0\""
        );
    }

    #[test]
    fn connection_command_for_sharded_targets_mongos() {
        let topo = Topology::new(vec![
            node(NodeKind::Config, 30000, Some("configRS")),
            node(NodeKind::Mongod, 30001, Some("shard1")),
            node(NodeKind::Mongos, 30002, None),
        ]);
        assert_eq!(connection_command(&topo), "mongosh mongodb://localhost:30002/");
    }

    #[test]
    fn metadata_round_trips_through_yaml() {
        use crate::paths::StateRoot;
        let dir = tempfile::tempdir().unwrap();
        let cluster = StateRoot::at(dir.path()).cluster("demo");

        let topology = Topology::new(vec![node(NodeKind::Mongod, 30000, Some("rs0"))]);
        let metadata = ClusterMetadata {
            name: "demo".into(),
            version: "7.0.14".into(),
            variant: Variant::Official,
            bin_path: cluster.bin_dir("7.0.14"),
            created_at: Utc::now(),
            status: ClusterStatus::Running,
            deploy_mode: DeployMode::Local,
            topology: topology.clone(),
            nodes: vec![NodeRecord {
                kind: NodeKind::Mongod,
                host: "localhost".into(),
                port: 30000,
                replica_set: Some("rs0".into()),
                data_dir: cluster.node_data_dir(&topology.nodes[0]),
                log_dir: cluster.node_log_dir("7.0.14", &topology.nodes[0]),
                config_dir: cluster.node_config_dir("7.0.14", &topology.nodes[0]),
                config_file: cluster.node_config_file("7.0.14", &topology.nodes[0]),
            }],
            connection_command: connection_command(&topology),
        };

        let path = cluster.metadata_file();
        metadata.save(&path).unwrap();
        let loaded = ClusterMetadata::load(&path).unwrap();
        assert_eq!(loaded.name, "demo");
        assert_eq!(loaded.status, ClusterStatus::Running);
        assert_eq!(loaded.deploy_mode, DeployMode::Local);
        assert_eq!(loaded.nodes.len(), 1);
        assert_eq!(loaded.nodes[0].port, 30000);
    }

    struct RecordingSupervisor {
        calls: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl Supervisor for RecordingSupervisor {
        async fn write_config(&self, _content: &str) -> Result<()> {
            Ok(())
        }
        async fn start_daemon(&self) -> Result<()> {
            Ok(())
        }
        async fn start_program(&self, name: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("start {name}"));
            Ok(())
        }
        async fn stop_program(&self, name: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("stop {name}"));
            Ok(())
        }
    }

    #[tokio::test]
    async fn stop_then_start_round_trips_status_and_ordering() {
        use crate::paths::StateRoot;
        let dir = tempfile::tempdir().unwrap();
        let cluster = StateRoot::at(dir.path()).cluster("demo");
        let metadata_path = cluster.metadata_file();

        let topology = Topology::new(vec![
            node(NodeKind::Config, 30000, Some("configRS")),
            node(NodeKind::Mongod, 30001, Some("shard1")),
            node(NodeKind::Mongos, 30002, None),
        ]);
        let mut metadata = ClusterMetadata {
            name: "demo".into(),
            version: "7.0.14".into(),
            variant: Variant::Official,
            bin_path: cluster.bin_dir("7.0.14"),
            created_at: Utc::now(),
            status: ClusterStatus::Running,
            deploy_mode: DeployMode::Local,
            topology,
            nodes: vec![],
            connection_command: String::new(),
        };
        let supervisor = RecordingSupervisor {
            calls: std::sync::Mutex::new(Vec::new()),
        };

        stop_cluster(&mut metadata, &supervisor, &metadata_path)
            .await
            .unwrap();
        assert_eq!(metadata.status, ClusterStatus::Stopped);
        assert_eq!(
            ClusterMetadata::load(&metadata_path).unwrap().status,
            ClusterStatus::Stopped
        );

        start_cluster(&mut metadata, &supervisor, &metadata_path)
            .await
            .unwrap();
        assert_eq!(metadata.status, ClusterStatus::Running);

        // Routing nodes stop first and start last.
        let calls = supervisor.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![
                "stop mongos-30002",
                "stop mongod-30001",
                "stop config-30000",
                "start config-30000",
                "start mongod-30001",
                "start mongos-30002",
            ]
        );
    }

    #[tokio::test]
    async fn destroy_refuses_without_metadata_unless_forced() {
        use crate::paths::StateRoot;
        let dir = tempfile::tempdir().unwrap();
        let cluster = StateRoot::at(dir.path()).cluster("demo");
        std::fs::create_dir_all(cluster.root()).unwrap();
        let supervisor = RecordingSupervisor {
            calls: std::sync::Mutex::new(Vec::new()),
        };

        assert!(destroy_cluster(&cluster, &supervisor, false).await.is_err());
        assert!(cluster.root().exists());

        destroy_cluster(&cluster, &supervisor, true).await.unwrap();
        assert!(!cluster.root().exists());
    }

    #[test]
    fn shutdown_order_is_mongos_mongod_config() {
        let topology = Topology::new(vec![
            node(NodeKind::Config, 30000, Some("configRS")),
            node(NodeKind::Mongod, 30001, Some("shard1")),
            node(NodeKind::Mongos, 30002, None),
        ]);
        let metadata = ClusterMetadata {
            name: "demo".into(),
            version: "7.0.14".into(),
            variant: Variant::Official,
            bin_path: PathBuf::new(),
            created_at: Utc::now(),
            status: ClusterStatus::Running,
            deploy_mode: DeployMode::Local,
            topology,
            nodes: vec![],
            connection_command: String::new(),
        };
        assert_eq!(
            metadata.programs_shutdown_order(),
            vec!["mongos-30002", "mongod-30001", "config-30000"]
        );
    }
}
