//! Cluster topology input model.
//!
//! The topology is produced by an external parser and consumed verbatim.
//! This module holds the shape the core reads plus the invariants it
//! expects: unique `(host, port)` pairs for non-zero ports, a replica set
//! on every config node, and the sharded-iff-routing rule.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::errors::PlanError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Mongod,
    Mongos,
    Config,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Mongod => "mongod",
            NodeKind::Mongos => "mongos",
            NodeKind::Config => "config",
        }
    }

    /// Supervisor program name prefix for this node kind.
    pub fn program_prefix(&self) -> &'static str {
        match self {
            NodeKind::Mongod => "mongod",
            NodeKind::Mongos => "mongos",
            NodeKind::Config => "config",
        }
    }
}

/// Replica member attributes carried through to `replSetInitiate`.
/// Fields equal to the server defaults are omitted from the initiate
/// document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MemberAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub votes: Option<i32>,
}

/// One process in the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    pub host: String,
    /// 0 means the port allocator assigns one.
    #[serde(default)]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica_set: Option<String>,
    /// Per-node data directory override; default layout applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,
    #[serde(flatten)]
    pub member: MemberAttributes,
}

impl Node {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Stable identifier used in directory names and supervisor programs.
    pub fn name(&self) -> String {
        format!("{}-{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyType {
    Standalone,
    ReplicaSet,
    Sharded,
}

/// The full declarative topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    pub nodes: Vec<Node>,
}

impl Topology {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    /// Check the invariants the core relies on. Called by the planner
    /// before any validation that touches a host.
    pub fn check_invariants(&self) -> Result<(), PlanError> {
        if self.nodes.is_empty() {
            return Err(PlanError::InvalidTopology("no nodes declared".into()));
        }

        let mut seen = BTreeSet::new();
        for node in &self.nodes {
            if node.port != 0 && !seen.insert((node.host.clone(), node.port)) {
                return Err(PlanError::InvalidTopology(format!(
                    "two nodes share {}:{}",
                    node.host, node.port
                )));
            }
            if node.kind == NodeKind::Config && node.replica_set.is_none() {
                return Err(PlanError::InvalidTopology(format!(
                    "config node {} has no replica set",
                    node.host
                )));
            }
        }
        Ok(())
    }

    pub fn is_sharded(&self) -> bool {
        self.nodes
            .iter()
            .any(|n| matches!(n.kind, NodeKind::Mongos | NodeKind::Config))
    }

    pub fn topology_type(&self) -> TopologyType {
        if self.is_sharded() {
            TopologyType::Sharded
        } else if self.nodes.iter().any(|n| n.replica_set.is_some()) {
            TopologyType::ReplicaSet
        } else {
            TopologyType::Standalone
        }
    }

    pub fn nodes_of_kind(&self, kind: NodeKind) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |n| n.kind == kind)
    }

    /// Nodes in bring-up order: config servers, then mongods, then mongos.
    /// Port assignment and process starts both follow this ordering.
    pub fn nodes_in_startup_order(&self) -> Vec<&Node> {
        let mut ordered: Vec<&Node> = Vec::with_capacity(self.nodes.len());
        for kind in [NodeKind::Config, NodeKind::Mongod, NodeKind::Mongos] {
            ordered.extend(self.nodes_of_kind(kind));
        }
        ordered
    }

    /// Distinct replica set names with their members, config set first,
    /// the rest in first-appearance order.
    pub fn replica_sets(&self) -> Vec<(String, Vec<&Node>)> {
        let mut order: Vec<String> = Vec::new();
        let mut members: BTreeMap<String, Vec<&Node>> = BTreeMap::new();
        for node in self.nodes_in_startup_order() {
            if let Some(rs) = &node.replica_set {
                if !members.contains_key(rs) {
                    order.push(rs.clone());
                }
                members.entry(rs.clone()).or_default().push(node);
            }
        }
        order
            .into_iter()
            .map(|name| {
                let nodes = members.remove(&name).unwrap_or_default();
                (name, nodes)
            })
            .collect()
    }

    /// The config server replica set name, when the topology is sharded.
    pub fn config_replica_set(&self) -> Option<&str> {
        self.nodes_of_kind(NodeKind::Config)
            .find_map(|n| n.replica_set.as_deref())
    }

    /// Replica sets backing shards: every distinct set that is not the
    /// config server set.
    pub fn shard_replica_sets(&self) -> Vec<(String, Vec<&Node>)> {
        let config = self.config_replica_set().map(str::to_string);
        self.replica_sets()
            .into_iter()
            .filter(|(name, _)| Some(name.as_str()) != config.as_deref())
            .collect()
    }

    pub fn hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = Vec::new();
        for node in &self.nodes {
            if !hosts.contains(&node.host) {
                hosts.push(node.host.clone());
            }
        }
        hosts
    }

    pub fn zero_port_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.port == 0).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(kind: NodeKind, host: &str, port: u16, rs: Option<&str>) -> Node {
        Node {
            kind,
            host: host.into(),
            port,
            replica_set: rs.map(Into::into),
            data_dir: None,
            log_dir: None,
            member: MemberAttributes::default(),
        }
    }

    #[test]
    fn duplicate_host_port_is_rejected() {
        let topo = Topology::new(vec![
            node(NodeKind::Mongod, "localhost", 30000, None),
            node(NodeKind::Mongod, "localhost", 30000, None),
        ]);
        assert!(matches!(
            topo.check_invariants(),
            Err(PlanError::InvalidTopology(_))
        ));
    }

    #[test]
    fn zero_ports_do_not_collide() {
        let topo = Topology::new(vec![
            node(NodeKind::Mongod, "localhost", 0, Some("rs0")),
            node(NodeKind::Mongod, "localhost", 0, Some("rs0")),
        ]);
        topo.check_invariants().unwrap();
    }

    #[test]
    fn config_node_requires_replica_set() {
        let topo = Topology::new(vec![node(NodeKind::Config, "localhost", 0, None)]);
        let err = topo.check_invariants().unwrap_err();
        assert!(err.to_string().contains("no replica set"));
    }

    #[test]
    fn topology_type_classification() {
        let standalone = Topology::new(vec![node(NodeKind::Mongod, "localhost", 0, None)]);
        assert_eq!(standalone.topology_type(), TopologyType::Standalone);

        let rs = Topology::new(vec![
            node(NodeKind::Mongod, "localhost", 0, Some("rs0")),
            node(NodeKind::Mongod, "localhost", 0, Some("rs0")),
        ]);
        assert_eq!(rs.topology_type(), TopologyType::ReplicaSet);

        let sharded = Topology::new(vec![
            node(NodeKind::Config, "localhost", 0, Some("configRS")),
            node(NodeKind::Mongod, "localhost", 0, Some("shard1")),
            node(NodeKind::Mongos, "localhost", 0, None),
        ]);
        assert_eq!(sharded.topology_type(), TopologyType::Sharded);
    }

    #[test]
    fn startup_order_is_config_then_mongod_then_mongos() {
        let topo = Topology::new(vec![
            node(NodeKind::Mongos, "localhost", 3, None),
            node(NodeKind::Mongod, "localhost", 2, Some("shard1")),
            node(NodeKind::Config, "localhost", 1, Some("configRS")),
        ]);
        let kinds: Vec<NodeKind> = topo
            .nodes_in_startup_order()
            .iter()
            .map(|n| n.kind)
            .collect();
        assert_eq!(kinds, vec![NodeKind::Config, NodeKind::Mongod, NodeKind::Mongos]);
    }

    #[test]
    fn shard_replica_sets_exclude_config_set() {
        let topo = Topology::new(vec![
            node(NodeKind::Config, "localhost", 1, Some("configRS")),
            node(NodeKind::Mongod, "localhost", 2, Some("shard1")),
            node(NodeKind::Mongod, "localhost", 3, Some("shard1")),
            node(NodeKind::Mongod, "localhost", 4, Some("shard2")),
            node(NodeKind::Mongos, "localhost", 5, None),
        ]);
        let shard_sets: Vec<String> = topo
            .shard_replica_sets()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(shard_sets, vec!["shard1".to_string(), "shard2".to_string()]);
        assert_eq!(topo.config_replica_set(), Some("configRS"));
    }

    #[test]
    fn replica_sets_list_config_set_first() {
        let topo = Topology::new(vec![
            node(NodeKind::Mongod, "localhost", 2, Some("shard1")),
            node(NodeKind::Config, "localhost", 1, Some("configRS")),
        ]);
        let names: Vec<String> = topo.replica_sets().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["configRS".to_string(), "shard1".to_string()]);
    }
}
