//! Resource estimation for a deploy plan.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::topology::Topology;

/// Free disk required on every target host.
pub const MIN_DISK_BYTES: u64 = 10 * 1024 * 1024 * 1024;

/// Rough archive size per server download.
const DOWNLOAD_ESTIMATE_MB: u64 = 300;

/// Sizing summary produced alongside a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceEstimate {
    pub hosts: usize,
    pub total_processes: usize,
    pub processes_per_host: BTreeMap<String, usize>,
    pub ports: Vec<u16>,
    pub download_size_estimate_mb: u64,
    pub min_disk_bytes: u64,
}

impl ResourceEstimate {
    pub fn for_topology(topology: &Topology) -> Self {
        let mut processes_per_host: BTreeMap<String, usize> = BTreeMap::new();
        let mut ports = Vec::new();
        for node in &topology.nodes {
            *processes_per_host.entry(node.host.clone()).or_default() += 1;
            ports.push(node.port);
        }
        ports.sort_unstable();

        Self {
            hosts: processes_per_host.len(),
            total_processes: topology.nodes.len(),
            processes_per_host,
            ports,
            download_size_estimate_mb: DOWNLOAD_ESTIMATE_MB,
            min_disk_bytes: MIN_DISK_BYTES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{MemberAttributes, Node, NodeKind};

    fn node(host: &str, port: u16) -> Node {
        Node {
            kind: NodeKind::Mongod,
            host: host.into(),
            port,
            replica_set: None,
            data_dir: None,
            log_dir: None,
            member: MemberAttributes::default(),
        }
    }

    #[test]
    fn estimate_counts_hosts_and_processes() {
        let topo = Topology::new(vec![
            node("host-a", 30000),
            node("host-a", 30001),
            node("host-b", 30002),
        ]);
        let estimate = ResourceEstimate::for_topology(&topo);
        assert_eq!(estimate.hosts, 2);
        assert_eq!(estimate.total_processes, 3);
        assert_eq!(estimate.processes_per_host["host-a"], 2);
        assert_eq!(estimate.ports, vec![30000, 30001, 30002]);
        assert_eq!(estimate.min_disk_bytes, MIN_DISK_BYTES);
    }
}
