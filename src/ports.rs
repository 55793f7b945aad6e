//! Contiguous port allocation for local topologies.
//!
//! All zero-port nodes of a topology receive ports from one contiguous
//! block. Candidate bases advance in steps of 100 so a partly occupied
//! range is abandoned wholesale rather than fragmented around.

use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use std::time::Duration;

use tracing::debug;

use crate::errors::PlanError;
use crate::topology::Topology;

pub const DEFAULT_BASE_PORT: u16 = 30000;
const CANDIDATE_STEP: u16 = 100;
const CANDIDATE_ATTEMPTS: u16 = 10;
const SETTLE_DELAY: Duration = Duration::from_millis(25);

#[derive(Debug, Clone)]
pub struct PortAllocator {
    base: u16,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE_PORT,
        }
    }
}

impl PortAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the first candidate base (tests).
    pub fn with_base(base: u16) -> Self {
        Self { base }
    }

    /// Assign concrete ports to every zero-port node, preserving ports the
    /// topology already pins. Assignment within the block follows startup
    /// order: config servers first, then mongods, then mongos.
    pub async fn allocate(&self, topology: &Topology) -> Result<Topology, PlanError> {
        let needed = topology.zero_port_count();
        if needed == 0 {
            return Ok(topology.clone());
        }

        let base = self.find_block(needed).await?;
        debug!(base, count = needed, "allocated contiguous port block");

        let mut assigned = topology.clone();
        let mut next = base;
        // Walk nodes in startup order but mutate by identity in the
        // original node list, so the caller's ordering is untouched.
        let order: Vec<usize> = {
            let ordered = topology.nodes_in_startup_order();
            ordered
                .iter()
                .filter(|n| n.port == 0)
                .map(|n| {
                    topology
                        .nodes
                        .iter()
                        .position(|candidate| std::ptr::eq(candidate, *n))
                        .expect("node from the same topology")
                })
                .collect()
        };
        for index in order {
            assigned.nodes[index].port = next;
            next += 1;
        }
        Ok(assigned)
    }

    /// Probe candidate bases until one has `count` consecutive free ports.
    async fn find_block(&self, count: usize) -> Result<u16, PlanError> {
        for attempt in 0..CANDIDATE_ATTEMPTS {
            let base = self.base + attempt * CANDIDATE_STEP;
            if probe_range(base, count) {
                // Let the closed probe sockets settle so the kernel does not
                // report a TIME_WAIT port as bindable to us but not to mongod.
                tokio::time::sleep(SETTLE_DELAY).await;
                return Ok(base);
            }
            debug!(base, "port range busy, advancing candidate base");
        }
        Err(PlanError::NoContiguousRange {
            base: self.base,
            count,
        })
    }
}

/// Listen-then-close probe over `[base, base + count)`; every port must
/// bind for the range to qualify.
fn probe_range(base: u16, count: usize) -> bool {
    let mut held = Vec::with_capacity(count);
    for offset in 0..count {
        let Some(port) = base.checked_add(offset as u16) else {
            return false;
        };
        match TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)) {
            Ok(listener) => held.push(listener),
            Err(_) => return false,
        }
    }
    drop(held);
    true
}
