//! mongolift: declarative MongoDB cluster provisioning and lifecycle.
//!
//! The engine takes a topology description and a target distribution and
//! version, and brings the cluster from nothing to healthy and running,
//! keeping a durable record sufficient to start, stop, and destroy it
//! later. The command-line surface, topology file parsing, and remote
//! transport live outside this crate; they drive it through the types
//! re-exported here.
//!
//! A deploy runs in four stages:
//!
//! ```text
//! PortAllocator  -- assign a contiguous port block to zero-port nodes
//! BinaryManager  -- resolve the version, materialize server binaries
//! Planner        -- validate hosts, emit the phased plan
//! Applier        -- execute with checkpoints; resumable on failure
//! ```

pub mod apply;
pub mod archive;
pub mod binaries;
pub mod catalog;
pub mod errors;
pub mod executor;
pub mod metadata;
pub mod orchestrator;
pub mod paths;
pub mod plan;
pub mod platform;
pub mod ports;
pub mod render;
pub mod supervisor;
pub mod topology;
pub mod version;

/// Install the process-wide diagnostic subscriber with `RUST_LOG`-style
/// filtering. Embedders that configure their own subscriber skip this;
/// calling it twice is harmless.
pub fn init_diagnostics() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

pub use apply::{Applier, ApplyContext, ApplyState, ApplyStatus, StateStore};
pub use binaries::BinaryManager;
pub use catalog::CatalogClient;
pub use errors::{
    ApplyError, ArchiveError, BinaryError, CatalogError, OperationFailure, OrchestratorError,
    PlanError,
};
pub use executor::{HostExecutor, LocalExecutor};
pub use metadata::{ClusterMetadata, DeployMode};
pub use paths::StateRoot;
pub use plan::{Plan, PlanRequest, Planner};
pub use platform::{Arch, Os, Platform};
pub use ports::PortAllocator;
pub use topology::{Node, NodeKind, Topology};
pub use version::Variant;
