//! Per-user state root and cluster directory layout.
//!
//! Layout policy: data directories are version-independent so upgrades can
//! reuse them; config and log directories live under a `v<version>/`
//! directory so configurations never clash across versions. The `current`
//! symlink is the single activation point for a version.
//!
//! ```text
//! ~/.mongolift/storage/
//!   packages/<variant>-<version>-<os>-<arch>/bin/
//!   mongo-versions.json
//!   clusters/<name>/
//!     v<version>/bin/
//!     v<version>/supervisor.ini
//!     v<version>/<host>-<port>/config/
//!     v<version>/<host>-<port>/log/
//!     data/<host>-<port>/
//!     tmp/
//!     meta.yaml
//!     current -> v<version>/
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::platform::Platform;
use crate::topology::Node;
use crate::version::Variant;

pub const APP_DIR: &str = ".mongolift";
pub const STORAGE_DIR: &str = "storage";
pub const CATALOG_FILE: &str = "mongo-versions.json";

/// The per-user state root, `<home>/.mongolift/storage/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateRoot {
    root: PathBuf,
}

impl StateRoot {
    /// Resolve the root under the user's home directory.
    pub fn from_home() -> Result<Self> {
        let home = dirs::home_dir().context("could not determine the user home directory")?;
        Ok(Self {
            root: home.join(APP_DIR).join(STORAGE_DIR),
        })
    }

    /// A root anchored elsewhere, used by tests and embedded callers.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn packages_dir(&self) -> PathBuf {
        self.root.join("packages")
    }

    /// Cache slot for one `(variant, version, platform)` triple.
    pub fn package_dir(&self, variant: Variant, version: &str, platform: Platform) -> PathBuf {
        self.packages_dir()
            .join(format!("{}-{}-{}", variant.as_str(), version, platform))
    }

    pub fn catalog_file(&self) -> PathBuf {
        self.root.join(CATALOG_FILE)
    }

    pub fn clusters_dir(&self) -> PathBuf {
        self.root.join("clusters")
    }

    /// Apply states and their checkpoints.
    pub fn states_dir(&self) -> PathBuf {
        self.root.join("states")
    }

    pub fn cluster(&self, name: &str) -> ClusterPaths {
        ClusterPaths {
            root: self.clusters_dir().join(name),
        }
    }
}

/// Directory layout of a single cluster under the state root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterPaths {
    root: PathBuf,
}

impl ClusterPaths {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Version-scoped directory, `v<version>/`.
    pub fn version_dir(&self, version: &str) -> PathBuf {
        self.root.join(format!("v{version}"))
    }

    /// Cluster-local copy of the server binaries for one version.
    pub fn bin_dir(&self, version: &str) -> PathBuf {
        self.version_dir(version).join("bin")
    }

    pub fn supervisor_config(&self, version: &str) -> PathBuf {
        self.version_dir(version).join("supervisor.ini")
    }

    /// Version-scoped per-node config directory.
    pub fn node_config_dir(&self, version: &str, node: &Node) -> PathBuf {
        self.version_dir(version).join(node.name()).join("config")
    }

    /// Version-scoped per-node log directory.
    pub fn node_log_dir(&self, version: &str, node: &Node) -> PathBuf {
        self.version_dir(version).join(node.name()).join("log")
    }

    pub fn node_config_file(&self, version: &str, node: &Node) -> PathBuf {
        let file = match node.kind {
            crate::topology::NodeKind::Mongos => "mongos.conf",
            _ => "mongod.conf",
        };
        self.node_config_dir(version, node).join(file)
    }

    /// Version-independent per-node data directory. Honors the per-node
    /// override when the topology carries one.
    pub fn node_data_dir(&self, node: &Node) -> PathBuf {
        match &node.data_dir {
            Some(dir) => PathBuf::from(dir),
            None => self.root.join("data").join(node.name()),
        }
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    pub fn metadata_file(&self) -> PathBuf {
        self.root.join("meta.yaml")
    }

    /// The `current` symlink pointing at the active version directory.
    pub fn current_symlink(&self) -> PathBuf {
        self.root.join("current")
    }

    /// Every directory the prepare phase must create for this version.
    /// Mongos nodes have no data directory.
    pub fn required_directories(&self, version: &str, nodes: &[&Node]) -> Vec<PathBuf> {
        let mut dirs = vec![self.bin_dir(version)];
        for node in nodes {
            if node.kind != crate::topology::NodeKind::Mongos {
                dirs.push(self.node_data_dir(node));
            }
            dirs.push(self.node_config_dir(version, node));
            dirs.push(self.node_log_dir(version, node));
        }
        dirs.push(self.tmp_dir());
        dirs
    }
}
