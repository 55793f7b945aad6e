//! Typed error hierarchy for the mongolift engine.
//!
//! Top-level enums cover the major subsystems:
//! - `CatalogError` — version manifest fetching and resolution
//! - `ArchiveError` — archive extraction
//! - `BinaryError` — binary cache materialization
//! - `PlanError` — topology validation and plan construction
//! - `ApplyError` — plan execution and state persistence
//! - `OrchestratorError` — replica set and sharded cluster bring-up
//!
//! `OperationFailure` is the structured record handed back to callers when
//! an apply run aborts: it pins the failing operation id and phase so an
//! external CLI can print them and map the run to an exit code.

use thiserror::Error;

/// Errors from the version catalog client.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Version {spec} not found for {variant}")]
    VersionNotFound { variant: String, spec: String },

    #[error("Malformed version specifier '{spec}': {message}")]
    InvalidVersionSpec { spec: String, message: String },

    #[error("No download available for {version} on {platform}")]
    NoDownloadForPlatform { version: String, platform: String },

    #[error("Unsupported operating system: {0}")]
    UnsupportedOs(String),

    #[error("Failed to fetch version manifest from {url}: {source}")]
    ManifestFetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to parse version manifest: {0}")]
    ManifestParse(#[source] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from archive extraction.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Unsupported archive format for {0}")]
    UnsupportedFormat(String),

    #[error("Archive entry '{0}' escapes the extraction root")]
    PathTraversal(String),

    #[error("Malformed ar archive: {0}")]
    MalformedAr(String),

    #[error("External decompressor failed: {0}")]
    Decompressor(String),

    #[error("I/O error while extracting: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
}

/// Errors from the binary manager.
#[derive(Debug, Error)]
pub enum BinaryError {
    #[error("Download of {url} failed with HTTP status {status}")]
    DownloadStatus { url: String, status: u16 },

    #[error("Failed to download {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("No download source succeeded for {variant} {version} on {platform}")]
    AllSourcesExhausted {
        variant: String,
        version: String,
        platform: String,
    },

    #[error(
        "Percona binaries are not published for darwin; use the official variant or a linux host"
    )]
    PerconaOnDarwin,

    #[error("Extracted archive at {0} does not contain a bin directory")]
    NoBinDirectory(std::path::PathBuf),

    #[error("I/O error in binary cache at {path}: {source}")]
    CacheIo {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// Errors from topology validation and plan construction.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    #[error("Validation failed: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),

    #[error("No contiguous port range of {count} ports available starting from {base}")]
    NoContiguousRange { base: u16, count: usize },

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from plan execution.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("{0}")]
    Operation(#[from] OperationFailure),

    #[error("Apply state {0} not found")]
    StateNotFound(String),

    #[error("Checkpoint {0} not found")]
    CheckpointNotFound(String),

    #[error("Apply run was cancelled during phase {phase}")]
    Cancelled { phase: String },

    #[error("Failed to persist apply state at {path}: {source}")]
    StatePersist {
        path: std::path::PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the cluster bring-up orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Replica set {name} did not reach a healthy state within {seconds}s")]
    ReplicaSetTimeout { name: String, seconds: u64 },

    #[error("Node {host}:{port} did not start listening within {seconds}s")]
    ListenTimeout {
        host: String,
        port: u16,
        seconds: u64,
    },

    #[error("mongos at {host}:{port} did not become healthy within {seconds}s")]
    MongosTimeout {
        host: String,
        port: u16,
        seconds: u64,
    },

    #[error("addShard for {shard} failed: {message}")]
    AddShardFailed { shard: String, message: String },

    #[error("MongoDB driver error: {0}")]
    Driver(#[from] mongodb::error::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// How the applier reacted to a failure. Classification is by behavior,
/// not by origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Detected before any state-mutating operation ran.
    Validation,
    /// A required pre-condition did not hold; the phase aborted but the
    /// state is resumable once the condition is fixed.
    PreCondition,
    /// Surfaced as a warning; never aborts.
    Recoverable,
    /// Aborted the phase and closed the state as failed.
    Terminal,
}

/// Structured failure record carried out of a failed apply run.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
#[error("Operation {operation_id} failed in phase {phase}: {message}")]
pub struct OperationFailure {
    pub kind: FailureKind,
    pub operation_id: String,
    pub phase: String,
    pub message: String,
}

impl OperationFailure {
    pub fn terminal(operation_id: &str, phase: &str, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Terminal,
            operation_id: operation_id.to_string(),
            phase: phase.to_string(),
            message: message.into(),
        }
    }

    pub fn precondition(operation_id: &str, phase: &str, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::PreCondition,
            operation_id: operation_id.to_string(),
            phase: phase.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_error_version_not_found_is_matchable() {
        let err = CatalogError::VersionNotFound {
            variant: "official".into(),
            spec: "9.9".into(),
        };
        match &err {
            CatalogError::VersionNotFound { spec, .. } => assert_eq!(spec, "9.9"),
            _ => panic!("Expected VersionNotFound variant"),
        }
        assert!(err.to_string().contains("9.9"));
    }

    #[test]
    fn binary_error_download_status_carries_code() {
        let err = BinaryError::DownloadStatus {
            url: "https://example.com/x.tgz".into(),
            status: 404,
        };
        assert!(err.to_string().contains("404"));
    }

    #[test]
    fn plan_error_validation_joins_messages() {
        let err = PlanError::ValidationFailed(vec![
            "disk space below 10GB on host-a".into(),
            "port 30000 in use".into(),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("disk space"));
        assert!(msg.contains("port 30000"));
    }

    #[test]
    fn operation_failure_round_trips_through_apply_error() {
        let failure = OperationFailure::terminal("init-rs0", "initialize", "no primary elected");
        let apply_err: ApplyError = failure.clone().into();
        match &apply_err {
            ApplyError::Operation(f) => {
                assert_eq!(f.operation_id, "init-rs0");
                assert_eq!(f.phase, "initialize");
                assert_eq!(f.kind, FailureKind::Terminal);
            }
            _ => panic!("Expected ApplyError::Operation"),
        }
    }

    #[test]
    fn operation_failure_serializes_kind_snake_case() {
        let failure = OperationFailure::precondition("start-mongod-30000", "deploy", "port taken");
        let json = serde_json::to_string(&failure).unwrap();
        assert!(json.contains("\"pre_condition\""));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&CatalogError::UnsupportedOs("plan9".into()));
        assert_std_error(&PlanError::InvalidTopology("empty".into()));
        assert_std_error(&ApplyError::StateNotFound("abc".into()));
        assert_std_error(&OrchestratorError::ReplicaSetTimeout {
            name: "rs0".into(),
            seconds: 120,
        });
    }
}
