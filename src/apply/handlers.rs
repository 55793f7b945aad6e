//! Per-operation-type handlers.
//!
//! Every handler is idempotent with respect to its declared changes: a
//! second invocation against an already-applied operation observes the
//! change on disk (or the process already listening) and returns success
//! without acting.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use tracing::debug;

use crate::binaries::{BinaryManager, install_executables};
use crate::executor::HostExecutor;
use crate::metadata::{ClusterMetadata, DeployMode};
use crate::orchestrator;
use crate::paths::{ClusterPaths, StateRoot};
use crate::plan::{CheckType, Operation, OperationKind, Plan, PreCondition};
use crate::render::{
    self, MongodRole, SupervisorProgram, program_command, program_name,
};
use crate::supervisor::Supervisor;
use crate::topology::{Node, NodeKind};

/// Shared collaborators handed to every handler. Tests construct a fresh
/// context per case; nothing here is process-global.
pub struct ApplyContext {
    pub state_root: StateRoot,
    pub binaries: Arc<BinaryManager>,
    pub executors: BTreeMap<String, Arc<dyn HostExecutor>>,
    pub supervisor: Arc<dyn Supervisor>,
    pub deploy_mode: DeployMode,
}

impl ApplyContext {
    pub fn cluster(&self, plan: &Plan) -> ClusterPaths {
        self.state_root.cluster(&plan.cluster_name)
    }

    fn executor_for(&self, host: &str) -> Result<&Arc<dyn HostExecutor>> {
        self.executors
            .get(host)
            .ok_or_else(|| anyhow!("no executor configured for host {host}"))
    }
}

/// Outcome of evaluating one operation's pre-conditions.
pub struct PreConditionReport {
    /// The first failed required check, if any.
    pub failed: Option<String>,
    /// Messages from failed optional checks.
    pub warnings: Vec<String>,
}

/// Evaluate all pre-conditions of an operation.
pub async fn evaluate_preconditions(
    ctx: &ApplyContext,
    plan: &Plan,
    operation: &Operation,
) -> PreConditionReport {
    let mut report = PreConditionReport {
        failed: None,
        warnings: Vec::new(),
    };
    for check in &operation.pre_conditions {
        let outcome = evaluate_check(ctx, plan, check).await;
        match outcome {
            Ok(true) => {}
            Ok(false) => {
                let message = format!("{} ({})", check.description, check.id);
                if check.required {
                    if report.failed.is_none() {
                        report.failed = Some(message);
                    }
                } else {
                    report.warnings.push(message);
                }
            }
            Err(err) => {
                let message = format!("{}: {err}", check.description);
                if check.required {
                    if report.failed.is_none() {
                        report.failed = Some(message);
                    }
                } else {
                    report.warnings.push(message);
                }
            }
        }
    }
    report
}

async fn evaluate_check(
    ctx: &ApplyContext,
    plan: &Plan,
    check: &PreCondition,
) -> Result<bool> {
    match &check.check {
        CheckType::FileExists { path } => Ok(path.exists()),
        CheckType::PortAvailable { host, port } => {
            ctx.executor_for(host)?.check_port_available(*port).await
        }
        CheckType::ProcessRunning { name } => {
            let executor = ctx
                .executors
                .values()
                .next()
                .ok_or_else(|| anyhow!("no executors configured"))?;
            let result = executor
                .execute("pgrep", &["-f".to_string(), name.clone()])
                .await?;
            Ok(result.success())
        }
        CheckType::VersionMatches { expected } => Ok(&plan.version == expected),
    }
}

/// Dispatch an operation to its handler.
pub async fn execute_operation(
    ctx: &ApplyContext,
    plan: &Plan,
    operation: &Operation,
) -> Result<()> {
    debug!(operation = %operation.id, kind = operation.kind.type_name(), "executing");
    match &operation.kind {
        OperationKind::DownloadBinary {
            variant,
            version,
            platform,
        } => {
            ctx.binaries
                .get_bin_path(*variant, version, *platform)
                .await?;
            Ok(())
        }
        OperationKind::CreateDirectory { host, path } => {
            ctx.executor_for(host)?.create_directory(path, 0o755).await
        }
        OperationKind::CopyBinary { source, dest } => {
            if dest.join("mongod").exists() {
                return Ok(());
            }
            let source = source.clone();
            let dest = dest.clone();
            tokio::task::spawn_blocking(move || install_executables(&source, &dest))
                .await
                .context("binary copy task panicked")??;
            Ok(())
        }
        OperationKind::GenerateConfig { node, path } => {
            generate_node_config(ctx, plan, node, path).await
        }
        OperationKind::GenerateSupervisorConfig { path: _ } => {
            generate_supervisor_config(ctx, plan).await
        }
        OperationKind::StartSupervisor => ctx.supervisor.start_daemon().await,
        OperationKind::StartProcess {
            node,
            program,
            config_file: _,
        } => start_process(ctx, node, program).await,
        OperationKind::InitReplicaSet {
            name,
            members,
            config_server,
        } => {
            orchestrator::init_replica_set(name, members, *config_server).await?;
            Ok(())
        }
        OperationKind::WaitForReady {
            replica_set,
            members,
        } => {
            orchestrator::wait_replica_set_ready(replica_set, members).await?;
            // The config replica set gets a quiesce window before anything
            // depends on its identity.
            if plan.topology.config_replica_set() == Some(replica_set.as_str()) {
                tokio::time::sleep(orchestrator::CONFIG_RS_QUIESCE).await;
            }
            Ok(())
        }
        OperationKind::AddShard {
            replica_set,
            members,
        } => {
            let mongos = plan
                .topology
                .nodes_of_kind(NodeKind::Mongos)
                .next()
                .ok_or_else(|| anyhow!("add_shard planned without a mongos"))?;
            orchestrator::add_shard(mongos, replica_set, members).await?;
            Ok(())
        }
        OperationKind::VerifyHealth => {
            orchestrator::verify_health(&plan.topology).await?;
            Ok(())
        }
        OperationKind::SaveMetadata => {
            let cluster = ctx.cluster(plan);
            let metadata = ClusterMetadata::from_plan(plan, &cluster, ctx.deploy_mode);
            metadata.save(&cluster.metadata_file())
        }
        OperationKind::CreateSymlink { target, link } => create_symlink(target, link),
    }
}

async fn generate_node_config(
    ctx: &ApplyContext,
    plan: &Plan,
    node: &Node,
    path: &Path,
) -> Result<()> {
    let cluster = ctx.cluster(plan);
    let content = match node.kind {
        NodeKind::Config => render::render_mongod_config(
            node,
            MongodRole::ConfigSvr,
            &cluster.node_data_dir(node),
            &cluster.node_log_dir(&plan.version, node),
        ),
        NodeKind::Mongod => {
            let role = if plan.topology.is_sharded() {
                MongodRole::ShardSvr
            } else {
                MongodRole::Standalone
            };
            render::render_mongod_config(
                node,
                role,
                &cluster.node_data_dir(node),
                &cluster.node_log_dir(&plan.version, node),
            )
        }
        NodeKind::Mongos => {
            let config_rs = plan
                .topology
                .config_replica_set()
                .ok_or_else(|| anyhow!("mongos planned without a config replica set"))?;
            let members: Vec<Node> = plan
                .topology
                .nodes_of_kind(NodeKind::Config)
                .cloned()
                .collect();
            let config_db = orchestrator::seed_list(config_rs, &members);
            render::render_mongos_config(
                node,
                &config_db,
                &cluster.node_log_dir(&plan.version, node),
            )
        }
    };
    ctx.executor_for(&node.host)?
        .upload_content(content.as_bytes(), path)
        .await
}

async fn generate_supervisor_config(ctx: &ApplyContext, plan: &Plan) -> Result<()> {
    let cluster = ctx.cluster(plan);
    let bin_dir = cluster.bin_dir(&plan.version);
    let version_dir = cluster.version_dir(&plan.version);

    let programs: Vec<SupervisorProgram> = plan
        .topology
        .nodes_in_startup_order()
        .into_iter()
        .map(|node| SupervisorProgram {
            name: program_name(node),
            command: program_command(
                &bin_dir,
                node,
                &cluster.node_config_file(&plan.version, node),
            ),
            log_file: cluster
                .node_log_dir(&plan.version, node)
                .join("supervisor.out"),
        })
        .collect();

    let content = render::render_supervisor_config(&version_dir, &programs);
    // The supervisor adapter owns the configuration location; writing
    // through the seam keeps remote adapters free to place it elsewhere.
    ctx.supervisor.write_config(&content).await
}

async fn start_process(ctx: &ApplyContext, node: &Node, program: &str) -> Result<()> {
    let executor = ctx.executor_for(&node.host)?;

    // Already listening means a previous run started this process.
    if !executor.check_port_available(node.port).await? {
        debug!(program, "port already bound; treating start as applied");
        return Ok(());
    }

    ctx.supervisor.start_program(program).await?;
    orchestrator::wait_for_listening(
        executor,
        &node.host,
        node.port,
        orchestrator::LISTEN_DEADLINE,
    )
    .await?;

    if node.kind == NodeKind::Mongos {
        orchestrator::wait_mongos_healthy(&node.host, node.port, orchestrator::MONGOS_DEADLINE)
            .await?;
    }
    Ok(())
}

fn create_symlink(target: &Path, link: &Path) -> Result<()> {
    if let Ok(existing) = std::fs::read_link(link) {
        if existing == target {
            return Ok(());
        }
        std::fs::remove_file(link)
            .with_context(|| format!("failed to replace {}", link.display()))?;
    } else if link.exists() {
        bail!(
            "{} exists and is not a symlink; refusing to replace it",
            link.display()
        );
    }

    #[cfg(unix)]
    std::os::unix::fs::symlink(target, link)
        .with_context(|| format!("failed to link {}", link.display()))?;
    #[cfg(windows)]
    std::os::windows::fs::symlink_dir(target, link)
        .with_context(|| format!("failed to link {}", link.display()))?;
    Ok(())
}
