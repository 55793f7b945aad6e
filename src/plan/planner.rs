//! Deploy planning: host validation and phase emission.
//!
//! Planning is pure with respect to cluster state: it probes hosts for
//! validation but mutates nothing. The emitted plan carries every path,
//! pre-condition, and declared change the applier will need; handlers
//! never invent paths of their own.
//!
//! Routing nodes are planned into the initialize phase rather than deploy:
//! their configuration depends on the config replica set identity and they
//! must start only after that set has elected a primary.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::errors::PlanError;
use crate::executor::HostExecutor;
use crate::paths::{ClusterPaths, StateRoot};
use crate::platform::Platform;
use crate::plan::resources::{MIN_DISK_BYTES, ResourceEstimate};
use crate::plan::{
    Change, CheckType, Operation, OperationKind, Phase, PhaseName, Plan, PreCondition, Target,
};
use crate::render::program_name;
use crate::topology::{Node, NodeKind, Topology};
use crate::version::Variant;

/// Remote deploys expect this service user; its absence is warning-only.
const REMOTE_SERVICE_USER: &str = "mongodb";

/// Everything the planner needs to produce a deploy plan. Ports must
/// already be concrete (the port allocator runs before planning).
pub struct PlanRequest {
    pub cluster_name: String,
    pub variant: Variant,
    pub version: String,
    pub topology: Topology,
    /// The resolved binary cache `bin/` directory.
    pub bin_path: PathBuf,
    pub platform: Platform,
    pub is_local: bool,
    pub dry_run: bool,
}

/// Outcome of one host-local validation check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationCheck {
    pub name: String,
    pub host: String,
    pub required: bool,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Aggregated validation outcome carried inside the plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ValidationResult {
    pub checks: Vec<ValidationCheck>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| !c.required || c.passed)
    }

    pub fn failures(&self) -> Vec<String> {
        self.checks
            .iter()
            .filter(|c| c.required && !c.passed)
            .map(|c| {
                format!(
                    "{} on {}: {}",
                    c.name,
                    c.host,
                    c.message.as_deref().unwrap_or("failed")
                )
            })
            .collect()
    }
}

pub struct Planner {
    state_root: StateRoot,
}

impl Planner {
    pub fn new(state_root: StateRoot) -> Self {
        Self { state_root }
    }

    /// Validate hosts and emit the four-phase deploy plan.
    pub async fn plan_deploy(
        &self,
        request: &PlanRequest,
        executors: &BTreeMap<String, Arc<dyn HostExecutor>>,
    ) -> Result<Plan, PlanError> {
        request.variant.validate_spec(&request.version)?;
        request.topology.check_invariants()?;

        let validation = self
            .validate_hosts(request, executors)
            .await?;
        if !validation.passed() {
            return Err(PlanError::ValidationFailed(validation.failures()));
        }
        for warning in &validation.warnings {
            println!("Warning: {warning}");
        }

        let cluster = self.state_root.cluster(&request.cluster_name);
        let phases = vec![
            self.prepare_phase(request, &cluster),
            self.deploy_phase(request, &cluster),
            self.initialize_phase(request, &cluster),
            self.finalize_phase(request, &cluster),
        ];

        let plan = Plan {
            plan_id: Uuid::new_v4().to_string(),
            operation: "deploy".into(),
            cluster_name: request.cluster_name.clone(),
            created_at: Utc::now(),
            version: request.version.clone(),
            variant: request.variant,
            topology: request.topology.clone(),
            validation,
            dry_run: request.dry_run,
            phases,
            resources: ResourceEstimate::for_topology(&request.topology),
        };
        debug!(plan_id = %plan.plan_id, operations = plan.operation_count(), "plan emitted");
        Ok(plan)
    }

    /// Host-local checks, fanned out per host and joined.
    async fn validate_hosts(
        &self,
        request: &PlanRequest,
        executors: &BTreeMap<String, Arc<dyn HostExecutor>>,
    ) -> Result<ValidationResult, PlanError> {
        let cluster_root = self.state_root.cluster(&request.cluster_name).root().to_path_buf();

        let futures = request.topology.hosts().into_iter().map(|host| {
            let executor = executors.get(&host).cloned();
            let ports: Vec<u16> = request
                .topology
                .nodes
                .iter()
                .filter(|n| n.host == host)
                .map(|n| n.port)
                .collect();
            let cluster_root = cluster_root.clone();
            let is_local = request.is_local;
            async move {
                let mut checks = Vec::new();
                let mut warnings = Vec::new();

                let Some(executor) = executor else {
                    checks.push(ValidationCheck {
                        name: "connectivity".into(),
                        host: host.clone(),
                        required: true,
                        passed: false,
                        message: Some("no executor configured for host".into()),
                    });
                    return (checks, warnings);
                };

                match executor.check_connectivity().await {
                    Ok(()) => checks.push(ValidationCheck {
                        name: "connectivity".into(),
                        host: host.clone(),
                        required: true,
                        passed: true,
                        message: None,
                    }),
                    Err(err) => {
                        checks.push(ValidationCheck {
                            name: "connectivity".into(),
                            host: host.clone(),
                            required: true,
                            passed: false,
                            message: Some(err.to_string()),
                        });
                        return (checks, warnings);
                    }
                }

                match executor.disk_space(&cluster_root).await {
                    Ok(free) => checks.push(ValidationCheck {
                        name: "disk_space".into(),
                        host: host.clone(),
                        required: true,
                        passed: free >= MIN_DISK_BYTES,
                        message: (free < MIN_DISK_BYTES).then(|| {
                            format!(
                                "{} GB free, need {} GB",
                                free / (1024 * 1024 * 1024),
                                MIN_DISK_BYTES / (1024 * 1024 * 1024)
                            )
                        }),
                    }),
                    Err(err) => checks.push(ValidationCheck {
                        name: "disk_space".into(),
                        host: host.clone(),
                        required: true,
                        passed: false,
                        message: Some(err.to_string()),
                    }),
                }

                if is_local {
                    for port in ports {
                        let passed = executor.check_port_available(port).await.unwrap_or(false);
                        checks.push(ValidationCheck {
                            name: format!("port_available:{port}"),
                            host: host.clone(),
                            required: true,
                            passed,
                            message: (!passed).then(|| format!("port {port} is not bindable")),
                        });
                    }
                }

                match executor.os_info().await {
                    Ok(info) => checks.push(ValidationCheck {
                        name: "os_info".into(),
                        host: host.clone(),
                        required: false,
                        passed: true,
                        message: Some(format!("{}/{}", info.os, info.arch)),
                    }),
                    Err(err) => warnings.push(format!("could not read OS info on {host}: {err}")),
                }

                if !is_local {
                    match executor.user_exists(REMOTE_SERVICE_USER).await {
                        Ok(true) => {}
                        Ok(false) => warnings.push(format!(
                            "user {REMOTE_SERVICE_USER} does not exist on {host}"
                        )),
                        Err(err) => {
                            warnings.push(format!("could not check users on {host}: {err}"))
                        }
                    }
                }

                (checks, warnings)
            }
        });

        let mut result = ValidationResult::default();
        for (checks, warnings) in join_all(futures).await {
            result.checks.extend(checks);
            result.warnings.extend(warnings);
        }
        Ok(result)
    }

    fn prepare_phase(&self, request: &PlanRequest, cluster: &ClusterPaths) -> Phase {
        let mut operations = Vec::new();

        operations.push(
            Operation::new(
                "dl-binary",
                OperationKind::DownloadBinary {
                    variant: request.variant,
                    version: request.version.clone(),
                    platform: request.platform,
                },
                format!(
                    "Materialize {} {} binaries for {}",
                    request.variant, request.version, request.platform
                ),
                Target::cluster(&request.cluster_name),
            )
            .with_change(Change::create(
                "binary",
                request.bin_path.display().to_string(),
            )),
        );

        let nodes: Vec<&Node> = request.topology.nodes_in_startup_order();
        for (index, dir) in cluster
            .required_directories(&request.version, &nodes)
            .into_iter()
            .enumerate()
        {
            let host = request
                .topology
                .hosts()
                .first()
                .cloned()
                .unwrap_or_else(|| "localhost".into());
            operations.push(
                Operation::new(
                    format!("dir-{index:02}"),
                    OperationKind::CreateDirectory {
                        host,
                        path: dir.clone(),
                    },
                    format!("Create {}", dir.display()),
                    Target::path(&dir),
                )
                .with_change(Change::create("directory", dir.display().to_string()))
                .parallel_safe(),
            );
        }

        let cluster_bin = cluster.bin_dir(&request.version);
        operations.push(
            Operation::new(
                "copy-binary",
                OperationKind::CopyBinary {
                    source: request.bin_path.clone(),
                    dest: cluster_bin.clone(),
                },
                format!("Copy server binaries into {}", cluster_bin.display()),
                Target::path(&cluster_bin),
            )
            .with_change(Change::modify("binary_dir", cluster_bin.display().to_string())),
        );

        Phase {
            name: PhaseName::Prepare,
            description: "Download binaries and create the cluster directory tree".into(),
            order: 0,
            estimated_duration_secs: 60 + 5 * request.topology.nodes.len() as u64,
            operations,
        }
    }

    fn deploy_phase(&self, request: &PlanRequest, cluster: &ClusterPaths) -> Phase {
        let mut operations = Vec::new();
        let version = &request.version;

        // Config rendering for every node that starts in this phase:
        // config servers first, then shard/standalone mongods. Routing
        // nodes are configured later, once the config RS identity exists.
        for node in request
            .topology
            .nodes_in_startup_order()
            .into_iter()
            .filter(|n| n.kind != NodeKind::Mongos)
        {
            operations.push(self.generate_config_op(cluster, version, node).parallel_safe());
        }

        let supervisor_ini = cluster.supervisor_config(version);
        operations.push(
            Operation::new(
                "gen-supervisor-config",
                OperationKind::GenerateSupervisorConfig {
                    path: supervisor_ini.clone(),
                },
                "Render the supervisor configuration".to_string(),
                Target::path(&supervisor_ini),
            )
            .with_change(Change::create("file", supervisor_ini.display().to_string())),
        );
        operations.push(
            Operation::new(
                "start-supervisor",
                OperationKind::StartSupervisor,
                "Start the supervisor daemon".to_string(),
                Target::cluster(&request.cluster_name),
            )
            .with_pre_condition(PreCondition {
                id: "supervisor-config-exists".into(),
                description: "supervisor configuration rendered".into(),
                check: CheckType::FileExists {
                    path: supervisor_ini,
                },
                required: true,
            })
            .with_change(Change::start("process", "supervisord")),
        );

        for node in request
            .topology
            .nodes_in_startup_order()
            .into_iter()
            .filter(|n| n.kind != NodeKind::Mongos)
        {
            operations.push(self.start_process_op(cluster, version, node));
        }

        Phase {
            name: PhaseName::Deploy,
            description: "Render configurations and start config servers and mongods".into(),
            order: 1,
            estimated_duration_secs: 20 + 10 * request.topology.nodes.len() as u64,
            operations,
        }
    }

    fn initialize_phase(&self, request: &PlanRequest, cluster: &ClusterPaths) -> Phase {
        let mut operations = Vec::new();
        let version = &request.version;
        let config_rs = request.topology.config_replica_set().map(str::to_string);

        // All initiations first (parallel-safe, so they fan out together),
        // then one readiness wait per set.
        let replica_sets = request.topology.replica_sets();
        for (name, members) in &replica_sets {
            let members: Vec<Node> = members.iter().map(|n| (*n).clone()).collect();
            let config_server = Some(name.as_str()) == config_rs.as_deref();
            operations.push(
                Operation::new(
                    format!("init-{name}"),
                    OperationKind::InitReplicaSet {
                        name: name.clone(),
                        members,
                        config_server,
                    },
                    format!("Initiate replica set {name}"),
                    Target::replica_set(name),
                )
                .with_change(Change::create("replica_set", name.clone()))
                .parallel_safe(),
            );
        }
        for (name, members) in &replica_sets {
            let members: Vec<Node> = members.iter().map(|n| (*n).clone()).collect();
            operations.push(Operation::new(
                format!("wait-{name}"),
                OperationKind::WaitForReady {
                    replica_set: name.clone(),
                    members,
                },
                format!("Wait for {name} to elect a primary"),
                Target::replica_set(name),
            ));
        }

        let mongos: Vec<&Node> = request.topology.nodes_of_kind(NodeKind::Mongos).collect();
        if !mongos.is_empty() {
            for node in &mongos {
                operations.push(self.generate_config_op(cluster, version, node).parallel_safe());
            }
            for node in &mongos {
                operations.push(self.start_process_op(cluster, version, node));
            }
            for (name, members) in request.topology.shard_replica_sets() {
                let members: Vec<Node> = members.into_iter().cloned().collect();
                operations.push(
                    Operation::new(
                        format!("addshard-{name}"),
                        OperationKind::AddShard {
                            replica_set: name.clone(),
                            members,
                        },
                        format!("Register shard {name}"),
                        Target::replica_set(&name),
                    )
                    .with_change(Change::create("shard", name)),
                );
            }
            operations.push(Operation::new(
                "verify-initialize",
                OperationKind::VerifyHealth,
                "Verify cluster health after shard registration".to_string(),
                Target::cluster(&request.cluster_name),
            ));
        }

        Phase {
            name: PhaseName::Initialize,
            description: "Form replica sets, start routing nodes, and register shards".into(),
            order: 2,
            estimated_duration_secs: 150,
            operations,
        }
    }

    fn finalize_phase(&self, request: &PlanRequest, cluster: &ClusterPaths) -> Phase {
        let version_dir = cluster.version_dir(&request.version);
        let current = cluster.current_symlink();
        let metadata = cluster.metadata_file();

        let operations = vec![
            Operation::new(
                "verify-final",
                OperationKind::VerifyHealth,
                "Verify every node answers a ping".to_string(),
                Target::cluster(&request.cluster_name),
            ),
            Operation::new(
                "save-metadata",
                OperationKind::SaveMetadata,
                format!("Write {}", metadata.display()),
                Target::path(&metadata),
            )
            .with_change(Change::create("file", metadata.display().to_string())),
            Operation::new(
                "activate-current",
                OperationKind::CreateSymlink {
                    target: version_dir.clone(),
                    link: current.clone(),
                },
                format!("Point {} at {}", current.display(), version_dir.display()),
                Target::path(&current),
            )
            .with_change(Change::create("symlink", current.display().to_string())),
        ];

        Phase {
            name: PhaseName::Finalize,
            description: "Verify health, persist metadata, and activate the version".into(),
            order: 3,
            estimated_duration_secs: 30,
            operations,
        }
    }

    fn generate_config_op(&self, cluster: &ClusterPaths, version: &str, node: &Node) -> Operation {
        let path = cluster.node_config_file(version, node);
        Operation::new(
            format!("gen-config-{}", node.name()),
            OperationKind::GenerateConfig {
                node: node.clone(),
                path: path.clone(),
            },
            format!("Render configuration for {} {}", node.kind.as_str(), node.address()),
            Target::node(node),
        )
        .with_change(Change::create("file", path.display().to_string()))
    }

    fn start_process_op(&self, cluster: &ClusterPaths, version: &str, node: &Node) -> Operation {
        let config_file = cluster.node_config_file(version, node);
        let program = program_name(node);
        Operation::new(
            format!("start-{program}"),
            OperationKind::StartProcess {
                node: node.clone(),
                program: program.clone(),
                config_file: config_file.clone(),
            },
            format!("Start {} on {}", node.kind.as_str(), node.address()),
            Target::node(node),
        )
        .with_pre_condition(PreCondition {
            id: format!("config-exists-{}", node.name()),
            description: format!("{} exists", config_file.display()),
            check: CheckType::FileExists { path: config_file },
            required: true,
        })
        .with_pre_condition(PreCondition {
            id: format!("port-free-{}", node.port),
            description: format!("port {} bindable on {}", node.port, node.host),
            check: CheckType::PortAvailable {
                host: node.host.clone(),
                port: node.port,
            },
            required: true,
        })
        .with_change(Change::start("process", program))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{CommandOutput, OsInfo};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::path::Path;

    struct StubExecutor {
        free_disk: u64,
        ports_free: bool,
    }

    #[async_trait]
    impl HostExecutor for StubExecutor {
        async fn check_connectivity(&self) -> Result<()> {
            Ok(())
        }
        async fn os_info(&self) -> Result<OsInfo> {
            Ok(OsInfo {
                os: "linux".into(),
                arch: "amd64".into(),
            })
        }
        async fn check_port_available(&self, _port: u16) -> Result<bool> {
            Ok(self.ports_free)
        }
        async fn disk_space(&self, _path: &Path) -> Result<u64> {
            Ok(self.free_disk)
        }
        async fn create_directory(&self, _path: &Path, _mode: u32) -> Result<()> {
            Ok(())
        }
        async fn upload_content(&self, _content: &[u8], _path: &Path) -> Result<()> {
            Ok(())
        }
        async fn execute(&self, _program: &str, _args: &[String]) -> Result<CommandOutput> {
            Ok(CommandOutput {
                output: String::new(),
                exit_code: 0,
            })
        }
        async fn background(&self, _program: &str, _args: &[String]) -> Result<u32> {
            Ok(42)
        }
        async fn user_exists(&self, _name: &str) -> Result<bool> {
            Ok(true)
        }
    }

    fn executors(free_disk: u64, ports_free: bool) -> BTreeMap<String, Arc<dyn HostExecutor>> {
        let mut map: BTreeMap<String, Arc<dyn HostExecutor>> = BTreeMap::new();
        map.insert(
            "localhost".into(),
            Arc::new(StubExecutor {
                free_disk,
                ports_free,
            }),
        );
        map
    }

    fn node(kind: NodeKind, port: u16, rs: Option<&str>) -> Node {
        Node {
            kind,
            host: "localhost".into(),
            port,
            replica_set: rs.map(Into::into),
            data_dir: None,
            log_dir: None,
            member: Default::default(),
        }
    }

    fn sharded_request() -> PlanRequest {
        PlanRequest {
            cluster_name: "demo".into(),
            variant: Variant::Official,
            version: "7.0.14".into(),
            topology: Topology::new(vec![
                node(NodeKind::Config, 30000, Some("configRS")),
                node(NodeKind::Mongod, 30001, Some("shard1")),
                node(NodeKind::Mongod, 30002, Some("shard1")),
                node(NodeKind::Mongod, 30003, Some("shard2")),
                node(NodeKind::Mongod, 30004, Some("shard2")),
                node(NodeKind::Mongos, 30005, None),
            ]),
            bin_path: PathBuf::from("/state/packages/official-7.0.14-linux-amd64/bin"),
            platform: Platform::new(crate::platform::Os::Linux, crate::platform::Arch::Amd64),
            is_local: true,
            dry_run: false,
        }
    }

    #[tokio::test]
    async fn plan_has_four_ordered_phases() {
        let planner = Planner::new(StateRoot::at("/state"));
        let plan = planner
            .plan_deploy(&sharded_request(), &executors(MIN_DISK_BYTES * 2, true))
            .await
            .unwrap();

        let names: Vec<PhaseName> = plan.phases.iter().map(|p| p.name).collect();
        assert_eq!(names, PhaseName::all());
        for (index, phase) in plan.phases.iter().enumerate() {
            assert_eq!(phase.order as usize, index);
        }
    }

    #[tokio::test]
    async fn insufficient_disk_fails_validation() {
        let planner = Planner::new(StateRoot::at("/state"));
        let err = planner
            .plan_deploy(&sharded_request(), &executors(1024, true))
            .await
            .unwrap_err();
        match err {
            PlanError::ValidationFailed(failures) => {
                assert!(failures.iter().any(|f| f.contains("disk_space")));
            }
            other => panic!("expected ValidationFailed, got {other}"),
        }
    }

    #[tokio::test]
    async fn occupied_port_fails_local_validation() {
        let planner = Planner::new(StateRoot::at("/state"));
        let err = planner
            .plan_deploy(&sharded_request(), &executors(MIN_DISK_BYTES * 2, false))
            .await
            .unwrap_err();
        assert!(matches!(err, PlanError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn deploy_phase_excludes_mongos() {
        let planner = Planner::new(StateRoot::at("/state"));
        let plan = planner
            .plan_deploy(&sharded_request(), &executors(MIN_DISK_BYTES * 2, true))
            .await
            .unwrap();

        let deploy = plan.phase(PhaseName::Deploy).unwrap();
        assert!(
            deploy
                .operations
                .iter()
                .all(|op| !op.id.contains("mongos")),
            "mongos must not start before the config RS has a primary"
        );
        // Config server starts precede mongod starts.
        let start_ids: Vec<&str> = deploy
            .operations
            .iter()
            .filter(|op| matches!(op.kind, OperationKind::StartProcess { .. }))
            .map(|op| op.id.as_str())
            .collect();
        assert_eq!(start_ids[0], "start-config-30000");
        assert!(start_ids[1..].iter().all(|id| id.starts_with("start-mongod-")));
    }

    #[tokio::test]
    async fn initialize_phase_orders_init_mongos_addshard() {
        let planner = Planner::new(StateRoot::at("/state"));
        let plan = planner
            .plan_deploy(&sharded_request(), &executors(MIN_DISK_BYTES * 2, true))
            .await
            .unwrap();

        let init = plan.phase(PhaseName::Initialize).unwrap();
        let ids: Vec<&str> = init.operations.iter().map(|op| op.id.as_str()).collect();

        let first_init = ids.iter().position(|id| id.starts_with("init-")).unwrap();
        let mongos_start = ids
            .iter()
            .position(|id| id.starts_with("start-mongos"))
            .unwrap();
        let first_addshard = ids
            .iter()
            .position(|id| id.starts_with("addshard-"))
            .unwrap();
        assert!(first_init < mongos_start);
        assert!(mongos_start < first_addshard);
        assert!(ids.contains(&"init-configRS"));
        assert!(ids.contains(&"addshard-shard1"));
        assert!(ids.contains(&"addshard-shard2"));
        assert!(!ids.contains(&"addshard-configRS"));
        assert_eq!(*ids.last().unwrap(), "verify-initialize");
    }

    #[tokio::test]
    async fn start_process_carries_required_preconditions() {
        let planner = Planner::new(StateRoot::at("/state"));
        let plan = planner
            .plan_deploy(&sharded_request(), &executors(MIN_DISK_BYTES * 2, true))
            .await
            .unwrap();

        for phase in &plan.phases {
            for op in &phase.operations {
                if let OperationKind::StartProcess { .. } = op.kind {
                    let kinds: Vec<&CheckType> =
                        op.pre_conditions.iter().map(|p| &p.check).collect();
                    assert!(
                        kinds
                            .iter()
                            .any(|c| matches!(c, CheckType::FileExists { .. }))
                    );
                    assert!(
                        kinds
                            .iter()
                            .any(|c| matches!(c, CheckType::PortAvailable { .. }))
                    );
                    assert!(op.pre_conditions.iter().all(|p| p.required));
                }
            }
        }
    }

    #[tokio::test]
    async fn declared_directories_match_required_layout() {
        let planner = Planner::new(StateRoot::at("/state"));
        let request = sharded_request();
        let plan = planner
            .plan_deploy(&request, &executors(MIN_DISK_BYTES * 2, true))
            .await
            .unwrap();

        let cluster = StateRoot::at("/state").cluster("demo");
        let nodes = request.topology.nodes_in_startup_order();
        let expected: Vec<String> = cluster
            .required_directories(&request.version, &nodes)
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        let declared = plan.declared_directories();
        assert_eq!(declared, expected.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn standalone_plan_has_empty_initialize() {
        let planner = Planner::new(StateRoot::at("/state"));
        let request = PlanRequest {
            topology: Topology::new(vec![node(NodeKind::Mongod, 30000, None)]),
            ..sharded_request()
        };
        let plan = planner
            .plan_deploy(&request, &executors(MIN_DISK_BYTES * 2, true))
            .await
            .unwrap();
        assert!(plan.phase(PhaseName::Initialize).unwrap().operations.is_empty());
    }

    #[tokio::test]
    async fn replica_set_plan_inits_without_shards() {
        let planner = Planner::new(StateRoot::at("/state"));
        let request = PlanRequest {
            topology: Topology::new(vec![
                node(NodeKind::Mongod, 30000, Some("rs0")),
                node(NodeKind::Mongod, 30001, Some("rs0")),
                node(NodeKind::Mongod, 30002, Some("rs0")),
            ]),
            ..sharded_request()
        };
        let plan = planner
            .plan_deploy(&request, &executors(MIN_DISK_BYTES * 2, true))
            .await
            .unwrap();
        let init = plan.phase(PhaseName::Initialize).unwrap();
        let ids: Vec<&str> = init.operations.iter().map(|op| op.id.as_str()).collect();
        assert_eq!(ids, vec!["init-rs0", "wait-rs0"]);
    }
}
