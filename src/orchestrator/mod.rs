//! Cluster bring-up orchestration.
//!
//! This module owns the MongoDB-facing side of an apply run: waiting for
//! processes to bind, initiating replica sets, watching primary elections,
//! and registering shards. It talks to the servers in two connection
//! modes:
//!
//! | Mode     | Used for                                        |
//! |----------|-------------------------------------------------|
//! | direct   | initiation and per-node status polling (replica |
//! |          | set discovery explicitly bypassed)              |
//! | topology | post-initiation verification over the           |
//! |          | `?replicaSet=` URI                              |
//!
//! Transient topology states during replica set formation surface as
//! driver errors with recognizable message markers; those continue the
//! polling loop instead of aborting. The marker list is centralized here
//! and tested — there is no richer signal at the driver boundary we
//! consume.

use std::sync::Arc;
use std::time::Duration;

use mongodb::Client;
use mongodb::bson::{Bson, Document, doc};
use mongodb::options::{ClientOptions, ServerAddress};
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info};

use crate::errors::OrchestratorError;
use crate::executor::HostExecutor;
use crate::topology::{Node, Topology};

/// Connect and server-selection timeout for direct connections.
const DIRECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Deadline for a single initiate or status command.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
/// Interval between readiness polls.
const POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Attempts in the readiness polling loop (~120 s at 2 s intervals).
const POLL_ATTEMPTS: u32 = 60;
/// Settle time after the member states first look healthy.
const TOPOLOGY_SETTLE: Duration = Duration::from_secs(3);
/// Verification pings over the replica set URI.
const VERIFY_ATTEMPTS: u32 = 5;
/// Deadline for a node to start listening.
pub const LISTEN_DEADLINE: Duration = Duration::from_secs(120);
/// Deadline for a mongos to answer a health ping.
pub const MONGOS_DEADLINE: Duration = Duration::from_secs(180);
/// Quiesce delay after the config replica set reports ready.
pub const CONFIG_RS_QUIESCE: Duration = Duration::from_secs(5);

/// Error-message markers for transient topology states during replica set
/// formation. Matched by substring; kept in one place on purpose.
const TRANSIENT_MARKERS: &[&str] = &[
    "RSGhost",
    "server selection error",
    "Server selection timeout",
    "NotYetInitialized",
    "NotPrimaryOrSecondary",
];

const ALREADY_INITIALIZED_MARKERS: &[&str] = &["already initialized", "AlreadyInitialized"];

const ALREADY_EXISTS_MARKERS: &[&str] = &["already exists", "is already a member"];

pub(crate) fn is_transient(message: &str) -> bool {
    TRANSIENT_MARKERS.iter().any(|m| message.contains(m))
}

pub(crate) fn is_already_initialized(message: &str) -> bool {
    ALREADY_INITIALIZED_MARKERS
        .iter()
        .any(|m| message.contains(m))
}

pub(crate) fn is_already_exists(message: &str) -> bool {
    ALREADY_EXISTS_MARKERS.iter().any(|m| message.contains(m))
}

/// Replica set connection string `mongodb://h1:p1,h2:p2/?replicaSet=rs`.
pub fn replica_set_uri(name: &str, members: &[Node]) -> String {
    let hosts: Vec<String> = members.iter().map(|n| n.address()).collect();
    format!("mongodb://{}/?replicaSet={}", hosts.join(","), name)
}

/// The `<rs>/h1:p1,h2:p2` form used by `addShard` and `--configdb`.
pub fn seed_list(name: &str, members: &[Node]) -> String {
    let hosts: Vec<String> = members.iter().map(|n| n.address()).collect();
    format!("{}/{}", name, hosts.join(","))
}

/// Open a direct connection to one member, bypassing replica set
/// discovery.
async fn direct_client(host: &str, port: u16) -> Result<Client, OrchestratorError> {
    let options = ClientOptions::builder()
        .hosts(vec![ServerAddress::Tcp {
            host: host.to_string(),
            port: Some(port),
        }])
        .direct_connection(true)
        .connect_timeout(DIRECT_TIMEOUT)
        .server_selection_timeout(DIRECT_TIMEOUT)
        .build();
    Ok(Client::with_options(options)?)
}

/// Open a topology-discovering connection over a URI.
async fn topology_client(uri: &str) -> Result<Client, OrchestratorError> {
    let mut options = ClientOptions::parse(uri).await?;
    options.connect_timeout = Some(DIRECT_TIMEOUT);
    options.server_selection_timeout = Some(DIRECT_TIMEOUT);
    Ok(Client::with_options(options)?)
}

async fn admin_command(client: &Client, command: Document) -> Result<Document, OrchestratorError> {
    let result = timeout(
        COMMAND_TIMEOUT,
        client.database("admin").run_command(command),
    )
    .await
    .map_err(|_| OrchestratorError::Other(anyhow::anyhow!("admin command timed out")))??;
    Ok(result)
}

/// Member states observed in one `replSetGetStatus` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct MemberStates {
    has_primary: bool,
    all_valid: bool,
    all_ready: bool,
}

impl MemberStates {
    fn healthy(&self) -> bool {
        self.has_primary && self.all_valid && self.all_ready
    }
}

fn read_member_states(status: &Document) -> MemberStates {
    let Ok(members) = status.get_array("members") else {
        return MemberStates::default();
    };
    if members.is_empty() {
        return MemberStates::default();
    }

    let mut states = MemberStates {
        has_primary: false,
        all_valid: true,
        all_ready: true,
    };
    for member in members {
        let state = match member {
            Bson::Document(doc) => doc.get_str("stateStr").unwrap_or(""),
            _ => "",
        };
        match state {
            "PRIMARY" => states.has_primary = true,
            "SECONDARY" => {}
            "ARBITER" => states.all_ready = false,
            _ => {
                states.all_valid = false;
                states.all_ready = false;
            }
        }
    }
    states
}

/// Build the `replSetInitiate` document. Member attributes equal to the
/// server defaults are omitted.
fn initiate_document(name: &str, members: &[Node], config_server: bool) -> Document {
    let member_docs: Vec<Bson> = members
        .iter()
        .enumerate()
        .map(|(index, node)| {
            let mut doc = doc! {
                "_id": index as i32,
                "host": node.address(),
            };
            if let Some(priority) = node.member.priority {
                if priority != 1.0 {
                    doc.insert("priority", priority);
                }
            }
            if node.member.hidden == Some(true) {
                doc.insert("hidden", true);
            }
            if let Some(votes) = node.member.votes {
                if votes != 1 {
                    doc.insert("votes", votes);
                }
            }
            Bson::Document(doc)
        })
        .collect();

    let mut config = doc! {
        "_id": name,
        "members": member_docs,
    };
    if config_server {
        config.insert("configsvr", true);
    }
    doc! { "replSetInitiate": config }
}

/// Initiate a replica set and wait for it to become healthy.
///
/// Connects directly to the first member; an "already initialized" answer
/// is success, transient topology errors fall through to polling. Once
/// every member reports PRIMARY or SECONDARY with one PRIMARY present, an
/// independent connection over the replica set URI must answer a ping.
pub async fn init_replica_set(
    name: &str,
    members: &[Node],
    config_server: bool,
) -> Result<(), OrchestratorError> {
    let first = members
        .first()
        .ok_or_else(|| OrchestratorError::Other(anyhow::anyhow!("replica set has no members")))?;
    info!(replica_set = name, member = %first.address(), "initiating replica set");

    let client = direct_client(&first.host, first.port).await?;

    match admin_command(&client, doc! { "replSetGetStatus": 1 }).await {
        Ok(status) => {
            if read_member_states(&status).healthy() {
                debug!(replica_set = name, "already initialized and healthy");
                return Ok(());
            }
            // Initialized but still electing; go straight to polling.
        }
        Err(_) => {
            // Status refused: the set has not been initiated yet.
            let initiate = initiate_document(name, members, config_server);
            match admin_command(&client, initiate).await {
                Ok(_) => debug!(replica_set = name, "initiate accepted"),
                Err(err) => {
                    let message = err.to_string();
                    if is_already_initialized(&message) {
                        debug!(replica_set = name, "initiate raced; set already exists");
                    } else if is_transient(&message) {
                        debug!(replica_set = name, %message, "transient state during initiate");
                    } else {
                        return Err(err);
                    }
                }
            }
        }
    }

    wait_replica_set_ready(name, members).await
}

/// Poll member states until the set is healthy, then verify over the
/// replica set URI.
pub async fn wait_replica_set_ready(
    name: &str,
    members: &[Node],
) -> Result<(), OrchestratorError> {
    let first = members
        .first()
        .ok_or_else(|| OrchestratorError::Other(anyhow::anyhow!("replica set has no members")))?;

    for attempt in 0..POLL_ATTEMPTS {
        sleep(POLL_INTERVAL).await;

        let states = match direct_client(&first.host, first.port).await {
            Ok(client) => match admin_command(&client, doc! { "replSetGetStatus": 1 }).await {
                Ok(status) => read_member_states(&status),
                Err(err) => {
                    let message = err.to_string();
                    if is_transient(&message) || is_already_initialized(&message) {
                        debug!(replica_set = name, attempt, %message, "transient while polling");
                        continue;
                    }
                    debug!(replica_set = name, attempt, %message, "status query failed");
                    continue;
                }
            },
            Err(err) => {
                debug!(replica_set = name, attempt, %err, "member not reachable yet");
                continue;
            }
        };

        if !states.healthy() {
            continue;
        }

        // Member states look right; give the topology a moment and then
        // require an end-to-end ping through replica set discovery.
        sleep(TOPOLOGY_SETTLE).await;
        if verify_replica_set_ping(name, members).await {
            info!(replica_set = name, "replica set ready");
            return Ok(());
        }
    }

    Err(OrchestratorError::ReplicaSetTimeout {
        name: name.to_string(),
        seconds: (POLL_ATTEMPTS as u64) * POLL_INTERVAL.as_secs(),
    })
}

async fn verify_replica_set_ping(name: &str, members: &[Node]) -> bool {
    let uri = replica_set_uri(name, members);
    for attempt in 0..VERIFY_ATTEMPTS {
        match topology_client(&uri).await {
            Ok(client) => {
                if admin_command(&client, doc! { "ping": 1 }).await.is_ok() {
                    return true;
                }
            }
            Err(err) => debug!(replica_set = name, attempt, %err, "verification connect failed"),
        }
        // 2-3 s backoff between verification attempts.
        sleep(POLL_INTERVAL + Duration::from_millis(500 * (attempt as u64 % 2))).await;
    }
    false
}

/// Wait until a node is listening: the port is no longer bindable.
/// Exceeding the deadline aborts the phase; it is not retriable.
pub async fn wait_for_listening(
    executor: &Arc<dyn HostExecutor>,
    host: &str,
    port: u16,
    deadline: Duration,
) -> Result<(), OrchestratorError> {
    let started = Instant::now();
    loop {
        match executor.check_port_available(port).await {
            Ok(false) => return Ok(()),
            Ok(true) => {}
            Err(err) => debug!(host, port, %err, "port probe failed"),
        }
        if started.elapsed() >= deadline {
            return Err(OrchestratorError::ListenTimeout {
                host: host.to_string(),
                port,
                seconds: deadline.as_secs(),
            });
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// Health-ping a mongos until it answers or the deadline passes.
pub async fn wait_mongos_healthy(
    host: &str,
    port: u16,
    deadline: Duration,
) -> Result<(), OrchestratorError> {
    let uri = format!("mongodb://{host}:{port}/");
    let started = Instant::now();
    loop {
        match topology_client(&uri).await {
            Ok(client) => {
                if admin_command(&client, doc! { "ping": 1 }).await.is_ok() {
                    return Ok(());
                }
            }
            Err(err) => debug!(host, port, %err, "mongos not answering yet"),
        }
        if started.elapsed() >= deadline {
            return Err(OrchestratorError::MongosTimeout {
                host: host.to_string(),
                port,
                seconds: deadline.as_secs(),
            });
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// Register a shard through a mongos, skipping sets that are already
/// listed. An "already exists" answer is success.
pub async fn add_shard(
    mongos: &Node,
    replica_set: &str,
    members: &[Node],
) -> Result<(), OrchestratorError> {
    let client = direct_client(&mongos.host, mongos.port).await?;

    let existing = admin_command(&client, doc! { "listShards": 1 }).await?;
    if let Ok(shards) = existing.get_array("shards") {
        let listed = shards.iter().any(|shard| match shard {
            Bson::Document(doc) => doc.get_str("_id") == Ok(replica_set),
            _ => false,
        });
        if listed {
            debug!(replica_set, "shard already registered");
            return Ok(());
        }
    }

    let seed = seed_list(replica_set, members);
    match admin_command(&client, doc! { "addShard": seed.clone() }).await {
        Ok(_) => {
            info!(replica_set, "shard registered");
            Ok(())
        }
        Err(err) => {
            let message = err.to_string();
            if is_already_exists(&message) {
                Ok(())
            } else {
                Err(OrchestratorError::AddShardFailed {
                    shard: seed,
                    message,
                })
            }
        }
    }
}

/// Names of the shards a mongos currently knows.
pub async fn list_shards(mongos: &Node) -> Result<Vec<String>, OrchestratorError> {
    let client = direct_client(&mongos.host, mongos.port).await?;
    let result = admin_command(&client, doc! { "listShards": 1 }).await?;
    let mut names = Vec::new();
    if let Ok(shards) = result.get_array("shards") {
        for shard in shards {
            if let Bson::Document(doc) = shard {
                if let Ok(id) = doc.get_str("_id") {
                    names.push(id.to_string());
                }
            }
        }
    }
    Ok(names)
}

/// Final health verification: every node must answer a ping over a direct
/// connection, and on sharded topologies the mongos must list every shard
/// replica set.
pub async fn verify_health(topology: &Topology) -> Result<(), OrchestratorError> {
    for node in &topology.nodes {
        let client = direct_client(&node.host, node.port).await?;
        admin_command(&client, doc! { "ping": 1 })
            .await
            .map_err(|err| {
                OrchestratorError::Other(anyhow::anyhow!(
                    "health ping failed for {} {}: {err}",
                    node.kind.as_str(),
                    node.address()
                ))
            })?;
    }

    if let Some(mongos) = topology
        .nodes
        .iter()
        .find(|n| n.kind == crate::topology::NodeKind::Mongos)
    {
        let registered = list_shards(mongos).await?;
        for (name, _) in topology.shard_replica_sets() {
            if !registered.contains(&name) {
                return Err(OrchestratorError::Other(anyhow::anyhow!(
                    "shard {name} is not registered with the cluster"
                )));
            }
        }
    }
    Ok(())
}
