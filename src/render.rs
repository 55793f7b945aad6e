//! Rendered configuration sink.
//!
//! Produces the YAML configuration files consumed by mongod and mongos and
//! the supervisor ini that manages them. The shapes mirror the server's
//! own configuration file format, so the structs serialize with camelCase
//! keys.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::topology::{Node, NodeKind};

/// Role a mongod runs under. `ShardSvr` applies exactly when the topology
/// contains any mongos or config server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MongodRole {
    Standalone,
    ShardSvr,
    ConfigSvr,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Storage {
    db_path: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SystemLog {
    destination: String,
    path: String,
    log_append: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Net {
    bind_ip: String,
    port: u16,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Replication {
    repl_set_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Sharding {
    #[serde(skip_serializing_if = "Option::is_none")]
    cluster_role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "configDB")]
    config_db: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MongodConfigFile {
    storage: Storage,
    system_log: SystemLog,
    net: Net,
    #[serde(skip_serializing_if = "Option::is_none")]
    replication: Option<Replication>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sharding: Option<Sharding>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MongosConfigFile {
    system_log: SystemLog,
    net: Net,
    sharding: Sharding,
}

/// Render a mongod configuration file.
pub fn render_mongod_config(
    node: &Node,
    role: MongodRole,
    data_dir: &Path,
    log_dir: &Path,
) -> String {
    let cluster_role = match role {
        MongodRole::Standalone => None,
        MongodRole::ShardSvr => Some("shardsvr".to_string()),
        MongodRole::ConfigSvr => Some("configsvr".to_string()),
    };
    let config = MongodConfigFile {
        storage: Storage {
            db_path: data_dir.display().to_string(),
        },
        system_log: SystemLog {
            destination: "file".into(),
            path: log_dir.join("mongod.log").display().to_string(),
            log_append: true,
        },
        net: Net {
            bind_ip: node.host.clone(),
            port: node.port,
        },
        replication: node.replica_set.as_ref().map(|rs| Replication {
            repl_set_name: rs.clone(),
        }),
        sharding: cluster_role.map(|role| Sharding {
            cluster_role: Some(role),
            config_db: None,
        }),
    };
    serde_yaml::to_string(&config).expect("mongod config serializes")
}

/// Render a mongos configuration file. `config_db` is the
/// `<configRS>/h1:p1,h2:p2` string and therefore requires the config
/// replica set identity to be known.
pub fn render_mongos_config(node: &Node, config_db: &str, log_dir: &Path) -> String {
    let config = MongosConfigFile {
        system_log: SystemLog {
            destination: "file".into(),
            path: log_dir.join("mongos.log").display().to_string(),
            log_append: true,
        },
        net: Net {
            bind_ip: node.host.clone(),
            port: node.port,
        },
        sharding: Sharding {
            cluster_role: None,
            config_db: Some(config_db.to_string()),
        },
    };
    serde_yaml::to_string(&config).expect("mongos config serializes")
}

/// One supervised program.
#[derive(Debug, Clone)]
pub struct SupervisorProgram {
    pub name: String,
    pub command: String,
    pub log_file: PathBuf,
}

/// Stable supervisor program name for a node.
pub fn program_name(node: &Node) -> String {
    format!("{}-{}", node.kind.program_prefix(), node.port)
}

/// Command line for a node, driving it through its rendered config file.
pub fn program_command(bin_dir: &Path, node: &Node, config_file: &Path) -> String {
    let binary = match node.kind {
        NodeKind::Mongos => "mongos",
        _ => "mongod",
    };
    format!(
        "{} --config {}",
        bin_dir.join(binary).display(),
        config_file.display()
    )
}

/// Render the supervisor ini. Programs never autostart; the applier
/// starts them one at a time in topology order.
pub fn render_supervisor_config(version_dir: &Path, programs: &[SupervisorProgram]) -> String {
    let mut out = String::new();
    out.push_str("[supervisord]\n");
    out.push_str(&format!(
        "logfile={}\n",
        version_dir.join("supervisord.log").display()
    ));
    out.push_str(&format!(
        "pidfile={}\n",
        version_dir.join("supervisord.pid").display()
    ));
    out.push_str("nodaemon=false\n");
    out.push('\n');
    out.push_str("[unix_http_server]\n");
    out.push_str(&format!(
        "file={}\n",
        version_dir.join("supervisor.sock").display()
    ));
    out.push('\n');
    out.push_str("[rpcinterface:supervisor]\n");
    out.push_str(
        "supervisor.rpcinterface_factory = supervisor.rpcinterface:make_main_rpcinterface\n",
    );
    out.push('\n');
    out.push_str("[supervisorctl]\n");
    out.push_str(&format!(
        "serverurl=unix://{}\n",
        version_dir.join("supervisor.sock").display()
    ));

    for program in programs {
        out.push('\n');
        out.push_str(&format!("[program:{}]\n", program.name));
        out.push_str(&format!("command={}\n", program.command));
        out.push_str("autostart=false\n");
        out.push_str("autorestart=true\n");
        out.push_str(&format!(
            "stdout_logfile={}\n",
            program.log_file.display()
        ));
        out.push_str("redirect_stderr=true\n");
    }
    out
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
    fn mongod_config_carries_replication_and_role() {
        let n = node(NodeKind::Mongod, 30000, Some("shard1"));
        let yaml = render_mongod_config(
            &n,
            MongodRole::ShardSvr,
            Path::new("/data/localhost-30000"),
            Path::new("/v7.0.2/localhost-30000/log"),
        );
        assert!(yaml.contains("dbPath: /data/localhost-30000"));
        assert!(yaml.contains("replSetName: shard1"));
        assert!(yaml.contains("clusterRole: shardsvr"));
        assert!(yaml.contains("port: 30000"));
        assert!(yaml.contains("logAppend: true"));
    }

    #[test]
    fn standalone_mongod_has_no_sharding_section() {
        let n = node(NodeKind::Mongod, 30000, None);
        let yaml = render_mongod_config(
            &n,
            MongodRole::Standalone,
            Path::new("/data"),
            Path::new("/log"),
        );
        assert!(!yaml.contains("sharding"));
        assert!(!yaml.contains("replication"));
    }

    #[test]
    fn config_server_gets_configsvr_role() {
        let n = node(NodeKind::Config, 30000, Some("configRS"));
        let yaml = render_mongod_config(
            &n,
            MongodRole::ConfigSvr,
            Path::new("/data"),
            Path::new("/log"),
        );
        assert!(yaml.contains("clusterRole: configsvr"));
    }

    #[test]
    fn mongos_config_names_the_config_db() {
        let n = node(NodeKind::Mongos, 30006, None);
        let yaml = render_mongos_config(
            &n,
            "configRS/localhost:30000,localhost:30001",
            Path::new("/log"),
        );
        assert!(yaml.contains("configDB: configRS/localhost:30000,localhost:30001"));
        assert!(!yaml.contains("storage"));
    }

    #[test]
    fn program_names_are_stable_per_kind() {
        assert_eq!(program_name(&node(NodeKind::Mongod, 30001, None)), "mongod-30001");
        assert_eq!(program_name(&node(NodeKind::Mongos, 30005, None)), "mongos-30005");
        assert_eq!(
            program_name(&node(NodeKind::Config, 30000, Some("c"))),
            "config-30000"
        );
    }

    #[test]
    fn supervisor_ini_lists_programs_without_autostart() {
        let programs = vec![SupervisorProgram {
            name: "mongod-30000".into(),
            command: "/bin/mongod --config /c/mongod.conf".into(),
            log_file: PathBuf::from("/log/mongod-30000.out"),
        }];
        let ini = render_supervisor_config(Path::new("/v7.0.2"), &programs);
        assert!(ini.contains("[program:mongod-30000]"));
        assert!(ini.contains("autostart=false"));
        assert!(ini.contains("command=/bin/mongod --config /c/mongod.conf"));
        assert!(ini.contains("[supervisord]"));
    }
}
