//! Static per-role instance configuration.

use crate::config::Layout;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Which side of the comparison an instance serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The baseline build (left).
    Reference,
    /// The build under test (right).
    Candidate,
}

impl Role {
    /// Both roles, reference first.
    pub const BOTH: [Self; 2] = [Self::Reference, Self::Candidate];

    /// Directory name of the instance root.
    #[must_use]
    pub const fn dir_name(&self) -> &'static str {
        match self {
            Self::Reference => "left",
            Self::Candidate => "right",
        }
    }

    /// The fixed port assignment of this role.
    #[must_use]
    pub const fn ports(&self) -> PortTable {
        match self {
            Self::Reference => PortTable {
                tcp: 9001,
                keeper: 9181,
                keeper_raft: 9234,
                interserver: 9009,
            },
            Self::Candidate => PortTable {
                tcp: 19001,
                keeper: 19181,
                keeper_raft: 19234,
                interserver: 19009,
            },
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reference => write!(f, "reference"),
            Self::Candidate => write!(f, "candidate"),
        }
    }
}

/// Ports one instance listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortTable {
    /// Native protocol port.
    pub tcp: u16,
    /// Embedded keeper (metadata store) client port.
    pub keeper: u16,
    /// Keeper raft port.
    pub keeper_raft: u16,
    /// Inter-server HTTP port.
    pub interserver: u16,
}

/// Immutable configuration of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerProfile {
    role: Role,
    ports: PortTable,
    root: PathBuf,
    top_level_domains: PathBuf,
    seed_db: PathBuf,
    seed_coordination: PathBuf,
}

impl ServerProfile {
    /// Builds the profile of `role` under `layout`.
    #[must_use]
    pub fn new(role: Role, layout: &Layout) -> Self {
        Self {
            role,
            ports: role.ports(),
            root: layout.instance_root(role),
            top_level_domains: layout.top_level_domains(),
            seed_db: layout.seed_db(),
            seed_coordination: layout.seed_coordination(),
        }
    }

    /// Instance role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Port assignment.
    #[must_use]
    pub fn ports(&self) -> PortTable {
        self.ports
    }

    /// Native protocol port.
    #[must_use]
    pub fn tcp_port(&self) -> u16 {
        self.ports.tcp
    }

    /// Instance root directory.
    #[must_use]
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    /// Server executable (symlink to the multi-call binary).
    #[must_use]
    pub fn binary(&self) -> PathBuf {
        self.root.join("clickhouse-server")
    }

    /// Client executable used for liveness and diagnostic queries.
    #[must_use]
    pub fn client_binary(&self) -> PathBuf {
        self.root.join("clickhouse-client")
    }

    /// Captured stdout/stderr of the server process.
    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.root.join("server.log")
    }

    fn config_arg(&self) -> String {
        format!("--config-file={}", self.root.join("config").join("config.xml").display())
    }

    /// Arguments for a start against the shared seed directory.
    #[must_use]
    pub fn preconfigured_args(&self) -> Vec<String> {
        vec![
            self.config_arg(),
            "--".to_string(),
            "--path".to_string(),
            self.seed_db.display().to_string(),
            "--user_files_path".to_string(),
            self.seed_db.join("user_files").display().to_string(),
            "--top_level_domains_path".to_string(),
            self.top_level_domains.display().to_string(),
            "--keeper_server.storage_path".to_string(),
            self.seed_coordination.display().to_string(),
            "--tcp_port".to_string(),
            self.ports.tcp.to_string(),
        ]
    }

    /// Arguments for a start with the instance's own directories and ports.
    #[must_use]
    pub fn isolated_args(&self) -> Vec<String> {
        let db = self.root.join("db");
        vec![
            self.config_arg(),
            "--".to_string(),
            "--path".to_string(),
            db.display().to_string(),
            "--user_files_path".to_string(),
            db.join("user_files").display().to_string(),
            "--top_level_domains_path".to_string(),
            self.top_level_domains.display().to_string(),
            "--tcp_port".to_string(),
            self.ports.tcp.to_string(),
            "--keeper_server.tcp_port".to_string(),
            self.ports.keeper.to_string(),
            "--keeper_server.raft_configuration.server.port".to_string(),
            self.ports.keeper_raft.to_string(),
            "--keeper_server.storage_path".to_string(),
            self.root.join("coordination").display().to_string(),
            "--zookeeper.node.port".to_string(),
            self.ports.keeper.to_string(),
            "--interserver_http_port".to_string(),
            self.ports.interserver.to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_tables_do_not_overlap() {
        let left = Role::Reference.ports();
        let right = Role::Candidate.ports();
        let all = [
            left.tcp,
            left.keeper,
            left.keeper_raft,
            left.interserver,
            right.tcp,
            right.keeper,
            right.keeper_raft,
            right.interserver,
        ];
        let unique: std::collections::HashSet<_> = all.iter().collect();
        assert_eq!(unique.len(), all.len());
    }

    #[test]
    fn test_profiles_differ_only_by_role_data() {
        let layout = Layout::new("/w");
        let left = ServerProfile::new(Role::Reference, &layout);
        let right = ServerProfile::new(Role::Candidate, &layout);

        assert_eq!(left.binary(), PathBuf::from("/w/perf_wd/left/clickhouse-server"));
        assert_eq!(right.log_file(), PathBuf::from("/w/perf_wd/right/server.log"));
        assert_eq!(left.tcp_port(), 9001);
        assert_eq!(right.tcp_port(), 19001);
    }

    #[test]
    fn test_isolated_args_use_own_directories() {
        let profile = ServerProfile::new(Role::Candidate, &Layout::new("/w"));
        let args = profile.isolated_args();

        assert_eq!(args[0], "--config-file=/w/perf_wd/right/config/config.xml");
        assert!(args.contains(&"/w/perf_wd/right/db".to_string()));
        assert!(args.contains(&"/w/perf_wd/right/coordination".to_string()));
        assert!(args.contains(&"19181".to_string()));
        assert!(!args.iter().any(|a| a.contains("db0")));
    }

    #[test]
    fn test_preconfigured_args_use_seed() {
        let profile = ServerProfile::new(Role::Reference, &Layout::new("/w"));
        let args = profile.preconfigured_args();

        assert!(args.contains(&"/w/db0".to_string()));
        assert!(args.contains(&"/w/coordination0".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("9001"));
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Reference.to_string(), "reference");
        assert_eq!(Role::Candidate.dir_name(), "right");
    }
}
