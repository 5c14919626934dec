//! Command-line options

use clap::Parser;

/// DriftDB node server
#[derive(Parser, Debug, Clone)]
#[command(name = "driftdb-server", version)]
pub struct Opts {
    /// Unique ID of this node within the cluster
    #[arg(long, env = "DRIFTDB_NODE_ID")]
    pub node_id: u32,

    /// Human-readable name of this node
    #[arg(long, env = "DRIFTDB_NODE_NAME")]
    pub node_name: String,

    /// Address to bind the node RPC server
    #[arg(long, env = "DRIFTDB_RPC_BIND_ADDR", default_value = "0.0.0.0:3000")]
    pub rpc_bind_addr: String,

    /// Address to connect to the local RPC server
    #[arg(long, env = "DRIFTDB_RPC_LOCAL_ADDR", default_value = "127.0.0.1:3000")]
    pub rpc_local_addr: String,

    /// Address advertised to other nodes
    #[arg(long, env = "DRIFTDB_RPC_PUBLIC_ADDR")]
    pub rpc_public_addr: String,

    /// Enable the REST API server
    #[arg(long, env = "DRIFTDB_RESTAPI_ENABLED")]
    pub restapi_enabled: bool,

    /// Address to bind the REST API server
    #[arg(long, env = "DRIFTDB_RESTAPI_BIND_ADDR", default_value = "0.0.0.0:8000")]
    pub restapi_bind_addr: String,

    /// Comma-separated seed addresses to join on startup
    #[arg(long, env = "DRIFTDB_JOIN_ADDRS", value_delimiter = ',')]
    pub join_addrs: Vec<String>,

    /// Deadline for a single probe, in milliseconds
    #[arg(long, env = "DRIFTDB_PROBE_TIMEOUT", default_value_t = 5000)]
    pub probe_timeout_ms: u64,

    /// Period of the failure-detector tick, in milliseconds
    #[arg(long, env = "DRIFTDB_PROBE_INTERVAL", default_value_t = 1000)]
    pub probe_interval_ms: u64,

    /// Intermediary nodes asked to confirm a status change
    #[arg(long, env = "DRIFTDB_PROBE_INDIRECT_NODES", default_value_t = 1)]
    pub probe_indirect_nodes: usize,

    /// Number of replicas each key is written to
    #[arg(long, env = "DRIFTDB_REPLICATION_FACTOR", default_value_t = 3)]
    pub replication_factor: usize,

    /// Successful reads required to serve a get
    #[arg(long, env = "DRIFTDB_READ_QUORUM", default_value_t = 2)]
    pub read_quorum: usize,

    /// Acknowledgments required for a successful put
    #[arg(long, env = "DRIFTDB_WRITE_QUORUM", default_value_t = 2)]
    pub write_quorum: usize,

    /// Verbose mode
    #[arg(long, env = "DRIFTDB_VERBOSE")]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_invocation() {
        let opts = Opts::try_parse_from([
            "driftdb-server",
            "--node-id",
            "1",
            "--node-name",
            "alpha",
            "--rpc-public-addr",
            "10.0.0.1:3000",
        ])
        .unwrap();

        assert_eq!(opts.node_id, 1);
        assert_eq!(opts.node_name, "alpha");
        assert_eq!(opts.probe_timeout_ms, 5000);
        assert_eq!(opts.probe_interval_ms, 1000);
        assert_eq!(opts.replication_factor, 3);
        assert!(opts.join_addrs.is_empty());
        assert!(!opts.restapi_enabled);
    }

    #[test]
    fn test_join_addrs_are_comma_separated() {
        let opts = Opts::try_parse_from([
            "driftdb-server",
            "--node-id",
            "2",
            "--node-name",
            "beta",
            "--rpc-public-addr",
            "10.0.0.2:3000",
            "--join-addrs",
            "10.0.0.1:3000,10.0.0.3:3000",
        ])
        .unwrap();

        assert_eq!(
            opts.join_addrs,
            vec!["10.0.0.1:3000".to_string(), "10.0.0.3:3000".to_string()]
        );
    }

    #[test]
    fn test_missing_required_options_fail() {
        assert!(Opts::try_parse_from(["driftdb-server"]).is_err());
        assert!(Opts::try_parse_from(["driftdb-server", "--node-id", "1"]).is_err());
    }
}
