//! Configuration types for the PairFS daemons
//!
//! Deserialized from TOML config files and merged with CLI arguments by
//! the binaries (CLI takes precedence).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration of a metadata daemon.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MetaConfig {
    #[serde(default)]
    pub node: NodeSettings,
    #[serde(default)]
    pub network: NetworkSettings,
    #[serde(default)]
    pub tuning: TuneSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Configuration of the management daemon.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MgmtdConfig {
    #[serde(default)]
    pub network: NetworkSettings,
    #[serde(default)]
    pub sweep: SweepSettings,
    #[serde(default)]
    pub persistence: PersistenceSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Node identity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Human-readable node ID; defaults to the hostname-style name set
    /// by the operator.
    #[serde(default = "default_node_name")]
    pub name: String,
    /// Numeric node ID; assigned by the management daemon when 0.
    #[serde(default)]
    pub num_id: u32,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            name: default_node_name(),
            num_id: 0,
        }
    }
}

/// Listen addresses and peer endpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkSettings {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_udp_listen")]
    pub udp_listen: String,
    /// TCP endpoint of the management daemon.
    #[serde(default = "default_mgmtd_endpoint")]
    pub mgmtd_endpoint: String,
    /// UDP endpoint of the management daemon (heartbeats).
    #[serde(default = "default_mgmtd_udp_endpoint")]
    pub mgmtd_udp_endpoint: String,
    /// Max pooled TCP connections per peer node.
    #[serde(default = "default_conn_pool_size")]
    pub conn_pool_size: usize,
    /// Pooled connections idle longer than this are reaped. Keep below
    /// half of the peer-side idle-disconnect timeout.
    #[serde(default = "default_conn_idle_secs")]
    pub conn_idle_secs: u64,
    /// Per-request timeout for peer communication.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            udp_listen: default_udp_listen(),
            mgmtd_endpoint: default_mgmtd_endpoint(),
            mgmtd_udp_endpoint: default_mgmtd_udp_endpoint(),
            conn_pool_size: default_conn_pool_size(),
            conn_idle_secs: default_conn_idle_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Mirroring and resync tunables.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TuneSettings {
    /// Forward primary-resolved timestamps to the secondary so both
    /// replicas store identical values.
    #[serde(default = "default_true")]
    pub mirror_timestamps: bool,
    /// Retries per resync candidate before it counts as a terminal error.
    #[serde(default = "default_resync_retries")]
    pub resync_retries: u32,
    /// Interval of the internode sync loop in seconds.
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    /// Heartbeat send interval in seconds.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

impl Default for TuneSettings {
    fn default() -> Self {
        Self {
            mirror_timestamps: true,
            resync_retries: default_resync_retries(),
            sync_interval_secs: default_sync_interval_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
        }
    }
}

/// Heartbeat-absence sweep intervals of the management daemon.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SweepSettings {
    /// Seconds without a heartbeat before a node's targets become
    /// probably-offline.
    #[serde(default = "default_probably_offline_secs")]
    pub probably_offline_secs: u64,
    /// Seconds without a heartbeat before a node's targets become
    /// offline.
    #[serde(default = "default_offline_secs")]
    pub offline_secs: u64,
    /// Sweep interval in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            probably_offline_secs: default_probably_offline_secs(),
            offline_secs: default_offline_secs(),
            interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// State-file persistence of the management daemon.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceSettings {
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            flush_interval_secs: default_flush_interval_secs(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_node_name() -> String {
    "pairfs-node".to_string()
}

fn default_listen() -> String {
    "0.0.0.0:8005".to_string()
}

fn default_udp_listen() -> String {
    "0.0.0.0:8006".to_string()
}

fn default_mgmtd_endpoint() -> String {
    "127.0.0.1:8008".to_string()
}

fn default_mgmtd_udp_endpoint() -> String {
    "127.0.0.1:8009".to_string()
}

fn default_conn_pool_size() -> usize {
    8
}

fn default_conn_idle_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_resync_retries() -> u32 {
    3
}

fn default_sync_interval_secs() -> u64 {
    30
}

fn default_heartbeat_interval_secs() -> u64 {
    10
}

fn default_probably_offline_secs() -> u64 {
    30
}

fn default_offline_secs() -> u64 {
    90
}

fn default_sweep_interval_secs() -> u64 {
    5
}

fn default_state_file() -> PathBuf {
    PathBuf::from("/var/lib/pairfs/mgmtd.state")
}

fn default_flush_interval_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_config_defaults_from_empty_toml() {
        let cfg: MetaConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.network.listen, "0.0.0.0:8005");
        assert!(cfg.tuning.mirror_timestamps);
        assert_eq!(cfg.tuning.resync_retries, 3);
    }

    #[test]
    fn test_partial_override() {
        let cfg: MetaConfig = toml::from_str(
            r#"
            [network]
            listen = "127.0.0.1:9999"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.network.listen, "127.0.0.1:9999");
        assert_eq!(cfg.network.mgmtd_endpoint, "127.0.0.1:8008");
    }
}
