//! Storage Node Configuration
//!
//! All knobs come from environment variables, read once at startup:
//!
//! - `PORT`: listen port (default: 8081)
//! - `NODE_ID`: stable node identifier (default: `node-<port>`)
//! - `NODE_URL`: canonical URL other components reach this node at
//! - `DATA_DIR`: data directory root (default: ./data)
//! - `COORDINATOR_URL`: coordinator base URL; registration and heartbeats
//!   are skipped when unset
//! - `MAX_SUPERBLOCK_SIZE`: superblock cap in bytes (default: 1 GiB)
//! - `DATA_CAPACITY_BYTES`: capacity used for disk-usage accounting
//!   (default: 10 GiB)
//! - `HEARTBEAT_INTERVAL`: seconds between heartbeats (default: 10)

use std::path::PathBuf;
use std::time::Duration;

use crate::superblock::DEFAULT_MAX_SUPERBLOCK_SIZE;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub port: u16,
    pub node_id: String,
    pub node_url: String,
    pub data_dir: PathBuf,
    pub coordinator_url: Option<String>,
    pub max_superblock_size: u64,
    pub capacity_bytes: u64,
    pub heartbeat_interval: Duration,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl NodeConfig {
    pub fn from_env() -> Self {
        let port: u16 = env_parse("PORT", 8081);
        let node_id = env_or("NODE_ID", &format!("node-{port}"));
        let node_url = env_or("NODE_URL", &format!("http://localhost:{port}"));
        Self {
            port,
            node_id,
            node_url,
            data_dir: PathBuf::from(env_or("DATA_DIR", "./data")),
            coordinator_url: std::env::var("COORDINATOR_URL").ok().filter(|s| !s.is_empty()),
            max_superblock_size: env_parse("MAX_SUPERBLOCK_SIZE", DEFAULT_MAX_SUPERBLOCK_SIZE),
            capacity_bytes: env_parse("DATA_CAPACITY_BYTES", 10 * 1024 * 1024 * 1024),
            heartbeat_interval: Duration::from_secs(env_parse("HEARTBEAT_INTERVAL", 10)),
        }
    }
}
