//! Coordinator Configuration
//!
//! Environment variables, read once at startup:
//!
//! - `PORT`: listen port (default: 8080)
//! - `DATABASE_PATH`: catalog SQLite file (default: ./data/catalog.db)
//! - `NODE_TIMEOUT`: heartbeat timeout in seconds (default: 30)
//! - `PROBE_TIMEOUT`: presence-probe deadline in seconds (default: 3)
//! - `POPULARITY_THRESHOLD`: hot/cold boundary for redundancy selection
//!   (default: 1000)

use std::path::PathBuf;
use std::time::Duration;

use crate::redundancy::DEFAULT_POPULARITY_THRESHOLD;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub port: u16,
    pub database_path: PathBuf,
    pub node_timeout: Duration,
    pub probe_timeout: Duration,
    pub popularity_threshold: u64,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl CoordinatorConfig {
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT", 8080),
            database_path: PathBuf::from(
                std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/catalog.db".to_string()),
            ),
            node_timeout: Duration::from_secs(env_parse("NODE_TIMEOUT", 30)),
            probe_timeout: Duration::from_secs(env_parse("PROBE_TIMEOUT", 3)),
            popularity_threshold: env_parse("POPULARITY_THRESHOLD", DEFAULT_POPULARITY_THRESHOLD),
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            database_path: PathBuf::from("./data/catalog.db"),
            node_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(3),
            popularity_threshold: DEFAULT_POPULARITY_THRESHOLD,
        }
    }
}
