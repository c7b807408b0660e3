use crate::error::{BlockchainError, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_NODE_ID: &str = "3000";
pub const DEFAULT_SEED_NODE: &str = "127.0.0.1:3000";
pub const DEFAULT_MEMPOOL_THRESHOLD: usize = 2;
pub const DEFAULT_MAX_CONNECTIONS: usize = 16;
const DEFAULT_READ_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_WRITE_TIMEOUT_MS: u64 = 5_000;

const NODE_ID_KEY: &str = "NODE_ID";
const NODE_ADDRESS_KEY: &str = "NODE_ADDRESS";
const MINING_ADDRESS_KEY: &str = "MINING_ADDRESS";
const BOOTNODE_KEY: &str = "BOOTNODE";
const DATA_DIR_KEY: &str = "DATA_DIR";

/// Node configuration.
///
/// Built from defaults, then an optional TOML file, then environment
/// variables, in that order of precedence (last wins).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node_id: String,
    /// Address this node listens on and advertises; `127.0.0.1:<node_id>` if unset.
    pub node_address: Option<String>,
    pub data_dir: PathBuf,
    pub miner_address: Option<String>,
    pub bootnode: Option<String>,
    /// Static seed list the peer registry starts from.
    pub known_nodes: Vec<String>,
    pub mempool_threshold: usize,
    pub max_connections: usize,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            node_id: String::from(DEFAULT_NODE_ID),
            node_address: None,
            data_dir: PathBuf::from("data"),
            miner_address: None,
            bootnode: None,
            known_nodes: vec![String::from(DEFAULT_SEED_NODE)],
            mempool_threshold: DEFAULT_MEMPOOL_THRESHOLD,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
        }
    }
}

impl Config {
    /// Load configuration from `path` (if given) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Config> {
        let contents = fs::read_to_string(path).map_err(|e| {
            BlockchainError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Config> {
        Ok(toml::from_str(contents)?)
    }

    fn apply_env(&mut self) {
        if let Ok(node_id) = env::var(NODE_ID_KEY) {
            self.node_id = node_id;
        }
        if let Ok(addr) = env::var(NODE_ADDRESS_KEY) {
            self.node_address = Some(addr);
        }
        if let Ok(addr) = env::var(MINING_ADDRESS_KEY) {
            self.miner_address = Some(addr);
        }
        if let Ok(addr) = env::var(BOOTNODE_KEY) {
            self.bootnode = Some(addr);
        }
        if let Ok(dir) = env::var(DATA_DIR_KEY) {
            self.data_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_id.trim().is_empty() {
            return Err(BlockchainError::Config("node_id must not be empty".to_string()));
        }
        if self.mempool_threshold == 0 {
            return Err(BlockchainError::Config(
                "mempool_threshold must be at least 1".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(BlockchainError::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn get_node_addr(&self) -> String {
        match &self.node_address {
            Some(addr) => addr.clone(),
            None => format!("127.0.0.1:{}", self.node_id),
        }
    }

    /// Per-node database path, e.g. `data/node_3000`.
    /// Keeps several nodes on one machine from sharing a store.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(format!("node_{}", self.node_id))
    }

    pub fn with_node_id(mut self, node_id: &str) -> Config {
        self.node_id = node_id.to_string();
        self
    }

    pub fn with_miner(mut self, miner_address: Option<String>) -> Config {
        if miner_address.is_some() {
            self.miner_address = miner_address;
        }
        self
    }

    pub fn with_bootnode(mut self, bootnode: Option<String>) -> Config {
        if bootnode.is_some() {
            self.bootnode = bootnode;
        }
        self
    }
}
