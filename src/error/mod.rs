//! Error handling for the ledger node
//!
//! Every fallible operation in the crate returns [`Result`]. Only
//! [`BlockchainError::Corruption`] is treated as fatal by the server loop;
//! everything else is logged and the node keeps running.

use std::fmt;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, BlockchainError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockchainError {
    /// Underlying store unavailable or a store operation failed
    Database(String),
    /// A block referenced by a valid hash is missing from the store
    Corruption(String),
    /// Requested block or transaction does not exist
    NotFound(String),
    /// Proof-of-work or transaction ID check failed
    Consensus(String),
    /// Malformed transaction or rejected transaction batch
    Transaction(String),
    /// Spend request exceeds the indexed unspent total
    InsufficientFunds { required: u64, available: u64 },
    /// Nonce space exhausted without meeting the target
    ProofExhausted,
    /// Mining aborted because the tip moved underneath it
    MiningCancelled,
    /// Unknown command tag or undecodable payload
    Protocol(String),
    /// Dial or send to a peer failed
    PeerUnreachable(String),
    /// A chain already exists at the configured path
    ChainExists(String),
    /// No chain exists at the configured path
    NoChain(String),
    /// Configuration errors
    Config(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// File I/O errors
    Io(String),
}

impl BlockchainError {
    /// Whether the node must stop rather than log and carry on.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BlockchainError::Corruption(_))
    }
}

impl fmt::Display for BlockchainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockchainError::Database(msg) => write!(f, "Database error: {msg}"),
            BlockchainError::Corruption(msg) => write!(f, "Store corruption: {msg}"),
            BlockchainError::NotFound(msg) => write!(f, "Not found: {msg}"),
            BlockchainError::Consensus(msg) => write!(f, "Consensus error: {msg}"),
            BlockchainError::Transaction(msg) => write!(f, "Transaction error: {msg}"),
            BlockchainError::InsufficientFunds {
                required,
                available,
            } => {
                write!(
                    f,
                    "Insufficient funds: required {required}, available {available}"
                )
            }
            BlockchainError::ProofExhausted => {
                write!(f, "Proof of work exhausted the nonce space")
            }
            BlockchainError::MiningCancelled => write!(f, "Mining cancelled"),
            BlockchainError::Protocol(msg) => write!(f, "Protocol error: {msg}"),
            BlockchainError::PeerUnreachable(addr) => write!(f, "Peer unreachable: {addr}"),
            BlockchainError::ChainExists(path) => {
                write!(f, "Blockchain already exists at {path}")
            }
            BlockchainError::NoChain(path) => write!(f, "No existing blockchain found at {path}"),
            BlockchainError::Config(msg) => write!(f, "Configuration error: {msg}"),
            BlockchainError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            BlockchainError::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

impl std::error::Error for BlockchainError {}

impl From<std::io::Error> for BlockchainError {
    fn from(err: std::io::Error) -> Self {
        BlockchainError::Io(err.to_string())
    }
}

impl From<sled::Error> for BlockchainError {
    fn from(err: sled::Error) -> Self {
        BlockchainError::Database(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for BlockchainError {
    fn from(err: bincode::error::EncodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for BlockchainError {
    fn from(err: bincode::error::DecodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for BlockchainError {
    fn from(err: serde_json::Error) -> Self {
        BlockchainError::Protocol(err.to_string())
    }
}

impl From<toml::de::Error> for BlockchainError {
    fn from(err: toml::de::Error) -> Self {
        BlockchainError::Config(err.to_string())
    }
}
