// Wire format: a 12-byte command tag, zero padded, followed by the JSON
// payload for that command. Blocks and transactions travel inside the JSON
// as their canonical bincode bytes. One message per connection.

use crate::error::{BlockchainError, Result};
use serde::{Deserialize, Serialize};

pub const CMD_LEN: usize = 12;
pub const NODE_VERSION: usize = 1;
/// Largest message a node will read from one connection.
pub const MAX_MESSAGE_LEN: u64 = 32 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpType {
    Tx,
    Block,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Addr {
    pub addr_list: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockData {
    pub addr_from: String,
    pub block: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBlocks {
    pub addr_from: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetData {
    pub addr_from: String,
    pub op_type: OpType,
    pub id: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inv {
    pub addr_from: String,
    pub op_type: OpType,
    pub items: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxData {
    pub addr_from: String,
    pub transaction: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub version: usize,
    pub best_height: usize,
    pub addr_from: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bootnode {
    pub addr_from: String,
}

/// A decoded peer message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Package {
    Addr(Addr),
    Block(BlockData),
    Bootnode(Bootnode),
    Genesis(BlockData),
    GetBlocks(GetBlocks),
    GetData(GetData),
    Inv(Inv),
    Tx(TxData),
    Version(Version),
}

impl Package {
    pub fn command(&self) -> &'static str {
        match self {
            Package::Addr(_) => "addr",
            Package::Block(_) => "block",
            Package::Bootnode(_) => "bootnode",
            Package::Genesis(_) => "genesis",
            Package::GetBlocks(_) => "getblocks",
            Package::GetData(_) => "getdata",
            Package::Inv(_) => "inv",
            Package::Tx(_) => "tx",
            Package::Version(_) => "version",
        }
    }

    /// Address the sender listens on, if the message carries one.
    pub fn addr_from(&self) -> Option<&str> {
        match self {
            Package::Addr(_) => None,
            Package::Block(p) | Package::Genesis(p) => Some(&p.addr_from),
            Package::Bootnode(p) => Some(&p.addr_from),
            Package::GetBlocks(p) => Some(&p.addr_from),
            Package::GetData(p) => Some(&p.addr_from),
            Package::Inv(p) => Some(&p.addr_from),
            Package::Tx(p) => Some(&p.addr_from),
            Package::Version(p) => Some(&p.addr_from),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = match self {
            Package::Addr(p) => serde_json::to_vec(p)?,
            Package::Block(p) | Package::Genesis(p) => serde_json::to_vec(p)?,
            Package::Bootnode(p) => serde_json::to_vec(p)?,
            Package::GetBlocks(p) => serde_json::to_vec(p)?,
            Package::GetData(p) => serde_json::to_vec(p)?,
            Package::Inv(p) => serde_json::to_vec(p)?,
            Package::Tx(p) => serde_json::to_vec(p)?,
            Package::Version(p) => serde_json::to_vec(p)?,
        };
        let mut bytes = cmd_to_bytes(self.command());
        bytes.extend(payload);
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Package> {
        if bytes.len() < CMD_LEN {
            return Err(BlockchainError::Protocol(format!(
                "Message of {} bytes is shorter than the command tag",
                bytes.len()
            )));
        }
        let (tag, payload) = bytes.split_at(CMD_LEN);
        let command = bytes_to_cmd(tag)?;
        let package = match command.as_str() {
            "addr" => Package::Addr(serde_json::from_slice(payload)?),
            "block" => Package::Block(serde_json::from_slice(payload)?),
            "bootnode" => Package::Bootnode(serde_json::from_slice(payload)?),
            "genesis" => Package::Genesis(serde_json::from_slice(payload)?),
            "getblocks" => Package::GetBlocks(serde_json::from_slice(payload)?),
            "getdata" => Package::GetData(serde_json::from_slice(payload)?),
            "inv" => Package::Inv(serde_json::from_slice(payload)?),
            "tx" => Package::Tx(serde_json::from_slice(payload)?),
            "version" => Package::Version(serde_json::from_slice(payload)?),
            other => {
                return Err(BlockchainError::Protocol(format!(
                    "Unknown command: {other}"
                )))
            }
        };
        Ok(package)
    }
}

fn cmd_to_bytes(command: &str) -> Vec<u8> {
    let mut bytes = vec![0u8; CMD_LEN];
    for (slot, b) in bytes.iter_mut().zip(command.bytes()) {
        *slot = b;
    }
    bytes
}

fn bytes_to_cmd(bytes: &[u8]) -> Result<String> {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    let command = std::str::from_utf8(&bytes[..end])
        .map_err(|e| BlockchainError::Protocol(format!("Command tag is not ASCII: {e}")))?;
    Ok(command.to_string())
}
