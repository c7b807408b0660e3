//! Peer-to-peer protocol
//!
//! Message framing, the protocol engine that applies messages to node
//! state, the TCP server around it and the mining thread.

pub mod admission;
pub mod message;
pub mod miner;
pub mod node;
pub mod server;

pub use admission::{ConnectionLimiter, ConnectionPermit};
pub use message::{OpType, Package, CMD_LEN, MAX_MESSAGE_LEN, NODE_VERSION};
pub use miner::Miner;
pub use node::{Dispatch, Envelope, Node, Nodes, SyncState};
pub use server::{deliver, send_tx, Server, TcpTransport, Transport};
