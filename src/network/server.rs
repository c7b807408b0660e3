use crate::config::Config;
use crate::core::{Authorizer, OwnerKeyAuthorizer, Transaction};
use crate::error::{BlockchainError, Result};
use crate::network::admission::ConnectionLimiter;
use crate::network::message::{Package, TxData, MAX_MESSAGE_LEN};
use crate::network::miner::Miner;
use crate::network::node::{Dispatch, Envelope, Node};
use log::{debug, error, info, warn};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Outbound delivery of one message.
pub trait Transport: Send + Sync {
    fn send(&self, envelope: &Envelope) -> Result<()>;
}

/// One TCP connection per message: connect, write, close.
pub struct TcpTransport {
    write_timeout: Duration,
}

impl TcpTransport {
    pub fn new(write_timeout: Duration) -> TcpTransport {
        TcpTransport { write_timeout }
    }

    fn resolve(addr: &str) -> Result<SocketAddr> {
        addr.to_socket_addrs()
            .map_err(|e| BlockchainError::PeerUnreachable(format!("{addr}: {e}")))?
            .next()
            .ok_or_else(|| BlockchainError::PeerUnreachable(format!("{addr}: no address")))
    }
}

impl Transport for TcpTransport {
    fn send(&self, envelope: &Envelope) -> Result<()> {
        let bytes = envelope.package.encode()?;
        let addr = Self::resolve(&envelope.to)?;
        debug!("Sending {} to {addr}", envelope.package.command());

        let unreachable = |e: std::io::Error| BlockchainError::PeerUnreachable(format!("{addr}: {e}"));
        let mut stream = TcpStream::connect_timeout(&addr, self.write_timeout).map_err(unreachable)?;
        stream
            .set_write_timeout(Some(self.write_timeout))
            .map_err(unreachable)?;
        stream.write_all(&bytes).map_err(unreachable)?;
        stream.flush().map_err(unreachable)?;
        let _ = stream.shutdown(Shutdown::Write);
        Ok(())
    }
}

/// Send every envelope, evicting peers that cannot be reached.
pub fn deliver(node: &Node, transport: &dyn Transport, envelopes: Vec<Envelope>) {
    for envelope in envelopes {
        match transport.send(&envelope) {
            Ok(()) => {}
            Err(BlockchainError::PeerUnreachable(reason)) => {
                warn!("Failed to reach {}: {reason}", envelope.to);
                node.evict_peer(&envelope.to);
            }
            Err(e) => error!("Failed to send {} to {}: {e}", envelope.package.command(), envelope.to),
        }
    }
}

pub struct Server {
    node: Arc<Node>,
    transport: Arc<TcpTransport>,
    limiter: ConnectionLimiter,
    bootnode: Option<String>,
    read_timeout: Duration,
}

impl Server {
    /// Run a node with the given configuration until a fatal error.
    pub fn start(config: Config) -> Result<()> {
        Server::new(config, Arc::new(OwnerKeyAuthorizer))?.run()
    }

    pub fn new(config: Config, authorizer: Arc<dyn Authorizer>) -> Result<Server> {
        let node = Node::open(&config, authorizer)?;
        Ok(Server {
            node: Arc::new(node),
            transport: Arc::new(TcpTransport::new(Duration::from_millis(
                config.write_timeout_ms,
            ))),
            limiter: ConnectionLimiter::new(config.max_connections),
            bootnode: config.bootnode.clone(),
            read_timeout: Duration::from_millis(config.read_timeout_ms),
        })
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn run(&self) -> Result<()> {
        let addr = self.node.addr().to_string();
        let listener = TcpListener::bind(&addr)?;
        listener.set_nonblocking(true)?;
        info!("Server listening on {addr}");

        let miner = if self.node.is_miner() {
            Some(Miner::spawn(
                Arc::clone(&self.node),
                Arc::clone(&self.transport) as Arc<dyn Transport>,
            ))
        } else {
            None
        };

        let startup = self.node.startup_messages(self.bootnode.as_deref())?;
        deliver(&self.node, self.transport.as_ref(), startup);

        let (fatal_tx, fatal_rx): (Sender<BlockchainError>, Receiver<BlockchainError>) =
            mpsc::channel();
        loop {
            if let Ok(e) = fatal_rx.try_recv() {
                error!("Stopping server: {e}");
                return Err(e);
            }

            let (stream, peer_addr) = match listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                    continue;
                }
                Err(e) => {
                    error!("Error accepting connection: {e}");
                    continue;
                }
            };

            let permit = match self.limiter.try_acquire() {
                Some(permit) => permit,
                None => {
                    warn!("Rejecting connection from {peer_addr}: connection limit reached");
                    continue;
                }
            };

            let node = Arc::clone(&self.node);
            let transport = Arc::clone(&self.transport);
            let miner = miner.as_ref().map(Miner::trigger);
            let fatal_tx = fatal_tx.clone();
            let read_timeout = self.read_timeout;
            thread::spawn(move || {
                let _permit = permit;
                match Self::handle_connection(&node, stream, read_timeout) {
                    Ok(dispatch) => {
                        deliver(&node, transport.as_ref(), dispatch.replies);
                        if dispatch.mine {
                            if let Some(trigger) = miner {
                                let _ = trigger.send(());
                            }
                        }
                    }
                    Err(e) if e.is_fatal() => {
                        let _ = fatal_tx.send(e);
                    }
                    Err(e) => warn!("Error handling connection from {peer_addr}: {e}"),
                }
            });
        }
    }

    fn handle_connection(
        node: &Node,
        mut stream: TcpStream,
        read_timeout: Duration,
    ) -> Result<Dispatch> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(read_timeout))?;

        let request = read_message(&mut stream, MAX_MESSAGE_LEN)?;
        let _ = stream.shutdown(Shutdown::Both);

        let package = Package::decode(&request)?;
        info!(
            "Received {} command from {}",
            package.command(),
            package.addr_from().unwrap_or("unknown peer")
        );
        node.handle(package)
    }
}

/// Read one message to EOF, refusing anything longer than `limit` bytes.
fn read_message<R: Read>(reader: R, limit: u64) -> Result<Vec<u8>> {
    let mut request = vec![];
    reader.take(limit + 1).read_to_end(&mut request)?;
    if request.len() as u64 > limit {
        return Err(BlockchainError::Protocol(format!(
            "Message exceeds {limit} bytes"
        )));
    }
    Ok(request)
}

/// Send a transaction to a node, as the CLI does for an unmined `send`.
pub fn send_tx(config: &Config, to: &str, tx: &Transaction) -> Result<()> {
    let package = Package::Tx(TxData {
        addr_from: config.get_node_addr(),
        transaction: tx.serialize()?,
    });
    TcpTransport::new(Duration::from_millis(config.write_timeout_ms))
        .send(&Envelope::new(to, package))
}
