// Node: owns the shared peer table and held store, and the outbound
// send/broadcast helpers used by both the protocol handler and the
// maintenance loop. One `Arc<Node>` is cloned into every spawned task: the
// acceptor, each per-connection reader, and the maintenance loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio_util::codec::{Framed, LinesCodec};

use futures::SinkExt;
use tokio::net::TcpStream;

use crate::address::{Capabilities, LogicalAddress, Transport};
use crate::config::Config;
use crate::error::{OthernetError, OthernetResult};
use crate::held::HeldStore;
use crate::peers::PeerTable;
use crate::protocol::{MessageType, ProtocolMessage, Scope};

pub struct Node {
    pub address: LogicalAddress,
    pub ip: String,
    pub port: u16,
    pub capabilities: Capabilities,
    pub peers: PeerTable,
    pub held: HeldStore,
    pub running: AtomicBool,
    pub shutdown: tokio::sync::Notify,
}

pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

impl Node {
    pub fn new(config: &Config) -> Self {
        Self {
            address: LogicalAddress::new(config.realm, config.cluster, config.node_id),
            ip: config.node_ip.clone(),
            port: config.bind_port,
            capabilities: config.capabilities,
            peers: PeerTable::new(config.max_peers),
            held: HeldStore::new(),
            running: AtomicBool::new(true),
            shutdown: tokio::sync::Notify::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Set `running := false` and wake any task waiting on `shutdown`, so
    /// loops observe termination at their next yield point (accept,
    /// maintenance sleep) without polling.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    /// Build a message stamped with this node's identity, carrying `data`.
    pub fn own_message(&self, msg_type: MessageType, data: String) -> ProtocolMessage {
        ProtocolMessage {
            msg_type,
            sender: self.address,
            sender_ip: self.ip.clone(),
            sender_port: self.port,
            scope: Scope::default(),
            ttl: Scope::default().max_hops,
            timestamp: now(),
            data,
        }
    }

    /// Open a fresh connection to `(ip, port)`, write the encoded line, and
    /// close. Connection errors are non-fatal to the caller.
    pub async fn send(&self, ip: &str, port: u16, msg: &ProtocolMessage) -> OthernetResult<()> {
        let stream = TcpStream::connect((ip, port))
            .await
            .map_err(|e| OthernetError::ConnectFailed(ip.to_string(), port, e))?;

        let mut framed = Framed::new(stream, LinesCodec::new());

        let mut line = msg.encode();
        if line.ends_with('\n') {
            line.pop();
        }

        framed.send(line).await.map_err(|e| {
            OthernetError::SendFailed(ip.to_string(), port, std::io::Error::other(e))
        })?;

        Ok(())
    }

    /// Send `msg` to every active peer in the registry at the moment the
    /// broadcast began. Failures mark the peer inactive but do not abort
    /// the broadcast.
    pub async fn broadcast(&self, msg: &ProtocolMessage) {
        let targets = self.peers.list_active().await;

        for peer in targets {
            if let Err(e) = self
                .send(&peer.transport.ip, peer.transport.port, msg)
                .await
            {
                log::warn!("broadcast send failed: {}", e);
                self.peers.mark_inactive(&peer.transport).await;
            }
        }
    }

    /// Send a `HELLO` advertising our capabilities to `(ip, port)`.
    pub async fn connect(&self, ip: &str, port: u16) -> OthernetResult<()> {
        let hello = self.own_message(
            MessageType::Hello,
            format!("capabilities:{}", self.capabilities.bits()),
        );

        self.send(ip, port, &hello).await
    }

    pub fn transport(&self) -> Transport {
        Transport::new(self.ip.clone(), self.port)
    }
}
