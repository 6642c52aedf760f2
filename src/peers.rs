// Peer registry: insertion-ordered, bounded, keyed by transport tuple. All
// mutation happens under one lock; callers release it before performing any
// I/O (see `Node::broadcast`/`Node::send`).

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;

use crate::address::{Capabilities, LogicalAddress, Transport};
use crate::error::{OthernetError, OthernetResult};

#[derive(Debug, Clone)]
pub struct Peer {
    pub transport: Transport,
    pub address: LogicalAddress,
    pub capabilities: Capabilities,
    pub load_factor: f32,
    pub last_seen: i64,
    pub active: bool,
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

pub struct PeerTable {
    inner: RwLock<Inner>,
    max_peers: usize,
}

struct Inner {
    peers: Vec<Peer>,
    index: HashMap<Transport, usize>,
}

impl PeerTable {
    pub fn new(max_peers: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                peers: Vec::new(),
                index: HashMap::new(),
            }),
            max_peers,
        }
    }

    /// Insert or update the peer at `transport`. Updates `address`,
    /// `capabilities`, `last_seen`, and marks the peer active; appends a new
    /// entry when `transport` is not yet known. Fails with `RegistryFull`
    /// only when at capacity and the transport is genuinely new.
    pub async fn upsert_peer(
        &self,
        transport: Transport,
        address: LogicalAddress,
        capabilities: Capabilities,
    ) -> OthernetResult<Peer> {
        let mut inner = self.inner.write().await;

        if let Some(&idx) = inner.index.get(&transport) {
            let peer = &mut inner.peers[idx];
            peer.address = address;
            peer.capabilities = capabilities;
            peer.last_seen = now();
            peer.active = true;
            return Ok(peer.clone());
        }

        if inner.peers.len() >= self.max_peers {
            return Err(OthernetError::RegistryFull(self.max_peers));
        }

        let peer = Peer {
            transport: transport.clone(),
            address,
            capabilities,
            load_factor: 0.0,
            last_seen: now(),
            active: true,
        };

        let idx = inner.peers.len();
        inner.index.insert(transport, idx);
        inner.peers.push(peer.clone());

        Ok(peer)
    }

    /// Mark the peer at `transport` inactive. No-op if absent.
    pub async fn mark_inactive(&self, transport: &Transport) {
        let mut inner = self.inner.write().await;

        if let Some(&idx) = inner.index.get(transport) {
            inner.peers[idx].active = false;
        }
    }

    /// Update the load factor reported by a peer, if known.
    pub async fn set_load_factor(&self, transport: &Transport, load_factor: f32) {
        let mut inner = self.inner.write().await;

        if let Some(&idx) = inner.index.get(transport) {
            inner.peers[idx].load_factor = load_factor;
        }
    }

    /// First active peer whose logical address matches, in insertion order.
    pub async fn find_by_address(&self, address: LogicalAddress) -> Option<Peer> {
        let inner = self.inner.read().await;

        inner
            .peers
            .iter()
            .find(|p| p.active && p.address == address)
            .cloned()
    }

    /// Among active peers advertising `HOLDING`, the one minimizing
    /// `load_factor + 0.5*realm_mismatch + 0.2*cluster_mismatch`, ties
    /// broken by insertion order.
    pub async fn find_best_holding(&self, target: LogicalAddress) -> Option<Peer> {
        let inner = self.inner.read().await;

        let mut best: Option<(&Peer, f32)> = None;

        for peer in inner.peers.iter() {
            if !peer.active || !peer.capabilities.contains(Capabilities::HOLDING) {
                continue;
            }

            let mut score = peer.load_factor;
            if peer.address.realm != target.realm {
                score += 0.5;
            }
            if peer.address.cluster != target.cluster {
                score += 0.2;
            }

            match best {
                Some((_, best_score)) if score >= best_score => {}
                _ => best = Some((peer, score)),
            }
        }

        best.map(|(peer, _)| peer.clone())
    }

    /// All active peers, insertion order.
    pub async fn list_active(&self) -> Vec<Peer> {
        let inner = self.inner.read().await;

        inner.peers.iter().filter(|p| p.active).cloned().collect()
    }

    /// All peers regardless of active flag (used for `peers`-style rendering
    /// history and for redistribute-on-goodbye lookups).
    pub async fn list_all(&self) -> Vec<Peer> {
        let inner = self.inner.read().await;

        inner.peers.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.peers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(bits: u32) -> Capabilities {
        Capabilities::from_bits_truncate(bits)
    }

    #[tokio::test]
    async fn upsert_then_reupsert_updates_in_place() {
        let table = PeerTable::new(50);
        let t = Transport::new("10.0.0.1", 8080);
        let addr = LogicalAddress::new(1, 1, 7);

        table
            .upsert_peer(t.clone(), addr, caps(0x01))
            .await
            .unwrap();
        table.mark_inactive(&t).await;
        table
            .upsert_peer(t.clone(), addr, caps(0x03))
            .await
            .unwrap();

        assert_eq!(table.len().await, 1);

        let peer = table.find_by_address(addr).await.unwrap();
        assert!(peer.active);
        assert_eq!(peer.capabilities, caps(0x03));
    }

    #[tokio::test]
    async fn registry_full_rejects_new_transport() {
        let table = PeerTable::new(1);

        table
            .upsert_peer(
                Transport::new("10.0.0.1", 1),
                LogicalAddress::new(1, 1, 1),
                caps(0),
            )
            .await
            .unwrap();

        let err = table
            .upsert_peer(
                Transport::new("10.0.0.2", 2),
                LogicalAddress::new(1, 1, 2),
                caps(0),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, OthernetError::RegistryFull(1)));
    }

    #[tokio::test]
    async fn find_best_holding_prefers_lower_score() {
        let table = PeerTable::new(50);

        table
            .upsert_peer(
                Transport::new("10.0.0.1", 1),
                LogicalAddress::new(2, 2, 1),
                caps(0x01),
            )
            .await
            .unwrap();
        table
            .upsert_peer(
                Transport::new("10.0.0.2", 2),
                LogicalAddress::new(1, 1, 2),
                caps(0x01),
            )
            .await
            .unwrap();

        let target = LogicalAddress::new(1, 1, 99);
        let best = table.find_best_holding(target).await.unwrap();

        assert_eq!(best.transport, Transport::new("10.0.0.2", 2));
    }
}
