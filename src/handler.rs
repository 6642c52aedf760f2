// Protocol handler: dispatch table from message type to action.

use std::sync::Arc;

use crate::address::{Capabilities, LogicalAddress, Transport};
use crate::held::{AttemptOutcome, Priority};
use crate::node::Node;
use crate::protocol::{MessageType, ProtocolMessage};

/// A rendered inbound `OTHERNET_MESSAGE`, handed back to the external
/// surface (REPL/stdout) for display. The handler itself performs no I/O
/// beyond the registry/store and outbound protocol sends.
pub struct Delivered {
    pub from: LogicalAddress,
    pub data: String,
}

/// Dispatch one decoded inbound message. `from_ip` is the peer's observed
/// transport IP (the TCP connection's peer address, not the message's
/// self-reported `sender_ip`, since the latter cannot be trusted for
/// registry keys).
pub async fn dispatch(node: &Arc<Node>, from_ip: &str, msg: ProtocolMessage) -> Option<Delivered> {
    match msg.msg_type {
        MessageType::Hello => {
            handle_hello(node, from_ip, &msg).await;
            None
        }
        MessageType::OthernetMessage => Some(Delivered {
            from: msg.sender,
            data: msg.data,
        }),
        MessageType::Goodbye => {
            handle_goodbye(node, from_ip, msg.sender_port).await;
            None
        }
        MessageType::CapabilityUpdate => {
            handle_capability_update(node, from_ip, &msg).await;
            None
        }
        // Reserved message types: parsed without error, intentionally
        // unhandled per the dispatch table's "MAY ignore" clause.
        MessageType::PeerList
        | MessageType::HoldRequest
        | MessageType::HoldResponse
        | MessageType::DeliveryAttempt
        | MessageType::DeliveryConfirm => None,
    }
}

async fn handle_hello(node: &Arc<Node>, from_ip: &str, msg: &ProtocolMessage) {
    let capabilities = parse_capabilities(&msg.data);

    let transport = Transport::new(from_ip.to_string(), msg.sender_port);

    match node
        .peers
        .upsert_peer(transport.clone(), msg.sender, capabilities)
        .await
    {
        Ok(_) => log::info!("peer registered: {} at {}", msg.sender, transport),
        Err(e) => {
            log::warn!("upsert_peer failed: {}", e);
            return;
        }
    }

    let reply = node.own_message(
        MessageType::Hello,
        format!("capabilities:{}", node.capabilities.bits()),
    );

    if let Err(e) = node.send(from_ip, msg.sender_port, &reply).await {
        log::warn!("HELLO reply send failed: {}", e);
    }
}

async fn handle_goodbye(node: &Arc<Node>, from_ip: &str, from_port: u16) {
    let transport = Transport::new(from_ip.to_string(), from_port);

    node.peers.mark_inactive(&transport).await;
    node.held.redistribute(from_ip, crate::node::now()).await;
}

/// Updates the reporting peer's `load_factor`, the only field `find_best_holding`
/// scores on besides realm/cluster match. No-op if the peer isn't registered.
async fn handle_capability_update(node: &Arc<Node>, from_ip: &str, msg: &ProtocolMessage) {
    let transport = Transport::new(from_ip.to_string(), msg.sender_port);

    if let Some(load_factor) = parse_load_factor(&msg.data) {
        node.peers.set_load_factor(&transport, load_factor).await;
    }
}

fn parse_capabilities(data: &str) -> Capabilities {
    for token in data.split_whitespace() {
        if let Some(value) = token.strip_prefix("capabilities:") {
            if let Ok(bits) = value.parse::<u32>() {
                return Capabilities::from_bits_truncate(bits);
            }
        }
    }

    Capabilities::empty()
}

fn parse_load_factor(data: &str) -> Option<f32> {
    data.split_whitespace()
        .find_map(|token| token.strip_prefix("load:"))
        .and_then(|value| value.parse().ok())
}

/// `send <R.C.N> <message>` command intent: enqueue for holding, attempting
/// immediate delivery if the target is already a known live peer.
pub async fn enqueue_for_holding(
    node: &Arc<Node>,
    target: LogicalAddress,
    payload: String,
    priority: Priority,
) -> Option<u64> {
    let id = match node
        .held
        .enqueue(node.address, target, payload.clone(), priority)
        .await
    {
        Ok(id) => id,
        Err(e) => {
            log::warn!("enqueue failed: {}", e);
            return None;
        }
    };

    attempt_delivery(node, id, target, &payload).await;

    Some(id)
}

/// One delivery attempt for held message `id`, addressed to `target`.
/// Looks up a live peer outside the held store's lock, then reports the
/// outcome back so the store can transition the message's status.
pub async fn attempt_delivery(node: &Arc<Node>, id: u64, target: LogicalAddress, payload: &str) {
    let live_peer = node.peers.find_by_address(target).await;

    let delivered = live_peer
        .as_ref()
        .map(|peer| (peer.transport.ip.clone(), peer.transport.port));

    let outcome = node.held.attempt(id, delivered).await;

    if let AttemptOutcome::Deliver { ip, port } = outcome {
        let delivery = node.own_message(MessageType::OthernetMessage, payload.to_string());

        if let Err(e) = node.send(&ip, port, &delivery).await {
            log::warn!("delivery send failed for held message {}: {}", id, e);
        }
    }
}
