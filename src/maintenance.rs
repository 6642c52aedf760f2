// Maintenance loop: every 30 seconds, sweep the held store and emit a
// capability announcement. Runs as its own spawned task and handles each
// tick inline, since the held store and peer table are independently
// lockable and need no routing through a central event loop.

use std::sync::Arc;
use std::time::Duration;

use crate::node::{now, Node};
use crate::protocol::MessageType;

pub const TICK_INTERVAL: Duration = Duration::from_secs(30);

/// Runs until `node.is_running()` observes termination at a tick boundary.
pub async fn run(node: Arc<Node>) {
    loop {
        tokio::select! {
            _ = node.shutdown.notified() => return,
            _ = tokio::time::sleep(TICK_INTERVAL) => {}
        }

        if !node.is_running() {
            return;
        }

        sweep(&node).await;

        let peer_count = node.peers.list_active().await.len();
        if peer_count > 0 {
            announce_capabilities(&node).await;
        }
    }
}

/// One sweep: expire overdue messages, then retry anything due, ordered
/// priority-ascending (CRASH first) per the design notes' sweep-ordering
/// allowance.
pub async fn sweep(node: &Arc<Node>) {
    let t = now();

    let expired = node.held.expire_due(t).await;
    if !expired.is_empty() {
        log::info!("expired {} held message(s)", expired.len());
    }

    let due = node.held.due_for_attempt(t).await;

    for msg in due {
        crate::handler::attempt_delivery(node, msg.id, msg.target, &msg.payload).await;
    }
}

async fn announce_capabilities(node: &Arc<Node>) {
    let load = node.held.len().await as f32 / crate::held::MAX_HELD_MESSAGES as f32;

    let data = format!(
        "capabilities:{} load:{:.2} uptime:{}",
        node.capabilities.bits(),
        load,
        now(),
    );

    let msg = node.own_message(MessageType::CapabilityUpdate, data);
    node.broadcast(&msg).await;
}
