// Held-message store: bounded, insertion-ordered, with a status machine,
// priority, and exponential-backoff retry schedule. The mutable collection
// lives behind its own `RwLock`, independent of the peer table's, so a
// caller never has to hold both at once.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;

use crate::address::LogicalAddress;
use crate::error::{OthernetError, OthernetResult};

pub const MAX_HELD_MESSAGES: usize = 1000;
pub const MAX_RETRIES: u16 = 5;
pub const EXPIRY_SECONDS: i64 = 86400;

/// Backoff delay in seconds for attempts 1..=5, per the wire spec's exact
/// table: 60, 120, 240, 480, 960.
const BACKOFF_TABLE: [i64; 5] = [60, 120, 240, 480, 960];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Crash = 0,
    Direct = 1,
    Normal = 2,
    Hold = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Queued,
    Attempting,
    Held,
    Delivered,
    Expired,
    Failed,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Delivered | Status::Expired | Status::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct HeldMessage {
    pub id: u64,
    pub target: LogicalAddress,
    pub sender: LogicalAddress,
    pub priority: Priority,
    pub payload: String,
    pub created: i64,
    pub last_attempt: i64,
    pub next_attempt: i64,
    pub attempt_count: u16,
    pub expires_at: i64,
    pub status: Status,
    pub holding_node: Option<String>,
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Outcome of one delivery attempt, used by the caller to decide whether to
/// perform the actual network send (kept outside the lock per §5).
pub enum AttemptOutcome {
    /// A live peer was found; the caller should send an `OTHERNET_MESSAGE`
    /// to this transport, and the message has already been marked
    /// `Delivered`.
    Deliver { ip: String, port: u16 },
    /// No live peer; the message was rescheduled (or marked `Failed` if
    /// retries are exhausted).
    Rescheduled,
    /// The message was already in a terminal state; no-op.
    NoOp,
}

pub struct HeldStore {
    inner: RwLock<Vec<HeldMessage>>,
    counter: AtomicU32,
}

impl HeldStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Vec::new()),
            counter: AtomicU32::new(0),
        }
    }

    fn generate_id(&self) -> u64 {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed) as u64 + 1;
        ((now() as u64) << 32) | counter
    }

    /// Queue `payload` for `target`. Returns the assigned id.
    pub async fn enqueue(
        &self,
        sender: LogicalAddress,
        target: LogicalAddress,
        payload: String,
        priority: Priority,
    ) -> OthernetResult<u64> {
        let mut payload = payload;
        crate::protocol::truncate_utf8(&mut payload, crate::protocol::MAX_DATA_LEN);

        let mut inner = self.inner.write().await;

        if inner.len() >= MAX_HELD_MESSAGES {
            return Err(OthernetError::CapacityExceeded(MAX_HELD_MESSAGES));
        }

        let id = self.generate_id();
        let created = now();

        inner.push(HeldMessage {
            id,
            target,
            sender,
            priority,
            payload,
            created,
            last_attempt: created,
            next_attempt: created,
            attempt_count: 0,
            expires_at: created + EXPIRY_SECONDS,
            status: Status::Queued,
            holding_node: None,
        });

        Ok(id)
    }

    /// Look up a message snapshot by id.
    pub async fn get(&self, id: u64) -> Option<HeldMessage> {
        self.inner.read().await.iter().find(|m| m.id == id).cloned()
    }

    /// Attempt delivery of message `id`. If `delivered` is `Some`, the
    /// caller already found a live peer for the message's target (via the
    /// peer registry, outside this lock) and the message transitions
    /// straight to `Delivered`. Otherwise the retry schedule advances.
    pub async fn attempt(&self, id: u64, delivered: Option<(String, u16)>) -> AttemptOutcome {
        let mut inner = self.inner.write().await;

        let msg = match inner.iter_mut().find(|m| m.id == id) {
            Some(msg) => msg,
            None => return AttemptOutcome::NoOp,
        };

        if msg.status.is_terminal() {
            return AttemptOutcome::NoOp;
        }

        if let Some((ip, port)) = delivered {
            msg.attempt_count += 1;
            msg.last_attempt = now();
            msg.status = Status::Delivered;
            return AttemptOutcome::Deliver { ip, port };
        }

        msg.attempt_count += 1;
        msg.last_attempt = now();
        msg.status = Status::Held;

        let delay = BACKOFF_TABLE[(msg.attempt_count as usize - 1).min(BACKOFF_TABLE.len() - 1)];
        msg.next_attempt = msg.last_attempt + delay;

        if msg.attempt_count >= MAX_RETRIES {
            msg.status = Status::Failed;
        }

        AttemptOutcome::Rescheduled
    }

    /// Snapshot of non-terminal messages whose `next_attempt` has arrived,
    /// ordered by priority ascending (CRASH first) then insertion order.
    pub async fn due_for_attempt(&self, now: i64) -> Vec<HeldMessage> {
        let inner = self.inner.read().await;

        let mut due: Vec<HeldMessage> = inner
            .iter()
            .filter(|m| m.status == Status::Held && now >= m.next_attempt)
            .cloned()
            .collect();

        due.sort_by_key(|m| m.priority);
        due
    }

    /// Expire every non-terminal message whose `expires_at` has passed.
    /// Returns the ids that were transitioned.
    pub async fn expire_due(&self, now: i64) -> Vec<u64> {
        let mut inner = self.inner.write().await;

        let mut expired = Vec::new();

        for msg in inner.iter_mut() {
            if !msg.status.is_terminal() && now > msg.expires_at {
                msg.status = Status::Expired;
                expired.push(msg.id);
            }
        }

        expired
    }

    /// Clear `holding_node` and reset `next_attempt` to `now` for every
    /// non-terminal message currently tagged with `failed_ip`, so the next
    /// sweep re-attempts them.
    pub async fn redistribute(&self, failed_ip: &str, now: i64) {
        let mut inner = self.inner.write().await;

        for msg in inner.iter_mut() {
            if msg.status.is_terminal() {
                continue;
            }

            if msg.holding_node.as_deref() == Some(failed_ip) {
                msg.holding_node = None;
                msg.next_attempt = now;
                msg.status = Status::Held;
            }
        }
    }

    /// All non-terminal-excluded-delivered messages, for the `held` command.
    pub async fn list_pending(&self) -> Vec<HeldMessage> {
        self.inner
            .read()
            .await
            .iter()
            .filter(|m| m.status != Status::Delivered)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

impl Default for HeldStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u32) -> LogicalAddress {
        LogicalAddress::new(1, 1, n)
    }

    #[tokio::test]
    async fn enqueue_then_deliver() {
        let store = HeldStore::new();
        let id = store
            .enqueue(addr(1), addr(7), "hi".into(), Priority::Normal)
            .await
            .unwrap();

        let outcome = store.attempt(id, Some(("10.0.0.5".into(), 9000))).await;
        assert!(matches!(outcome, AttemptOutcome::Deliver { .. }));

        let msg = store.get(id).await.unwrap();
        assert_eq!(msg.status, Status::Delivered);
        assert_eq!(msg.attempt_count, 1);
    }

    #[tokio::test]
    async fn enqueue_then_hold() {
        let store = HeldStore::new();
        let id = store
            .enqueue(addr(1), addr(9), "later".into(), Priority::Normal)
            .await
            .unwrap();

        let outcome = store.attempt(id, None).await;
        assert!(matches!(outcome, AttemptOutcome::Rescheduled));

        let msg = store.get(id).await.unwrap();
        assert_eq!(msg.status, Status::Held);
        assert_eq!(msg.attempt_count, 1);
        assert_eq!(msg.next_attempt - msg.last_attempt, 60);
    }

    #[tokio::test]
    async fn retry_exhaustion_fails_after_five() {
        let store = HeldStore::new();
        let id = store
            .enqueue(addr(1), addr(9), "later".into(), Priority::Normal)
            .await
            .unwrap();

        for _ in 0..5 {
            store.attempt(id, None).await;
        }

        let msg = store.get(id).await.unwrap();
        assert_eq!(msg.status, Status::Failed);
        assert_eq!(msg.attempt_count, 5);

        // Further attempts are no-ops: terminal status never changes.
        store.attempt(id, None).await;
        let msg = store.get(id).await.unwrap();
        assert_eq!(msg.status, Status::Failed);
        assert_eq!(msg.attempt_count, 5);
    }

    #[tokio::test]
    async fn backoff_table_matches_spec() {
        let store = HeldStore::new();
        let id = store
            .enqueue(addr(1), addr(9), "later".into(), Priority::Normal)
            .await
            .unwrap();

        let expected = [60, 120, 240, 480, 960];
        for expected_delay in expected {
            store.attempt(id, None).await;
            let msg = store.get(id).await.unwrap();
            if msg.status.is_terminal() {
                break;
            }
            assert_eq!(msg.next_attempt - msg.last_attempt, expected_delay);
        }
    }

    #[tokio::test]
    async fn expiry_overrides_any_status() {
        let store = HeldStore::new();
        let id = store
            .enqueue(addr(1), addr(9), "later".into(), Priority::Normal)
            .await
            .unwrap();

        let msg = store.get(id).await.unwrap();
        let future = msg.expires_at + 1;

        let expired = store.expire_due(future).await;
        assert_eq!(expired, vec![id]);

        let msg = store.get(id).await.unwrap();
        assert_eq!(msg.status, Status::Expired);
    }

    #[tokio::test]
    async fn redistribute_resets_next_attempt() {
        let store = HeldStore::new();
        let id = store
            .enqueue(addr(1), addr(9), "later".into(), Priority::Normal)
            .await
            .unwrap();

        {
            let mut inner = store.inner.write().await;
            let msg = inner.iter_mut().find(|m| m.id == id).unwrap();
            msg.holding_node = Some("10.0.0.3".into());
            msg.next_attempt += 10_000;
        }

        let now = now();
        store.redistribute("10.0.0.3", now).await;

        let msg = store.get(id).await.unwrap();
        assert_eq!(msg.holding_node, None);
        assert_eq!(msg.next_attempt, now);
    }

    #[tokio::test]
    async fn capacity_exceeded_rejects_enqueue() {
        let store = HeldStore::new();

        {
            let mut inner = store.inner.write().await;
            for _ in 0..MAX_HELD_MESSAGES {
                inner.push(HeldMessage {
                    id: 0,
                    target: addr(1),
                    sender: addr(1),
                    priority: Priority::Normal,
                    payload: String::new(),
                    created: 0,
                    last_attempt: 0,
                    next_attempt: 0,
                    attempt_count: 0,
                    expires_at: 0,
                    status: Status::Queued,
                    holding_node: None,
                });
            }
        }

        let err = store
            .enqueue(addr(1), addr(2), "x".into(), Priority::Normal)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OthernetError::CapacityExceeded(MAX_HELD_MESSAGES)
        ));
    }
}
