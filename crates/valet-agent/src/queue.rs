// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-session message queue with debouncing.
//!
//! When a session is busy, incoming messages are queued; every enqueue
//! restarts a debounce timer, and when it fires the pending messages are
//! drained as one combined turn. Duplicate content inside a short window is
//! dropped, and the queue is capped by evicting the oldest entry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use valet_core::IncomingMessage;

/// Window inside which identical pending content is dropped.
const DEDUP_WINDOW: Duration = Duration::from_secs(5);

/// Callback invoked on a fresh task with the drained messages.
pub type OnDrain = Arc<dyn Fn(String, Vec<IncomingMessage>) + Send + Sync>;

struct QueuedMessage {
    msg: IncomingMessage,
    enqueued: Instant,
}

#[derive(Default)]
struct SessionQueue {
    items: Vec<QueuedMessage>,
    timer: Option<JoinHandle<()>>,
    processing: bool,
}

struct QueueInner {
    queues: Mutex<HashMap<String, SessionQueue>>,
    debounce: Duration,
    max_pending: usize,
    on_drain: RwLock<Option<OnDrain>>,
}

/// Debounced per-session message queue.
///
/// Messages from one session drain in arrival order; different sessions are
/// independent.
pub struct MessageQueue {
    inner: Arc<QueueInner>,
}

impl MessageQueue {
    pub fn new(debounce_ms: u64, max_pending: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                queues: Mutex::new(HashMap::new()),
                debounce: Duration::from_millis(debounce_ms.max(1)),
                max_pending: max_pending.max(1),
                on_drain: RwLock::new(None),
            }),
        }
    }

    /// Installs the drain callback. Wired after construction to break the
    /// cycle with the assistant.
    pub fn set_on_drain(&self, on_drain: OnDrain) {
        *self.inner.on_drain.write() = Some(on_drain);
    }

    /// Adds a message to the session queue and (re)starts the debounce
    /// timer. Returns `false` when the message was deduplicated.
    pub fn enqueue(&self, session_key: &str, msg: IncomingMessage) -> bool {
        let mut queues = self.inner.queues.lock();
        let sq = queues.entry(session_key.to_string()).or_default();

        // Dedup: same content within the window.
        let now = Instant::now();
        for queued in &sq.items {
            if queued.msg.content == msg.content
                && now.duration_since(queued.enqueued) < DEDUP_WINDOW
            {
                debug!(session = session_key, "message deduplicated");
                return false;
            }
        }

        // Cap: evict the oldest; insertion never blocks.
        if sq.items.len() >= self.inner.max_pending {
            sq.items.remove(0);
            warn!(
                session = session_key,
                max_pending = self.inner.max_pending,
                "message queue full, dropped oldest"
            );
        }

        sq.items.push(QueuedMessage { msg, enqueued: now });

        // Restart the debounce timer.
        if let Some(timer) = sq.timer.take() {
            timer.abort();
        }
        let inner = Arc::clone(&self.inner);
        let sid = session_key.to_string();
        sq.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            let msgs = drain_inner(&inner, &sid);
            if msgs.is_empty() {
                return;
            }
            let on_drain = inner.on_drain.read().clone();
            if let Some(on_drain) = on_drain {
                let sid_clone = sid.clone();
                tokio::spawn(async move {
                    on_drain(sid_clone, msgs);
                });
            }
        }));

        true
    }

    /// Returns and clears pending messages for the session.
    pub fn drain(&self, session_key: &str) -> Vec<IncomingMessage> {
        drain_inner(&self.inner, session_key)
    }

    /// Number of messages pending for a session.
    pub fn pending_len(&self, session_key: &str) -> usize {
        self.inner
            .queues
            .lock()
            .get(session_key)
            .map(|sq| sq.items.len())
            .unwrap_or(0)
    }

    /// True when the session has an active agent run.
    pub fn is_processing(&self, session_key: &str) -> bool {
        self.inner
            .queues
            .lock()
            .get(session_key)
            .map(|sq| sq.processing)
            .unwrap_or(false)
    }

    /// Marks the session as processing or idle.
    pub fn set_processing(&self, session_key: &str, active: bool) {
        let mut queues = self.inner.queues.lock();
        queues
            .entry(session_key.to_string())
            .or_default()
            .processing = active;
    }

    /// Merges multiple messages into one user turn.
    pub fn combine_messages(msgs: &[IncomingMessage]) -> String {
        match msgs {
            [] => String::new(),
            [only] => only.content.clone(),
            many => {
                let mut combined = String::from("[Multiple messages received while busy]\n");
                for (i, m) in many.iter().enumerate() {
                    combined.push_str(&format!("{}. {}", i + 1, m.content.trim()));
                    if i < many.len() - 1 {
                        combined.push('\n');
                    }
                }
                combined
            }
        }
    }
}

fn drain_inner(inner: &QueueInner, session_key: &str) -> Vec<IncomingMessage> {
    let mut queues = inner.queues.lock();
    let Some(sq) = queues.get_mut(session_key) else {
        return Vec::new();
    };
    if let Some(timer) = sq.timer.take() {
        timer.abort();
    }
    sq.items.drain(..).map(|q| q.msg).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn msg(content: &str) -> IncomingMessage {
        IncomingMessage {
            channel: "test".into(),
            chat_id: "1".into(),
            sender: "+1".into(),
            id: uuid_like(content),
            content: content.into(),
            media: None,
            is_group: false,
            timestamp: Utc::now(),
        }
    }

    fn uuid_like(seed: &str) -> String {
        format!("m-{seed}")
    }

    #[tokio::test]
    async fn dedup_drops_identical_content_within_window() {
        let queue = MessageQueue::new(10_000, 20);
        assert!(queue.enqueue("s", msg("ping")));
        assert!(!queue.enqueue("s", msg("ping")));
        assert_eq!(queue.pending_len("s"), 1);
    }

    #[tokio::test]
    async fn cap_evicts_oldest() {
        let queue = MessageQueue::new(10_000, 3);
        for i in 0..5 {
            queue.enqueue("s", msg(&format!("m{i}")));
        }
        assert_eq!(queue.pending_len("s"), 3);
        let drained = queue.drain("s");
        let contents: Vec<&str> = drained.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_coalesces_burst_into_one_drain() {
        let queue = MessageQueue::new(200, 20);
        let drains = Arc::new(AtomicUsize::new(0));
        let combined = Arc::new(Mutex::new(String::new()));

        let drains_clone = Arc::clone(&drains);
        let combined_clone = Arc::clone(&combined);
        queue.set_on_drain(Arc::new(move |_sid, msgs| {
            drains_clone.fetch_add(1, Ordering::SeqCst);
            *combined_clone.lock() = MessageQueue::combine_messages(&msgs);
        }));

        queue.enqueue("s", msg("first"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        queue.enqueue("s", msg("second"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.enqueue("s", msg("third"));

        // Allow the debounce timer plus the drain task to run.
        tokio::time::sleep(Duration::from_millis(400)).await;
        tokio::task::yield_now().await;

        assert_eq!(drains.load(Ordering::SeqCst), 1);
        let content = combined.lock().clone();
        assert_eq!(
            content,
            "[Multiple messages received while busy]\n1. first\n2. second\n3. third"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn separate_sessions_drain_independently() {
        let queue = MessageQueue::new(100, 20);
        let drains = Arc::new(AtomicUsize::new(0));
        let drains_clone = Arc::clone(&drains);
        queue.set_on_drain(Arc::new(move |_sid, _msgs| {
            drains_clone.fetch_add(1, Ordering::SeqCst);
        }));

        queue.enqueue("a", msg("one"));
        queue.enqueue("b", msg("two"));

        tokio::time::sleep(Duration::from_millis(300)).await;
        tokio::task::yield_now().await;

        assert_eq!(drains.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn combine_single_message_is_verbatim() {
        let msgs = vec![msg("only one")];
        assert_eq!(MessageQueue::combine_messages(&msgs), "only one");
    }

    #[tokio::test]
    async fn processing_flag_round_trips() {
        let queue = MessageQueue::new(100, 20);
        assert!(!queue.is_processing("s"));
        queue.set_processing("s", true);
        assert!(queue.is_processing("s"));
        queue.set_processing("s", false);
        assert!(!queue.is_processing("s"));
    }

    #[tokio::test]
    async fn drain_clears_pending() {
        let queue = MessageQueue::new(10_000, 20);
        queue.enqueue("s", msg("a"));
        queue.enqueue("s", msg("b"));
        let drained = queue.drain("s");
        assert_eq!(drained.len(), 2);
        assert_eq!(queue.pending_len("s"), 0);
        assert!(queue.drain("s").is_empty());
    }
}
