// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-agent notification fabric.
//!
//! Each agent owns a bounded inbox: a queue of pending notifications plus a
//! wake-up primitive. Producers (the engine) enqueue and signal; the single
//! consumer drains, optionally blocking up to a deadline. The enqueue path
//! does no I/O and never touches the event-log gate.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;

use crate::projection::ElicitationStatus;

/// A queued notification for one agent.
#[derive(Debug, Clone)]
pub struct Notification {
    pub elicitation_id: String,
    /// Sequence of the event that produced this notification.
    pub seq: u64,
    pub kind: NotificationKind,
}

#[derive(Debug, Clone)]
pub enum NotificationKind {
    /// A new elicitation addressed to this agent.
    Request {
        from_agent: String,
        message: String,
        schema: serde_json::Value,
        expires_at_ns: u64,
        /// Capability proving addressed-responder status; presented back as
        /// the response signature.
        response_key: String,
    },
    /// An elicitation this agent is party to reached a terminal state.
    Terminal {
        state: ElicitationStatus,
        response: Option<serde_json::Value>,
        reason: Option<String>,
    },
}

impl NotificationKind {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal { .. })
    }
}

#[derive(Default)]
struct Queue {
    items: VecDeque<Notification>,
    truncated: bool,
}

/// One agent's inbox: multi-producer, single-consumer.
pub struct Inbox {
    capacity: usize,
    queue: Mutex<Queue>,
    notify: Notify,
}

impl Inbox {
    fn new(capacity: usize) -> Self {
        Self { capacity, queue: Mutex::new(Queue::default()), notify: Notify::new() }
    }

    /// Enqueue and wake the consumer.
    ///
    /// A terminal notification replaces a still-queued request for the same
    /// elicitation instead of being delivered alongside it. When the inbox is
    /// full, the oldest non-terminal item is evicted and the catch-up hint is
    /// set; log-visible facts are never dropped, only their push delivery.
    pub fn push(&self, notification: Notification) {
        {
            let mut queue = self.queue.lock();

            if notification.kind.is_terminal() {
                let replaced = queue
                    .items
                    .iter_mut()
                    .find(|queued| {
                        queued.elicitation_id == notification.elicitation_id
                            && !queued.kind.is_terminal()
                    })
                    .map(|queued| *queued = notification.clone())
                    .is_some();
                if replaced {
                    drop(queue);
                    self.notify.notify_one();
                    return;
                }
            }

            if queue.items.len() >= self.capacity {
                let evict_at = queue.items.iter().position(|item| !item.kind.is_terminal());
                match evict_at {
                    Some(idx) => {
                        queue.items.remove(idx);
                    }
                    None => {
                        queue.items.pop_front();
                    }
                }
                queue.truncated = true;
            }
            queue.items.push_back(notification);
        }
        self.notify.notify_one();
    }

    /// Drain everything queued. Resets the catch-up hint.
    pub fn drain(&self) -> (Vec<Notification>, bool) {
        self.drain_where(|_| true)
    }

    /// Drain only the items matching `pred`; the rest stay queued in order.
    /// Resets the catch-up hint.
    pub fn drain_where(&self, pred: impl Fn(&Notification) -> bool) -> (Vec<Notification>, bool) {
        let mut queue = self.queue.lock();
        let truncated = queue.truncated;
        queue.truncated = false;
        let mut kept = VecDeque::with_capacity(queue.items.len());
        let mut out = Vec::new();
        for item in queue.items.drain(..) {
            if pred(&item) {
                out.push(item);
            } else {
                kept.push_back(item);
            }
        }
        queue.items = kept;
        (out, truncated)
    }

    /// Drain, blocking up to `max_wait` for the first item.
    ///
    /// Returns empty on deadline without consuming anything; cancellation of
    /// the surrounding task (transport disconnect) behaves the same way.
    pub async fn wait_drain(&self, max_wait: Duration) -> (Vec<Notification>, bool) {
        self.wait_drain_where(max_wait, |_| true).await
    }

    /// As [`wait_drain`](Self::wait_drain), but only matching items count and
    /// are consumed.
    pub async fn wait_drain_where(
        &self,
        max_wait: Duration,
        pred: impl Fn(&Notification) -> bool,
    ) -> (Vec<Notification>, bool) {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            let notified = self.notify.notified();
            if self.queue.lock().items.iter().any(&pred) {
                return self.drain_where(&pred);
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return (vec![], false),
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.queue.lock().items.len()
    }
}

/// All inboxes, created on first use.
pub struct NotificationHub {
    capacity: usize,
    inboxes: RwLock<HashMap<String, Arc<Inbox>>>,
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, inboxes: RwLock::new(HashMap::new()) }
    }

    pub fn inbox(&self, agent_id: &str) -> Arc<Inbox> {
        if let Some(inbox) = self.inboxes.read().get(agent_id) {
            return Arc::clone(inbox);
        }
        let mut inboxes = self.inboxes.write();
        Arc::clone(
            inboxes.entry(agent_id.to_owned()).or_insert_with(|| Arc::new(Inbox::new(self.capacity))),
        )
    }

    /// Enqueue for an agent and signal its wake-up.
    pub fn push(&self, agent_id: &str, notification: Notification) {
        self.inbox(agent_id).push(notification);
    }
}

#[cfg(test)]
#[path = "inbox_tests.rs"]
mod tests;
