// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-agent anti-replay nonce store.
//!
//! Observed nonces are held for at least the timeout cap plus the clock-skew
//! allowance. The store is bounded per agent; the oldest entries fall off
//! first once the cap is reached.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Per-agent cap on retained nonces.
const MAX_NONCES_PER_AGENT: usize = 4096;

#[derive(Default)]
struct AgentNonces {
    seen: HashMap<String, Instant>,
    order: VecDeque<(Instant, String)>,
}

pub struct NonceStore {
    retention: Duration,
    agents: Mutex<HashMap<String, AgentNonces>>,
}

impl NonceStore {
    pub fn new(retention: Duration) -> Self {
        Self { retention, agents: Mutex::new(HashMap::new()) }
    }

    /// Whether `nonce` is fresh for `agent` without recording it.
    pub fn is_fresh(&self, agent: &str, nonce: &str) -> bool {
        let mut agents = self.agents.lock();
        let Some(entry) = agents.get_mut(agent) else {
            return true;
        };
        Self::prune(entry, self.retention);
        !entry.seen.contains_key(nonce)
    }

    /// Record `nonce` as observed. Returns false if it was already held.
    pub fn observe(&self, agent: &str, nonce: &str) -> bool {
        let now = Instant::now();
        let mut agents = self.agents.lock();
        let entry = agents.entry(agent.to_owned()).or_default();
        Self::prune(entry, self.retention);

        if entry.seen.contains_key(nonce) {
            return false;
        }
        while entry.seen.len() >= MAX_NONCES_PER_AGENT {
            let Some((_, oldest)) = entry.order.pop_front() else {
                break;
            };
            entry.seen.remove(&oldest);
        }
        entry.seen.insert(nonce.to_owned(), now);
        entry.order.push_back((now, nonce.to_owned()));
        true
    }

    fn prune(entry: &mut AgentNonces, retention: Duration) {
        let now = Instant::now();
        while let Some((seen_at, _)) = entry.order.front() {
            if now.duration_since(*seen_at) < retention {
                break;
            }
            if let Some((_, nonce)) = entry.order.pop_front() {
                entry.seen.remove(&nonce);
            }
        }
    }
}

#[cfg(test)]
#[path = "nonce_tests.rs"]
mod tests;
