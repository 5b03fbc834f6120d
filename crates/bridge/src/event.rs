// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event records and the integrity hash chain.
//!
//! Every state-changing fact in the bridge is an immutable [`Event`]. The log
//! assigns sequence numbers and chains each event's hash over the previous
//! one; payloads are hashed in a canonical (recursively key-sorted) JSON
//! encoding so replay verification is byte-stable.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex hash of the empty chain position, before the first event.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Kinds of state-changing facts recorded in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionCreated,
    SessionRevoked,
    ExpertRegistered,
    ExpertDeregistered,
    ElicitationRequested,
    ElicitationDelivered,
    ElicitationAccepted,
    ElicitationDeclined,
    ElicitationCancelled,
    ElicitationExpired,
    SecurityViolation,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionCreated => "session_created",
            Self::SessionRevoked => "session_revoked",
            Self::ExpertRegistered => "expert_registered",
            Self::ExpertDeregistered => "expert_deregistered",
            Self::ElicitationRequested => "elicitation_requested",
            Self::ElicitationDelivered => "elicitation_delivered",
            Self::ElicitationAccepted => "elicitation_accepted",
            Self::ElicitationDeclined => "elicitation_declined",
            Self::ElicitationCancelled => "elicitation_cancelled",
            Self::ElicitationExpired => "elicitation_expired",
            Self::SecurityViolation => "security_violation",
        }
    }

    /// Whether this kind terminates an elicitation.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ElicitationAccepted
                | Self::ElicitationDeclined
                | Self::ElicitationCancelled
                | Self::ElicitationExpired
        )
    }
}

/// An event as appended to the log and replayed into projections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub timestamp_ns: u64,
    pub kind: EventKind,
    /// The elicitation id, session id, or agent id this event pertains to.
    pub aggregate: String,
    pub actor: String,
    pub payload: serde_json::Value,
    /// Hex SHA-256 over (prev_hash, seq, kind, canonical payload).
    pub hash: String,
}

/// An event awaiting sequencing. The log fills in seq, timestamp, and hash.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub kind: EventKind,
    pub aggregate: String,
    pub actor: String,
    pub payload: serde_json::Value,
}

impl EventDraft {
    pub fn new(
        kind: EventKind,
        aggregate: impl Into<String>,
        actor: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self { kind, aggregate: aggregate.into(), actor: actor.into(), payload }
    }
}

/// Compute the chained hash for an event at `seq` with the given payload.
pub fn chain_hash(prev_hash: &str, seq: u64, kind: EventKind, payload: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(seq.to_be_bytes());
    hasher.update(kind.as_str().as_bytes());
    hasher.update(canonical_json(payload).as_bytes());
    hex::encode(hasher.finalize())
}

/// Verify that `event` chains correctly from `prev_hash`.
pub fn verify_chain(prev_hash: &str, event: &Event) -> bool {
    chain_hash(prev_hash, event.seq, event.kind, &event.payload) == event.hash
}

/// Deterministic JSON encoding: object keys recursively sorted, no
/// insignificant whitespace. Arrays and scalars serialize in order.
pub fn canonical_json(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String((*key).clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(*key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

// -- Time ---------------------------------------------------------------------

/// Current wall-clock time in nanoseconds since the epoch.
pub fn now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// Format an epoch-nanosecond timestamp as RFC 3339 with nanosecond precision.
pub fn rfc3339_ns(timestamp_ns: u64) -> String {
    let ts = DateTime::<Utc>::from_timestamp_nanos(timestamp_ns as i64);
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

// -- Typed payloads -----------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCreatedPayload {
    pub session_id: String,
    pub agent_id: String,
    pub created_at_ns: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRevokedPayload {
    pub session_id: String,
    pub agent_id: String,
    /// `idle`, `evicted`, or `explicit`.
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpertRegisteredPayload {
    pub agent_id: String,
    pub capabilities: Vec<String>,
    pub availability: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpertDeregisteredPayload {
    pub agent_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElicitationRequestedPayload {
    pub elicitation_id: String,
    pub from_agent: String,
    pub to_agent: String,
    pub message: String,
    pub schema: serde_json::Value,
    pub timeout_seconds: u64,
    pub nonce: String,
    pub expected_response_key: String,
    pub created_at_ns: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElicitationDeliveredPayload {
    pub elicitation_id: String,
    pub to_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElicitationAcceptedPayload {
    pub elicitation_id: String,
    pub responder: String,
    pub data: serde_json::Value,
    pub nonce: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElicitationDeclinedPayload {
    pub elicitation_id: String,
    pub responder: String,
    pub reason: String,
    pub nonce: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElicitationCancelledPayload {
    pub elicitation_id: String,
    pub by_agent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElicitationExpiredPayload {
    pub elicitation_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityViolationPayload {
    pub agent_id: String,
    /// Cause classifier: `authentication`, `authorization`, `binding`,
    /// `nonce_replay`, `rate_limited`, or `schema`. Never secrets.
    pub classifier: String,
    pub detail: String,
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
