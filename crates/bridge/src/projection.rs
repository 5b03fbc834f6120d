// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory projections of the event log.
//!
//! `apply` is a pure function of (state, event): replaying the same prefix
//! always yields the same state, which is what makes snapshots and the
//! divergence check meaningful. Nothing here reads the clock; archive
//! trimming uses the applied event's own timestamp.

use std::collections::{HashMap, VecDeque};

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::event::{self, Event, EventKind};

/// Count bound on the archive of terminal elicitations.
const ARCHIVE_MAX_ENTRIES: usize = 4096;

/// Lifecycle states of an elicitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElicitationStatus {
    Pending,
    Delivered,
    Accepted,
    Declined,
    Cancelled,
    Expired,
}

impl ElicitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted | Self::Declined | Self::Cancelled | Self::Expired)
    }
}

/// An addressed request/response exchange, as projected from the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Elicitation {
    pub id: String,
    pub from_agent: String,
    pub to_agent: String,
    pub message: String,
    pub schema: serde_json::Value,
    pub timeout_seconds: u64,
    pub nonce: String,
    pub expected_response_key: String,
    pub created_seq: u64,
    pub created_at_ns: u64,
    pub expires_at_ns: u64,
    pub status: ElicitationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_at_ns: Option<u64>,
}

/// A live authenticated session.
///
/// Activity (for idle revocation) is volatile runtime state owned by the
/// engine, not projected: projections stay a pure function of the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub agent_id: String,
    pub created_at_ns: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// Advertised capability set and availability for an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpertEntry {
    pub agent_id: String,
    pub capabilities: Vec<String>,
    pub availability: Availability,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Available,
    Busy,
    Offline,
}

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Busy => "busy",
            Self::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(Self::Available),
            "busy" => Some(Self::Busy),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

/// A malformed or out-of-order event. Fatal: replay must never diverge.
#[derive(Debug)]
pub struct ProjectionError(pub String);

impl std::fmt::Display for ProjectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "projection divergence: {}", self.0)
    }
}

impl std::error::Error for ProjectionError {}

/// The full in-memory view rebuilt from the log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Projections {
    pub applied_seq: u64,
    /// Active (non-terminal) elicitations by id.
    pub elicitations: HashMap<String, Elicitation>,
    /// Active elicitation ids addressed to each agent, in arrival order.
    pub pending_for: HashMap<String, IndexSet<String>>,
    /// Active elicitation ids created by each agent, in arrival order.
    pub created_by: HashMap<String, IndexSet<String>>,
    /// Terminal elicitations, newest last. Bounded by count and age.
    pub archive: VecDeque<Elicitation>,
    /// Age bound on archived terminals, nanoseconds.
    pub archive_retention_ns: u64,
    /// Live sessions by session id.
    pub sessions: HashMap<String, SessionRecord>,
    /// Session ids per agent, oldest first.
    pub sessions_by_agent: HashMap<String, Vec<String>>,
    /// Expert registry by agent id.
    pub experts: HashMap<String, ExpertEntry>,
}

impl Projections {
    pub fn new(archive_retention: std::time::Duration) -> Self {
        Self { archive_retention_ns: archive_retention.as_nanos() as u64, ..Self::default() }
    }

    /// Apply one event. Events must arrive in sequence order with no gaps.
    pub fn apply(&mut self, event: &Event) -> Result<(), ProjectionError> {
        if event.seq != self.applied_seq + 1 {
            return Err(ProjectionError(format!(
                "event {} applied after {}",
                event.seq, self.applied_seq
            )));
        }

        match event.kind {
            EventKind::SessionCreated => {
                let p: event::SessionCreatedPayload = decode(event)?;
                self.sessions_by_agent
                    .entry(p.agent_id.clone())
                    .or_default()
                    .push(p.session_id.clone());
                self.sessions.insert(
                    p.session_id.clone(),
                    SessionRecord {
                        session_id: p.session_id,
                        agent_id: p.agent_id,
                        created_at_ns: p.created_at_ns,
                        ip_hint: p.ip_hint,
                        user_agent: p.user_agent,
                    },
                );
            }
            EventKind::SessionRevoked => {
                let p: event::SessionRevokedPayload = decode(event)?;
                self.sessions.remove(&p.session_id);
                if let Some(ids) = self.sessions_by_agent.get_mut(&p.agent_id) {
                    ids.retain(|id| id != &p.session_id);
                    if ids.is_empty() {
                        self.sessions_by_agent.remove(&p.agent_id);
                        // Expert entries follow session liveness.
                        self.experts.remove(&p.agent_id);
                    }
                }
            }
            EventKind::ExpertRegistered => {
                let p: event::ExpertRegisteredPayload = decode(event)?;
                let availability = Availability::parse(&p.availability).ok_or_else(|| {
                    ProjectionError(format!("event {}: bad availability", event.seq))
                })?;
                self.experts.insert(
                    p.agent_id.clone(),
                    ExpertEntry { agent_id: p.agent_id, capabilities: p.capabilities, availability },
                );
            }
            EventKind::ExpertDeregistered => {
                let p: event::ExpertDeregisteredPayload = decode(event)?;
                self.experts.remove(&p.agent_id);
            }
            EventKind::ElicitationRequested => {
                let p: event::ElicitationRequestedPayload = decode(event)?;
                let expires_at_ns =
                    p.created_at_ns.saturating_add(p.timeout_seconds.saturating_mul(1_000_000_000));
                self.pending_for
                    .entry(p.to_agent.clone())
                    .or_default()
                    .insert(p.elicitation_id.clone());
                self.created_by
                    .entry(p.from_agent.clone())
                    .or_default()
                    .insert(p.elicitation_id.clone());
                self.elicitations.insert(
                    p.elicitation_id.clone(),
                    Elicitation {
                        id: p.elicitation_id,
                        from_agent: p.from_agent,
                        to_agent: p.to_agent,
                        message: p.message,
                        schema: p.schema,
                        timeout_seconds: p.timeout_seconds,
                        nonce: p.nonce,
                        expected_response_key: p.expected_response_key,
                        created_seq: event.seq,
                        created_at_ns: p.created_at_ns,
                        expires_at_ns,
                        status: ElicitationStatus::Pending,
                        response: None,
                        reason: None,
                        terminal_at_ns: None,
                    },
                );
            }
            EventKind::ElicitationDelivered => {
                let p: event::ElicitationDeliveredPayload = decode(event)?;
                if let Some(elicitation) = self.elicitations.get_mut(&p.elicitation_id) {
                    if elicitation.status == ElicitationStatus::Pending {
                        elicitation.status = ElicitationStatus::Delivered;
                    }
                }
            }
            EventKind::ElicitationAccepted => {
                let p: event::ElicitationAcceptedPayload = decode(event)?;
                self.finish(&p.elicitation_id, event, ElicitationStatus::Accepted, Some(p.data), None)?;
            }
            EventKind::ElicitationDeclined => {
                let p: event::ElicitationDeclinedPayload = decode(event)?;
                self.finish(
                    &p.elicitation_id,
                    event,
                    ElicitationStatus::Declined,
                    None,
                    Some(p.reason),
                )?;
            }
            EventKind::ElicitationCancelled => {
                let p: event::ElicitationCancelledPayload = decode(event)?;
                self.finish(
                    &p.elicitation_id,
                    event,
                    ElicitationStatus::Cancelled,
                    None,
                    p.reason,
                )?;
            }
            EventKind::ElicitationExpired => {
                let p: event::ElicitationExpiredPayload = decode(event)?;
                self.finish(&p.elicitation_id, event, ElicitationStatus::Expired, None, None)?;
            }
            EventKind::SecurityViolation => {
                // Audit-only: no projected state changes.
            }
        }

        self.applied_seq = event.seq;
        Ok(())
    }

    fn finish(
        &mut self,
        id: &str,
        event: &Event,
        status: ElicitationStatus,
        response: Option<serde_json::Value>,
        reason: Option<String>,
    ) -> Result<(), ProjectionError> {
        let Some(mut elicitation) = self.elicitations.remove(id) else {
            return Err(ProjectionError(format!(
                "event {}: terminal {} for unknown elicitation {id}",
                event.seq,
                event.kind.as_str()
            )));
        };
        if let Some(ids) = self.pending_for.get_mut(&elicitation.to_agent) {
            ids.shift_remove(id);
            if ids.is_empty() {
                self.pending_for.remove(&elicitation.to_agent);
            }
        }
        if let Some(ids) = self.created_by.get_mut(&elicitation.from_agent) {
            ids.shift_remove(id);
            if ids.is_empty() {
                self.created_by.remove(&elicitation.from_agent);
            }
        }
        elicitation.status = status;
        elicitation.response = response;
        elicitation.reason = reason;
        elicitation.terminal_at_ns = Some(event.timestamp_ns);
        self.archive.push_back(elicitation);
        self.trim_archive(event.timestamp_ns);
        Ok(())
    }

    /// Trim against the applied event's timestamp, never the wall clock.
    fn trim_archive(&mut self, now_ns: u64) {
        while self.archive.len() > ARCHIVE_MAX_ENTRIES {
            self.archive.pop_front();
        }
        while let Some(front) = self.archive.front() {
            let age = now_ns.saturating_sub(front.terminal_at_ns.unwrap_or(now_ns));
            if age <= self.archive_retention_ns {
                break;
            }
            self.archive.pop_front();
        }
    }

    /// Look up an elicitation, active or archived.
    pub fn elicitation(&self, id: &str) -> Option<&Elicitation> {
        self.elicitations.get(id).or_else(|| self.archive.iter().rev().find(|e| e.id == id))
    }

    /// Live session ids for an agent, oldest first.
    pub fn sessions_of(&self, agent_id: &str) -> &[String] {
        self.sessions_by_agent.get(agent_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The most recent live session of an agent, if any.
    pub fn newest_session_of(&self, agent_id: &str) -> Option<&SessionRecord> {
        self.sessions_of(agent_id).last().and_then(|id| self.sessions.get(id))
    }

    /// Whether the agent is a known target: a live session or an expert entry.
    pub fn knows_agent(&self, agent_id: &str) -> bool {
        self.sessions_by_agent.contains_key(agent_id) || self.experts.contains_key(agent_id)
    }

    /// Canonical byte serialisation, used for snapshot verification.
    pub fn canonical_bytes(&self) -> Result<String, ProjectionError> {
        let value = serde_json::to_value(self)
            .map_err(|e| ProjectionError(format!("serialize projection: {e}")))?;
        Ok(event::canonical_json(&value))
    }
}

fn decode<T: serde::de::DeserializeOwned>(event: &Event) -> Result<T, ProjectionError> {
    serde_json::from_value(event.payload.clone()).map_err(|e| {
        ProjectionError(format!("event {} ({}): bad payload: {e}", event.seq, event.kind.as_str()))
    })
}

#[cfg(test)]
#[path = "projection_tests.rs"]
mod tests;
