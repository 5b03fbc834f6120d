// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The elicitation engine.
//!
//! All mutating operations run under a single gate: validate against the
//! projection, append to the log, apply the new events, then signal inboxes.
//! Because apply happens under the same gate that sequences the append,
//! projection order is identical to log order and racing terminals resolve
//! to exactly one winner; the loser observes `AlreadyTerminal`.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, ErrorKind};
use crate::event::{Event, EventDraft, EventKind};
use crate::eventlog::{EventLog, LogError};
use crate::inbox::{Notification, NotificationHub, NotificationKind};
use crate::projection::{Elicitation, ElicitationStatus, Projections, SessionRecord};
use crate::registry::SessionToken;
use crate::schema::Schema;
use crate::security::rate::Acquire;
use crate::security::{SecurityEnvelope, ViolationKind};
use crate::snapshot::SnapshotStore;

/// Cadence of the expiry scanner; well inside the 100 ms slack bound.
const EXPIRY_TICK: Duration = Duration::from_millis(50);

/// Upper bound on elicitation messages.
const MAX_MESSAGE_BYTES: usize = 64 * 1024;

/// Upper bound on agent id length.
const MAX_AGENT_ID_LEN: usize = 128;

/// Unrecoverable conditions that force the process down.
#[derive(Debug, Clone)]
pub enum Fatal {
    /// Log integrity broke at runtime. Exit 70.
    Integrity(String),
    /// A live apply diverged. Exit 71.
    Divergence(String),
}

/// A respond operation's requested outcome.
#[derive(Debug, Clone)]
pub enum RespondOutcome {
    Accept(serde_json::Value),
    Decline(String),
    Cancel(Option<String>),
}

/// Optional drain filter for `poll`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollFilter {
    All,
    Requests,
    Terminals,
}

impl PollFilter {
    fn matches(&self, notification: &Notification) -> bool {
        match self {
            Self::All => true,
            Self::Requests => matches!(notification.kind, NotificationKind::Request { .. }),
            Self::Terminals => matches!(notification.kind, NotificationKind::Terminal { .. }),
        }
    }
}

/// Counters reported by `GET /health`.
#[derive(Debug, Clone)]
pub struct Stats {
    pub last_seq: u64,
    pub live_sessions: usize,
    pub experts: usize,
    pub active_elicitations: usize,
}

/// Monotonic epoch-nanosecond clock. Wall time is sampled once at startup;
/// everything after advances with `Instant`, so host clock steps cannot
/// expire elicitations early or resurrect them.
struct Clock {
    base: Instant,
    base_ns: u64,
}

impl Clock {
    fn new() -> Self {
        Self { base: Instant::now(), base_ns: crate::event::now_ns() }
    }

    fn now_ns(&self) -> u64 {
        self.base_ns + self.base.elapsed().as_nanos() as u64
    }
}

pub struct Engine {
    config: BridgeConfig,
    clock: Clock,
    /// The single-writer gate: holds the log, and all mutating operations
    /// validate + append + apply while holding it.
    gate: tokio::sync::Mutex<EventLog>,
    projections: tokio::sync::RwLock<Projections>,
    snapshots: Arc<SnapshotStore>,
    envelope: SecurityEnvelope,
    hub: NotificationHub,
    /// Volatile per-session activity for idle revocation.
    activity: parking_lot::Mutex<HashMap<String, Instant>>,
    /// Soonest-expiring active elicitations: (expires_at_ns, id).
    expiry_queue: parking_lot::Mutex<BinaryHeap<Reverse<(u64, String)>>>,
    fatal: OnceLock<Fatal>,
    shutdown: CancellationToken,
}

/// Startup failures, mapped to exit codes by `main`.
#[derive(Debug)]
pub enum OpenError {
    Storage(String),
    Integrity(String),
    Divergence(String),
}

impl std::fmt::Display for OpenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage(d) => write!(f, "storage unavailable: {d}"),
            Self::Integrity(d) => write!(f, "storage integrity failure: {d}"),
            Self::Divergence(d) => write!(f, "projection divergence: {d}"),
        }
    }
}

impl std::error::Error for OpenError {}

impl Engine {
    /// Open storage, replay the log, and build a serving engine.
    pub fn open(config: BridgeConfig, shutdown: CancellationToken) -> Result<Self, OpenError> {
        let envelope =
            SecurityEnvelope::open(&config).map_err(|e| OpenError::Storage(e.to_string()))?;

        let (log, report) =
            EventLog::open(&config.data_dir.join("events"), config.segment_max_bytes, config.durability)
                .map_err(|e| match e {
                    LogError::Storage(d) => OpenError::Storage(d),
                    LogError::Integrity(d) => OpenError::Integrity(d),
                })?;
        if report.truncated_bytes > 0 {
            tracing::warn!(
                truncated_bytes = report.truncated_bytes,
                recovered_seq = report.last_seq,
                "recovered event log after crash"
            );
        }

        let snapshots = SnapshotStore::open(&config.data_dir.join("snapshots"))
            .map_err(|e| OpenError::Storage(e.to_string()))?;

        let mut projections = Projections::new(config.archive_retention());

        // Prefer the newest snapshot that is anchored to this log: its
        // recorded event hash must match the log's event at that sequence.
        if let Some(snapshot) = snapshots.latest() {
            let anchored = snapshot.seq <= report.last_seq
                && log
                    .read(snapshot.seq, Some(1))
                    .ok()
                    .and_then(|events| events.into_iter().next())
                    .is_some_and(|event| event.hash == snapshot.event_hash);
            if anchored {
                tracing::info!(seq = snapshot.seq, "resuming from snapshot");
                projections = snapshot.projection;
            } else {
                tracing::warn!(
                    seq = snapshot.seq,
                    "snapshot does not anchor to the log; replaying from scratch"
                );
            }
        }

        let replay_from = projections.applied_seq + 1;
        let events = log
            .read(replay_from, None)
            .map_err(|e| OpenError::Storage(e.to_string()))?;
        for event in &events {
            projections.apply(event).map_err(|e| OpenError::Divergence(e.to_string()))?;
        }
        tracing::info!(
            last_seq = report.last_seq,
            replayed = events.len(),
            sessions = projections.sessions.len(),
            "projections rebuilt"
        );

        let expiry_queue = projections
            .elicitations
            .values()
            .map(|el| Reverse((el.expires_at_ns, el.id.clone())))
            .collect::<BinaryHeap<_>>();

        Ok(Self {
            hub: NotificationHub::new(config.inbox_capacity),
            clock: Clock::new(),
            gate: tokio::sync::Mutex::new(log),
            projections: tokio::sync::RwLock::new(projections),
            snapshots: Arc::new(snapshots),
            envelope,
            activity: parking_lot::Mutex::new(HashMap::new()),
            expiry_queue: parking_lot::Mutex::new(expiry_queue),
            fatal: OnceLock::new(),
            shutdown,
            config,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The fatal condition that forced shutdown, if any.
    pub fn fatal(&self) -> Option<&Fatal> {
        self.fatal.get()
    }

    pub async fn stats(&self) -> Stats {
        let proj = self.projections.read().await;
        Stats {
            last_seq: proj.applied_seq,
            live_sessions: proj.sessions.len(),
            experts: proj.experts.len(),
            active_elicitations: proj.elicitations.len(),
        }
    }

    // -- Commit path ----------------------------------------------------------

    /// Append drafts and apply the resulting events. Caller holds the gate.
    async fn apply_batch(
        &self,
        log: &mut EventLog,
        drafts: Vec<EventDraft>,
    ) -> Result<Vec<Event>, BridgeError> {
        let events = log.append(drafts, self.clock.now_ns()).map_err(|e| match e {
            LogError::Storage(d) => BridgeError::new(ErrorKind::StorageUnavailable, d),
            LogError::Integrity(d) => {
                self.raise_fatal(Fatal::Integrity(d.clone()));
                BridgeError::new(ErrorKind::IntegrityFailure, d)
            }
        })?;

        let mut snapshot_at = None;
        {
            let mut proj = self.projections.write().await;
            for event in &events {
                if let Err(e) = proj.apply(event) {
                    self.raise_fatal(Fatal::Divergence(e.to_string()));
                    return Err(BridgeError::new(ErrorKind::IntegrityFailure, e.to_string()));
                }
                if event.seq % self.config.snapshot_interval_events == 0 {
                    snapshot_at = Some((event.seq, event.hash.clone(), proj.clone()));
                }
            }
        }

        if let Some((seq, hash, projection)) = snapshot_at {
            let snapshots = Arc::clone(&self.snapshots);
            tokio::task::spawn_blocking(move || {
                if let Err(e) = snapshots.write(seq, &hash, &projection) {
                    tracing::warn!(seq, err = %e, "snapshot write failed");
                }
            });
        }

        Ok(events)
    }

    fn raise_fatal(&self, fatal: Fatal) {
        tracing::error!(fatal = ?fatal, "fatal engine condition");
        let _ = self.fatal.set(fatal);
        self.shutdown.cancel();
    }

    /// Best-effort audit entry for a denial. Caller holds the gate.
    async fn record_violation(
        &self,
        log: &mut EventLog,
        agent_id: &str,
        kind: ViolationKind,
        detail: &str,
    ) {
        let draft = EventDraft::new(
            EventKind::SecurityViolation,
            agent_id,
            agent_id,
            json!({ "agent_id": agent_id, "classifier": kind.as_str(), "detail": detail }),
        );
        if let Err(e) = self.apply_batch(log, vec![draft]).await {
            tracing::warn!(err = %e, "failed to record security violation");
        }
    }

    /// Denial plus audit entry, holding the gate only for the violation.
    async fn deny(
        &self,
        agent_id: &str,
        violation: ViolationKind,
        kind: ErrorKind,
        detail: &str,
    ) -> BridgeError {
        let mut log = self.gate.lock().await;
        self.record_violation(&mut log, agent_id, violation, detail).await;
        BridgeError::new(kind, detail)
    }

    // -- Sessions -------------------------------------------------------------

    /// Validate a presented token and refresh its session's activity.
    pub async fn authenticate(&self, raw_token: &str) -> Result<SessionRecord, BridgeError> {
        let Some(token) = SessionToken::parse(raw_token) else {
            return Err(BridgeError::new(ErrorKind::Unauthenticated, "malformed token"));
        };
        if !token.verify(&self.envelope) {
            return Err(self
                .deny(
                    &token.agent_id,
                    ViolationKind::Authentication,
                    ErrorKind::Unauthenticated,
                    "token signature mismatch",
                )
                .await);
        }

        let record = {
            let proj = self.projections.read().await;
            proj.sessions.get(&token.session_id).cloned()
        };
        let Some(record) = record else {
            return Err(self
                .deny(
                    &token.agent_id,
                    ViolationKind::Authentication,
                    ErrorKind::Unauthenticated,
                    "session not live",
                )
                .await);
        };
        if record.agent_id != token.agent_id {
            return Err(self
                .deny(
                    &token.agent_id,
                    ViolationKind::Authentication,
                    ErrorKind::Unauthenticated,
                    "token agent does not own session",
                )
                .await);
        }

        // Lazy idle revocation. Activity is volatile; after a restart the
        // idle clock restarts, a deliberate grace.
        let idle_since = {
            let mut activity = self.activity.lock();
            let entry = activity.entry(record.session_id.clone()).or_insert_with(Instant::now);
            let idle = entry.elapsed();
            if idle <= self.config.idle_session_timeout() {
                *entry = Instant::now();
            }
            idle
        };
        if idle_since > self.config.idle_session_timeout() {
            let mut log = self.gate.lock().await;
            let draft = EventDraft::new(
                EventKind::SessionRevoked,
                record.session_id.clone(),
                record.agent_id.clone(),
                json!({
                    "session_id": record.session_id,
                    "agent_id": record.agent_id,
                    "reason": "idle",
                }),
            );
            if self.apply_batch(&mut log, vec![draft]).await.is_ok() {
                self.activity.lock().remove(&record.session_id);
                tracing::info!(session_id = %record.session_id, "revoked idle session");
            }
            return Err(BridgeError::new(ErrorKind::Unauthenticated, "session idle"));
        }

        Ok(record)
    }

    /// Create a session, evicting the agent's oldest beyond the cap.
    pub async fn create_session(
        &self,
        agent_id: &str,
        ip_hint: Option<String>,
        user_agent: Option<String>,
    ) -> Result<(SessionToken, u64), BridgeError> {
        if agent_id.is_empty()
            || agent_id.len() > MAX_AGENT_ID_LEN
            || agent_id.chars().any(|c| c.is_control() || c.is_whitespace())
        {
            return Err(BridgeError::new(ErrorKind::InvalidArgument, "invalid agent_id"));
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let created_at_ns = self.clock.now_ns();

        let mut log = self.gate.lock().await;
        let mut drafts = Vec::new();
        let mut evicted = None;
        {
            let proj = self.projections.read().await;
            let live = proj.sessions_of(agent_id);
            if live.len() >= self.config.max_sessions_per_agent {
                // Evict the oldest to stay within the cap.
                if let Some(oldest) = live.first() {
                    drafts.push(EventDraft::new(
                        EventKind::SessionRevoked,
                        oldest.clone(),
                        agent_id,
                        json!({ "session_id": oldest, "agent_id": agent_id, "reason": "evicted" }),
                    ));
                    evicted = Some(oldest.clone());
                }
            }
        }
        drafts.push(EventDraft::new(
            EventKind::SessionCreated,
            session_id.clone(),
            agent_id,
            json!({
                "session_id": session_id,
                "agent_id": agent_id,
                "created_at_ns": created_at_ns,
                "ip_hint": ip_hint,
                "user_agent": user_agent,
            }),
        ));
        self.apply_batch(&mut log, drafts).await?;
        drop(log);

        {
            let mut activity = self.activity.lock();
            if let Some(evicted) = evicted {
                activity.remove(&evicted);
                tracing::info!(agent_id = %agent_id, session_id = %evicted, "evicted oldest session");
            }
            activity.insert(session_id.clone(), Instant::now());
        }
        tracing::info!(agent_id = %agent_id, session_id = %session_id, "session created");

        Ok((SessionToken::issue(&self.envelope, agent_id, &session_id, created_at_ns), created_at_ns))
    }

    /// Explicitly revoke the presented session.
    pub async fn revoke_session(&self, raw_token: &str) -> Result<(), BridgeError> {
        let record = self.authenticate(raw_token).await?;
        let mut log = self.gate.lock().await;
        let draft = EventDraft::new(
            EventKind::SessionRevoked,
            record.session_id.clone(),
            record.agent_id.clone(),
            json!({
                "session_id": record.session_id,
                "agent_id": record.agent_id,
                "reason": "explicit",
            }),
        );
        self.apply_batch(&mut log, vec![draft]).await?;
        drop(log);
        self.activity.lock().remove(&record.session_id);
        tracing::info!(session_id = %record.session_id, "session revoked");
        Ok(())
    }

    // -- Expert registry ------------------------------------------------------

    /// Advertise capabilities, replacing any prior advertisement.
    pub async fn register_expert(
        &self,
        raw_token: &str,
        capabilities: Vec<String>,
        availability: &str,
    ) -> Result<(), BridgeError> {
        let record = self.authenticate(raw_token).await?;
        let Some(availability) = crate::projection::Availability::parse(availability) else {
            return Err(BridgeError::new(ErrorKind::InvalidArgument, "unknown availability"));
        };
        if capabilities.len() > 64 || capabilities.iter().any(|c| c.is_empty() || c.len() > 128) {
            return Err(BridgeError::new(ErrorKind::InvalidArgument, "invalid capabilities"));
        }

        let mut log = self.gate.lock().await;
        let draft = EventDraft::new(
            EventKind::ExpertRegistered,
            record.agent_id.clone(),
            record.agent_id.clone(),
            json!({
                "agent_id": record.agent_id,
                "capabilities": capabilities,
                "availability": availability.as_str(),
            }),
        );
        self.apply_batch(&mut log, vec![draft]).await?;
        tracing::debug!(agent_id = %record.agent_id, "expert registered");
        Ok(())
    }

    /// Withdraw the caller's advertisement.
    pub async fn deregister_expert(&self, raw_token: &str) -> Result<(), BridgeError> {
        let record = self.authenticate(raw_token).await?;
        let mut log = self.gate.lock().await;
        {
            let proj = self.projections.read().await;
            if !proj.experts.contains_key(&record.agent_id) {
                return Err(BridgeError::new(ErrorKind::NotFound, "no expert advertisement"));
            }
        }
        let draft = EventDraft::new(
            EventKind::ExpertDeregistered,
            record.agent_id.clone(),
            record.agent_id.clone(),
            json!({ "agent_id": record.agent_id }),
        );
        self.apply_batch(&mut log, vec![draft]).await?;
        Ok(())
    }

    /// List registered experts.
    pub async fn experts(
        &self,
        raw_token: &str,
    ) -> Result<Vec<crate::projection::ExpertEntry>, BridgeError> {
        self.authenticate(raw_token).await?;
        let proj = self.projections.read().await;
        let mut entries: Vec<_> = proj.experts.values().cloned().collect();
        entries.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        Ok(entries)
    }

    // -- Elicitations ---------------------------------------------------------

    /// Create an elicitation addressed to `to_agent`.
    pub async fn create_elicitation(
        &self,
        raw_token: &str,
        to_agent: &str,
        message: &str,
        schema_raw: &serde_json::Value,
        timeout_seconds: u64,
        nonce: &str,
    ) -> Result<(String, u64), BridgeError> {
        let creator = self.authenticate(raw_token).await?;

        if timeout_seconds == 0 || timeout_seconds > self.config.timeout_cap_seconds {
            return Err(BridgeError::new(
                ErrorKind::InvalidArgument,
                format!("timeout_seconds must be in 1..={}", self.config.timeout_cap_seconds),
            ));
        }
        if nonce.is_empty() {
            return Err(BridgeError::new(ErrorKind::InvalidArgument, "nonce required"));
        }
        if message.len() > MAX_MESSAGE_BYTES {
            return Err(BridgeError::new(ErrorKind::InvalidArgument, "message too large"));
        }
        if let Err(detail) = Schema::parse(schema_raw) {
            return Err(self
                .deny(&creator.agent_id, ViolationKind::Schema, ErrorKind::SchemaInvalid, &detail)
                .await);
        }
        if let Acquire::Denied { report_violation } =
            self.envelope.create_limiter.try_acquire(&creator.agent_id)
        {
            if report_violation {
                let mut log = self.gate.lock().await;
                self.record_violation(
                    &mut log,
                    &creator.agent_id,
                    ViolationKind::RateLimited,
                    "create bucket drained",
                )
                .await;
            }
            return Err(BridgeError::new(ErrorKind::RateLimited, "create rate exceeded"));
        }

        let mut log = self.gate.lock().await;

        let responder_session = {
            let proj = self.projections.read().await;
            proj.newest_session_of(to_agent).map(|s| s.session_id.clone())
        };
        let Some(responder_session) = responder_session else {
            return Err(BridgeError::new(
                ErrorKind::UnknownTarget,
                format!("no live session for {to_agent}"),
            ));
        };

        if !self.envelope.nonces.is_fresh(&creator.agent_id, nonce) {
            self.record_violation(
                &mut log,
                &creator.agent_id,
                ViolationKind::NonceReplay,
                "create nonce replayed",
            )
            .await;
            return Err(BridgeError::new(ErrorKind::NonceReplay, "nonce already used"));
        }

        let elicitation_id = uuid::Uuid::new_v4().to_string();
        let created_at_ns = self.clock.now_ns();
        let expires_at_ns = created_at_ns + timeout_seconds * 1_000_000_000;
        let expected_response_key =
            self.envelope.response_binding_key(&responder_session, &elicitation_id, nonce);

        let requested = EventDraft::new(
            EventKind::ElicitationRequested,
            elicitation_id.clone(),
            creator.agent_id.clone(),
            json!({
                "elicitation_id": elicitation_id,
                "from_agent": creator.agent_id,
                "to_agent": to_agent,
                "message": message,
                "schema": schema_raw,
                "timeout_seconds": timeout_seconds,
                "nonce": nonce,
                "expected_response_key": expected_response_key,
                "created_at_ns": created_at_ns,
            }),
        );
        let events = self.apply_batch(&mut log, vec![requested]).await?;
        // The nonce burns only once the append is acknowledged, so retrying
        // a failed create with the same nonce stays safe.
        self.envelope.nonces.observe(&creator.agent_id, nonce);
        self.expiry_queue.lock().push(Reverse((expires_at_ns, elicitation_id.clone())));

        let requested_seq = events.first().map(|e| e.seq).unwrap_or_default();
        self.hub.push(
            to_agent,
            Notification {
                elicitation_id: elicitation_id.clone(),
                seq: requested_seq,
                kind: NotificationKind::Request {
                    from_agent: creator.agent_id.clone(),
                    message: message.to_owned(),
                    schema: schema_raw.clone(),
                    expires_at_ns,
                    response_key: expected_response_key,
                },
            },
        );

        let delivered = EventDraft::new(
            EventKind::ElicitationDelivered,
            elicitation_id.clone(),
            creator.agent_id.clone(),
            json!({ "elicitation_id": elicitation_id, "to_agent": to_agent }),
        );
        if let Err(e) = self.apply_batch(&mut log, vec![delivered]).await {
            // The elicitation exists and was signalled; delivery bookkeeping
            // catches up via expiry or response.
            tracing::warn!(elicitation_id = %elicitation_id, err = %e, "delivered event not recorded");
        }

        tracing::debug!(
            elicitation_id = %elicitation_id,
            from = %creator.agent_id,
            to = %to_agent,
            timeout_seconds,
            "elicitation created"
        );
        Ok((elicitation_id, created_at_ns))
    }

    /// Accept, decline, or cancel an elicitation.
    pub async fn respond(
        &self,
        raw_token: &str,
        elicitation_id: &str,
        outcome: RespondOutcome,
        nonce: &str,
        response_signature: &str,
    ) -> Result<ElicitationStatus, BridgeError> {
        let actor = self.authenticate(raw_token).await?;

        if nonce.is_empty() {
            return Err(BridgeError::new(ErrorKind::InvalidArgument, "nonce required"));
        }
        if let Acquire::Denied { report_violation } =
            self.envelope.respond_limiter.try_acquire(&actor.agent_id)
        {
            if report_violation {
                let mut log = self.gate.lock().await;
                self.record_violation(
                    &mut log,
                    &actor.agent_id,
                    ViolationKind::RateLimited,
                    "respond bucket drained",
                )
                .await;
            }
            return Err(BridgeError::new(ErrorKind::RateLimited, "respond rate exceeded"));
        }

        let mut log = self.gate.lock().await;

        let elicitation = {
            let proj = self.projections.read().await;
            match proj.elicitations.get(elicitation_id) {
                Some(el) => el.clone(),
                None => {
                    return Err(match proj.elicitation(elicitation_id) {
                        Some(archived) => BridgeError::new(
                            ErrorKind::AlreadyTerminal,
                            format!("already {}", archived.status.as_str()),
                        ),
                        None => BridgeError::new(ErrorKind::NotFound, "no such elicitation"),
                    });
                }
            }
        };

        // Only the addressed responder may accept/decline; only the creator
        // may cancel. Violations never mutate the elicitation.
        let (required_actor, classifier) = match outcome {
            RespondOutcome::Accept(_) | RespondOutcome::Decline(_) => {
                (&elicitation.to_agent, "responder")
            }
            RespondOutcome::Cancel(_) => (&elicitation.from_agent, "creator"),
        };
        if &actor.agent_id != required_actor {
            self.record_violation(
                &mut log,
                &actor.agent_id,
                ViolationKind::Authorization,
                &format!("actor is not the {classifier}"),
            )
            .await;
            return Err(BridgeError::new(ErrorKind::NotAddressed, format!("not the {classifier}")));
        }

        // Response binding proves addressed-responder status for accept and
        // decline. Cancel claims creator identity, which the session token
        // already proves.
        if matches!(outcome, RespondOutcome::Accept(_) | RespondOutcome::Decline(_))
            && !self
                .envelope
                .verify_response_binding(&elicitation.expected_response_key, response_signature)
        {
            self.record_violation(
                &mut log,
                &actor.agent_id,
                ViolationKind::Binding,
                "response signature does not match binding key",
            )
            .await;
            return Err(BridgeError::new(ErrorKind::BindingMismatch, "response binding mismatch"));
        }

        if let RespondOutcome::Accept(ref data) = outcome {
            let valid = Schema::parse(&elicitation.schema).and_then(|s| s.validate(data));
            if let Err(detail) = valid {
                self.record_violation(&mut log, &actor.agent_id, ViolationKind::Schema, &detail)
                    .await;
                return Err(BridgeError::new(ErrorKind::SchemaInvalid, detail));
            }
        }

        if !self.envelope.nonces.is_fresh(&actor.agent_id, nonce) {
            self.record_violation(
                &mut log,
                &actor.agent_id,
                ViolationKind::NonceReplay,
                "response nonce replayed",
            )
            .await;
            return Err(BridgeError::new(ErrorKind::NonceReplay, "nonce already used"));
        }

        let (draft, status, notify_agent) = match outcome {
            RespondOutcome::Accept(data) => (
                EventDraft::new(
                    EventKind::ElicitationAccepted,
                    elicitation_id,
                    actor.agent_id.clone(),
                    json!({
                        "elicitation_id": elicitation_id,
                        "responder": actor.agent_id,
                        "data": data,
                        "nonce": nonce,
                    }),
                ),
                ElicitationStatus::Accepted,
                elicitation.from_agent.clone(),
            ),
            RespondOutcome::Decline(reason) => (
                EventDraft::new(
                    EventKind::ElicitationDeclined,
                    elicitation_id,
                    actor.agent_id.clone(),
                    json!({
                        "elicitation_id": elicitation_id,
                        "responder": actor.agent_id,
                        "reason": reason,
                        "nonce": nonce,
                    }),
                ),
                ElicitationStatus::Declined,
                elicitation.from_agent.clone(),
            ),
            RespondOutcome::Cancel(reason) => (
                EventDraft::new(
                    EventKind::ElicitationCancelled,
                    elicitation_id,
                    actor.agent_id.clone(),
                    json!({
                        "elicitation_id": elicitation_id,
                        "by_agent": actor.agent_id,
                        "reason": reason,
                    }),
                ),
                ElicitationStatus::Cancelled,
                elicitation.to_agent.clone(),
            ),
        };

        let events = self.apply_batch(&mut log, vec![draft]).await?;
        self.envelope.nonces.observe(&actor.agent_id, nonce);
        drop(log);

        let terminal = {
            let proj = self.projections.read().await;
            proj.elicitation(elicitation_id).cloned()
        };
        self.hub.push(
            &notify_agent,
            Notification {
                elicitation_id: elicitation_id.to_owned(),
                seq: events.first().map(|e| e.seq).unwrap_or_default(),
                kind: NotificationKind::Terminal {
                    state: status,
                    response: terminal.as_ref().and_then(|el| el.response.clone()),
                    reason: terminal.as_ref().and_then(|el| el.reason.clone()),
                },
            },
        );

        tracing::debug!(
            elicitation_id = %elicitation_id,
            actor = %actor.agent_id,
            terminal = status.as_str(),
            "elicitation resolved"
        );
        Ok(status)
    }

    /// Drain the caller's inbox, blocking up to `wait` for the first item.
    pub async fn poll(
        &self,
        raw_token: &str,
        wait: Option<Duration>,
        filter: PollFilter,
    ) -> Result<(Vec<Notification>, bool), BridgeError> {
        let record = self.authenticate(raw_token).await?;
        let inbox = self.hub.inbox(&record.agent_id);
        let wait = wait.unwrap_or(Duration::ZERO).min(self.config.max_wait());
        let result = if wait.is_zero() {
            inbox.drain_where(|n| filter.matches(n))
        } else {
            inbox.wait_drain_where(wait, |n| filter.matches(n)).await
        };
        Ok(result)
    }

    /// Projection read for either party.
    pub async fn get_elicitation(
        &self,
        raw_token: &str,
        elicitation_id: &str,
    ) -> Result<Elicitation, BridgeError> {
        let record = self.authenticate(raw_token).await?;
        let proj = self.projections.read().await;
        let Some(el) = proj.elicitation(elicitation_id) else {
            return Err(BridgeError::new(ErrorKind::NotFound, "no such elicitation"));
        };
        // Existence is not leaked to third parties.
        if el.from_agent != record.agent_id && el.to_agent != record.agent_id {
            return Err(BridgeError::new(ErrorKind::NotFound, "no such elicitation"));
        }
        Ok(el.clone())
    }

    // -- Expiry ---------------------------------------------------------------

    /// Run the expiry scanner until shutdown.
    pub fn spawn_expiry(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(EXPIRY_TICK);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = engine.shutdown.cancelled() => break,
                    _ = tick.tick() => engine.expire_due().await,
                }
            }
        });
    }

    /// Transition every due elicitation to `Expired`. Already-terminal
    /// entries are no-ops: the heap outlives its elicitations by design.
    pub(crate) async fn expire_due(&self) {
        let now = self.clock.now_ns();
        let due: Vec<String> = {
            let mut queue = self.expiry_queue.lock();
            let mut due = Vec::new();
            while queue.peek().is_some_and(|Reverse((at, _))| *at <= now) {
                if let Some(Reverse((_, id))) = queue.pop() {
                    due.push(id);
                }
            }
            due
        };
        if due.is_empty() {
            return;
        }

        let mut log = self.gate.lock().await;
        let mut pending = due.into_iter();
        while let Some(id) = pending.next() {
            let parties = {
                let proj = self.projections.read().await;
                proj.elicitations.get(&id).map(|el| (el.from_agent.clone(), el.to_agent.clone()))
            };
            let Some((from_agent, to_agent)) = parties else {
                continue;
            };

            let draft = EventDraft::new(
                EventKind::ElicitationExpired,
                id.clone(),
                "engine",
                json!({ "elicitation_id": id }),
            );
            match self.apply_batch(&mut log, vec![draft]).await {
                Ok(events) => {
                    let seq = events.first().map(|e| e.seq).unwrap_or_default();
                    for agent in [&from_agent, &to_agent] {
                        self.hub.push(
                            agent,
                            Notification {
                                elicitation_id: id.clone(),
                                seq,
                                kind: NotificationKind::Terminal {
                                    state: ElicitationStatus::Expired,
                                    response: None,
                                    reason: None,
                                },
                            },
                        );
                    }
                    tracing::debug!(elicitation_id = %id, "elicitation expired");
                }
                Err(e) if e.kind == ErrorKind::StorageUnavailable => {
                    // Requeue everything still due and retry on a later tick.
                    let mut queue = self.expiry_queue.lock();
                    queue.push(Reverse((now, id)));
                    for rest in pending.by_ref() {
                        queue.push(Reverse((now, rest)));
                    }
                    tracing::warn!(err = %e, "expiry append deferred");
                    break;
                }
                Err(e) => {
                    tracing::error!(err = %e, "expiry append failed");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
