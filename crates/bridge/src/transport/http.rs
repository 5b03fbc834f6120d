// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the bridge API.
//!
//! POST bodies carry the session token in a `token` field; GET endpoints
//! take it as a `token` query parameter. Errors use the flat
//! `{ "error": "<kind>", "detail": "..." }` envelope.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::engine::{PollFilter, RespondOutcome};
use crate::error::ErrorKind;
use crate::event::rfc3339_ns;
use crate::inbox::{Notification, NotificationKind};
use crate::projection::Elicitation;
use crate::state::BridgeState;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub last_seq: u64,
    pub live_sessions: usize,
    pub experts: usize,
    pub active_elicitations: usize,
    pub uptime_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub agent_id: String,
    #[serde(default)]
    pub ip_hint: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub token: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenOnlyRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Debug, Deserialize)]
pub struct RegisterExpertRequest {
    pub token: String,
    pub capabilities: Vec<String>,
    pub availability: String,
}

#[derive(Debug, Serialize)]
pub struct ExpertInfo {
    pub agent_id: String,
    pub capabilities: Vec<String>,
    pub availability: String,
}

#[derive(Debug, Serialize)]
pub struct ExpertsResponse {
    pub experts: Vec<ExpertInfo>,
}

#[derive(Debug, Deserialize)]
pub struct CreateElicitationRequest {
    pub token: String,
    pub to_agent: String,
    pub message: String,
    pub schema: serde_json::Value,
    pub timeout_seconds: u64,
    pub nonce: String,
}

#[derive(Debug, Serialize)]
pub struct CreateElicitationResponse {
    pub elicitation_id: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct PendingQuery {
    pub token: String,
    #[serde(default)]
    pub wait_ms: Option<u64>,
    /// Optional drain filter: `requests` or `terminals`.
    #[serde(default)]
    pub filter: Option<String>,
}

/// One drained inbox item. Requests carry the response key, the capability
/// the addressed responder presents back as its response signature.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingItem {
    Request {
        id: String,
        from_agent: String,
        message: String,
        schema: serde_json::Value,
        expires_at: String,
        response_key: String,
    },
    Terminal {
        id: String,
        terminal_state: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

#[derive(Debug, Serialize)]
pub struct PendingResponse {
    pub elicitations: Vec<PendingItem>,
    pub truncated: bool,
}

#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub token: String,
    pub elicitation_id: String,
    pub outcome: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub reason: Option<String>,
    pub nonce: String,
    #[serde(default)]
    pub response_signature: String,
}

#[derive(Debug, Serialize)]
pub struct RespondResponse {
    pub ok: bool,
    pub terminal_state: String,
}

#[derive(Debug, Serialize)]
pub struct ElicitationView {
    pub id: String,
    pub from_agent: String,
    pub to_agent: String,
    pub message: String,
    pub schema: serde_json::Value,
    pub status: String,
    pub created_at: String,
    pub expires_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Present for the addressed responder only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_key: Option<String>,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /health`
pub async fn health(State(s): State<Arc<BridgeState>>) -> impl IntoResponse {
    let stats = s.engine.stats().await;
    Json(HealthResponse {
        status: "running".to_owned(),
        last_seq: stats.last_seq,
        live_sessions: stats.live_sessions,
        experts: stats.experts,
        active_elicitations: stats.active_elicitations,
        uptime_secs: s.started_at.elapsed().as_secs(),
    })
}

/// `POST /session` — authenticate an agent and mint a session token.
pub async fn create_session(
    State(s): State<Arc<BridgeState>>,
    Json(req): Json<CreateSessionRequest>,
) -> impl IntoResponse {
    match s.engine.create_session(&req.agent_id, req.ip_hint, req.user_agent).await {
        Ok((token, created_at_ns)) => Json(CreateSessionResponse {
            session_id: token.session_id.clone(),
            token: token.encode(),
            created_at: rfc3339_ns(created_at_ns),
        })
        .into_response(),
        Err(e) => e.to_http_response().into_response(),
    }
}

/// `POST /session/revoke` — explicitly revoke the presented session.
pub async fn revoke_session(
    State(s): State<Arc<BridgeState>>,
    Json(req): Json<TokenOnlyRequest>,
) -> impl IntoResponse {
    match s.engine.revoke_session(&req.token).await {
        Ok(()) => Json(OkResponse { ok: true }).into_response(),
        Err(e) => e.to_http_response().into_response(),
    }
}

/// `POST /expert/register` — advertise capabilities.
pub async fn register_expert(
    State(s): State<Arc<BridgeState>>,
    Json(req): Json<RegisterExpertRequest>,
) -> impl IntoResponse {
    match s.engine.register_expert(&req.token, req.capabilities, &req.availability).await {
        Ok(()) => Json(OkResponse { ok: true }).into_response(),
        Err(e) => e.to_http_response().into_response(),
    }
}

/// `POST /expert/deregister` — withdraw the caller's advertisement.
pub async fn deregister_expert(
    State(s): State<Arc<BridgeState>>,
    Json(req): Json<TokenOnlyRequest>,
) -> impl IntoResponse {
    match s.engine.deregister_expert(&req.token).await {
        Ok(()) => Json(OkResponse { ok: true }).into_response(),
        Err(e) => e.to_http_response().into_response(),
    }
}

/// `GET /experts` — list registered experts.
pub async fn list_experts(
    State(s): State<Arc<BridgeState>>,
    Query(q): Query<TokenQuery>,
) -> impl IntoResponse {
    match s.engine.experts(&q.token).await {
        Ok(entries) => Json(ExpertsResponse {
            experts: entries
                .into_iter()
                .map(|e| ExpertInfo {
                    agent_id: e.agent_id,
                    capabilities: e.capabilities,
                    availability: e.availability.as_str().to_owned(),
                })
                .collect(),
        })
        .into_response(),
        Err(e) => e.to_http_response().into_response(),
    }
}

/// `POST /elicitation` — create an elicitation.
pub async fn create_elicitation(
    State(s): State<Arc<BridgeState>>,
    Json(req): Json<CreateElicitationRequest>,
) -> impl IntoResponse {
    match s
        .engine
        .create_elicitation(
            &req.token,
            &req.to_agent,
            &req.message,
            &req.schema,
            req.timeout_seconds,
            &req.nonce,
        )
        .await
    {
        Ok((elicitation_id, created_at_ns)) => Json(CreateElicitationResponse {
            elicitation_id,
            created_at: rfc3339_ns(created_at_ns),
        })
        .into_response(),
        Err(e) => e.to_http_response().into_response(),
    }
}

/// `GET /elicitation/pending` — drain the caller's inbox, optionally
/// blocking up to `wait_ms`.
pub async fn pending(
    State(s): State<Arc<BridgeState>>,
    Query(q): Query<PendingQuery>,
) -> impl IntoResponse {
    let filter = match q.filter.as_deref() {
        None => PollFilter::All,
        Some("requests") => PollFilter::Requests,
        Some("terminals") => PollFilter::Terminals,
        Some(other) => {
            return ErrorKind::InvalidArgument
                .to_http_response(format!("unknown filter {other}"))
                .into_response()
        }
    };
    let wait = q.wait_ms.map(Duration::from_millis);
    match s.engine.poll(&q.token, wait, filter).await {
        Ok((items, truncated)) => Json(PendingResponse {
            elicitations: items.into_iter().map(pending_item).collect(),
            truncated,
        })
        .into_response(),
        Err(e) => e.to_http_response().into_response(),
    }
}

/// `POST /elicitation/respond` — accept, decline, or cancel.
pub async fn respond(
    State(s): State<Arc<BridgeState>>,
    Json(req): Json<RespondRequest>,
) -> impl IntoResponse {
    let outcome = match req.outcome.as_str() {
        "accept" => match req.data {
            Some(data) => RespondOutcome::Accept(data),
            None => {
                return ErrorKind::InvalidArgument
                    .to_http_response("accept requires data")
                    .into_response()
            }
        },
        "decline" => RespondOutcome::Decline(req.reason.unwrap_or_default()),
        "cancel" => RespondOutcome::Cancel(req.reason),
        other => {
            return ErrorKind::InvalidArgument
                .to_http_response(format!("unknown outcome {other}"))
                .into_response()
        }
    };
    match s
        .engine
        .respond(&req.token, &req.elicitation_id, outcome, &req.nonce, &req.response_signature)
        .await
    {
        Ok(status) => {
            Json(RespondResponse { ok: true, terminal_state: status.as_str().to_owned() })
                .into_response()
        }
        Err(e) => e.to_http_response().into_response(),
    }
}

/// `GET /elicitation/{id}` — projection read for either party.
pub async fn get_elicitation(
    State(s): State<Arc<BridgeState>>,
    Path(id): Path<String>,
    Query(q): Query<TokenQuery>,
) -> impl IntoResponse {
    // The engine checks the caller is a party; the responder additionally
    // sees the binding capability in the view.
    let caller =
        crate::registry::SessionToken::parse(&q.token).map(|t| t.agent_id).unwrap_or_default();
    match s.engine.get_elicitation(&q.token, &id).await {
        Ok(el) => Json(elicitation_view(el, &caller)).into_response(),
        Err(e) => e.to_http_response().into_response(),
    }
}

// -- View mapping -------------------------------------------------------------

fn pending_item(notification: Notification) -> PendingItem {
    match notification.kind {
        NotificationKind::Request { from_agent, message, schema, expires_at_ns, response_key } => {
            PendingItem::Request {
                id: notification.elicitation_id,
                from_agent,
                message,
                schema,
                expires_at: rfc3339_ns(expires_at_ns),
                response_key,
            }
        }
        NotificationKind::Terminal { state, response, reason } => PendingItem::Terminal {
            id: notification.elicitation_id,
            terminal_state: state.as_str().to_owned(),
            data: response,
            reason,
        },
    }
}

fn elicitation_view(el: Elicitation, caller: &str) -> ElicitationView {
    let response_key =
        (el.to_agent == caller).then(|| el.expected_response_key.clone());
    ElicitationView {
        id: el.id,
        from_agent: el.from_agent,
        to_agent: el.to_agent,
        message: el.message,
        schema: el.schema,
        status: el.status.as_str().to_owned(),
        created_at: rfc3339_ns(el.created_at_ns),
        expires_at: rfc3339_ns(el.expires_at_ns),
        terminal_at: el.terminal_at_ns.map(rfc3339_ns),
        data: el.response,
        reason: el.reason,
        response_key,
    }
}
