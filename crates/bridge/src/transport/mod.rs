// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP transport for the bridge.

pub mod http;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::BridgeState;

/// Build the axum `Router` with all bridge routes.
pub fn build_router(state: Arc<BridgeState>) -> Router {
    Router::new()
        // Health (no auth)
        .route("/health", get(http::health))
        // Sessions
        .route("/session", post(http::create_session))
        .route("/session/revoke", post(http::revoke_session))
        // Expert registry
        .route("/expert/register", post(http::register_expert))
        .route("/expert/deregister", post(http::deregister_expert))
        .route("/experts", get(http::list_experts))
        // Elicitations
        .route("/elicitation", post(http::create_elicitation))
        .route("/elicitation/pending", get(http::pending))
        .route("/elicitation/respond", post(http::respond))
        .route("/elicitation/{id}", get(http::get_elicitation))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
