// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the bridge HTTP API.
//!
//! Uses `axum_test::TestServer` — no real TCP needed.

use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use parley::config::{BridgeConfig, Durability};
use parley::engine::Engine;
use parley::state::BridgeState;
use parley::transport::build_router;

fn test_config(data_dir: std::path::PathBuf) -> BridgeConfig {
    BridgeConfig {
        host: "127.0.0.1".into(),
        port: 0,
        data_dir,
        segment_max_bytes: 1024 * 1024,
        durability: Durability::FlushNone,
        snapshot_interval_events: 1000,
        idle_session_timeout_secs: 3600,
        max_sessions_per_agent: 3,
        create_rate: 1000,
        respond_rate: 1000,
        burst: 100,
        max_wait_ms: 30_000,
        inbox_capacity: 256,
        timeout_cap_seconds: 600,
        archive_retention_secs: 3600,
    }
}

fn test_server(config: BridgeConfig) -> anyhow::Result<(TestServer, Arc<Engine>)> {
    let engine = Arc::new(Engine::open(config, CancellationToken::new())?);
    let state = Arc::new(BridgeState::new(Arc::clone(&engine)));
    let server = TestServer::new(build_router(state))
        .map_err(|e| anyhow::anyhow!("failed to create test server: {e}"))?;
    Ok((server, engine))
}

fn bool_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": { "ok": { "type": "boolean" } },
        "required": ["ok"]
    })
}

async fn open_session(server: &TestServer, agent: &str) -> anyhow::Result<String> {
    let resp = server.post("/session").json(&json!({ "agent_id": agent })).await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    body["token"].as_str().map(str::to_owned).ok_or_else(|| anyhow::anyhow!("no token in {body}"))
}

/// Create an elicitation and drain the responder's inbox for its key.
async fn elicit(
    server: &TestServer,
    creator: &str,
    responder: &str,
    nonce: &str,
) -> anyhow::Result<(String, String)> {
    let resp = server
        .post("/elicitation")
        .json(&json!({
            "token": creator,
            "to_agent": "bob",
            "message": "please confirm",
            "schema": bool_schema(),
            "timeout_seconds": 30,
            "nonce": nonce,
        }))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    let id = body["elicitation_id"]
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| anyhow::anyhow!("no elicitation_id in {body}"))?;

    let resp = server
        .get("/elicitation/pending")
        .add_query_param("token", responder)
        .add_query_param("wait_ms", "1000")
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    let key = body["elicitations"]
        .as_array()
        .and_then(|items| {
            items
                .iter()
                .find(|item| item["id"] == id.as_str() && item["kind"] == "request")
                .and_then(|item| item["response_key"].as_str())
        })
        .map(str::to_owned)
        .ok_or_else(|| anyhow::anyhow!("request item missing in {body}"))?;
    Ok((id, key))
}

#[tokio::test]
async fn health_reports_counts() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let (server, _engine) = test_server(test_config(tmp.path().to_owned()))?;

    let resp = server.get("/health").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "running");
    assert_eq!(body["live_sessions"], 0);

    open_session(&server, "alice").await?;
    let body: serde_json::Value = server.get("/health").await.json();
    assert_eq!(body["live_sessions"], 1);
    assert_eq!(body["last_seq"], 1);
    Ok(())
}

#[tokio::test]
async fn happy_path_accept_end_to_end() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let (server, _engine) = test_server(test_config(tmp.path().to_owned()))?;
    let alice = open_session(&server, "alice").await?;
    let bob = open_session(&server, "bob").await?;

    let (id, key) = elicit(&server, &alice, &bob, "n1").await?;

    let resp = server
        .post("/elicitation/respond")
        .json(&json!({
            "token": bob,
            "elicitation_id": id,
            "outcome": "accept",
            "data": { "ok": true },
            "nonce": "rn1",
            "response_signature": key,
        }))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["ok"], true);
    assert_eq!(body["terminal_state"], "accepted");

    // The creator observes the terminal outcome with the payload.
    let resp = server
        .get("/elicitation/pending")
        .add_query_param("token", &alice)
        .add_query_param("wait_ms", "1000")
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    let terminal = body["elicitations"]
        .as_array()
        .and_then(|items| items.iter().find(|item| item["id"] == id.as_str()))
        .ok_or_else(|| anyhow::anyhow!("no terminal item in {body}"))?;
    assert_eq!(terminal["kind"], "terminal");
    assert_eq!(terminal["terminal_state"], "accepted");
    assert_eq!(terminal["data"], json!({ "ok": true }));

    let resp = server.get(&format!("/elicitation/{id}")).add_query_param("token", &alice).await;
    resp.assert_status_ok();
    let view: serde_json::Value = resp.json();
    assert_eq!(view["status"], "accepted");
    assert_eq!(view["data"], json!({ "ok": true }));
    Ok(())
}

#[tokio::test]
async fn impostor_rejected_then_responder_succeeds() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let (server, _engine) = test_server(test_config(tmp.path().to_owned()))?;
    let alice = open_session(&server, "alice").await?;
    let bob = open_session(&server, "bob").await?;
    let carol = open_session(&server, "carol").await?;

    let (id, key) = elicit(&server, &alice, &bob, "n1").await?;

    let resp = server
        .post("/elicitation/respond")
        .json(&json!({
            "token": carol,
            "elicitation_id": id,
            "outcome": "accept",
            "data": { "ok": true },
            "nonce": "cn1",
            "response_signature": "forged",
        }))
        .await;
    resp.assert_status(axum::http::StatusCode::FORBIDDEN);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"], "not_addressed");

    // The elicitation is still answerable by the real responder.
    let resp = server
        .post("/elicitation/respond")
        .json(&json!({
            "token": bob,
            "elicitation_id": id,
            "outcome": "accept",
            "data": { "ok": true },
            "nonce": "bn1",
            "response_signature": key,
        }))
        .await;
    resp.assert_status_ok();
    Ok(())
}

#[tokio::test]
async fn create_replay_returns_nonce_replay() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let (server, _engine) = test_server(test_config(tmp.path().to_owned()))?;
    let alice = open_session(&server, "alice").await?;
    open_session(&server, "bob").await?;

    let request = json!({
        "token": alice,
        "to_agent": "bob",
        "message": "m",
        "schema": bool_schema(),
        "timeout_seconds": 30,
        "nonce": "n1",
    });
    server.post("/elicitation").json(&request).await.assert_status_ok();

    let resp = server.post("/elicitation").json(&request).await;
    resp.assert_status(axum::http::StatusCode::CONFLICT);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"], "nonce_replay");
    Ok(())
}

#[tokio::test]
async fn cancel_by_creator_then_accept_is_terminal() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let (server, _engine) = test_server(test_config(tmp.path().to_owned()))?;
    let alice = open_session(&server, "alice").await?;
    let bob = open_session(&server, "bob").await?;

    let (id, key) = elicit(&server, &alice, &bob, "n1").await?;

    let resp = server
        .post("/elicitation/respond")
        .json(&json!({
            "token": alice,
            "elicitation_id": id,
            "outcome": "cancel",
            "reason": "obsolete",
            "nonce": "an1",
        }))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["terminal_state"], "cancelled");

    let resp = server
        .post("/elicitation/respond")
        .json(&json!({
            "token": bob,
            "elicitation_id": id,
            "outcome": "accept",
            "data": { "ok": true },
            "nonce": "bn1",
            "response_signature": key,
        }))
        .await;
    resp.assert_status(axum::http::StatusCode::CONFLICT);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"], "already_terminal");

    // Bob's inbox carries the terminal notification.
    let resp = server.get("/elicitation/pending").add_query_param("token", &bob).await;
    let body: serde_json::Value = resp.json();
    let cancelled = body["elicitations"]
        .as_array()
        .is_some_and(|items| {
            items.iter().any(|item| {
                item["id"] == id.as_str() && item["terminal_state"] == "cancelled"
            })
        });
    assert!(cancelled, "terminal cancel missing from {body}");
    Ok(())
}

#[tokio::test]
async fn inbox_overflow_sets_truncated_hint() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut config = test_config(tmp.path().to_owned());
    config.inbox_capacity = 2;
    let (server, _engine) = test_server(config)?;
    let alice = open_session(&server, "alice").await?;
    open_session(&server, "bob").await?;

    for n in 0..3 {
        let resp = server
            .post("/elicitation")
            .json(&json!({
                "token": alice,
                "to_agent": "bob",
                "message": format!("m{n}"),
                "schema": bool_schema(),
                "timeout_seconds": 30,
                "nonce": format!("n{n}"),
            }))
            .await;
        resp.assert_status_ok();
    }

    let bob = open_session(&server, "bob").await?;
    let resp = server.get("/elicitation/pending").add_query_param("token", &bob).await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["truncated"], true);
    assert_eq!(body["elicitations"].as_array().map(Vec::len), Some(2));
    Ok(())
}

#[tokio::test]
async fn timeout_cap_boundary_over_http() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let (server, _engine) = test_server(test_config(tmp.path().to_owned()))?;
    let alice = open_session(&server, "alice").await?;
    open_session(&server, "bob").await?;

    let at_cap = json!({
        "token": alice,
        "to_agent": "bob",
        "message": "m",
        "schema": bool_schema(),
        "timeout_seconds": 600,
        "nonce": "n-cap",
    });
    server.post("/elicitation").json(&at_cap).await.assert_status_ok();

    let mut over_cap = at_cap;
    over_cap["timeout_seconds"] = json!(601);
    over_cap["nonce"] = json!("n-over");
    let resp = server.post("/elicitation").json(&over_cap).await;
    resp.assert_status(axum::http::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"], "invalid_argument");
    Ok(())
}

#[tokio::test]
async fn bad_token_yields_unauthenticated_envelope() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let (server, _engine) = test_server(test_config(tmp.path().to_owned()))?;

    let resp = server
        .post("/expert/register")
        .json(&json!({ "token": "garbage", "capabilities": [], "availability": "available" }))
        .await;
    resp.assert_status(axum::http::StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"], "unauthenticated");
    assert!(body["detail"].is_string());
    Ok(())
}

#[tokio::test]
async fn expert_registration_and_listing() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let (server, _engine) = test_server(test_config(tmp.path().to_owned()))?;
    let alice = open_session(&server, "alice").await?;
    let bob = open_session(&server, "bob").await?;

    let resp = server
        .post("/expert/register")
        .json(&json!({
            "token": bob,
            "capabilities": ["code-review", "refactoring"],
            "availability": "available",
        }))
        .await;
    resp.assert_status_ok();

    let resp = server.get("/experts").add_query_param("token", &alice).await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["experts"][0]["agent_id"], "bob");
    assert_eq!(body["experts"][0]["capabilities"], json!(["code-review", "refactoring"]));

    // Re-registration replaces the advertisement.
    server
        .post("/expert/register")
        .json(&json!({ "token": bob, "capabilities": ["triage"], "availability": "busy" }))
        .await
        .assert_status_ok();
    let body: serde_json::Value =
        server.get("/experts").add_query_param("token", &alice).await.json();
    assert_eq!(body["experts"][0]["capabilities"], json!(["triage"]));
    assert_eq!(body["experts"][0]["availability"], "busy");

    server
        .post("/expert/deregister")
        .json(&json!({ "token": bob }))
        .await
        .assert_status_ok();
    let body: serde_json::Value =
        server.get("/experts").add_query_param("token", &alice).await.json();
    assert_eq!(body["experts"].as_array().map(Vec::len), Some(0));
    Ok(())
}

#[tokio::test]
async fn expiry_over_http() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let (server, engine) = test_server(test_config(tmp.path().to_owned()))?;
    engine.spawn_expiry();
    let alice = open_session(&server, "alice").await?;
    open_session(&server, "bob").await?;

    let resp = server
        .post("/elicitation")
        .json(&json!({
            "token": alice,
            "to_agent": "bob",
            "message": "m",
            "schema": bool_schema(),
            "timeout_seconds": 1,
            "nonce": "n1",
        }))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    let id = body["elicitation_id"].as_str().unwrap_or_default().to_owned();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let view: serde_json::Value = server
            .get(&format!("/elicitation/{id}"))
            .add_query_param("token", &alice)
            .await
            .json();
        if view["status"] == "expired" {
            return Ok(());
        }
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "never expired: {view}");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
