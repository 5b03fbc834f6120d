// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `parley` binary and exercise
//! the HTTP surface over real TCP.

use std::time::Duration;

use serde_json::json;
use serial_test::serial;

use parley_specs::BridgeProcess;

const TIMEOUT: Duration = Duration::from_secs(10);

fn bool_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": { "ok": { "type": "boolean" } },
        "required": ["ok"]
    })
}

async fn open_session(
    client: &reqwest::Client,
    base: &str,
    agent: &str,
) -> anyhow::Result<String> {
    let body: serde_json::Value = client
        .post(format!("{base}/session"))
        .json(&json!({ "agent_id": agent }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    body["token"].as_str().map(str::to_owned).ok_or_else(|| anyhow::anyhow!("no token in {body}"))
}

#[tokio::test]
#[serial]
async fn http_health() -> anyhow::Result<()> {
    let bridge = BridgeProcess::start()?;
    bridge.wait_healthy(TIMEOUT).await?;

    let resp: serde_json::Value =
        reqwest::get(format!("{}/health", bridge.base_url())).await?.json().await?;

    assert_eq!(resp["status"], "running");
    assert_eq!(resp["last_seq"], 0);
    assert!(resp["uptime_secs"].is_number());
    Ok(())
}

#[tokio::test]
#[serial]
async fn elicitation_happy_path() -> anyhow::Result<()> {
    let bridge = BridgeProcess::start()?;
    bridge.wait_healthy(TIMEOUT).await?;
    let base = bridge.base_url();
    let client = reqwest::Client::new();

    let alice = open_session(&client, &base, "alice").await?;
    let bob = open_session(&client, &base, "bob").await?;

    let created: serde_json::Value = client
        .post(format!("{base}/elicitation"))
        .json(&json!({
            "token": alice,
            "to_agent": "bob",
            "message": "ship it?",
            "schema": bool_schema(),
            "timeout_seconds": 30,
            "nonce": "smoke-n1",
        }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    let id = created["elicitation_id"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("no id in {created}"))?
        .to_owned();

    let pending: serde_json::Value = client
        .get(format!("{base}/elicitation/pending"))
        .query(&[("token", bob.as_str()), ("wait_ms", "2000")])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    let key = pending["elicitations"][0]["response_key"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("no response key in {pending}"))?
        .to_owned();

    let resolved: serde_json::Value = client
        .post(format!("{base}/elicitation/respond"))
        .json(&json!({
            "token": bob,
            "elicitation_id": id,
            "outcome": "accept",
            "data": { "ok": true },
            "nonce": "smoke-rn1",
            "response_signature": key,
        }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(resolved["terminal_state"], "accepted");

    let view: serde_json::Value = client
        .get(format!("{base}/elicitation/{id}"))
        .query(&[("token", alice.as_str())])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(view["status"], "accepted");
    assert_eq!(view["data"], json!({ "ok": true }));
    Ok(())
}

#[tokio::test]
#[serial]
async fn abrupt_restart_preserves_acknowledged_state() -> anyhow::Result<()> {
    // The dir must outlive both process incarnations.
    let tmp = tempfile::tempdir()?;
    let mut bridge = BridgeProcess::start_with_dir(tmp.path())?;
    bridge.wait_healthy(TIMEOUT).await?;
    let client = reqwest::Client::new();

    let (alice, id);
    {
        let base = bridge.base_url();
        alice = open_session(&client, &base, "alice").await?;
        open_session(&client, &base, "bob").await?;
        let created: serde_json::Value = client
            .post(format!("{base}/elicitation"))
            .json(&json!({
                "token": alice,
                "to_agent": "bob",
                "message": "survives restarts?",
                "schema": bool_schema(),
                "timeout_seconds": 300,
                "nonce": "smoke-n1",
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        id = created["elicitation_id"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("no id in {created}"))?
            .to_owned();
    }

    bridge.kill()?;

    let bridge = BridgeProcess::start_with_dir(tmp.path())?;
    bridge.wait_healthy(TIMEOUT).await?;
    let base = bridge.base_url();

    // The old token still verifies and the elicitation replayed.
    let view: serde_json::Value = client
        .get(format!("{base}/elicitation/{id}"))
        .query(&[("token", alice.as_str())])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(view["to_agent"], "bob");
    assert!(view["status"] == "delivered" || view["status"] == "pending", "got {view}");
    Ok(())
}
