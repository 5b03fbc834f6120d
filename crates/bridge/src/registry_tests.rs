// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::config;
use crate::security::SecurityEnvelope;

use super::SessionToken;

fn envelope() -> SecurityEnvelope {
    SecurityEnvelope::for_tests(&config::test_config(std::path::PathBuf::from("/unused")))
}

#[test]
fn issue_encode_parse_verify_round_trip() -> anyhow::Result<()> {
    let env = envelope();
    let token = SessionToken::issue(&env, "alice", "s-1", 42);
    let encoded = token.encode();

    let parsed = SessionToken::parse(&encoded)
        .ok_or_else(|| anyhow::anyhow!("token failed to parse"))?;
    assert_eq!(parsed, token);
    assert!(parsed.verify(&env));
    Ok(())
}

#[test]
fn agent_ids_with_colons_survive() -> anyhow::Result<()> {
    let env = envelope();
    let token = SessionToken::issue(&env, "org:team:alice", "s-1", 42);
    let parsed = SessionToken::parse(&token.encode())
        .ok_or_else(|| anyhow::anyhow!("token failed to parse"))?;
    assert_eq!(parsed.agent_id, "org:team:alice");
    assert!(parsed.verify(&env));
    Ok(())
}

#[test]
fn tampered_tokens_fail_verification() -> anyhow::Result<()> {
    let env = envelope();
    let token = SessionToken::issue(&env, "alice", "s-1", 42);

    let mut forged = token.clone();
    forged.agent_id = "mallory".into();
    assert!(!forged.verify(&env));

    let mut replayed = token;
    replayed.created_at_ns = 43;
    assert!(!replayed.verify(&env));
    Ok(())
}

#[test]
fn malformed_tokens_do_not_parse() {
    for raw in ["", "abc", "a:b", "a:b:c", "a:b:notanumber:sig", ":s:1:sig", "a::1:sig"] {
        assert!(SessionToken::parse(raw).is_none(), "parsed {raw:?}");
    }
}
