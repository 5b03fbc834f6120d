// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Security envelope: key derivation, response binding, anti-replay, and
//! rate limiting.
//!
//! Session keys derive from a process-wide master secret and the session id,
//! so the event log never carries key material and replay reconstructs the
//! registry without persisting secrets.

pub mod nonce;
pub mod rate;

use std::path::Path;

use ring::hmac;

use crate::config::BridgeConfig;

/// Name of the master secret file under the data dir.
const MASTER_KEY_FILE: &str = "master.key";

/// Classifier carried on `SecurityViolation` events. A signal, not evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    Authentication,
    Authorization,
    Binding,
    NonceReplay,
    RateLimited,
    Schema,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::Binding => "binding",
            Self::NonceReplay => "nonce_replay",
            Self::RateLimited => "rate_limited",
            Self::Schema => "schema",
        }
    }
}

pub struct SecurityEnvelope {
    master: hmac::Key,
    pub nonces: nonce::NonceStore,
    pub create_limiter: rate::RateLimiter,
    pub respond_limiter: rate::RateLimiter,
}

impl SecurityEnvelope {
    /// Build the envelope, loading or creating the master secret.
    pub fn open(config: &BridgeConfig) -> std::io::Result<Self> {
        let master = load_or_create_master(&config.data_dir)?;
        Ok(Self {
            master: hmac::Key::new(hmac::HMAC_SHA256, &master),
            nonces: nonce::NonceStore::new(config.nonce_retention()),
            create_limiter: rate::RateLimiter::new(config.create_rate, config.burst),
            respond_limiter: rate::RateLimiter::new(config.respond_rate, config.burst),
        })
    }

    #[cfg(test)]
    pub fn for_tests(config: &BridgeConfig) -> Self {
        Self {
            master: hmac::Key::new(hmac::HMAC_SHA256, b"test-master-secret"),
            nonces: nonce::NonceStore::new(config.nonce_retention()),
            create_limiter: rate::RateLimiter::new(config.create_rate, config.burst),
            respond_limiter: rate::RateLimiter::new(config.respond_rate, config.burst),
        }
    }

    /// Per-session HMAC key: `HMAC(master, "session:" ‖ session_id)`.
    fn session_key(&self, session_id: &str) -> hmac::Key {
        let tag = hmac::sign(&self.master, format!("session:{session_id}").as_bytes());
        hmac::Key::new(hmac::HMAC_SHA256, tag.as_ref())
    }

    /// Signature bound into a session token.
    pub fn token_signature(&self, agent_id: &str, session_id: &str, created_at_ns: u64) -> String {
        let key = self.session_key(session_id);
        let tag = hmac::sign(&key, format!("{agent_id}:{session_id}:{created_at_ns}").as_bytes());
        hex::encode(tag.as_ref())
    }

    /// Constant-time check of a presented token signature.
    pub fn verify_token_signature(
        &self,
        agent_id: &str,
        session_id: &str,
        created_at_ns: u64,
        presented: &str,
    ) -> bool {
        let expected = self.token_signature(agent_id, session_id, created_at_ns);
        constant_time_eq(expected.as_bytes(), presented.as_bytes())
    }

    /// Response-binding key for an elicitation:
    /// `HMAC(session_key(responder), elicitation_id ‖ nonce)`.
    ///
    /// Stored with the elicitation and delivered only to the addressed
    /// responder; the engine compares the presented signature against it in
    /// constant time, so no other agent can terminate the exchange.
    pub fn response_binding_key(
        &self,
        responder_session_id: &str,
        elicitation_id: &str,
        nonce: &str,
    ) -> String {
        let key = self.session_key(responder_session_id);
        let tag = hmac::sign(&key, format!("{elicitation_id}{nonce}").as_bytes());
        hex::encode(tag.as_ref())
    }

    /// Constant-time comparison of a presented response signature.
    pub fn verify_response_binding(&self, expected: &str, presented: &str) -> bool {
        constant_time_eq(expected.as_bytes(), presented.as_bytes())
    }
}

/// Constant-time string comparison to prevent timing side-channel attacks.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    ring::constant_time::verify_slices_are_equal(a, b).is_ok()
}

fn load_or_create_master(data_dir: &Path) -> std::io::Result<[u8; 32]> {
    std::fs::create_dir_all(data_dir)?;
    let path = data_dir.join(MASTER_KEY_FILE);

    if path.exists() {
        let contents = std::fs::read(&path)?;
        let decoded = hex::decode(String::from_utf8_lossy(&contents).trim()).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "master.key is not hex")
        })?;
        let key: [u8; 32] = decoded.try_into().map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "master.key must be 32 bytes")
        })?;
        return Ok(key);
    }

    let mut key = [0u8; 32];
    ring::rand::SecureRandom::fill(&ring::rand::SystemRandom::new(), &mut key)
        .map_err(|_| std::io::Error::other("system rng unavailable"))?;
    std::fs::write(&path, hex::encode(key))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }
    tracing::info!(path = %path.display(), "generated master secret");
    Ok(key)
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
