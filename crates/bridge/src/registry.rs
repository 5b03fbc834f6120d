// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Opaque session tokens.
//!
//! A token is `{agent_id}:{session_id}:{created_at_ns}:{signature}` where the
//! signature is the base16 HMAC output bound to the other three fields under
//! the session key. Parsing splits from the right so agent ids may contain
//! colons; the signature check itself lives in the security envelope.

use crate::security::SecurityEnvelope;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub agent_id: String,
    pub session_id: String,
    pub created_at_ns: u64,
    pub signature: String,
}

impl SessionToken {
    /// Issue a freshly signed token for a session.
    pub fn issue(
        envelope: &SecurityEnvelope,
        agent_id: &str,
        session_id: &str,
        created_at_ns: u64,
    ) -> Self {
        Self {
            agent_id: agent_id.to_owned(),
            session_id: session_id.to_owned(),
            created_at_ns,
            signature: envelope.token_signature(agent_id, session_id, created_at_ns),
        }
    }

    /// Parse a presented token. Returns `None` on any shape problem; the
    /// caller maps that to `Unauthenticated` without detail.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.rsplitn(4, ':');
        let signature = parts.next()?;
        let created_at = parts.next()?;
        let session_id = parts.next()?;
        let agent_id = parts.next()?;
        if agent_id.is_empty() || session_id.is_empty() || signature.is_empty() {
            return None;
        }
        Some(Self {
            agent_id: agent_id.to_owned(),
            session_id: session_id.to_owned(),
            created_at_ns: created_at.parse().ok()?,
            signature: signature.to_owned(),
        })
    }

    /// Constant-time signature verification against the derived session key.
    pub fn verify(&self, envelope: &SecurityEnvelope) -> bool {
        envelope.verify_token_signature(
            &self.agent_id,
            &self.session_id,
            self.created_at_ns,
            &self.signature,
        )
    }

    pub fn encode(&self) -> String {
        format!("{}:{}:{}:{}", self.agent_id, self.session_id, self.created_at_ns, self.signature)
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
