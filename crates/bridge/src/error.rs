// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error kinds for the bridge API.
///
/// Kinds map one-to-one onto wire error strings and HTTP statuses; handlers
/// never leak anything else across the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthenticated,
    Unauthorized,
    RateLimited,
    NonceReplay,
    UnknownTarget,
    NotFound,
    AlreadyTerminal,
    NotAddressed,
    BindingMismatch,
    SchemaInvalid,
    InvalidArgument,
    StorageUnavailable,
    IntegrityFailure,
}

impl ErrorKind {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unauthenticated => 401,
            Self::Unauthorized => 403,
            Self::RateLimited => 429,
            Self::NonceReplay => 409,
            Self::UnknownTarget => 404,
            Self::NotFound => 404,
            Self::AlreadyTerminal => 409,
            Self::NotAddressed => 403,
            Self::BindingMismatch => 403,
            Self::SchemaInvalid => 422,
            Self::InvalidArgument => 400,
            Self::StorageUnavailable => 503,
            Self::IntegrityFailure => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Unauthorized => "unauthorized",
            Self::RateLimited => "rate_limited",
            Self::NonceReplay => "nonce_replay",
            Self::UnknownTarget => "unknown_target",
            Self::NotFound => "not_found",
            Self::AlreadyTerminal => "already_terminal",
            Self::NotAddressed => "not_addressed",
            Self::BindingMismatch => "binding_mismatch",
            Self::SchemaInvalid => "schema_invalid",
            Self::InvalidArgument => "invalid_argument",
            Self::StorageUnavailable => "storage_unavailable",
            Self::IntegrityFailure => "integrity_failure",
        }
    }

    pub fn to_http_response(
        &self,
        detail: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse { error: self.as_str().to_owned(), detail: detail.into() };
        (status, Json(body))
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A kind plus a human-readable detail, as surfaced by engine operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl BridgeError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self { kind, detail: detail.into() }
    }

    pub fn to_http_response(&self) -> (StatusCode, Json<ErrorResponse>) {
        self.kind.to_http_response(self.detail.clone())
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

impl std::error::Error for BridgeError {}

/// Top-level wire error envelope: `{ "error": "<kind>", "detail": "..." }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub detail: String,
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
