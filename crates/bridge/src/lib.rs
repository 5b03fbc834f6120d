// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parley: a multi-agent coordination bridge.
//!
//! A long-lived server that brokers schema-typed request/response exchanges
//! (elicitations) between cooperating agents, backed by an append-only,
//! hash-chained event log from which all runtime state replays.

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod eventlog;
pub mod inbox;
pub mod projection;
pub mod registry;
pub mod schema;
pub mod security;
pub mod snapshot;
pub mod state;
pub mod transport;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::BridgeConfig;
use crate::engine::{Engine, Fatal, OpenError};
use crate::state::BridgeState;
use crate::transport::build_router;

/// How a clean run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Clean,
    Interrupted,
}

/// Fatal run failures, mapped to process exit codes by `main`.
#[derive(Debug)]
pub enum RunError {
    Config(String),
    Bind(String),
    Storage(String),
    Integrity(String),
    Divergence(String),
}

impl RunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 64,
            Self::Bind(_) => 1,
            Self::Storage(_) | Self::Integrity(_) => 70,
            Self::Divergence(_) => 71,
        }
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(d) => write!(f, "configuration error: {d}"),
            Self::Bind(d) => write!(f, "bind failed: {d}"),
            Self::Storage(d) => write!(f, "storage failure: {d}"),
            Self::Integrity(d) => write!(f, "storage integrity failure: {d}"),
            Self::Divergence(d) => write!(f, "projection divergence: {d}"),
        }
    }
}

impl std::error::Error for RunError {}

impl From<OpenError> for RunError {
    fn from(err: OpenError) -> Self {
        match err {
            OpenError::Storage(d) => Self::Storage(d),
            OpenError::Integrity(d) => Self::Integrity(d),
            OpenError::Divergence(d) => Self::Divergence(d),
        }
    }
}

/// Run the bridge until shutdown.
pub async fn run(config: BridgeConfig) -> Result<Shutdown, RunError> {
    config.validate().map_err(RunError::Config)?;

    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let engine = Arc::new(Engine::open(config, shutdown.clone())?);
    engine.spawn_expiry();

    let interrupted = Arc::new(AtomicBool::new(false));
    spawn_signal_listener(shutdown.clone(), Arc::clone(&interrupted));

    let state = Arc::new(BridgeState::new(Arc::clone(&engine)));
    let router = build_router(state);
    let listener = TcpListener::bind(&addr).await.map_err(|e| RunError::Bind(e.to_string()))?;
    let local = listener.local_addr().map_err(|e| RunError::Bind(e.to_string()))?;
    tracing::info!("parley listening on {local}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| RunError::Bind(e.to_string()))?;

    if let Some(fatal) = engine.fatal() {
        return Err(match fatal {
            Fatal::Integrity(d) => RunError::Integrity(d.clone()),
            Fatal::Divergence(d) => RunError::Divergence(d.clone()),
        });
    }

    if interrupted.load(Ordering::Relaxed) {
        Ok(Shutdown::Interrupted)
    } else {
        Ok(Shutdown::Clean)
    }
}

/// Cancel the shutdown token on SIGINT (exit 130) or SIGTERM (clean).
fn spawn_signal_listener(shutdown: CancellationToken, interrupted: Arc<AtomicBool>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut term = match signal(SignalKind::terminate()) {
                Ok(term) => term,
                Err(e) => {
                    tracing::warn!(err = %e, "failed to install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    interrupted.store(true, Ordering::Relaxed);
                }
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupted.store(true, Ordering::Relaxed);
            }
        }
        tracing::info!("shutdown requested");
        shutdown.cancel();
    });
}
