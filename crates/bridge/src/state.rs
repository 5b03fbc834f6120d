// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Instant;

use crate::engine::Engine;

/// Shared bridge state handed to every handler.
pub struct BridgeState {
    pub engine: Arc<Engine>,
    pub started_at: Instant,
}

impl BridgeState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine, started_at: Instant::now() }
    }
}
