// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

/// Flush policy for the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum Durability {
    /// `sync_data` after every acknowledged append (safe default).
    FlushPerAppend,
    /// `sync_data` at most once per flush window; acknowledgement may
    /// precede durability by up to that window.
    FlushPerBatch,
    /// No explicit flush. Development only.
    FlushNone,
}

/// Configuration for the parley bridge.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "parley", about = "Multi-agent coordination bridge")]
pub struct BridgeConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "PARLEY_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9710, env = "PARLEY_PORT")]
    pub port: u16,

    /// Root of event and snapshot storage.
    #[arg(long, default_value = "./parley-data", env = "PARLEY_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Segment rotation threshold in bytes.
    #[arg(long, default_value_t = 100 * 1024 * 1024, env = "PARLEY_SEGMENT_MAX_BYTES")]
    pub segment_max_bytes: u64,

    /// Event log flush policy.
    #[arg(long, value_enum, default_value_t = Durability::FlushPerAppend, env = "PARLEY_DURABILITY")]
    pub durability: Durability,

    /// Events between projection snapshots.
    #[arg(long, default_value_t = 1000, env = "PARLEY_SNAPSHOT_INTERVAL_EVENTS")]
    pub snapshot_interval_events: u64,

    /// Idle window after which sessions are lazily revoked, in seconds.
    #[arg(long, default_value_t = 3600, env = "PARLEY_IDLE_SESSION_TIMEOUT_SECS")]
    pub idle_session_timeout_secs: u64,

    /// Live sessions allowed per agent; the oldest is evicted beyond this.
    #[arg(long, default_value_t = 3, env = "PARLEY_MAX_SESSIONS_PER_AGENT")]
    pub max_sessions_per_agent: usize,

    /// Elicitation creations allowed per agent per minute.
    #[arg(long, default_value_t = 10, env = "PARLEY_CREATE_RATE")]
    pub create_rate: u32,

    /// Response submissions allowed per agent per minute.
    #[arg(long, default_value_t = 20, env = "PARLEY_RESPOND_RATE")]
    pub respond_rate: u32,

    /// Burst allowance on the creation bucket.
    #[arg(long, default_value_t = 3, env = "PARLEY_BURST")]
    pub burst: u32,

    /// Upper bound on `wait_ms` for pending polls, in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "PARLEY_MAX_WAIT_MS")]
    pub max_wait_ms: u64,

    /// Bounded capacity of each per-agent inbox.
    #[arg(long, default_value_t = 256, env = "PARLEY_INBOX_CAPACITY")]
    pub inbox_capacity: usize,

    /// Maximum accepted elicitation timeout, in seconds.
    #[arg(long, default_value_t = 600, env = "PARLEY_TIMEOUT_CAP_SECONDS")]
    pub timeout_cap_seconds: u64,

    /// Age bound on the archive of terminal elicitations, in seconds.
    #[arg(long, default_value_t = 3600, env = "PARLEY_ARCHIVE_RETENTION_SECS")]
    pub archive_retention_secs: u64,
}

impl BridgeConfig {
    pub fn idle_session_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_session_timeout_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn timeout_cap(&self) -> Duration {
        Duration::from_secs(self.timeout_cap_seconds)
    }

    pub fn archive_retention(&self) -> Duration {
        Duration::from_secs(self.archive_retention_secs)
    }

    /// Nonce retention window: the timeout cap plus clock-skew allowance.
    pub fn nonce_retention(&self) -> Duration {
        self.timeout_cap() + Duration::from_secs(300)
    }

    /// Reject configurations that cannot serve a single request.
    pub fn validate(&self) -> Result<(), String> {
        if self.segment_max_bytes < 4096 {
            return Err("segment_max_bytes must be at least 4096".to_owned());
        }
        if self.inbox_capacity == 0 {
            return Err("inbox_capacity must be nonzero".to_owned());
        }
        if self.max_sessions_per_agent == 0 {
            return Err("max_sessions_per_agent must be nonzero".to_owned());
        }
        if self.timeout_cap_seconds == 0 {
            return Err("timeout_cap_seconds must be nonzero".to_owned());
        }
        if self.create_rate == 0 || self.respond_rate == 0 {
            return Err("create_rate and respond_rate must be nonzero".to_owned());
        }
        if self.snapshot_interval_events == 0 {
            return Err("snapshot_interval_events must be nonzero".to_owned());
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_config(data_dir: PathBuf) -> BridgeConfig {
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
