// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-agent token buckets.
//!
//! Buckets refill continuously at the configured per-minute rate up to the
//! burst capacity. A drained bucket reports one audit violation per drain;
//! the report re-arms once the bucket refills past a whole token, so a
//! flooding agent cannot amplify the event log.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;

/// Outcome of a bucket acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Granted,
    /// Denied; `report_violation` is true exactly once per drain.
    Denied { report_violation: bool },
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
    violation_armed: bool,
}

pub struct RateLimiter {
    rate_per_minute: u32,
    burst: u32,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(rate_per_minute: u32, burst: u32) -> Self {
        Self { rate_per_minute, burst, buckets: Mutex::new(HashMap::new()) }
    }

    pub fn try_acquire(&self, agent: &str) -> Acquire {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(agent.to_owned()).or_insert_with(|| Bucket {
            tokens: f64::from(self.burst),
            last_refill: now,
            violation_armed: true,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * f64::from(self.rate_per_minute) / 60.0)
            .min(f64::from(self.burst));
        bucket.last_refill = now;
        if bucket.tokens >= 1.0 {
            bucket.violation_armed = true;
        }

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Acquire::Granted
        } else {
            let report = bucket.violation_armed;
            bucket.violation_armed = false;
            Acquire::Denied { report_violation: report }
        }
    }
}

#[cfg(test)]
#[path = "rate_tests.rs"]
mod tests;
