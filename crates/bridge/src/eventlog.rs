// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Segmented append-only event log.
//!
//! Events are appended as JSONL to segment files named by their first
//! sequence number. Each segment opens with a JSON header line carrying the
//! format version, the segment's start sequence, and the previous segment's
//! final hash, so the chain verifies across rotation.
//!
//! The log itself is not synchronised; the engine serialises all appends
//! behind a single gate and applies projections under the same gate, which
//! keeps projection order identical to log order.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::Durability;
use crate::event::{chain_hash, Event, EventDraft, GENESIS_HASH};

const FORMAT_VERSION: u32 = 1;
const SEGMENT_PREFIX: &str = "events-";
const SEGMENT_SUFFIX: &str = ".log";

/// Window for the `flush_per_batch` durability policy.
const BATCH_FLUSH_WINDOW: std::time::Duration = std::time::Duration::from_millis(250);

/// Failures surfaced by log operations.
#[derive(Debug)]
pub enum LogError {
    /// The store cannot accept writes; reads remain possible.
    Storage(String),
    /// The chain does not verify. The process must refuse to serve.
    Integrity(String),
}

impl std::fmt::Display for LogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage(detail) => write!(f, "storage unavailable: {detail}"),
            Self::Integrity(detail) => write!(f, "log integrity failure: {detail}"),
        }
    }
}

impl std::error::Error for LogError {}

impl From<std::io::Error> for LogError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// First line of every segment file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SegmentHeader {
    format_version: u32,
    start_seq: u64,
    prev_hash: String,
}

#[derive(Debug, Clone)]
struct SegmentMeta {
    start_seq: u64,
    path: PathBuf,
}

/// What startup recovery found and did.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    pub last_seq: u64,
    pub segments: usize,
    /// Bytes cut from a torn tail record, if any.
    pub truncated_bytes: u64,
}

pub struct EventLog {
    dir: PathBuf,
    segment_max_bytes: u64,
    durability: Durability,
    segments: Vec<SegmentMeta>,
    active: File,
    active_bytes: u64,
    last_seq: u64,
    last_hash: String,
    last_sync: Instant,
}

impl EventLog {
    /// Open the log under `dir`, verifying the full hash chain.
    ///
    /// A torn record at the very end of the last segment is truncated (crash
    /// recovery); any other chain break is an integrity failure.
    pub fn open(
        dir: &Path,
        segment_max_bytes: u64,
        durability: Durability,
    ) -> Result<(Self, RecoveryReport), LogError> {
        std::fs::create_dir_all(dir)?;

        let mut segments = list_segments(dir)?;
        let mut report = RecoveryReport::default();

        let mut last_seq = 0u64;
        let mut last_hash = GENESIS_HASH.to_owned();

        for (idx, meta) in segments.iter().enumerate() {
            let is_last = idx + 1 == segments.len();
            let outcome = scan_segment(meta, &mut last_seq, &mut last_hash, is_last)?;
            report.truncated_bytes += outcome;
        }

        // Fresh directory: create the first segment.
        if segments.is_empty() {
            let meta = create_segment(dir, 1, GENESIS_HASH)?;
            segments.push(meta);
        }

        let active_meta = match segments.last() {
            Some(meta) => meta.clone(),
            None => return Err(LogError::Storage("no active segment".to_owned())),
        };
        let active = OpenOptions::new().append(true).open(&active_meta.path)?;
        let active_bytes = active.metadata()?.len();

        report.last_seq = last_seq;
        report.segments = segments.len();

        Ok((
            Self {
                dir: dir.to_owned(),
                segment_max_bytes,
                durability,
                segments,
                active,
                active_bytes,
                last_seq,
                last_hash,
                last_sync: Instant::now(),
            },
            report,
        ))
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    pub fn last_hash(&self) -> &str {
        &self.last_hash
    }

    /// Sequence, chain, and append a batch of drafts as one write.
    ///
    /// The batch is durable per the configured policy before this returns.
    /// On error nothing is acknowledged: in-memory positions do not advance
    /// and any torn bytes are cut by recovery at the next startup.
    pub fn append(
        &mut self,
        drafts: Vec<EventDraft>,
        timestamp_ns: u64,
    ) -> Result<Vec<Event>, LogError> {
        if drafts.is_empty() {
            return Ok(vec![]);
        }

        let mut events = Vec::with_capacity(drafts.len());
        let mut buf = Vec::new();
        let mut seq = self.last_seq;
        let mut hash = self.last_hash.clone();

        for draft in drafts {
            seq += 1;
            hash = chain_hash(&hash, seq, draft.kind, &draft.payload);
            let event = Event {
                seq,
                timestamp_ns,
                kind: draft.kind,
                aggregate: draft.aggregate,
                actor: draft.actor,
                payload: draft.payload,
                hash: hash.clone(),
            };
            let line = serde_json::to_string(&event)
                .map_err(|e| LogError::Storage(format!("serialize event: {e}")))?;
            buf.extend_from_slice(line.as_bytes());
            buf.push(b'\n');
            events.push(event);
        }

        self.active.write_all(&buf)?;
        self.flush()?;

        self.last_seq = seq;
        self.last_hash = hash;
        self.active_bytes += buf.len() as u64;

        if self.active_bytes >= self.segment_max_bytes {
            self.rotate()?;
        }

        Ok(events)
    }

    /// Read events with `seq >= from_seq`, up to `limit` if given.
    pub fn read(&self, from_seq: u64, limit: Option<usize>) -> Result<Vec<Event>, LogError> {
        let mut out = Vec::new();
        // Start from the newest segment that could contain `from_seq`.
        let start_idx = self
            .segments
            .iter()
            .rposition(|meta| meta.start_seq <= from_seq.max(1))
            .unwrap_or(0);

        for meta in &self.segments[start_idx..] {
            let contents = std::fs::read_to_string(&meta.path)?;
            for line in contents.lines().skip(1) {
                let Ok(event) = serde_json::from_str::<Event>(line) else {
                    // Torn tail mid-flight; recovery handles it on restart.
                    continue;
                };
                if event.seq < from_seq {
                    continue;
                }
                out.push(event);
                if let Some(limit) = limit {
                    if out.len() >= limit {
                        return Ok(out);
                    }
                }
            }
        }
        Ok(out)
    }

    fn flush(&mut self) -> Result<(), LogError> {
        match self.durability {
            Durability::FlushPerAppend => {
                self.active.sync_data()?;
                self.last_sync = Instant::now();
            }
            Durability::FlushPerBatch => {
                if self.last_sync.elapsed() >= BATCH_FLUSH_WINDOW {
                    self.active.sync_data()?;
                    self.last_sync = Instant::now();
                }
            }
            Durability::FlushNone => {}
        }
        Ok(())
    }

    fn rotate(&mut self) -> Result<(), LogError> {
        self.active.sync_data()?;
        let meta = create_segment(&self.dir, self.last_seq + 1, &self.last_hash)?;
        self.active = OpenOptions::new().append(true).open(&meta.path)?;
        self.active_bytes = self.active.metadata()?.len();
        tracing::info!(start_seq = self.last_seq + 1, path = %meta.path.display(), "rotated event segment");
        self.segments.push(meta);
        Ok(())
    }
}

fn segment_path(dir: &Path, start_seq: u64) -> PathBuf {
    dir.join(format!("{SEGMENT_PREFIX}{start_seq:020}{SEGMENT_SUFFIX}"))
}

fn create_segment(dir: &Path, start_seq: u64, prev_hash: &str) -> Result<SegmentMeta, LogError> {
    let path = segment_path(dir, start_seq);
    let header = SegmentHeader {
        format_version: FORMAT_VERSION,
        start_seq,
        prev_hash: prev_hash.to_owned(),
    };
    let mut line = serde_json::to_string(&header)
        .map_err(|e| LogError::Storage(format!("serialize header: {e}")))?;
    line.push('\n');
    let mut file = OpenOptions::new().create_new(true).write(true).open(&path)?;
    file.write_all(line.as_bytes())?;
    file.sync_data()?;
    Ok(SegmentMeta { start_seq, path })
}

fn list_segments(dir: &Path) -> Result<Vec<SegmentMeta>, LogError> {
    let mut segments = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(stem) = name.strip_prefix(SEGMENT_PREFIX).and_then(|s| s.strip_suffix(SEGMENT_SUFFIX))
        else {
            continue;
        };
        let Ok(start_seq) = stem.parse::<u64>() else {
            return Err(LogError::Integrity(format!("unparseable segment name {name}")));
        };
        segments.push(SegmentMeta { start_seq, path: entry.path() });
    }
    segments.sort_by_key(|meta| meta.start_seq);
    Ok(segments)
}

/// Verify one segment, advancing the running chain position.
///
/// Returns the number of bytes truncated from a torn tail (last segment
/// only). Any other break is an [`LogError::Integrity`].
fn scan_segment(
    meta: &SegmentMeta,
    last_seq: &mut u64,
    last_hash: &mut String,
    is_last: bool,
) -> Result<u64, LogError> {
    let contents = std::fs::read(&meta.path)?;
    let text = String::from_utf8_lossy(&contents);

    let mut offset = 0usize;
    let mut lines = Vec::new();
    for line in text.split_inclusive('\n') {
        lines.push((offset, line));
        offset += line.len();
    }

    let Some((_, header_line)) = lines.first() else {
        return Err(LogError::Integrity(format!("{}: empty segment", meta.path.display())));
    };
    let header: SegmentHeader = serde_json::from_str(header_line.trim_end())
        .map_err(|e| LogError::Integrity(format!("{}: bad header: {e}", meta.path.display())))?;
    if header.format_version != FORMAT_VERSION {
        return Err(LogError::Integrity(format!(
            "{}: unsupported format version {}",
            meta.path.display(),
            header.format_version
        )));
    }
    if header.start_seq != *last_seq + 1 || header.prev_hash != *last_hash {
        return Err(LogError::Integrity(format!(
            "{}: header does not chain from sequence {}",
            meta.path.display(),
            last_seq
        )));
    }

    for (idx, (line_offset, line)) in lines.iter().enumerate().skip(1) {
        let is_final_line = idx + 1 == lines.len();
        let parsed = serde_json::from_str::<Event>(line.trim_end()).ok().filter(|event| {
            event.seq == *last_seq + 1 && crate::event::verify_chain(last_hash, event)
        });
        match parsed {
            Some(event) => {
                *last_seq = event.seq;
                *last_hash = event.hash;
            }
            None if is_last && is_final_line => {
                // Torn tail from a crash mid-append: cut it and resume.
                let keep = *line_offset as u64;
                let truncated = contents.len() as u64 - keep;
                let file = OpenOptions::new().write(true).open(&meta.path)?;
                file.set_len(keep)?;
                file.sync_data()?;
                tracing::warn!(
                    path = %meta.path.display(),
                    truncated_bytes = truncated,
                    recovered_seq = *last_seq,
                    "truncated torn tail record"
                );
                return Ok(truncated);
            }
            None => {
                return Err(LogError::Integrity(format!(
                    "{}: chain break at sequence {}",
                    meta.path.display(),
                    *last_seq + 1
                )));
            }
        }
    }

    Ok(0)
}

#[cfg(test)]
#[path = "eventlog_tests.rs"]
mod tests;
