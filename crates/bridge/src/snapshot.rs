// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Compressed projection snapshots.
//!
//! A snapshot stores the projection at a specific sequence together with the
//! hash of the event at that sequence, so startup can detect a snapshot that
//! does not belong to the log it sits next to. Snapshots are written to a
//! temp file, re-read, and byte-compared before adoption; a snapshot that
//! fails verification is discarded rather than trusted.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::projection::Projections;

const SNAPSHOT_PREFIX: &str = "snapshot-";
const SNAPSHOT_SUFFIX: &str = ".json.gz";

/// Snapshots kept on disk; older ones are pruned after a successful write.
const KEEP_SNAPSHOTS: usize = 3;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    seq: u64,
    event_hash: String,
    projection: Projections,
}

/// A verified snapshot loaded from disk.
pub struct LoadedSnapshot {
    pub seq: u64,
    pub event_hash: String,
    pub projection: Projections,
}

pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn open(dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self { dir: dir.to_owned() })
    }

    /// Write, verify, and adopt a snapshot of `projection` at `seq`.
    pub fn write(
        &self,
        seq: u64,
        event_hash: &str,
        projection: &Projections,
    ) -> std::io::Result<PathBuf> {
        let path = self.path_for(seq);
        let tmp = path.with_extension("tmp");

        let file = SnapshotFile {
            seq,
            event_hash: event_hash.to_owned(),
            projection: projection.clone(),
        };
        let json = serde_json::to_vec(&file).map_err(std::io::Error::other)?;

        let out = std::fs::File::create(&tmp)?;
        let mut encoder = GzEncoder::new(out, Compression::default());
        encoder.write_all(&json)?;
        encoder.finish()?.sync_data()?;

        // Verify the write round-trips to identical projection bytes before
        // letting it shadow replay-from-1.
        let reread = read_snapshot(&tmp)?;
        let expected = projection.canonical_bytes().map_err(std::io::Error::other)?;
        let got = reread.projection.canonical_bytes().map_err(std::io::Error::other)?;
        if reread.seq != seq || reread.event_hash != event_hash || got != expected {
            let _ = std::fs::remove_file(&tmp);
            return Err(std::io::Error::other("snapshot failed verification after write"));
        }

        std::fs::rename(&tmp, &path)?;
        self.prune();
        tracing::info!(seq, path = %path.display(), "wrote projection snapshot");
        Ok(path)
    }

    /// Load the newest readable snapshot, if any.
    ///
    /// Unreadable snapshots are skipped, not trusted: replay from sequence 1
    /// is always the fallback.
    pub fn latest(&self) -> Option<LoadedSnapshot> {
        let mut candidates = self.list();
        candidates.sort_by_key(|(seq, _)| std::cmp::Reverse(*seq));
        for (seq, path) in candidates {
            match read_snapshot(&path) {
                Ok(loaded) if loaded.seq == seq => return Some(loaded),
                Ok(_) => {
                    tracing::warn!(path = %path.display(), "snapshot name disagrees with contents; skipping");
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), err = %e, "unreadable snapshot; skipping");
                }
            }
        }
        None
    }

    fn path_for(&self, seq: u64) -> PathBuf {
        self.dir.join(format!("{SNAPSHOT_PREFIX}{seq:020}{SNAPSHOT_SUFFIX}"))
    }

    fn list(&self) -> Vec<(u64, PathBuf)> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return vec![];
        };
        entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                let stem = name.strip_prefix(SNAPSHOT_PREFIX)?.strip_suffix(SNAPSHOT_SUFFIX)?;
                Some((stem.parse::<u64>().ok()?, entry.path()))
            })
            .collect()
    }

    fn prune(&self) {
        let mut snapshots = self.list();
        snapshots.sort_by_key(|(seq, _)| std::cmp::Reverse(*seq));
        for (_, path) in snapshots.into_iter().skip(KEEP_SNAPSHOTS) {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), err = %e, "failed to prune snapshot");
            }
        }
    }
}

fn read_snapshot(path: &Path) -> std::io::Result<LoadedSnapshot> {
    let file = std::fs::File::open(path)?;
    let mut decoder = GzDecoder::new(file);
    let mut json = Vec::new();
    decoder.read_to_end(&mut json)?;
    let parsed: SnapshotFile = serde_json::from_slice(&json).map_err(std::io::Error::other)?;
    Ok(LoadedSnapshot {
        seq: parsed.seq,
        event_hash: parsed.event_hash,
        projection: parsed.projection,
    })
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
