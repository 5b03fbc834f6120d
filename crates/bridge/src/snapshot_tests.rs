// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::json;

use crate::event::{Event, EventKind};
use crate::projection::Projections;

use super::SnapshotStore;

fn populated_projection() -> anyhow::Result<Projections> {
    let mut p = Projections::new(std::time::Duration::from_secs(3600));
    p.apply(&Event {
        seq: 1,
        timestamp_ns: 1_000,
        kind: EventKind::SessionCreated,
        aggregate: "s1".into(),
        actor: "alice".into(),
        payload: json!({ "session_id": "s1", "agent_id": "alice", "created_at_ns": 1_000 }),
        hash: "h1".into(),
    })
    .map_err(anyhow::Error::msg)?;
    Ok(p)
}

#[test]
fn write_then_latest_round_trips() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let store = SnapshotStore::open(tmp.path())?;
    let projection = populated_projection()?;

    store.write(1, "h1", &projection)?;

    let loaded = store.latest().ok_or_else(|| anyhow::anyhow!("no snapshot found"))?;
    assert_eq!(loaded.seq, 1);
    assert_eq!(loaded.event_hash, "h1");
    assert_eq!(
        loaded.projection.canonical_bytes().map_err(anyhow::Error::msg)?,
        projection.canonical_bytes().map_err(anyhow::Error::msg)?
    );
    Ok(())
}

#[test]
fn latest_prefers_newest_and_skips_corrupt() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let store = SnapshotStore::open(tmp.path())?;
    let projection = populated_projection()?;

    store.write(1, "h1", &projection)?;
    store.write(2, "h2", &projection)?;

    // Corrupt the newest; the older one must still load.
    std::fs::write(
        tmp.path().join(format!("snapshot-{:020}.json.gz", 2)),
        b"not gzip at all",
    )?;

    let loaded = store.latest().ok_or_else(|| anyhow::anyhow!("no snapshot found"))?;
    assert_eq!(loaded.seq, 1);
    Ok(())
}

#[test]
fn old_snapshots_are_pruned() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let store = SnapshotStore::open(tmp.path())?;
    let projection = populated_projection()?;

    for seq in 1..=6 {
        store.write(seq, &format!("h{seq}"), &projection)?;
    }

    let remaining = std::fs::read_dir(tmp.path())?.filter_map(Result::ok).count();
    assert_eq!(remaining, 3);

    let loaded = store.latest().ok_or_else(|| anyhow::anyhow!("no snapshot found"))?;
    assert_eq!(loaded.seq, 6);
    Ok(())
}

#[test]
fn empty_dir_has_no_latest() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let store = SnapshotStore::open(tmp.path())?;
    assert!(store.latest().is_none());
    Ok(())
}
