// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `parley` binary as a subprocess and exercises it over
//! HTTP with `reqwest`.

use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

/// Resolve the path to the compiled `parley` binary.
pub fn parley_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("parley")
}

/// Grab a free loopback port by binding and releasing it.
fn free_port() -> anyhow::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// A running `parley` subprocess bound to a fresh port and data dir.
pub struct BridgeProcess {
    child: Child,
    port: u16,
    data_dir: PathBuf,
    /// Owns the data dir when the test did not supply one.
    _tmp: Option<tempfile::TempDir>,
}

impl BridgeProcess {
    /// Start with a throwaway data dir.
    pub fn start() -> anyhow::Result<Self> {
        let tmp = tempfile::tempdir()?;
        let data_dir = tmp.path().to_owned();
        Self::start_inner(data_dir, Some(tmp))
    }

    /// Start over an existing data dir (restart/recovery tests).
    pub fn start_with_dir(data_dir: &Path) -> anyhow::Result<Self> {
        Self::start_inner(data_dir.to_owned(), None)
    }

    fn start_inner(data_dir: PathBuf, tmp: Option<tempfile::TempDir>) -> anyhow::Result<Self> {
        let binary = parley_binary();
        anyhow::ensure!(binary.exists(), "parley binary not built at {}", binary.display());
        let port = free_port()?;

        let child = Command::new(&binary)
            .args([
                "--host",
                "127.0.0.1",
                "--port",
                &port.to_string(),
                "--data-dir",
                &data_dir.to_string_lossy(),
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(Self { child, port, data_dir, _tmp: tmp })
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Poll `/health` until the server answers or the deadline passes.
    pub async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<()> {
        let url = format!("{}/health", self.base_url());
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Ok(resp) = reqwest::get(&url).await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            anyhow::ensure!(
                tokio::time::Instant::now() < deadline,
                "parley never became healthy on {url}"
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Kill the process abruptly (SIGKILL), as a crash would.
    pub fn kill(&mut self) -> anyhow::Result<()> {
        self.child.kill()?;
        self.child.wait()?;
        Ok(())
    }
}

impl Drop for BridgeProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
