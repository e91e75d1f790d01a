// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `corral` binary as a subprocess and drives it over
//! its stdio JSON protocol.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

/// Resolve the path to the compiled `corral` binary.
pub fn corral_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("corral")
}

/// A running `corral` worker, killed on drop, driven over stdio JSON.
pub struct WorkerProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    lines: Lines<BufReader<ChildStdout>>,
}

impl WorkerProcess {
    pub fn start() -> anyhow::Result<Self> {
        let binary = corral_binary();
        anyhow::ensure!(binary.exists(), "corral binary not found at {}", binary.display());

        let mut child = Command::new(&binary)
            .args(["--log-level", "warn"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| anyhow::anyhow!("no stdin pipe"))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow::anyhow!("no stdout pipe"))?;
        Ok(Self {
            child,
            stdin: Some(stdin),
            lines: BufReader::new(stdout).lines(),
        })
    }

    /// Write one command frame.
    pub async fn send(&mut self, frame: Value) -> anyhow::Result<()> {
        let stdin = self.stdin.as_mut().ok_or_else(|| anyhow::anyhow!("stdin closed"))?;
        let mut line = serde_json::to_vec(&frame)?;
        line.push(b'\n');
        stdin.write_all(&line).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Read the next event frame.
    pub async fn next(&mut self, timeout: Duration) -> anyhow::Result<Value> {
        let line = tokio::time::timeout(timeout, self.lines.next_line())
            .await
            .map_err(|_| anyhow::anyhow!("no frame within {timeout:?}"))??
            .ok_or_else(|| anyhow::anyhow!("worker closed stdout"))?;
        Ok(serde_json::from_str(&line)?)
    }

    /// Read frames until one has the given `event` name.
    pub async fn next_event(&mut self, event: &str, timeout: Duration) -> anyhow::Result<Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .ok_or_else(|| anyhow::anyhow!("no {event} frame within {timeout:?}"))?;
            let frame = self.next(remaining).await?;
            if frame["event"] == event {
                return Ok(frame);
            }
        }
    }

    /// Read frames until one satisfies `pred`.
    pub async fn next_matching<F>(
        &mut self,
        timeout: Duration,
        mut pred: F,
    ) -> anyhow::Result<Value>
    where
        F: FnMut(&Value) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .ok_or_else(|| anyhow::anyhow!("no matching frame within {timeout:?}"))?;
            let frame = self.next(remaining).await?;
            if pred(&frame) {
                return Ok(frame);
            }
        }
    }

    /// Close the worker's stdin (protocol EOF).
    pub fn close_stdin(&mut self) {
        self.stdin = None;
    }

    /// Wait for the worker process to exit.
    pub async fn wait_exit(
        &mut self,
        timeout: Duration,
    ) -> anyhow::Result<std::process::ExitStatus> {
        tokio::time::timeout(timeout, self.child.wait())
            .await
            .map_err(|_| anyhow::anyhow!("corral did not exit within {timeout:?}"))?
            .map_err(Into::into)
    }
}
