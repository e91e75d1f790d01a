// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: scripted backends, stub adapters, event
//! helpers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::adapter::{Adapter, SpawnConfig};
use crate::event::{ExitStatus, SessionEvent};
use crate::pty::Backend;
use crate::rules::AutoResponseRule;

/// A scripted PTY backend for deterministic, sub-millisecond session
/// tests: tests feed output chunks through a [`ScriptHandle`], observe
/// everything the engine writes, and decide when the child "exits".
pub struct ScriptedPty {
    feed_rx: mpsc::UnboundedReceiver<Bytes>,
    exit_rx: oneshot::Receiver<ExitStatus>,
    captured: Arc<parking_lot::Mutex<Vec<u8>>>,
}

/// Test-side controls for a [`ScriptedPty`].
pub struct ScriptHandle {
    feed_tx: mpsc::UnboundedSender<Bytes>,
    exit_tx: parking_lot::Mutex<Option<oneshot::Sender<ExitStatus>>>,
    captured: Arc<parking_lot::Mutex<Vec<u8>>>,
}

impl ScriptedPty {
    pub fn new() -> (Self, ScriptHandle) {
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let captured = Arc::new(parking_lot::Mutex::new(Vec::new()));
        (
            Self { feed_rx, exit_rx, captured: Arc::clone(&captured) },
            ScriptHandle {
                feed_tx,
                exit_tx: parking_lot::Mutex::new(Some(exit_tx)),
                captured,
            },
        )
    }
}

impl Backend for ScriptedPty {
    fn run(
        &mut self,
        output_tx: mpsc::Sender<Bytes>,
        mut input_rx: mpsc::Receiver<Bytes>,
        mut resize_rx: mpsc::Receiver<(u16, u16)>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ExitStatus>> + Send + '_>> {
        Box::pin(async move {
            let mut feed_open = true;
            let mut input_open = true;
            let mut resize_open = true;
            loop {
                tokio::select! {
                    chunk = self.feed_rx.recv(), if feed_open => match chunk {
                        Some(bytes) => {
                            if output_tx.send(bytes).await.is_err() {
                                break;
                            }
                        }
                        None => feed_open = false,
                    },
                    input = input_rx.recv(), if input_open => match input {
                        Some(bytes) => self.captured.lock().extend_from_slice(&bytes),
                        None => input_open = false,
                    },
                    size = resize_rx.recv(), if resize_open => {
                        if size.is_none() {
                            resize_open = false;
                        }
                    }
                    status = &mut self.exit_rx => {
                        return Ok(status.unwrap_or(ExitStatus { code: Some(0), signal: None }));
                    }
                }
            }
            Ok(ExitStatus { code: Some(0), signal: None })
        })
    }

    fn resize(&self, _cols: u16, _rows: u16) -> anyhow::Result<()> {
        Ok(())
    }

    fn child_pid(&self) -> Option<u32> {
        None
    }
}

impl ScriptHandle {
    /// Feed a chunk of "child output" into the session.
    pub fn feed(&self, data: impl Into<Bytes>) {
        let _ = self.feed_tx.send(data.into());
    }

    /// Make the scripted child exit with the given status.
    pub fn exit(&self, status: ExitStatus) {
        if let Some(tx) = self.exit_tx.lock().take() {
            let _ = tx.send(status);
        }
    }

    /// Everything the engine has written so far.
    pub fn input(&self) -> Vec<u8> {
        self.captured.lock().clone()
    }

    pub fn clear_input(&self) {
        self.captured.lock().clear();
    }

    /// Poll until the captured input contains `needle`.
    pub async fn wait_for_input(&self, needle: &[u8], timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if contains(&self.input(), needle) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len().max(1)).any(|w| w == needle)
}

/// Test adapter with marker-substring detection.
pub struct StubAdapter {
    pub ready_marker: String,
    pub task_marker: Option<String>,
    pub loading_marker: Option<String>,
    pub login_marker: Option<String>,
    pub prompt_marker: Option<String>,
    pub tui_menus: bool,
    pub rules: Vec<AutoResponseRule>,
}

impl Default for StubAdapter {
    fn default() -> Self {
        Self {
            ready_marker: "READY".to_owned(),
            task_marker: None,
            loading_marker: None,
            login_marker: None,
            prompt_marker: None,
            tui_menus: false,
            rules: vec![],
        }
    }
}

impl StubAdapter {
    pub fn with_rules(mut self, rules: Vec<AutoResponseRule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_task_marker(mut self, marker: impl Into<String>) -> Self {
        self.task_marker = Some(marker.into());
        self
    }

    pub fn with_loading_marker(mut self, marker: impl Into<String>) -> Self {
        self.loading_marker = Some(marker.into());
        self
    }

    pub fn with_login_marker(mut self, marker: impl Into<String>) -> Self {
        self.login_marker = Some(marker.into());
        self
    }

    pub fn with_prompt_marker(mut self, marker: impl Into<String>) -> Self {
        self.prompt_marker = Some(marker.into());
        self
    }

    pub fn tui(mut self) -> Self {
        self.tui_menus = true;
        self
    }
}

impl Adapter for StubAdapter {
    fn adapter_type(&self) -> &str {
        "stub"
    }

    fn display_name(&self) -> &str {
        "stub adapter"
    }

    fn auto_response_rules(&self) -> &[AutoResponseRule] {
        &self.rules
    }

    fn uses_tui_menus(&self) -> bool {
        self.tui_menus
    }

    fn command(&self, _config: &SpawnConfig) -> String {
        "/bin/false".to_owned()
    }

    fn detect_ready(&self, buffer: &str) -> bool {
        buffer.contains(&self.ready_marker)
    }

    fn detect_task_complete(&self, buffer: &str) -> Option<bool> {
        self.task_marker.as_ref().map(|m| buffer.contains(m))
    }

    fn detect_loading(&self, buffer: &str) -> Option<bool> {
        self.loading_marker.as_ref().map(|m| buffer.contains(m))
    }

    fn detect_login(&self, buffer: &str) -> Option<crate::adapter::LoginNotice> {
        let marker = self.login_marker.as_ref()?;
        buffer.contains(marker.as_str()).then(crate::adapter::LoginNotice::default)
    }

    /// Hermetic by default: only the configured marker counts as a
    /// blocking prompt, never the generic heuristics.
    fn detect_blocking_prompt(&self, buffer: &str) -> Option<crate::event::PromptInfo> {
        let marker = self.prompt_marker.as_ref()?;
        buffer.contains(marker.as_str()).then(|| {
            crate::event::PromptInfo::new(crate::event::PromptKind::Unknown, marker.clone())
        })
    }

    fn detect_exit(&self, _buffer: &str) -> Option<crate::adapter::ExitNotice> {
        None
    }
}

/// Wait for the next event matching `pred`, skipping everything else.
pub async fn wait_event<F>(
    events_rx: &mut broadcast::Receiver<SessionEvent>,
    timeout: Duration,
    mut pred: F,
) -> Option<SessionEvent>
where
    F: FnMut(&SessionEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match tokio::time::timeout_at(deadline, events_rx.recv()).await {
            Ok(Ok(event)) if pred(&event) => return Some(event),
            Ok(Ok(_)) => continue,
            Ok(Err(_)) | Err(_) => return None,
        }
    }
}
