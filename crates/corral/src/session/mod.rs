// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session: drives exactly one CLI through many tasks.
//!
//! The public [`Session`] is a thin handle: every operation posts a
//! [`SessionCommand`] to the owning task (see [`run`]), which serializes
//! commands with output processing and timer fires. Snapshot state
//! (status, pid, timestamps) lives in [`Shared`] so `to_handle` never has
//! to wait on the task.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::adapter::{Adapter, SpawnConfig};
use crate::event::{
    ExitStatus, PtySignal, SessionEvent, SessionMessage, SessionStatus, StallClassification,
};
use crate::pty::Backend;
use crate::rules::{AutoResponseRule, RuleSpec};

mod engine;
pub(crate) mod run;

pub(crate) use engine::Engine;
pub(crate) use run::WriteStep;

/// Engine defaults a [`crate::manager::Manager`] hands to new sessions.
#[derive(Debug, Clone, Copy)]
pub struct SessionDefaults {
    pub stall_enabled: bool,
    pub stall_timeout: Duration,
    pub ready_settle: Duration,
    pub task_settle: Duration,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            stall_enabled: false,
            stall_timeout: engine::DEFAULT_STALL_TIMEOUT,
            ready_settle: engine::DEFAULT_READY_SETTLE,
            task_settle: engine::DEFAULT_TASK_SETTLE,
        }
    }
}

/// Immutable snapshot of a session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHandle {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// Snapshot state shared between the session task and handle readers.
pub(crate) struct Shared {
    pub status: parking_lot::Mutex<SessionStatus>,
    pub pid: AtomicU32,
    pub started_at: parking_lot::Mutex<Option<DateTime<Utc>>>,
    pub last_activity: parking_lot::Mutex<Option<DateTime<Utc>>>,
    pub error: parking_lot::Mutex<Option<String>>,
    pub exit: parking_lot::Mutex<Option<ExitStatus>>,
    /// Cancelled exactly once when the session reaches its end state.
    pub exited: CancellationToken,
}

impl Shared {
    fn new() -> Self {
        Self {
            status: parking_lot::Mutex::new(SessionStatus::Pending),
            pid: AtomicU32::new(0),
            started_at: parking_lot::Mutex::new(None),
            last_activity: parking_lot::Mutex::new(None),
            error: parking_lot::Mutex::new(None),
            exit: parking_lot::Mutex::new(None),
            exited: CancellationToken::new(),
        }
    }
}

/// Commands consumed by the session task.
pub(crate) enum SessionCommand {
    Send { text: String, reply: oneshot::Sender<anyhow::Result<SessionMessage>> },
    Write { data: String },
    WriteRaw { data: Bytes },
    SendKeys { keys: Vec<String> },
    SelectMenu { option: u32 },
    Paste { text: String, bracketed: bool },
    Resize { cols: u16, rows: u16 },
    Kill { signal: Option<PtySignal> },
    OutputBuffer { reply: oneshot::Sender<Bytes> },
    ClearBuffer,
    AddRule(AutoResponseRule),
    RemoveRule { pattern: String },
    SetRules(Vec<AutoResponseRule>),
    ClearRules,
    GetRules { reply: oneshot::Sender<Vec<RuleSpec>> },
    StallClassified(Option<StallClassification>),
    ConfigureStall { enabled: bool, timeout_ms: Option<u64> },
}

/// Parts consumed by `start`.
struct StartParts {
    engine: Engine,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    write_rx: mpsc::UnboundedReceiver<WriteStep>,
}

/// One supervised CLI behind a PTY.
pub struct Session {
    id: String,
    name: String,
    kind: String,
    cols: u16,
    rows: u16,
    shared: Arc<Shared>,
    events_tx: broadcast::Sender<SessionEvent>,
    cmd_tx: mpsc::Sender<SessionCommand>,
    parts: parking_lot::Mutex<Option<StartParts>>,
}

impl Session {
    /// Build a session for `config`. The session does nothing until
    /// [`start`](Self::start) hands it a backend.
    pub fn new(config: &SpawnConfig, adapter: Arc<dyn Adapter>, defaults: SessionDefaults) -> Self {
        let id = config.id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let shared = Arc::new(Shared::new());
        let (events_tx, _) = broadcast::channel(256);
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (write_tx, write_rx) = mpsc::unbounded_channel();

        let engine = Engine::new(
            id.clone(),
            config,
            adapter,
            defaults,
            Arc::clone(&shared),
            events_tx.clone(),
            write_tx,
        );

        Self {
            id,
            name: config.name.clone(),
            kind: config.kind.clone(),
            cols: config.cols,
            rows: config.rows,
            shared,
            events_tx,
            cmd_tx,
            parts: parking_lot::Mutex::new(Some(StartParts { engine, cmd_rx, write_rx })),
        }
    }

    /// Spawn the session task over `backend`.
    ///
    /// Fails with `already started` when called twice.
    pub fn start(&self, backend: Box<dyn Backend>) -> anyhow::Result<()> {
        let parts = self
            .parts
            .lock()
            .take()
            .ok_or_else(|| anyhow!("session {} already started", self.id))?;
        tokio::spawn(run::session_loop(
            parts.engine,
            backend,
            parts.cmd_rx,
            parts.write_rx,
            Arc::clone(&self.shared),
            self.cols,
            self.rows,
        ));
        Ok(())
    }

    /// Record a spawn failure: the session becomes a terminal `error`
    /// tombstone that stays introspectable through its handle.
    pub(crate) fn mark_failed(&self, message: &str) {
        *self.shared.error.lock() = Some(message.to_owned());
        let from = {
            let mut status = self.shared.status.lock();
            let from = *status;
            *status = SessionStatus::Error;
            from
        };
        let _ = self.events_tx.send(SessionEvent::StatusChanged {
            from,
            to: SessionStatus::Error,
        });
        let _ = self.events_tx.send(SessionEvent::Error { message: message.to_owned() });
        self.shared.exited.cancel();
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adapter type key this session was spawned with.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn status(&self) -> SessionStatus {
        *self.shared.status.lock()
    }

    /// Subscribe to this session's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    /// Token cancelled when the session has fully stopped (or failed to
    /// spawn).
    pub fn exited(&self) -> CancellationToken {
        self.shared.exited.clone()
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        *self.shared.exit.lock()
    }

    pub fn to_handle(&self) -> SessionHandle {
        let pid = self.shared.pid.load(Ordering::Acquire);
        SessionHandle {
            id: self.id.clone(),
            name: self.name.clone(),
            kind: self.kind.clone(),
            status: *self.shared.status.lock(),
            pid: (pid != 0).then_some(pid),
            started_at: *self.shared.started_at.lock(),
            last_activity_at: *self.shared.last_activity.lock(),
            error: self.shared.error.lock().clone(),
            exit_code: self.shared.exit.lock().and_then(|e| e.code),
        }
    }

    /// Send a task message: marks the session busy, clears the output
    /// buffer, writes the adapter-formatted text, and presses Enter 50 ms
    /// later (TUI CLIs drop a trailing CR arriving in the same tick).
    pub async fn send(&self, message: &str) -> anyhow::Result<SessionMessage> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.post(SessionCommand::Send { text: message.to_owned(), reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| anyhow!("session {} closed", self.id))?
    }

    /// Write adapter-formatted text followed by CR.
    pub async fn write(&self, data: &str) -> anyhow::Result<()> {
        self.post(SessionCommand::Write { data: data.to_owned() }).await
    }

    /// Write bytes exactly as given.
    pub async fn write_raw(&self, data: impl Into<Bytes>) -> anyhow::Result<()> {
        self.post(SessionCommand::WriteRaw { data: data.into() }).await
    }

    /// Send named keys, staggered 50 ms apart. Unknown names are sent as
    /// literal characters.
    pub async fn send_keys(&self, keys: Vec<String>) -> anyhow::Result<()> {
        self.post(SessionCommand::SendKeys { keys }).await
    }

    /// Press Down `option` times, then Enter.
    pub async fn select_menu_option(&self, option: u32) -> anyhow::Result<()> {
        self.post(SessionCommand::SelectMenu { option }).await
    }

    /// Paste text, bracketed (`ESC[200~ … ESC[201~`) by default.
    pub async fn paste(&self, text: &str, bracketed: bool) -> anyhow::Result<()> {
        self.post(SessionCommand::Paste { text: text.to_owned(), bracketed }).await
    }

    pub async fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        self.post(SessionCommand::Resize { cols, rows }).await
    }

    /// Signal the child (SIGTERM by default) and move to `stopping`.
    pub async fn kill(&self, signal: Option<PtySignal>) -> anyhow::Result<()> {
        self.post(SessionCommand::Kill { signal }).await
    }

    /// Copy of the current output buffer.
    pub async fn output_buffer(&self) -> anyhow::Result<Bytes> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.post(SessionCommand::OutputBuffer { reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| anyhow!("session {} closed", self.id))
    }

    pub async fn clear_output_buffer(&self) -> anyhow::Result<()> {
        self.post(SessionCommand::ClearBuffer).await
    }

    /// Add a session rule, replacing any rule with the same pattern+flags.
    pub async fn add_auto_response_rule(&self, rule: AutoResponseRule) -> anyhow::Result<()> {
        self.post(SessionCommand::AddRule(rule)).await
    }

    /// Remove session rules (and disable adapter rules) matching `pattern`.
    pub async fn remove_auto_response_rule(&self, pattern: &str) -> anyhow::Result<()> {
        self.post(SessionCommand::RemoveRule { pattern: pattern.to_owned() }).await
    }

    pub async fn set_auto_response_rules(&self, rules: Vec<AutoResponseRule>) -> anyhow::Result<()> {
        self.post(SessionCommand::SetRules(rules)).await
    }

    pub async fn clear_auto_response_rules(&self) -> anyhow::Result<()> {
        self.post(SessionCommand::ClearRules).await
    }

    /// Copy of the effective rule list (session rules first).
    pub async fn auto_response_rules(&self) -> anyhow::Result<Vec<RuleSpec>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.post(SessionCommand::GetRules { reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| anyhow!("session {} closed", self.id))
    }

    /// Feed an external stall-classification result back into the engine.
    pub async fn handle_stall_classification(
        &self,
        result: Option<StallClassification>,
    ) -> anyhow::Result<()> {
        self.post(SessionCommand::StallClassified(result)).await
    }

    pub async fn configure_stall(
        &self,
        enabled: bool,
        timeout_ms: Option<u64>,
    ) -> anyhow::Result<()> {
        self.post(SessionCommand::ConfigureStall { enabled, timeout_ms }).await
    }

    async fn post(&self, cmd: SessionCommand) -> anyhow::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| anyhow!("session {} is not running", self.id))
    }
}

#[cfg(test)]
#[path = "../session_tests.rs"]
mod tests;
