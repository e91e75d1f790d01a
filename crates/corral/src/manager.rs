// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Manager: a named set of sessions behind one adapter registry.
//!
//! Fans every session's events out to subscribers tagged with the session
//! id, captures per-session output into bounded line rings, drives the
//! optional stall-classifier hook, and owns stop/shutdown escalation.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::adapter::registry::{builtin_pack, AdapterRegistry};
use crate::adapter::{Adapter, SpawnConfig};
use crate::event::{PtySignal, SessionEvent, SessionMessage, SessionStatus, StallClassification};
use crate::pty::spawn::NativePty;
use crate::pty::{Backend, Boxed as _};
use crate::ring::LineRing;
use crate::rules::{AutoResponseRule, RuleSpec};
use crate::session::{Session, SessionDefaults, SessionHandle};

/// Grace period for a single `stop` before SIGKILL escalation.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);
/// Grace period per session during `shutdown`.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// Manager-wide configuration.
#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    /// Lines of output retained per session for `logs`.
    pub log_capacity: usize,
    /// Engine defaults handed to new sessions.
    pub defaults: SessionDefaults,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self { log_capacity: 1000, defaults: SessionDefaults::default() }
    }
}

/// Options for [`Manager::stop`].
#[derive(Debug, Clone, Copy)]
pub struct StopOptions {
    /// Skip SIGTERM and go straight to SIGKILL.
    pub force: bool,
    pub timeout: Duration,
}

impl Default for StopOptions {
    fn default() -> Self {
        Self { force: false, timeout: DEFAULT_STOP_TIMEOUT }
    }
}

/// Filters for [`Manager::list`].
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<SessionStatus>,
    pub kind: Option<String>,
}

/// Lightweight per-session metrics.
#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<u64>,
}

/// Context handed to the stall-classifier hook.
#[derive(Debug, Clone)]
pub struct StallContext {
    pub session_id: String,
    pub recent_output: String,
    pub stall_ms: u64,
}

/// Future returned by a [`StallClassifier`].
pub type ClassifyFuture = Pin<Box<dyn Future<Output = Option<StallClassification>> + Send>>;

/// External hook deciding what a stalled session is actually doing.
pub type StallClassifier = Arc<dyn Fn(StallContext) -> ClassifyFuture + Send + Sync>;

/// A session event tagged with its session, or a lifecycle notice.
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    Session { id: String, event: SessionEvent },
    /// Emitted once when a session's exit has been cleaned up.
    SessionStopped { id: String, reason: String },
}

/// Terminal attachment: a live view onto one session's byte stream.
pub struct TerminalAttachment {
    session: Arc<Session>,
}

impl TerminalAttachment {
    /// Subscribe to the session's event stream; dropping the receiver
    /// unsubscribes. Output bytes arrive as [`SessionEvent::Output`]
    /// without copying.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.subscribe()
    }

    pub async fn write(&self, data: impl Into<bytes::Bytes>) -> anyhow::Result<()> {
        self.session.write_raw(data).await
    }

    pub async fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        self.session.resize(cols, rows).await
    }
}

struct Entry {
    session: Arc<Session>,
    logs: Arc<parking_lot::Mutex<LineRing>>,
}

struct Inner {
    registry: parking_lot::RwLock<AdapterRegistry>,
    sessions: parking_lot::RwLock<HashMap<String, Entry>>,
    events_tx: broadcast::Sender<ManagerEvent>,
    defaults: parking_lot::Mutex<SessionDefaults>,
    classifier: parking_lot::Mutex<Option<StallClassifier>>,
    log_capacity: usize,
}

#[derive(Clone)]
pub struct Manager {
    inner: Arc<Inner>,
}

impl Default for Manager {
    fn default() -> Self {
        Self::new(ManagerConfig::default())
    }
}

impl Manager {
    pub fn new(config: ManagerConfig) -> Self {
        let (events_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(Inner {
                registry: parking_lot::RwLock::new(AdapterRegistry::with_builtins()),
                sessions: parking_lot::RwLock::new(HashMap::new()),
                events_tx,
                defaults: parking_lot::Mutex::new(config.defaults),
                classifier: parking_lot::Mutex::new(None),
                log_capacity: config.log_capacity,
            }),
        }
    }

    // -- adapters -----------------------------------------------------------

    /// Register an adapter, replacing any previous one with the same type.
    pub fn register_adapter(&self, adapter: Arc<dyn Adapter>) {
        self.inner.registry.write().register(adapter);
    }

    /// Register a named adapter module from the compiled-in catalog.
    pub fn register_module(&self, name: &str) -> anyhow::Result<usize> {
        let adapters =
            builtin_pack(name).ok_or_else(|| anyhow!("unknown adapter module: {name}"))?;
        let count = adapters.len();
        let mut registry = self.inner.registry.write();
        for adapter in adapters {
            registry.register(adapter);
        }
        Ok(count)
    }

    pub fn adapter_types(&self) -> Vec<String> {
        self.inner.registry.read().types()
    }

    // -- spawn --------------------------------------------------------------

    /// Spawn a session over a native PTY.
    ///
    /// Adapter-lookup and duplicate-id failures register nothing; a PTY
    /// spawn failure registers the session in `error` status so it stays
    /// introspectable.
    pub async fn spawn(&self, config: SpawnConfig) -> anyhow::Result<SessionHandle> {
        let (session, adapter, config) = self.install(config)?;
        let mut argv = vec![adapter.command(&config)];
        argv.extend(adapter.args(&config));
        let env = spawn_env(adapter.as_ref(), &config);
        match NativePty::spawn(&argv, &env, config.workdir.as_deref(), config.cols, config.rows) {
            Ok(pty) => session.start(pty.boxed())?,
            Err(e) => {
                warn!(session = %session.id(), "pty spawn failed: {e:#}");
                session.mark_failed(&format!("pty spawn failed: {e:#}"));
            }
        }
        Ok(session.to_handle())
    }

    /// Spawn a session over a caller-provided backend (an already-attached
    /// terminal, a scripted stand-in, ...).
    pub async fn spawn_with(
        &self,
        config: SpawnConfig,
        backend: Box<dyn Backend>,
    ) -> anyhow::Result<SessionHandle> {
        let (session, _adapter, _config) = self.install(config)?;
        session.start(backend)?;
        Ok(session.to_handle())
    }

    fn install(
        &self,
        mut config: SpawnConfig,
    ) -> anyhow::Result<(Arc<Session>, Arc<dyn Adapter>, SpawnConfig)> {
        let adapter = self
            .inner
            .registry
            .read()
            .get(&config.kind)
            .ok_or_else(|| anyhow!("adapter not found: {}", config.kind))?;
        let id = config.id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        config.id = Some(id.clone());

        let defaults = *self.inner.defaults.lock();
        let session = Arc::new(Session::new(&config, Arc::clone(&adapter), defaults));
        let logs = Arc::new(parking_lot::Mutex::new(LineRing::new(self.inner.log_capacity)));
        let events_rx = session.subscribe();
        {
            let mut sessions = self.inner.sessions.write();
            if sessions.contains_key(&id) {
                bail!("duplicate session id: {id}");
            }
            sessions.insert(
                id.clone(),
                Entry { session: Arc::clone(&session), logs: Arc::clone(&logs) },
            );
        }
        self.spawn_forwarder(id, events_rx, logs, Arc::clone(&session));
        Ok((session, adapter, config))
    }

    /// Fan one session's events out to manager subscribers, feed the log
    /// ring, drive the classifier hook, and clean up exactly once on exit.
    fn spawn_forwarder(
        &self,
        id: String,
        mut events_rx: broadcast::Receiver<SessionEvent>,
        logs: Arc<parking_lot::Mutex<LineRing>>,
        session: Arc<Session>,
    ) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                match events_rx.recv().await {
                    Ok(event) => {
                        if let SessionEvent::Output(ref bytes) = event {
                            logs.lock().push_chunk(bytes);
                        }
                        if let SessionEvent::StallDetected { ref recent_output, stall_ms } = event
                        {
                            let hook = inner.classifier.lock().clone();
                            if let Some(hook) = hook {
                                let ctx = StallContext {
                                    session_id: id.clone(),
                                    recent_output: recent_output.clone(),
                                    stall_ms,
                                };
                                let session = Arc::clone(&session);
                                tokio::spawn(async move {
                                    let result = hook(ctx).await;
                                    let _ = session.handle_stall_classification(result).await;
                                });
                            }
                        }
                        let exit_reason = match event {
                            SessionEvent::Exit(status) => Some(status.reason()),
                            _ => None,
                        };
                        let _ = inner
                            .events_tx
                            .send(ManagerEvent::Session { id: id.clone(), event });
                        if let Some(reason) = exit_reason {
                            inner.sessions.write().remove(&id);
                            let _ = inner
                                .events_tx
                                .send(ManagerEvent::SessionStopped { id: id.clone(), reason });
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(session = %id, missed, "manager forwarder lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    // -- lifecycle ----------------------------------------------------------

    /// Stop a session: SIGTERM (SIGKILL when forced) raced against the
    /// timeout, escalating to SIGKILL. Resolves only after the session's
    /// exit has been observed, so maps clean up exactly once.
    pub async fn stop(&self, id: &str, options: StopOptions) -> anyhow::Result<()> {
        let session = self.session(id).ok_or_else(|| anyhow!("no such session: {id}"))?;
        let exited = session.exited();
        let signal = if options.force { PtySignal::Kill } else { PtySignal::Term };
        let _ = session.kill(Some(signal)).await;
        if tokio::time::timeout(options.timeout, exited.cancelled()).await.is_err() {
            warn!(session = %id, "graceful stop timed out, escalating to SIGKILL");
            let _ = session.kill(Some(PtySignal::Kill)).await;
            exited.cancelled().await;
        }
        self.inner.sessions.write().remove(id);
        Ok(())
    }

    pub async fn stop_all(&self, options: StopOptions) {
        let ids: Vec<String> = self.inner.sessions.read().keys().cloned().collect();
        let stops = ids.iter().map(|id| self.stop(id, options));
        for result in futures_util::future::join_all(stops).await {
            if let Err(e) = result {
                debug!("stop_all: {e}");
            }
        }
    }

    /// Stop every session with a bounded grace period.
    pub async fn shutdown(&self, timeout: Duration) {
        self.stop_all(StopOptions { force: false, timeout }).await;
    }

    // -- queries ------------------------------------------------------------

    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        self.inner.sessions.read().get(id).map(|e| e.session.to_handle())
    }

    pub fn has(&self, id: &str) -> bool {
        self.inner.sessions.read().contains_key(id)
    }

    /// Raw access to the session object.
    pub fn session(&self, id: &str) -> Option<Arc<Session>> {
        self.inner.sessions.read().get(id).map(|e| Arc::clone(&e.session))
    }

    pub fn list(&self, filter: &ListFilter) -> Vec<SessionHandle> {
        let mut handles: Vec<SessionHandle> = self
            .inner
            .sessions
            .read()
            .values()
            .map(|e| e.session.to_handle())
            .filter(|h| filter.status.map_or(true, |s| h.status == s))
            .filter(|h| filter.kind.as_deref().map_or(true, |k| h.kind == k))
            .collect();
        handles.sort_by(|a, b| a.id.cmp(&b.id));
        handles
    }

    pub fn status_counts(&self) -> HashMap<SessionStatus, usize> {
        let mut counts = HashMap::new();
        for entry in self.inner.sessions.read().values() {
            *counts.entry(entry.session.status()).or_insert(0) += 1;
        }
        counts
    }

    /// Tail of the session's captured output lines.
    pub fn logs(&self, id: &str, tail: Option<usize>) -> anyhow::Result<Vec<String>> {
        let sessions = self.inner.sessions.read();
        let entry = sessions.get(id).ok_or_else(|| anyhow!("no such session: {id}"))?;
        let n = tail.unwrap_or(usize::MAX);
        let lines = entry.logs.lock().tail(n);
        Ok(lines)
    }

    pub fn metrics(&self, id: &str) -> anyhow::Result<Metrics> {
        let session = self.session(id).ok_or_else(|| anyhow!("no such session: {id}"))?;
        let uptime_seconds = session
            .to_handle()
            .started_at
            .map(|t| (chrono::Utc::now() - t).num_seconds().max(0) as u64);
        Ok(Metrics { uptime_seconds })
    }

    /// Attach a live terminal view to a session.
    pub fn attach_terminal(&self, id: &str) -> Option<TerminalAttachment> {
        self.session(id).map(|session| TerminalAttachment { session })
    }

    /// Subscribe to all session events, tagged with session ids.
    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.inner.events_tx.subscribe()
    }

    // -- session operations -------------------------------------------------

    pub async fn send(&self, id: &str, message: &str) -> anyhow::Result<SessionMessage> {
        let session = self.session(id).ok_or_else(|| anyhow!("no such session: {id}"))?;
        session.send(message).await
    }

    // -- rules --------------------------------------------------------------

    pub async fn add_rule(&self, id: &str, spec: RuleSpec) -> anyhow::Result<()> {
        let session = self.session(id).ok_or_else(|| anyhow!("no such session: {id}"))?;
        session.add_auto_response_rule(AutoResponseRule::compile(spec)?).await
    }

    pub async fn remove_rule(&self, id: &str, pattern: &str) -> anyhow::Result<()> {
        let session = self.session(id).ok_or_else(|| anyhow!("no such session: {id}"))?;
        session.remove_auto_response_rule(pattern).await
    }

    pub async fn set_rules(&self, id: &str, specs: Vec<RuleSpec>) -> anyhow::Result<()> {
        let session = self.session(id).ok_or_else(|| anyhow!("no such session: {id}"))?;
        let rules = specs
            .into_iter()
            .map(AutoResponseRule::compile)
            .collect::<anyhow::Result<Vec<_>>>()?;
        session.set_auto_response_rules(rules).await
    }

    pub async fn rules(&self, id: &str) -> anyhow::Result<Vec<RuleSpec>> {
        let session = self.session(id).ok_or_else(|| anyhow!("no such session: {id}"))?;
        session.auto_response_rules().await
    }

    pub async fn clear_rules(&self, id: &str) -> anyhow::Result<()> {
        let session = self.session(id).ok_or_else(|| anyhow!("no such session: {id}"))?;
        session.clear_auto_response_rules().await
    }

    // -- stall detection ----------------------------------------------------

    /// Update stall defaults for future sessions. A `Some(hook)` replaces
    /// the classifier; `None` leaves it untouched.
    pub fn configure_stall_detection(
        &self,
        enabled: bool,
        timeout_ms: Option<u64>,
        hook: Option<StallClassifier>,
    ) {
        {
            let mut defaults = self.inner.defaults.lock();
            defaults.stall_enabled = enabled;
            if let Some(ms) = timeout_ms {
                defaults.stall_timeout = Duration::from_millis(ms);
            }
        }
        if let Some(hook) = hook {
            *self.inner.classifier.lock() = Some(hook);
        }
    }

    /// Deliver an externally produced stall classification (the worker
    /// protocol's `classifyStallResult`).
    pub async fn classify_stall_result(
        &self,
        id: &str,
        result: Option<StallClassification>,
    ) -> anyhow::Result<()> {
        let session = self.session(id).ok_or_else(|| anyhow!("no such session: {id}"))?;
        session.handle_stall_classification(result).await
    }
}

fn spawn_env(adapter: &dyn Adapter, config: &SpawnConfig) -> Vec<(String, String)> {
    let mut env = vec![
        ("TERM".to_owned(), "xterm-256color".to_owned()),
        ("COLORTERM".to_owned(), "truecolor".to_owned()),
    ];
    env.extend(adapter.env(config));
    let mut user: Vec<(String, String)> =
        config.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    user.sort();
    env.extend(user);
    env
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
