// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session state machine and output-processing pipeline.
//!
//! Everything here is synchronous and runs on the session task; the
//! select-loop in [`super::run`] feeds it chunks, commands, and timer
//! fires. Timers are plain deadline fields — the loop sleeps on them and
//! every `on_*` callback re-verifies status and signal, so a stale fire
//! is harmless.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use nix::unistd::Pid;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::adapter::{base, Adapter, SpawnConfig};
use crate::event::{
    AuthInfo, AuthMethod, ExitStatus, PromptInfo, PromptKind, PtySignal, SessionEvent,
    SessionMessage, SessionStatus, StallClassification, StallState,
};
use crate::keys;
use crate::rules::{effective_rules, AutoResponseRule, FiredOnce, RuleOverride, RuleSpec};
use crate::strip::{self, Normalizer};

use super::run::WriteStep;
use super::{SessionDefaults, Shared};

/// Output buffer cap; truncation keeps the tail, which is all detection
/// ever inspects.
pub(crate) const MAX_OUTPUT_BUFFER: usize = 100_000;
/// Visible-content window hashed for stall gating.
const STALL_HASH_CHARS: usize = 500;
/// Raw tail handed to the stall classifier.
const CLASSIFIER_TAIL_BYTES: usize = 2000;
const MAX_STALL_EMISSIONS: u32 = 5;
const MAX_STALL_BACKOFF: Duration = Duration::from_secs(30);
/// Gap between a message write and its Enter, and between staggered keys.
pub(crate) const KEY_STAGGER: Duration = Duration::from_millis(50);

pub(crate) const DEFAULT_READY_SETTLE: Duration = Duration::from_millis(100);
pub(crate) const DEFAULT_TASK_SETTLE: Duration = Duration::from_millis(1500);
pub(crate) const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Stall-detection bookkeeping.
struct Stall {
    enabled: bool,
    /// Base timeout; backoff returns here on fresh content.
    timeout: Duration,
    backoff: Duration,
    emissions: u32,
    suspended: bool,
    /// When the visible content last changed.
    started: Option<Instant>,
}

pub(crate) struct Engine {
    id: String,
    adapter: Arc<dyn Adapter>,
    shared: Arc<Shared>,
    events: broadcast::Sender<SessionEvent>,
    write_tx: mpsc::UnboundedSender<WriteStep>,
    normalizer: Normalizer,

    buffer: Vec<u8>,
    ready_settle: Duration,
    task_settle: Duration,
    pub(crate) ready_settle_at: Option<Instant>,
    pub(crate) task_complete_at: Option<Instant>,
    pub(crate) stall_at: Option<Instant>,
    stall: Stall,

    last_content_hash: Option<u32>,
    last_stall_hash: Option<u32>,
    last_prompt_hash: Option<u32>,

    fired_once: FiredOnce,
    session_rules: Vec<AutoResponseRule>,
    adapter_rules: Vec<AutoResponseRule>,
    overrides: HashMap<String, Option<RuleOverride>>,
    trace: bool,
}

impl Engine {
    pub(crate) fn new(
        id: String,
        config: &SpawnConfig,
        adapter: Arc<dyn Adapter>,
        defaults: SessionDefaults,
        shared: Arc<Shared>,
        events: broadcast::Sender<SessionEvent>,
        write_tx: mpsc::UnboundedSender<WriteStep>,
    ) -> Self {
        let ready_settle = config
            .ready_settle_ms
            .map(Duration::from_millis)
            .or_else(|| adapter.ready_settle())
            .unwrap_or(defaults.ready_settle);
        let stall_timeout =
            config.stall_timeout_ms.map(Duration::from_millis).unwrap_or(defaults.stall_timeout);
        let adapter_rules = adapter.auto_response_rules().to_vec();

        Self {
            id,
            adapter,
            shared,
            events,
            write_tx,
            normalizer: Normalizer::new(),
            buffer: Vec::new(),
            ready_settle,
            task_settle: defaults.task_settle,
            ready_settle_at: None,
            task_complete_at: None,
            stall_at: None,
            stall: Stall {
                enabled: defaults.stall_enabled || config.stall_timeout_ms.is_some(),
                timeout: stall_timeout,
                backoff: stall_timeout,
                emissions: 0,
                suspended: false,
                started: None,
            },
            last_content_hash: None,
            last_stall_hash: None,
            last_prompt_hash: None,
            fired_once: FiredOnce::default(),
            session_rules: vec![],
            adapter_rules,
            overrides: config.rule_overrides.clone(),
            trace: config.trace,
        }
    }

    // -- lifecycle ----------------------------------------------------------

    /// First step of the session task.
    pub(crate) fn begin(&mut self) {
        self.transition(SessionStatus::Starting);
    }

    /// Record the session's end state exactly once.
    pub(crate) fn finish_exit(&mut self, status: ExitStatus, error: Option<String>) {
        {
            let mut exit = self.shared.exit.lock();
            if exit.is_some() {
                return;
            }
            *exit = Some(status);
        }
        self.cancel_timers();
        if let Some(ref message) = error {
            *self.shared.error.lock() = Some(message.clone());
        }
        let _ = self.transition(SessionStatus::Stopped);
        self.emit(SessionEvent::Exit(status));
        self.shared.exited.cancel();
    }

    fn status(&self) -> SessionStatus {
        *self.shared.status.lock()
    }

    /// Move along the status graph; refuses edges the graph doesn't have.
    fn transition(&mut self, next: SessionStatus) -> bool {
        let from = {
            let mut status = self.shared.status.lock();
            let from = *status;
            if from == next {
                return false;
            }
            if !from.can_transition(next) {
                debug!(session = %self.id, %from, to = %next, "refusing status transition");
                return false;
            }
            *status = next;
            from
        };
        self.emit(SessionEvent::StatusChanged { from, to: next });
        true
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn note(&self, what: &str) {
        if self.trace {
            debug!(session = %self.id, "{what}");
        }
    }

    // -- output pipeline ----------------------------------------------------

    /// Append a chunk (tail-capped) and forward it raw. Detection runs
    /// separately in [`process`](Self::process) so the loop can coalesce
    /// bursts into one pass.
    pub(crate) fn ingest(&mut self, chunk: &[u8]) {
        *self.shared.last_activity.lock() = Some(Utc::now());
        self.buffer.extend_from_slice(chunk);
        if self.buffer.len() > MAX_OUTPUT_BUFFER {
            let excess = self.buffer.len() - MAX_OUTPUT_BUFFER;
            self.buffer.drain(..excess);
        }
        self.emit(SessionEvent::Output(Bytes::copy_from_slice(chunk)));
    }

    /// One detection pass over the buffered output.
    pub(crate) fn process(&mut self) {
        let text = self.matching_text();
        let status = self.status();

        // (a) stall-timer maintenance.
        if matches!(status, SessionStatus::Busy | SessionStatus::Authenticating)
            && self.stall.enabled
        {
            self.reset_stall_timer(&text);
        }

        // (b) a pending ready-settle owns the pass: hold it while the
        // indicator persists, drop it the moment the indicator vanishes.
        if self.ready_settle_at.is_some() {
            if self.adapter.detect_ready(&text) {
                self.ready_settle_at = Some(Instant::now() + self.ready_settle);
            } else {
                self.note("ready indicator vanished during settle");
                self.ready_settle_at = None;
            }
            return;
        }

        // (c) ready detection runs before blocking prompts: leftover
        // prompt text (e.g. a trust dialog) must not starve a genuine
        // ready transition.
        if matches!(status, SessionStatus::Starting | SessionStatus::Authenticating)
            && self.adapter.detect_ready(&text)
        {
            self.note("ready indicator seen, settling");
            self.ready_settle_at = Some(Instant::now() + self.ready_settle);
            return;
        }

        // (d) task completion, debounced with a settle timer that every
        // new chunk re-arms. The fire callback re-verifies the signal.
        if status == SessionStatus::Busy {
            if self.task_complete_signal(&text) {
                self.task_complete_at = Some(Instant::now() + self.task_settle);
                return;
            }
            if self.task_complete_at.is_some() {
                // Output still flowing; completion requires quiescence.
                self.task_complete_at = Some(Instant::now() + self.task_settle);
            }
        }

        // (e) auto-response rules, then adapter blocking-prompt detection.
        if self.try_auto_respond(&text) {
            return;
        }

        // (f) login detection outside ready/busy.
        if !matches!(status, SessionStatus::Ready | SessionStatus::Busy) {
            self.check_login(&text);
        }

        // (g) adapter-reported exit.
        if let Some(notice) = self.adapter.detect_exit(&text) {
            let exit = ExitStatus { code: notice.code, signal: None };
            self.finish_exit(exit, notice.error);
            return;
        }

        // (h) parse when ready.
        if self.status() == SessionStatus::Ready && self.emit_parsed(&text) {
            self.buffer.clear();
        }
    }

    fn matching_text(&self) -> String {
        self.normalizer.for_matching(&String::from_utf8_lossy(&self.buffer))
    }

    fn task_complete_signal(&self, text: &str) -> bool {
        self.adapter
            .detect_task_complete(text)
            .unwrap_or_else(|| self.adapter.detect_ready(text))
    }

    // -- timer callbacks ----------------------------------------------------

    pub(crate) fn on_ready_settle(&mut self) {
        self.ready_settle_at = None;
        if !matches!(
            self.status(),
            SessionStatus::Starting | SessionStatus::Authenticating
        ) {
            return;
        }
        let text = self.matching_text();
        if !self.adapter.detect_ready(&text) {
            return;
        }
        self.buffer.clear();
        self.stall_at = None;
        if self.transition(SessionStatus::Ready) {
            self.emit(SessionEvent::Ready);
        }
    }

    pub(crate) fn on_task_complete(&mut self) {
        self.task_complete_at = None;
        if self.status() != SessionStatus::Busy {
            return;
        }
        let text = self.matching_text();
        if !self.task_complete_signal(&text) {
            self.note("stale task-complete trigger, self-cancelling");
            return;
        }
        self.finish_task(&text);
    }

    /// Verified task completion: surface the turn's parsed output before
    /// the buffer goes away, then settle back to ready.
    fn finish_task(&mut self, text: &str) {
        self.emit_parsed(text);
        self.buffer.clear();
        self.stall_at = None;
        if self.transition(SessionStatus::Ready) {
            self.emit(SessionEvent::TaskComplete);
        }
    }

    // -- auto-response ------------------------------------------------------

    fn try_auto_respond(&mut self, text: &str) -> bool {
        let rules = effective_rules(&self.session_rules, &self.adapter_rules, &self.overrides);
        for rule in &rules {
            if rule.spec.once && self.fired_once.contains(rule) {
                continue;
            }
            if !rule.is_match(text) {
                continue;
            }
            let mut info = PromptInfo::new(rule.spec.kind, base::crop_prompt(text));
            if !rule.spec.description.is_empty() {
                info = info.with_instructions(rule.spec.description.clone());
            }
            if !rule.spec.safe {
                self.emit(SessionEvent::BlockingPrompt { info, auto_responded: false });
                return true;
            }
            if !rule.spec.keys.is_empty() {
                self.push_keys(&rule.spec.keys);
            } else if self.adapter.uses_tui_menus() && rule.spec.response_type.is_none() {
                // TUI menus: Enter through the key path selects the
                // highlighted entry; a text write would leave a stray CR.
                self.push_keys(std::slice::from_ref(&"enter".to_owned()));
            } else {
                self.push_write(Bytes::from(format!("{}\r", rule.spec.response)));
            }
            if rule.spec.once {
                self.fired_once.record(rule);
            }
            // Leftover prompt text ("Press enter to continue") must not
            // drive further detections — clear everything.
            self.buffer.clear();
            info.can_auto_respond = true;
            self.emit(SessionEvent::BlockingPrompt { info, auto_responded: true });
            return true;
        }

        let Some(info) = self.adapter.detect_blocking_prompt(text) else {
            self.last_prompt_hash = None;
            return false;
        };
        let hash = strip::content_hash(&format!("{}:{}", info.kind.as_str(), info.prompt));
        if self.last_prompt_hash == Some(hash) {
            // Same prompt as last pass; already surfaced.
            return true;
        }
        self.last_prompt_hash = Some(hash);

        if info.can_auto_respond {
            if let Some(response) = info.suggested_response.clone() {
                self.respond(&response);
                self.buffer.clear();
                self.emit(SessionEvent::BlockingPrompt { info, auto_responded: true });
                return true;
            }
        }
        if info.kind == PromptKind::Login
            && self.status() != SessionStatus::Authenticating
            && self.transition(SessionStatus::Authenticating)
        {
            self.emit(SessionEvent::AuthRequired(AuthInfo {
                method: AuthMethod::Unknown,
                url: info.url.clone(),
                device_code: None,
                instructions: info.instructions.clone(),
                prompt: info.prompt.clone(),
            }));
        }
        self.emit(SessionEvent::BlockingPrompt { info, auto_responded: false });
        true
    }

    /// Write a suggested response, honoring the `keys:` sentinel.
    fn respond(&mut self, suggested: &str) {
        match suggested.strip_prefix("keys:") {
            Some(names) => {
                let keys: Vec<String> = names
                    .split(',')
                    .map(|k| k.trim().to_owned())
                    .filter(|k| !k.is_empty())
                    .collect();
                self.push_keys(&keys);
            }
            None => self.push_write(Bytes::from(format!("{suggested}\r"))),
        }
    }

    // -- login / parse ------------------------------------------------------

    fn check_login(&mut self, text: &str) {
        let Some(login) = self.adapter.detect_login(text) else {
            return;
        };
        if self.status() == SessionStatus::Authenticating {
            return;
        }
        if !self.transition(SessionStatus::Authenticating) {
            return;
        }
        let info = AuthInfo {
            method: login.kind.into(),
            url: login.url.or_else(|| base::extract_url(text)),
            device_code: login.device_code.or_else(|| base::extract_device_code(text)),
            instructions: login.instructions,
            prompt: base::crop_prompt(text),
        };
        self.emit(SessionEvent::LoginRequired { url: info.url.clone() });
        self.emit(SessionEvent::AuthRequired(info));
    }

    /// Emit `message` (and `question`) for a complete parse. Returns
    /// whether anything was emitted.
    fn emit_parsed(&mut self, text: &str) -> bool {
        let Some(parsed) = self.adapter.parse_output(text) else {
            return false;
        };
        if !parsed.is_complete {
            return false;
        }
        let mut message = SessionMessage::inbound(self.id.clone(), parsed.kind, parsed.content);
        if let Some(metadata) = parsed.metadata {
            message = message.with_metadata(metadata);
        }
        if parsed.is_question {
            self.emit(SessionEvent::Message(message.clone()));
            self.emit(SessionEvent::Question(message));
        } else {
            self.emit(SessionEvent::Message(message));
        }
        true
    }

    // -- stall detection ----------------------------------------------------

    /// Restart the stall clock iff the *visible* content changed. A TUI
    /// spinner can churn out megabytes of escapes without deferring this.
    fn reset_stall_timer(&mut self, text: &str) {
        let tail = strip::tail_chars(text.trim(), STALL_HASH_CHARS);
        let hash = strip::content_hash(tail);
        if self.last_content_hash == Some(hash) {
            return;
        }
        self.last_content_hash = Some(hash);
        // Fresh content: restart the clock, the backoff, and the budget.
        self.stall.backoff = self.stall.timeout;
        self.stall.emissions = 0;
        self.stall.suspended = false;
        self.stall.started = Some(Instant::now());
        self.stall_at = Some(Instant::now() + self.stall.backoff);
    }

    pub(crate) fn on_stall_timer(&mut self) {
        self.stall_at = None;
        if self.stall.suspended
            || !matches!(
                self.status(),
                SessionStatus::Busy | SessionStatus::Authenticating
            )
        {
            return;
        }
        let raw = String::from_utf8_lossy(&self.buffer).into_owned();
        if self.adapter.detect_loading(&self.normalizer.for_classifier(&raw)) == Some(true) {
            // Demonstrably working; check again after the current backoff.
            self.note("loading indicator visible, deferring stall");
            self.stall_at = Some(Instant::now() + self.stall.backoff);
            return;
        }
        let hash = strip::content_hash(strip::tail_chars(&raw, STALL_HASH_CHARS));
        if self.last_stall_hash == Some(hash) {
            self.stall_at = Some(Instant::now() + self.stall.backoff);
            return;
        }
        self.last_stall_hash = Some(hash);

        // An adapter asserting task-complete inside a stall window is
        // high-confidence; skip the debounce.
        let text = self.normalizer.for_matching(&raw);
        if self.adapter.detect_task_complete(&text) == Some(true) {
            self.finish_task(&text);
            return;
        }

        if self.stall.emissions >= MAX_STALL_EMISSIONS {
            warn!(session = %self.id, "stall detection suspended for this task");
            self.stall.suspended = true;
            return;
        }
        self.stall.emissions += 1;
        let tail = strip::tail_bytes(&self.buffer, CLASSIFIER_TAIL_BYTES);
        let recent_output = self
            .normalizer
            .for_classifier(&String::from_utf8_lossy(tail))
            .trim()
            .to_owned();
        let stall_ms = self.stall.started.map(|t| t.elapsed().as_millis() as u64).unwrap_or(0);
        self.emit(SessionEvent::StallDetected { recent_output, stall_ms });
        // The timer stays dormant until the classifier answers (or new
        // content re-arms it).
    }

    pub(crate) fn handle_stall_classification(&mut self, result: Option<StallClassification>) {
        if !matches!(
            self.status(),
            SessionStatus::Busy | SessionStatus::Authenticating
        ) {
            return;
        }
        let Some(c) = result else {
            self.stall_backoff_and_rearm();
            return;
        };
        match c.state {
            StallState::StillWorking => self.stall_backoff_and_rearm(),
            StallState::WaitingForInput => {
                let prompt = c.prompt.unwrap_or_else(|| "waiting for input".to_owned());
                let mut info = PromptInfo::new(PromptKind::StallClassified, prompt);
                let responded = match c.suggested_response {
                    Some(response) => {
                        info = info.with_suggested_response(response.clone());
                        self.respond(&response);
                        self.buffer.clear();
                        true
                    }
                    None => false,
                };
                self.emit(SessionEvent::BlockingPrompt { info, auto_responded: responded });
            }
            StallState::TaskComplete => {
                self.buffer.clear();
                self.stall_at = None;
                if self.transition(SessionStatus::Ready) {
                    self.emit(SessionEvent::Ready);
                }
            }
            StallState::Error => {
                self.stall_at = None;
                let message =
                    c.prompt.unwrap_or_else(|| "stall classifier reported an error".to_owned());
                self.emit(SessionEvent::Error { message });
            }
        }
    }

    fn stall_backoff_and_rearm(&mut self) {
        self.stall.backoff = (self.stall.backoff * 2).min(MAX_STALL_BACKOFF);
        self.last_content_hash = None;
        self.last_stall_hash = None;
        self.stall_at = Some(Instant::now() + self.stall.backoff);
    }

    // -- commands -----------------------------------------------------------

    pub(crate) fn send(&mut self, text: &str) -> anyhow::Result<SessionMessage> {
        let status = self.status();
        if status.is_terminal() || status == SessionStatus::Stopping {
            anyhow::bail!("session {} is {status}", self.id);
        }
        // Status flips and the buffer clears before the first byte goes
        // out, so a consumer observing `busy` never sees stale detection.
        self.transition(SessionStatus::Busy);
        self.buffer.clear();
        self.ready_settle_at = None;
        self.task_complete_at = None;
        self.reset_stall_for_task();
        let formatted = self.adapter.format_input(text);
        self.push_step(Bytes::from(formatted.into_bytes()), Some(KEY_STAGGER));
        self.push_step(Bytes::from_static(b"\r"), None);
        Ok(SessionMessage::outbound(
            self.id.clone(),
            crate::event::MessageType::Task,
            text,
        ))
    }

    fn reset_stall_for_task(&mut self) {
        self.last_content_hash = None;
        self.last_stall_hash = None;
        self.stall.backoff = self.stall.timeout;
        self.stall.emissions = 0;
        self.stall.suspended = false;
        self.stall.started = Some(Instant::now());
        self.stall_at = self.stall.enabled.then(|| Instant::now() + self.stall.timeout);
    }

    pub(crate) fn write(&mut self, data: &str) {
        let formatted = self.adapter.format_input(data);
        self.push_write(Bytes::from(format!("{formatted}\r")));
    }

    pub(crate) fn write_raw(&mut self, data: Bytes) {
        self.push_write(data);
    }

    pub(crate) fn send_keys(&mut self, names: &[String]) {
        self.push_keys(names);
    }

    pub(crate) fn select_menu_option(&mut self, option: u32) {
        let mut keys = vec!["down".to_owned(); option as usize];
        keys.push("enter".to_owned());
        self.push_keys(&keys);
    }

    pub(crate) fn paste(&mut self, text: &str, bracketed: bool) {
        if bracketed {
            self.push_write(Bytes::from(format!("\x1b[200~{text}\x1b[201~")));
        } else {
            self.push_write(Bytes::from(text.to_owned()));
        }
    }

    pub(crate) fn kill(&mut self, signal: Option<PtySignal>) {
        let _ = self.transition(SessionStatus::Stopping);
        self.cancel_timers();
        let pid = self.shared.pid.load(Ordering::Acquire);
        if pid != 0 {
            // Negative pid: signal the whole child process group (forkpty
            // makes the child a session leader).
            let sig = signal.unwrap_or(PtySignal::Term).to_nix();
            let _ = nix::sys::signal::kill(Pid::from_raw(-(pid as i32)), sig);
        }
    }

    pub(crate) fn output_buffer(&self) -> Bytes {
        Bytes::copy_from_slice(&self.buffer)
    }

    pub(crate) fn clear_output_buffer(&mut self) {
        self.buffer.clear();
    }

    pub(crate) fn configure_stall(&mut self, enabled: bool, timeout_ms: Option<u64>) {
        self.stall.enabled = enabled;
        if let Some(ms) = timeout_ms {
            self.stall.timeout = Duration::from_millis(ms);
            self.stall.backoff = self.stall.timeout;
        }
        if !enabled {
            self.stall_at = None;
        }
    }

    // -- rules --------------------------------------------------------------

    pub(crate) fn add_rule(&mut self, rule: AutoResponseRule) {
        match self.session_rules.iter().position(|r| r.key() == rule.key()) {
            Some(pos) => self.session_rules[pos] = rule,
            None => self.session_rules.push(rule),
        }
    }

    pub(crate) fn remove_rule(&mut self, pattern: &str) {
        self.session_rules.retain(|r| r.spec.pattern != pattern);
        if self.adapter_rules.iter().any(|r| r.spec.pattern == pattern) {
            self.overrides.insert(pattern.to_owned(), None);
        }
    }

    pub(crate) fn set_rules(&mut self, rules: Vec<AutoResponseRule>) {
        self.session_rules = rules;
    }

    pub(crate) fn clear_rules(&mut self) {
        self.session_rules.clear();
    }

    /// Effective rule list as wire specs (session rules first).
    pub(crate) fn rules(&self) -> Vec<RuleSpec> {
        effective_rules(&self.session_rules, &self.adapter_rules, &self.overrides)
            .into_iter()
            .map(|r| r.spec)
            .collect()
    }

    // -- write plumbing -----------------------------------------------------

    fn push_keys(&mut self, names: &[String]) {
        let mut steps: Vec<WriteStep> = Vec::with_capacity(names.len());
        for name in names {
            let (bytes, known) = keys::encode(name);
            if !known {
                warn!(session = %self.id, key = %name, "unknown key name, sending literally");
            }
            steps.push(WriteStep { bytes: Bytes::from(bytes), delay_after: Some(KEY_STAGGER) });
        }
        if let Some(last) = steps.last_mut() {
            last.delay_after = None;
        }
        for step in steps {
            let _ = self.write_tx.send(step);
        }
    }

    fn push_write(&mut self, bytes: Bytes) {
        self.push_step(bytes, None);
    }

    fn push_step(&mut self, bytes: Bytes, delay_after: Option<Duration>) {
        let _ = self.write_tx.send(WriteStep { bytes, delay_after });
    }

    fn cancel_timers(&mut self) {
        self.ready_settle_at = None;
        self.task_complete_at = None;
        self.stall_at = None;
    }
}
