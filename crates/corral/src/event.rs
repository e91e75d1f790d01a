// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Core session types: status graph, lifecycle events, messages, signals.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a supervised session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Starting,
    Authenticating,
    Ready,
    Busy,
    Stopping,
    Stopped,
    Error,
}

impl SessionStatus {
    /// Wire-format string for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Starting => "starting",
            Self::Authenticating => "authenticating",
            Self::Ready => "ready",
            Self::Busy => "busy",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }

    /// Terminal statuses accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Error)
    }

    /// Whether the status graph allows `self → next`.
    ///
    /// ```text
    /// pending → starting
    /// starting → authenticating | ready | busy | stopped | error
    /// authenticating → ready | busy | stopped | error
    /// ready ⇄ busy
    /// busy → ready | stopped | error
    /// any non-terminal → stopping → stopped
    /// ```
    ///
    /// The `starting → busy` and `authenticating → busy` edges exist because
    /// `send` is accepted from any non-terminal status.
    pub fn can_transition(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Pending, Starting | Stopping | Stopped | Error)
                | (Starting, Authenticating | Ready | Busy | Stopping | Stopped | Error)
                | (Authenticating, Ready | Busy | Stopping | Stopped | Error)
                | (Ready, Busy | Stopping | Stopped)
                | (Busy, Ready | Stopping | Stopped | Error)
                | (Stopping, Stopped)
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exit status of the child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitStatus {
    /// Human-readable exit reason used for `session_stopped` events.
    pub fn reason(&self) -> String {
        match (self.code, self.signal) {
            (Some(0), _) => "normal exit".to_owned(),
            (Some(code), _) => format!("exit code {code}"),
            (None, Some(sig)) => format!("killed by signal {sig}"),
            (None, None) => "normal exit".to_owned(),
        }
    }
}

/// Kinds of blocking prompt a CLI can present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    Login,
    Update,
    Config,
    Tos,
    ModelSelect,
    ProjectSelect,
    Permission,
    StallClassified,
    Unknown,
}

impl PromptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Update => "update",
            Self::Config => "config",
            Self::Tos => "tos",
            Self::ModelSelect => "model_select",
            Self::ProjectSelect => "project_select",
            Self::Permission => "permission",
            Self::StallClassified => "stall_classified",
            Self::Unknown => "unknown",
        }
    }
}

/// A blocking prompt detected in session output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptInfo {
    /// Prompt type: login, update, permission, ...
    #[serde(rename = "type")]
    pub kind: PromptKind,
    /// Cropped text of the prompt as it appeared on screen.
    pub prompt: String,
    /// Option labels when the prompt presents a menu.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    /// Response the detector recommends writing. A value beginning `keys:`
    /// is a comma-separated key-name sequence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_response: Option<String>,
    /// Whether the engine may answer this prompt without a human.
    #[serde(default)]
    pub can_auto_respond: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl PromptInfo {
    pub fn new(kind: PromptKind, prompt: impl Into<String>) -> Self {
        Self {
            kind,
            prompt: prompt.into(),
            options: vec![],
            suggested_response: None,
            can_auto_respond: false,
            instructions: None,
            url: None,
        }
    }

    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    pub fn with_suggested_response(mut self, r: impl Into<String>) -> Self {
        self.suggested_response = Some(r.into());
        self.can_auto_respond = true;
        self
    }

    pub fn with_instructions(mut self, i: impl Into<String>) -> Self {
        self.instructions = Some(i.into());
        self
    }

    pub fn with_url(mut self, u: impl Into<String>) -> Self {
        self.url = Some(u.into());
        self
    }
}

/// How a CLI authenticates, mapped from its adapter's login detection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    ApiKey,
    DeviceCode,
    OauthBrowser,
    #[default]
    Unknown,
}

/// Structured login requirement carried by `auth_required`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthInfo {
    pub method: AuthMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Cropped snippet of the login prompt.
    pub prompt: String,
}

/// Direction of a message relative to the supervised CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// From the CLI to the controller.
    Inbound,
    /// From the controller to the CLI.
    Outbound,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Task,
    #[default]
    Response,
    Question,
    Answer,
    Status,
    Error,
}

/// A message exchanged with the supervised CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMessage {
    pub id: String,
    pub session_id: String,
    pub direction: Direction,
    pub message_type: MessageType,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl SessionMessage {
    pub fn outbound(session_id: impl Into<String>, kind: MessageType, content: impl Into<String>) -> Self {
        Self::new(session_id, Direction::Outbound, kind, content)
    }

    pub fn inbound(session_id: impl Into<String>, kind: MessageType, content: impl Into<String>) -> Self {
        Self::new(session_id, Direction::Inbound, kind, content)
    }

    fn new(
        session_id: impl Into<String>,
        direction: Direction,
        message_type: MessageType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            direction,
            message_type,
            content: content.into(),
            metadata: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Classifier verdict for a stalled session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StallState {
    WaitingForInput,
    StillWorking,
    TaskComplete,
    Error,
}

/// Result of an external stall classification.
///
/// A `suggested_response` beginning exactly with `keys:` is interpreted as a
/// comma-separated key-name sequence (whitespace around each name is
/// trimmed); anything else is written as text followed by Enter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StallClassification {
    pub state: StallState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_response: Option<String>,
}

/// Events emitted by a session, in emission order per chunk.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Raw PTY output, forwarded before any detection runs.
    Output(Bytes),
    /// The CLI settled into its ready state.
    Ready,
    /// Login flow detected (bare signal; `AuthRequired` carries detail).
    LoginRequired { url: Option<String> },
    /// Login flow detected, with structured method/code/url info.
    AuthRequired(AuthInfo),
    /// A blocking prompt was detected, and possibly auto-answered.
    BlockingPrompt { info: PromptInfo, auto_responded: bool },
    /// A complete parsed message from the CLI.
    Message(SessionMessage),
    /// A parsed message flagged as a question for the controller.
    Question(SessionMessage),
    /// The child process exited (or the adapter reported an exit).
    Exit(ExitStatus),
    Error { message: String },
    /// Output has not visibly changed for the stall window.
    StallDetected { recent_output: String, stall_ms: u64 },
    StatusChanged { from: SessionStatus, to: SessionStatus },
    /// The current task's output settled into a completion state.
    TaskComplete,
}

/// Named signals that can be delivered to the child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtySignal {
    Hup,
    Int,
    Quit,
    Kill,
    Usr1,
    Usr2,
    Term,
    Cont,
    Stop,
    Tstp,
    Winch,
}

impl PtySignal {
    /// Parse a signal name (e.g. "SIGTERM", "TERM", "15") into a `PtySignal`.
    pub fn from_name(name: &str) -> Option<Self> {
        let upper = name.to_uppercase();
        let bare: &str = match upper.strip_prefix("SIG") {
            Some(s) => s,
            None => &upper,
        };

        match bare {
            "HUP" | "1" => Some(Self::Hup),
            "INT" | "2" => Some(Self::Int),
            "QUIT" | "3" => Some(Self::Quit),
            "KILL" | "9" => Some(Self::Kill),
            "USR1" | "10" => Some(Self::Usr1),
            "USR2" | "12" => Some(Self::Usr2),
            "TERM" | "15" => Some(Self::Term),
            "CONT" | "18" => Some(Self::Cont),
            "STOP" | "19" => Some(Self::Stop),
            "TSTP" | "20" => Some(Self::Tstp),
            "WINCH" | "28" => Some(Self::Winch),
            _ => None,
        }
    }

    /// Convert to the corresponding `nix` signal for delivery.
    pub fn to_nix(self) -> Signal {
        match self {
            Self::Hup => Signal::SIGHUP,
            Self::Int => Signal::SIGINT,
            Self::Quit => Signal::SIGQUIT,
            Self::Kill => Signal::SIGKILL,
            Self::Usr1 => Signal::SIGUSR1,
            Self::Usr2 => Signal::SIGUSR2,
            Self::Term => Signal::SIGTERM,
            Self::Cont => Signal::SIGCONT,
            Self::Stop => Signal::SIGSTOP,
            Self::Tstp => Signal::SIGTSTP,
            Self::Winch => Signal::SIGWINCH,
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
