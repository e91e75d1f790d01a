// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adapter contract: per-CLI launch and output-interpretation policy.
//!
//! An adapter tells the engine how to start a particular CLI and how to
//! read its output: when it is ready for input, when it is asking a
//! blocking question, when it wants a login, when it finished a task, and
//! when it exited. All `buffer` arguments receive *normalized* visible
//! text (see [`crate::strip`]), never raw bytes — TUI redraws would defeat
//! any pattern applied to the raw stream. The one exception is
//! [`Adapter::detect_loading`], which receives the classifier view so
//! spinner glyphs survive.

pub mod base;
pub mod factory;
pub mod registry;
pub mod shell;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::event::{AuthMethod, MessageType, PromptInfo};
use crate::rules::{AutoResponseRule, RuleOverride};

/// Spawn request for a new session.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnConfig {
    /// Session id; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    /// Adapter type key.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub workdir: Option<PathBuf>,
    /// Extra environment for the child, layered over the adapter's env.
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_rows")]
    pub rows: u16,
    /// Stall-timeout override for this session.
    #[serde(default)]
    pub stall_timeout_ms: Option<u64>,
    /// Adapter-rule patches keyed by pattern source; `null` disables the
    /// rule, a partial rule is shallow-merged over it.
    #[serde(default)]
    pub rule_overrides: HashMap<String, Option<RuleOverride>>,
    /// Ready-settle override for this session.
    #[serde(default)]
    pub ready_settle_ms: Option<u64>,
    /// Log every pipeline decision at debug level.
    #[serde(default)]
    pub trace: bool,
}

fn default_cols() -> u16 {
    120
}

fn default_rows() -> u16 {
    40
}

impl SpawnConfig {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            kind: kind.into(),
            workdir: None,
            env: HashMap::new(),
            cols: default_cols(),
            rows: default_rows(),
            stall_timeout_ms: None,
            rule_overrides: HashMap::new(),
            ready_settle_ms: None,
            trace: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Login-flow kind an adapter can detect; maps onto [`AuthMethod`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginKind {
    ApiKey,
    DeviceCode,
    OauthBrowser,
    #[default]
    Unknown,
}

impl From<LoginKind> for AuthMethod {
    fn from(kind: LoginKind) -> Self {
        match kind {
            LoginKind::ApiKey => AuthMethod::ApiKey,
            LoginKind::DeviceCode => AuthMethod::DeviceCode,
            LoginKind::OauthBrowser => AuthMethod::OauthBrowser,
            LoginKind::Unknown => AuthMethod::Unknown,
        }
    }
}

/// A detected login requirement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoginNotice {
    pub kind: LoginKind,
    pub url: Option<String>,
    pub device_code: Option<String>,
    pub instructions: Option<String>,
}

/// A detected child exit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExitNotice {
    pub code: Option<i32>,
    pub error: Option<String>,
}

/// A message parsed out of session output.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOutput {
    pub kind: MessageType,
    pub content: String,
    pub is_complete: bool,
    pub is_question: bool,
    pub metadata: Option<serde_json::Value>,
}

impl ParsedOutput {
    pub fn complete(content: impl Into<String>) -> Self {
        Self {
            kind: MessageType::Response,
            content: content.into(),
            is_complete: true,
            is_question: false,
            metadata: None,
        }
    }

    pub fn question(content: impl Into<String>) -> Self {
        Self {
            kind: MessageType::Question,
            content: content.into(),
            is_complete: true,
            is_question: true,
            metadata: None,
        }
    }
}

/// Per-CLI launch and detection policy.
///
/// Detection methods must be cheap and side-effect free; the engine calls
/// them on every scheduled processing pass against buffer tails of at most
/// ~100 KB of normalized text.
pub trait Adapter: Send + Sync {
    /// Registry key (e.g. `"shell"`).
    fn adapter_type(&self) -> &str;

    fn display_name(&self) -> &str;

    /// Rules answered automatically, in priority order.
    fn auto_response_rules(&self) -> &[AutoResponseRule] {
        &[]
    }

    /// TUI-menu CLIs get a bare Enter (via the key path) for rules that
    /// specify neither a response type nor keys.
    fn uses_tui_menus(&self) -> bool {
        false
    }

    /// Ready-settle override; `None` uses the engine default (100 ms).
    fn ready_settle(&self) -> Option<Duration> {
        None
    }

    fn command(&self, config: &SpawnConfig) -> String;

    fn args(&self, _config: &SpawnConfig) -> Vec<String> {
        vec![]
    }

    fn env(&self, _config: &SpawnConfig) -> Vec<(String, String)> {
        vec![]
    }

    /// Detect a login flow. `None` means no login is required.
    fn detect_login(&self, _buffer: &str) -> Option<LoginNotice> {
        None
    }

    /// Whether the CLI's idle/ready indicator is present.
    fn detect_ready(&self, buffer: &str) -> bool;

    /// Dedicated task-completion signal. `None` means the adapter has no
    /// such signal and the engine falls back to [`detect_ready`].
    ///
    /// [`detect_ready`]: Adapter::detect_ready
    fn detect_task_complete(&self, _buffer: &str) -> Option<bool> {
        None
    }

    /// Whether a working/loading indicator is visible. Receives the
    /// classifier view (glyphs intact). `None` means unsupported.
    fn detect_loading(&self, _buffer: &str) -> Option<bool> {
        None
    }

    /// Detect a blocking prompt. The default covers generic `[y/n]`
    /// questions, numbered menus, press-enter banners, trust dialogs, and
    /// a trailing-`?` fallback.
    fn detect_blocking_prompt(&self, buffer: &str) -> Option<PromptInfo> {
        base::detect_blocking_prompt(buffer)
    }

    /// Detect a reported exit. The default recognizes "Process exited with
    /// code N" and "command not found".
    fn detect_exit(&self, buffer: &str) -> Option<ExitNotice> {
        base::detect_exit(buffer)
    }

    /// Parse a complete message out of the buffer, if one is present.
    fn parse_output(&self, _buffer: &str) -> Option<ParsedOutput> {
        None
    }

    /// Format a controller message into the CLI's input syntax.
    fn format_input(&self, message: &str) -> String {
        message.to_owned()
    }

    /// The CLI's input-prompt pattern, when it has a stable one.
    fn prompt_pattern(&self) -> Option<&Regex> {
        None
    }
}
