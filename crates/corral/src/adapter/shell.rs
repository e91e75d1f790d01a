// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Built-in adapter for plain POSIX shells.
//!
//! Spawns `sh -i` with a fixed `PS1` so the prompt is a stable anchor:
//! the prompt at the end of the buffer means ready (and, while busy, task
//! complete); output between the cleared buffer and the next prompt is
//! the command's result.

use regex::Regex;

use super::{Adapter, ExitNotice, ParsedOutput, SpawnConfig};
use crate::rules::AutoResponseRule;

/// Default prompt written into the child's `PS1`.
pub const DEFAULT_PROMPT: &str = "pty> ";

pub struct ShellAdapter {
    prompt: String,
    prompt_pattern: Regex,
    rules: Vec<AutoResponseRule>,
}

impl Default for ShellAdapter {
    fn default() -> Self {
        Self::new(DEFAULT_PROMPT)
    }
}

impl ShellAdapter {
    pub fn new(prompt: &str) -> Self {
        let pattern = format!("{}$", regex::escape(prompt.trim_end()));
        // Escaped literal prompt; cannot fail to compile.
        #[allow(clippy::expect_used)]
        let prompt_pattern = Regex::new(&pattern).expect("escaped prompt pattern");
        Self {
            prompt: prompt.to_owned(),
            prompt_pattern,
            rules: vec![],
        }
    }

    pub fn with_rules(mut self, rules: Vec<AutoResponseRule>) -> Self {
        self.rules = rules;
        self
    }

    /// Whether the prompt anchors the end of the buffer.
    fn at_prompt(&self, buffer: &str) -> bool {
        let tail = buffer.trim_end_matches(['\n', ' ']);
        let prompt = self.prompt.trim_end();
        tail.ends_with(prompt)
    }
}

impl Adapter for ShellAdapter {
    fn adapter_type(&self) -> &str {
        "shell"
    }

    fn display_name(&self) -> &str {
        "POSIX shell"
    }

    fn auto_response_rules(&self) -> &[AutoResponseRule] {
        &self.rules
    }

    /// Always `/bin/sh`: user shells read rc files that redefine the
    /// prompt anchor.
    fn command(&self, _config: &SpawnConfig) -> String {
        "/bin/sh".to_owned()
    }

    fn args(&self, _config: &SpawnConfig) -> Vec<String> {
        vec!["-i".to_owned()]
    }

    fn env(&self, _config: &SpawnConfig) -> Vec<(String, String)> {
        vec![
            ("PS1".to_owned(), self.prompt.clone()),
            // Keep rc files from redefining the prompt anchor.
            ("ENV".to_owned(), String::new()),
        ]
    }

    fn detect_ready(&self, buffer: &str) -> bool {
        self.at_prompt(buffer)
    }

    fn detect_task_complete(&self, buffer: &str) -> Option<bool> {
        Some(self.at_prompt(buffer))
    }

    /// Shell output routinely contains phrases like "command not found";
    /// the only exit signal that matters is the real child exit.
    fn detect_exit(&self, _buffer: &str) -> Option<ExitNotice> {
        None
    }

    fn parse_output(&self, buffer: &str) -> Option<ParsedOutput> {
        if !self.at_prompt(buffer) {
            return None;
        }
        let prompt = self.prompt.trim_end();
        let content: String = buffer
            .lines()
            .filter(|line| {
                let t = line.trim_end();
                !t.is_empty() && t != prompt && !t.ends_with(prompt)
            })
            .collect::<Vec<_>>()
            .join("\n");
        if content.is_empty() {
            return None;
        }
        Some(ParsedOutput::complete(content))
    }

    fn prompt_pattern(&self) -> Option<&Regex> {
        Some(&self.prompt_pattern)
    }
}

#[cfg(test)]
#[path = "shell_tests.rs"]
mod tests;
