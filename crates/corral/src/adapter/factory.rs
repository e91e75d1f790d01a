// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Declarative adapter construction.
//!
//! Most CLIs don't need bespoke code: a command line, a handful of
//! indicator patterns, and a rule table cover them. `AdapterSpec` is the
//! serializable description; [`FactoryAdapter::compile`] turns it into a
//! working [`Adapter`] with every pattern compiled up front.

use std::collections::HashMap;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::event::{PromptInfo, PromptKind};
use crate::rules::{compile_pattern, AutoResponseRule, RuleSpec};

use super::{base, Adapter, ExitNotice, LoginKind, LoginNotice, ParsedOutput, SpawnConfig};

/// Login detection description.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginSpec {
    /// Patterns whose match means a login is required.
    pub patterns: Vec<String>,
    #[serde(default)]
    pub kind: LoginKind,
    #[serde(default)]
    pub instructions: Option<String>,
}

/// One entry in the blocking-prompt table.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptSpec {
    pub pattern: String,
    #[serde(rename = "type")]
    pub kind: PromptKind,
    /// Response written automatically when present.
    #[serde(default)]
    pub response: Option<String>,
}

/// Serializable description of an adapter.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterSpec {
    pub adapter_type: String,
    pub display_name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub uses_tui_menus: bool,
    #[serde(default)]
    pub ready_settle_ms: Option<u64>,
    /// Any match means the CLI is ready for input.
    #[serde(default)]
    pub ready_patterns: Vec<String>,
    /// Dedicated task-complete indicators (optional).
    #[serde(default)]
    pub task_complete_patterns: Vec<String>,
    /// Working/loading indicators (optional; matched on classifier text).
    #[serde(default)]
    pub loading_patterns: Vec<String>,
    #[serde(default)]
    pub login: Option<LoginSpec>,
    #[serde(default)]
    pub blocking_prompts: Vec<PromptSpec>,
    /// Extra exit indicators beyond the generic defaults.
    #[serde(default)]
    pub exit_patterns: Vec<String>,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
    #[serde(default)]
    pub prompt_pattern: Option<String>,
}

/// An adapter compiled from an [`AdapterSpec`].
pub struct FactoryAdapter {
    spec: AdapterSpec,
    ready: Vec<Regex>,
    task_complete: Vec<Regex>,
    loading: Vec<Regex>,
    login: Vec<Regex>,
    prompts: Vec<(Regex, PromptSpec)>,
    exits: Vec<Regex>,
    rules: Vec<AutoResponseRule>,
    prompt_pattern: Option<Regex>,
}

impl FactoryAdapter {
    /// Compile every pattern in the spec. Fails on the first bad pattern.
    pub fn compile(spec: AdapterSpec) -> anyhow::Result<Self> {
        let ready = compile_all(&spec.ready_patterns)?;
        let task_complete = compile_all(&spec.task_complete_patterns)?;
        let loading = compile_all(&spec.loading_patterns)?;
        let login = match spec.login {
            Some(ref login) => compile_all(&login.patterns)?,
            None => vec![],
        };
        let prompts = spec
            .blocking_prompts
            .iter()
            .map(|p| Ok((compile_pattern(&p.pattern, "")?, p.clone())))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let exits = compile_all(&spec.exit_patterns)?;
        let rules = spec
            .rules
            .iter()
            .cloned()
            .map(AutoResponseRule::compile)
            .collect::<anyhow::Result<Vec<_>>>()?;
        let prompt_pattern =
            spec.prompt_pattern.as_deref().map(|p| compile_pattern(p, "")).transpose()?;

        Ok(Self {
            spec,
            ready,
            task_complete,
            loading,
            login,
            prompts,
            exits,
            rules,
            prompt_pattern,
        })
    }
}

fn compile_all(patterns: &[String]) -> anyhow::Result<Vec<Regex>> {
    patterns.iter().map(|p| compile_pattern(p, "")).collect()
}

fn any_match(patterns: &[Regex], text: &str) -> bool {
    patterns.iter().any(|p| p.is_match(text))
}

impl Adapter for FactoryAdapter {
    fn adapter_type(&self) -> &str {
        &self.spec.adapter_type
    }

    fn display_name(&self) -> &str {
        &self.spec.display_name
    }

    fn auto_response_rules(&self) -> &[AutoResponseRule] {
        &self.rules
    }

    fn uses_tui_menus(&self) -> bool {
        self.spec.uses_tui_menus
    }

    fn ready_settle(&self) -> Option<Duration> {
        self.spec.ready_settle_ms.map(Duration::from_millis)
    }

    fn command(&self, _config: &SpawnConfig) -> String {
        self.spec.command.clone()
    }

    fn args(&self, _config: &SpawnConfig) -> Vec<String> {
        self.spec.args.clone()
    }

    fn env(&self, _config: &SpawnConfig) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> =
            self.spec.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        env.sort();
        env
    }

    fn detect_login(&self, buffer: &str) -> Option<LoginNotice> {
        if self.login.is_empty() || !any_match(&self.login, buffer) {
            return None;
        }
        let login = self.spec.login.as_ref()?;
        Some(LoginNotice {
            kind: login.kind,
            url: base::extract_url(buffer),
            device_code: base::extract_device_code(buffer),
            instructions: login.instructions.clone(),
        })
    }

    fn detect_ready(&self, buffer: &str) -> bool {
        any_match(&self.ready, buffer)
    }

    fn detect_task_complete(&self, buffer: &str) -> Option<bool> {
        if self.task_complete.is_empty() {
            return None;
        }
        Some(any_match(&self.task_complete, buffer))
    }

    fn detect_loading(&self, buffer: &str) -> Option<bool> {
        if self.loading.is_empty() {
            return None;
        }
        Some(any_match(&self.loading, buffer))
    }

    fn detect_blocking_prompt(&self, buffer: &str) -> Option<PromptInfo> {
        for (pattern, prompt) in &self.prompts {
            if pattern.is_match(buffer) {
                let mut info = PromptInfo::new(prompt.kind, base::crop_prompt(buffer));
                if let Some(ref response) = prompt.response {
                    info = info.with_suggested_response(response.clone());
                }
                return Some(info);
            }
        }
        base::detect_blocking_prompt(buffer)
    }

    fn detect_exit(&self, buffer: &str) -> Option<ExitNotice> {
        if any_match(&self.exits, buffer) {
            return Some(ExitNotice { code: None, error: None });
        }
        base::detect_exit(buffer)
    }

    fn parse_output(&self, buffer: &str) -> Option<ParsedOutput> {
        let prompt = self.prompt_pattern.as_ref()?;
        let trimmed = buffer.trim_end_matches('\n');
        if !prompt.is_match(trimmed) {
            return None;
        }
        let content = prompt.replace_all(trimmed, "").trim().to_owned();
        if content.is_empty() {
            return None;
        }
        Some(ParsedOutput::complete(content))
    }

    fn prompt_pattern(&self) -> Option<&Regex> {
        self.prompt_pattern.as_ref()
    }
}

#[cfg(test)]
#[path = "factory_tests.rs"]
mod tests;
