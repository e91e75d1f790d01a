// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Auto-response rules: wire format, compilation, overrides, resolution.

use std::collections::{HashMap, HashSet};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::event::PromptKind;

/// How a rule answers a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Write `response` followed by Enter.
    Text,
    /// Send the `keys` sequence.
    Keys,
}

/// Wire-format auto-response rule, as adapters declare them and as the
/// worker protocol serializes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSpec {
    /// Regex source, without flags.
    pub pattern: String,
    /// JS-style flag letters (`i`, `m`, `s`); compiled as inline flags.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub flags: String,
    #[serde(rename = "type")]
    pub kind: PromptKind,
    #[serde(default)]
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_type: Option<ResponseType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
    #[serde(default)]
    pub description: String,
    /// Unsafe rules are surfaced to the controller instead of auto-answered.
    #[serde(default = "default_true")]
    pub safe: bool,
    /// Fire at most once per session.
    #[serde(default)]
    pub once: bool,
}

fn default_true() -> bool {
    true
}

impl RuleSpec {
    pub fn new(pattern: impl Into<String>, kind: PromptKind) -> Self {
        Self {
            pattern: pattern.into(),
            flags: String::new(),
            kind,
            response: String::new(),
            response_type: None,
            keys: vec![],
            description: String::new(),
            safe: true,
            once: false,
        }
    }

    pub fn with_flags(mut self, flags: impl Into<String>) -> Self {
        self.flags = flags.into();
        self
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = response.into();
        self
    }

    pub fn with_keys(mut self, keys: Vec<String>) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_description(mut self, d: impl Into<String>) -> Self {
        self.description = d.into();
        self
    }

    pub fn unsafe_rule(mut self) -> Self {
        self.safe = false;
        self
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    /// Identity key for once-tracking and replace-on-add semantics.
    pub fn key(&self) -> String {
        format!("{}:{}", self.pattern, self.flags)
    }
}

/// A compiled auto-response rule.
#[derive(Debug, Clone)]
pub struct AutoResponseRule {
    pub spec: RuleSpec,
    pattern: Regex,
}

impl AutoResponseRule {
    /// Compile a wire-format rule.
    pub fn compile(spec: RuleSpec) -> anyhow::Result<Self> {
        let pattern = compile_pattern(&spec.pattern, &spec.flags)?;
        Ok(Self { spec, pattern })
    }

    /// Identity key: `source:flags`.
    pub fn key(&self) -> String {
        self.spec.key()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

/// Compile a pattern with JS-style flag letters into a [`Regex`].
///
/// `g` and `u` have no Rust equivalent and are accepted as no-ops so rule
/// tables written against the original wire format keep working.
pub fn compile_pattern(source: &str, flags: &str) -> anyhow::Result<Regex> {
    let mut inline = String::new();
    for f in flags.chars() {
        match f {
            'i' | 'm' | 's' => inline.push(f),
            'g' | 'u' => {}
            other => anyhow::bail!("unsupported regex flag {other:?} in rule {source:?}"),
        }
    }
    let compiled = if inline.is_empty() {
        Regex::new(source)
    } else {
        Regex::new(&format!("(?{inline}){source}"))
    };
    compiled.map_err(|e| anyhow::anyhow!("invalid rule pattern {source:?}: {e}"))
}

/// Partial rule shallow-merged over an adapter rule via `ruleOverrides`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleOverride {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<PromptKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_type: Option<ResponseType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safe: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub once: Option<bool>,
}

impl RuleOverride {
    /// Apply this override to a rule. The pattern is untouched, so the
    /// compiled regex carries over.
    pub fn apply(&self, rule: &AutoResponseRule) -> AutoResponseRule {
        let mut spec = rule.spec.clone();
        if let Some(kind) = self.kind {
            spec.kind = kind;
        }
        if let Some(ref response) = self.response {
            spec.response = response.clone();
        }
        if let Some(response_type) = self.response_type {
            spec.response_type = Some(response_type);
        }
        if let Some(ref keys) = self.keys {
            spec.keys = keys.clone();
        }
        if let Some(ref description) = self.description {
            spec.description = description.clone();
        }
        if let Some(safe) = self.safe {
            spec.safe = safe;
        }
        if let Some(once) = self.once {
            spec.once = once;
        }
        AutoResponseRule { spec, pattern: rule.pattern.clone() }
    }
}

/// Resolve the effective rule list for one processing pass: session rules
/// first (higher priority), then adapter rules minus per-session disables,
/// with per-session overrides applied.
///
/// `overrides` is keyed by rule pattern source; `None` disables the rule.
pub fn effective_rules(
    session_rules: &[AutoResponseRule],
    adapter_rules: &[AutoResponseRule],
    overrides: &HashMap<String, Option<RuleOverride>>,
) -> Vec<AutoResponseRule> {
    let mut out: Vec<AutoResponseRule> = session_rules.to_vec();
    for rule in adapter_rules {
        match overrides.get(&rule.spec.pattern) {
            Some(None) => {}
            Some(Some(patch)) => out.push(patch.apply(rule)),
            None => out.push(rule.clone()),
        }
    }
    out
}

/// Track which once-rules have already fired for a session.
#[derive(Debug, Default)]
pub struct FiredOnce {
    keys: HashSet<String>,
}

impl FiredOnce {
    pub fn contains(&self, rule: &AutoResponseRule) -> bool {
        self.keys.contains(&rule.key())
    }

    pub fn record(&mut self, rule: &AutoResponseRule) {
        self.keys.insert(rule.key());
    }
}

#[cfg(test)]
#[path = "rules_tests.rs"]
mod tests;
