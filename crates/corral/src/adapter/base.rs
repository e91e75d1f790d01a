// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Generic detectors shared by all adapters.
//!
//! These are deliberately conservative: they only claim `can_auto_respond`
//! for prompts whose answer is unambiguous (press-enter banners). Anything
//! else is surfaced to the controller.

use std::sync::OnceLock;

use regex::Regex;

use crate::event::{PromptInfo, PromptKind};

use super::ExitNotice;

/// How much trailing text a prompt snippet carries.
const PROMPT_CROP: usize = 200;

struct Detectors {
    yes_no: Regex,
    menu_option: Regex,
    press_enter: Regex,
    trust: Regex,
    exit_code: Regex,
    not_found: Regex,
    device_code: Regex,
    url: Regex,
}

fn detectors() -> &'static Detectors {
    static DETECTORS: OnceLock<Detectors> = OnceLock::new();
    DETECTORS.get_or_init(|| Detectors {
        yes_no: re(r"(?i)[\[(](?:y/n|yes/no)[\])]\s*$"),
        menu_option: re(r"(?m)^\s*(?:❯\s*)?(\d+)[.)]\s+(\S.*)$"),
        press_enter: re(r"(?i)press\s+enter\s+to\s+continue"),
        trust: re(r"(?i)do you trust|trust the contents|trust this (?:folder|workspace|directory)"),
        exit_code: re(r"Process exited with code (\d+)"),
        not_found: re(r"(?i)command not found"),
        device_code: re(r"\b([A-Z0-9]{4}-[A-Z0-9]{4,6})\b"),
        url: re(r"https?://[^\s\x1b]+"),
    })
}

/// The literals above are fixed at compile time; an invalid one is a bug.
#[allow(clippy::expect_used)]
fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("invalid built-in pattern")
}

/// Trailing prompt snippet for event payloads.
pub fn crop_prompt(text: &str) -> String {
    crate::strip::tail_chars(text.trim_end(), PROMPT_CROP).trim().to_owned()
}

/// Generic blocking-prompt detection applied when no rule and no
/// adapter-specific detector matched.
pub fn detect_blocking_prompt(buffer: &str) -> Option<PromptInfo> {
    let d = detectors();
    let tail = crop_prompt(buffer);
    if tail.is_empty() {
        return None;
    }

    if d.press_enter.is_match(&tail) {
        return Some(
            PromptInfo::new(PromptKind::Unknown, tail.clone()).with_suggested_response(""),
        );
    }

    if d.trust.is_match(&tail) {
        return Some(PromptInfo::new(PromptKind::Permission, tail));
    }

    if d.yes_no.is_match(&tail) {
        return Some(
            PromptInfo::new(PromptKind::Unknown, tail)
                .with_options(vec!["y".to_owned(), "n".to_owned()]),
        );
    }

    let options: Vec<String> = d
        .menu_option
        .captures_iter(&tail)
        .filter_map(|c| c.get(2).map(|m| m.as_str().trim().to_owned()))
        .collect();
    if options.len() >= 2 {
        return Some(PromptInfo::new(PromptKind::Unknown, tail).with_options(options));
    }

    // Fallback: a question mark ending the last non-empty line.
    let last_line = tail.lines().rev().find(|l| !l.trim().is_empty())?;
    if last_line.trim_end().ends_with('?') {
        return Some(PromptInfo::new(PromptKind::Unknown, last_line.trim().to_owned()));
    }

    None
}

/// Generic exit detection.
pub fn detect_exit(buffer: &str) -> Option<ExitNotice> {
    let d = detectors();
    if let Some(caps) = d.exit_code.captures(buffer) {
        let code = caps.get(1).and_then(|m| m.as_str().parse().ok());
        return Some(ExitNotice { code, error: None });
    }
    if d.not_found.is_match(buffer) {
        return Some(ExitNotice {
            code: Some(127),
            error: Some(crop_prompt(buffer)),
        });
    }
    None
}

/// Extract a device code (e.g. `ABCD-1234`) from a login prompt.
pub fn extract_device_code(buffer: &str) -> Option<String> {
    detectors()
        .device_code
        .captures(buffer)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_owned())
}

/// Extract the first URL from a login prompt.
pub fn extract_url(buffer: &str) -> Option<String> {
    detectors().url.find(buffer).map(|m| m.as_str().to_owned())
}

#[cfg(test)]
#[path = "base_tests.rs"]
mod tests;
