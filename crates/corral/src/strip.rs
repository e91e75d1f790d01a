// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ANSI/TUI normalization for content hashing and rule matching.
//!
//! TUI agents redraw regions instead of streaming a line log, so the raw
//! byte stream is useless for pattern matching: the same visible screen can
//! be produced by wildly different escape-sequence runs. Every detector in
//! the engine matches against one of the two normalized views produced
//! here; matching on raw bytes is forbidden.

use regex::Regex;

/// Compile a built-in pattern literal. The literals are fixed at compile
/// time; an invalid one is a bug.
#[allow(clippy::expect_used)]
fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("invalid built-in pattern")
}

/// Normalizes raw PTY output into matchable text.
///
/// Two views:
/// - [`for_matching`](Self::for_matching) (aggressive): used for rule
///   matching and stall content hashing. Cursor motion collapses to a
///   space, decorative TUI glyphs collapse to a space, and duration tokens
///   (`3s`, `1m12s`, ...) rewrite to `0s` so a live countdown does not
///   perturb the content hash.
/// - [`for_classifier`](Self::for_classifier) (lighter): keeps glyphs and
///   durations, which are useful signals for an external stall classifier.
#[derive(Debug)]
pub struct Normalizer {
    /// Cursor motion and erase sequences; replaced by a single space to
    /// preserve word boundaries across redraws.
    motion: Regex,
    osc: Regex,
    dcs: Regex,
    csi: Regex,
    esc_single: Regex,
    duration: Regex,
    spaces: Regex,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    pub fn new() -> Self {
        Self {
            motion: re(r"\x1b\[[0-9;]*[A-HJKdf]"),
            osc: re(r"\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)"),
            dcs: re(r"(?s)\x1bP.*?\x1b\\"),
            csi: re(r"\x1b\[[0-9;?]*[ -/]*[@-~]"),
            esc_single: re(r"(?s)\x1b."),
            duration: re(r"\b(?:\d+[hms])+\b"),
            spaces: re(r" {2,}"),
        }
    }

    /// Aggressive normalization for rule matching and content hashing.
    pub fn for_matching(&self, raw: &str) -> String {
        let s = self.strip_escapes(raw);
        let s = strip_controls(&s, true);
        let s = self.duration.replace_all(&s, "0s");
        self.spaces.replace_all(&s, " ").into_owned()
    }

    /// Lighter normalization for stall-classifier context. Escapes and
    /// control bytes are stripped; glyphs and durations survive.
    pub fn for_classifier(&self, raw: &str) -> String {
        let s = self.strip_escapes(raw);
        strip_controls(&s, false)
    }

    fn strip_escapes(&self, raw: &str) -> String {
        let s = self.osc.replace_all(raw, "");
        let s = self.dcs.replace_all(&s, "");
        let s = self.motion.replace_all(&s, " ");
        let s = self.csi.replace_all(&s, "");
        self.esc_single.replace_all(&s, "").into_owned()
    }
}

/// Drop non-printable control bytes (keeping TAB and LF) and normalize
/// NBSP. In aggressive mode, decorative TUI glyphs collapse to a space.
fn strip_controls(s: &str, aggressive: bool) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\t' | '\n' => out.push(c),
            '\u{00a0}' => out.push(' '),
            c if (c as u32) < 0x20 || c == '\u{7f}' => {}
            c if aggressive && is_tui_glyph(c) => out.push(' '),
            c => out.push(c),
        }
    }
    out
}

/// Box drawing, blocks, geometric shapes, arrows, braille spinners, and
/// common dingbats used as TUI decoration.
fn is_tui_glyph(c: char) -> bool {
    matches!(c as u32,
        0x2190..=0x21ff   // arrows
        | 0x2500..=0x257f // box drawing
        | 0x2580..=0x259f // block elements
        | 0x25a0..=0x25ff // geometric shapes
        | 0x2600..=0x26ff // misc symbols
        | 0x2700..=0x27bf // dingbats
        | 0x2800..=0x28ff // braille (spinner frames)
    ) || matches!(c, '…' | '•' | '·' | '◆' | '❯' | '✻')
}

/// Deterministic 32-bit FNV-1a hash of visible content.
///
/// Stall detection only needs a stable equality token, not cryptographic
/// strength.
pub fn content_hash(s: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for b in s.as_bytes() {
        hash ^= u32::from(*b);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Last `n` characters of `s`, on a char boundary.
pub fn tail_chars(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match s.char_indices().rev().nth(n - 1) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

/// Last `n` bytes of `buf`.
pub fn tail_bytes(buf: &[u8], n: usize) -> &[u8] {
    &buf[buf.len().saturating_sub(n)..]
}

#[cfg(test)]
#[path = "strip_tests.rs"]
mod tests;
