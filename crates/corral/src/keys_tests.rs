// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn table_is_large_and_nonempty() {
    assert!(SPECIAL_KEYS.len() >= 130, "key table shrank to {}", SPECIAL_KEYS.len());
    for (name, seq) in SPECIAL_KEYS {
        assert!(!seq.is_empty(), "{name} maps to nothing");
        assert!(!name.is_empty());
    }
}

#[test]
fn no_duplicate_names() {
    let mut seen = std::collections::HashSet::new();
    for (name, _) in SPECIAL_KEYS {
        assert!(seen.insert(*name), "duplicate key name {name}");
    }
}

#[test]
fn lookup_is_case_insensitive() {
    assert_eq!(lookup("Enter"), Some("\r"));
    assert_eq!(lookup("CTRL+C"), Some("\x03"));
    assert_eq!(lookup("Shift+Tab"), Some("\x1b[Z"));
}

#[yare::parameterized(
    enter = { "enter", "\r" },
    escape = { "escape", "\x1b" },
    up = { "up", "\x1b[A" },
    ctrl_a = { "ctrl+a", "\x01" },
    ctrl_z = { "ctrl+z", "\x1a" },
    alt_x = { "alt+x", "\x1bx" },
    shift_left = { "shift+left", "\x1b[1;2D" },
    ctrl_shift_up = { "ctrl+shift+up", "\x1b[1;6A" },
    f1 = { "f1", "\x1bOP" },
    f5 = { "f5", "\x1b[15~" },
    f12 = { "f12", "\x1b[24~" },
    ctrl_f12 = { "ctrl+f12", "\x1b[24;5~" },
    ctrl_home = { "ctrl+home", "\x1b[1;5H" },
    ctrl_delete = { "ctrl+delete", "\x1b[3;5~" },
)]
fn known_sequences(name: &str, expected: &str) {
    assert_eq!(lookup(name), Some(expected));
}

#[test]
fn encode_known_key() {
    let (bytes, known) = encode("down");
    assert!(known);
    assert_eq!(bytes, b"\x1b[B");
}

#[test]
fn encode_unknown_falls_back_to_literal() {
    let (bytes, known) = encode("frobnicate");
    assert!(!known);
    assert_eq!(bytes, b"frobnicate");
}

#[test]
fn ctrl_letters_cover_the_control_range() {
    for (i, letter) in ('a'..='z').enumerate() {
        let name = format!("ctrl+{letter}");
        let seq = lookup(&name);
        assert!(seq.is_some(), "missing {name}");
        let bytes = seq.map(str::as_bytes);
        assert_eq!(bytes.map(|b| b[0]), Some(i as u8 + 1), "{name} wrong byte");
    }
}
