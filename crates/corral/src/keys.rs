// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Named-key → escape-sequence table in xterm encoding.
//!
//! Modifier codes follow xterm: 2 = Shift, 3 = Alt, 4 = Shift+Alt,
//! 5 = Ctrl, 6 = Ctrl+Shift. Names are matched case-insensitively.

/// The closed key table shared by `send_keys`, menu navigation, and
/// auto-response key sequences.
pub const SPECIAL_KEYS: &[(&str, &str)] = &[
    // Basics
    ("enter", "\r"),
    ("return", "\r"),
    ("tab", "\t"),
    ("backtab", "\x1b[Z"),
    ("shift+tab", "\x1b[Z"),
    ("escape", "\x1b"),
    ("esc", "\x1b"),
    ("space", " "),
    ("backspace", "\x7f"),
    ("delete", "\x1b[3~"),
    ("insert", "\x1b[2~"),
    ("up", "\x1b[A"),
    ("down", "\x1b[B"),
    ("right", "\x1b[C"),
    ("left", "\x1b[D"),
    ("home", "\x1b[H"),
    ("end", "\x1b[F"),
    ("pageup", "\x1b[5~"),
    ("pagedown", "\x1b[6~"),
    // Function keys
    ("f1", "\x1bOP"),
    ("f2", "\x1bOQ"),
    ("f3", "\x1bOR"),
    ("f4", "\x1bOS"),
    ("f5", "\x1b[15~"),
    ("f6", "\x1b[17~"),
    ("f7", "\x1b[18~"),
    ("f8", "\x1b[19~"),
    ("f9", "\x1b[20~"),
    ("f10", "\x1b[21~"),
    ("f11", "\x1b[23~"),
    ("f12", "\x1b[24~"),
    // Ctrl+letter → 0x01..0x1A
    ("ctrl+a", "\x01"),
    ("ctrl+b", "\x02"),
    ("ctrl+c", "\x03"),
    ("ctrl+d", "\x04"),
    ("ctrl+e", "\x05"),
    ("ctrl+f", "\x06"),
    ("ctrl+g", "\x07"),
    ("ctrl+h", "\x08"),
    ("ctrl+i", "\t"),
    ("ctrl+j", "\n"),
    ("ctrl+k", "\x0b"),
    ("ctrl+l", "\x0c"),
    ("ctrl+m", "\r"),
    ("ctrl+n", "\x0e"),
    ("ctrl+o", "\x0f"),
    ("ctrl+p", "\x10"),
    ("ctrl+q", "\x11"),
    ("ctrl+r", "\x12"),
    ("ctrl+s", "\x13"),
    ("ctrl+t", "\x14"),
    ("ctrl+u", "\x15"),
    ("ctrl+v", "\x16"),
    ("ctrl+w", "\x17"),
    ("ctrl+x", "\x18"),
    ("ctrl+y", "\x19"),
    ("ctrl+z", "\x1a"),
    // Ctrl specials
    ("ctrl+space", "\0"),
    ("ctrl+\\", "\x1c"),
    ("ctrl+]", "\x1d"),
    ("ctrl+^", "\x1e"),
    ("ctrl+_", "\x1f"),
    // Alt+letter → ESC letter
    ("alt+a", "\x1ba"),
    ("alt+b", "\x1bb"),
    ("alt+c", "\x1bc"),
    ("alt+d", "\x1bd"),
    ("alt+e", "\x1be"),
    ("alt+f", "\x1bf"),
    ("alt+g", "\x1bg"),
    ("alt+h", "\x1bh"),
    ("alt+i", "\x1bi"),
    ("alt+j", "\x1bj"),
    ("alt+k", "\x1bk"),
    ("alt+l", "\x1bl"),
    ("alt+m", "\x1bm"),
    ("alt+n", "\x1bn"),
    ("alt+o", "\x1bo"),
    ("alt+p", "\x1bp"),
    ("alt+q", "\x1bq"),
    ("alt+r", "\x1br"),
    ("alt+s", "\x1bs"),
    ("alt+t", "\x1bt"),
    ("alt+u", "\x1bu"),
    ("alt+v", "\x1bv"),
    ("alt+w", "\x1bw"),
    ("alt+x", "\x1bx"),
    ("alt+y", "\x1by"),
    ("alt+z", "\x1bz"),
    ("alt+enter", "\x1b\r"),
    ("alt+backspace", "\x1b\x7f"),
    // Modified arrows
    ("shift+up", "\x1b[1;2A"),
    ("shift+down", "\x1b[1;2B"),
    ("shift+right", "\x1b[1;2C"),
    ("shift+left", "\x1b[1;2D"),
    ("alt+up", "\x1b[1;3A"),
    ("alt+down", "\x1b[1;3B"),
    ("alt+right", "\x1b[1;3C"),
    ("alt+left", "\x1b[1;3D"),
    ("shift+alt+up", "\x1b[1;4A"),
    ("shift+alt+down", "\x1b[1;4B"),
    ("shift+alt+right", "\x1b[1;4C"),
    ("shift+alt+left", "\x1b[1;4D"),
    ("ctrl+up", "\x1b[1;5A"),
    ("ctrl+down", "\x1b[1;5B"),
    ("ctrl+right", "\x1b[1;5C"),
    ("ctrl+left", "\x1b[1;5D"),
    ("ctrl+shift+up", "\x1b[1;6A"),
    ("ctrl+shift+down", "\x1b[1;6B"),
    ("ctrl+shift+right", "\x1b[1;6C"),
    ("ctrl+shift+left", "\x1b[1;6D"),
    // Modified home/end
    ("shift+home", "\x1b[1;2H"),
    ("shift+end", "\x1b[1;2F"),
    ("alt+home", "\x1b[1;3H"),
    ("alt+end", "\x1b[1;3F"),
    ("ctrl+home", "\x1b[1;5H"),
    ("ctrl+end", "\x1b[1;5F"),
    // Modified editing keys
    ("shift+insert", "\x1b[2;2~"),
    ("ctrl+insert", "\x1b[2;5~"),
    ("shift+delete", "\x1b[3;2~"),
    ("alt+delete", "\x1b[3;3~"),
    ("ctrl+delete", "\x1b[3;5~"),
    ("alt+pageup", "\x1b[5;3~"),
    ("ctrl+pageup", "\x1b[5;5~"),
    ("alt+pagedown", "\x1b[6;3~"),
    ("ctrl+pagedown", "\x1b[6;5~"),
    // Modified function keys
    ("shift+f1", "\x1b[1;2P"),
    ("shift+f2", "\x1b[1;2Q"),
    ("shift+f3", "\x1b[1;2R"),
    ("shift+f4", "\x1b[1;2S"),
    ("shift+f5", "\x1b[15;2~"),
    ("shift+f6", "\x1b[17;2~"),
    ("shift+f7", "\x1b[18;2~"),
    ("shift+f8", "\x1b[19;2~"),
    ("shift+f9", "\x1b[20;2~"),
    ("shift+f10", "\x1b[21;2~"),
    ("shift+f11", "\x1b[23;2~"),
    ("shift+f12", "\x1b[24;2~"),
    ("ctrl+f1", "\x1b[1;5P"),
    ("ctrl+f2", "\x1b[1;5Q"),
    ("ctrl+f3", "\x1b[1;5R"),
    ("ctrl+f4", "\x1b[1;5S"),
    ("ctrl+f5", "\x1b[15;5~"),
    ("ctrl+f6", "\x1b[17;5~"),
    ("ctrl+f7", "\x1b[18;5~"),
    ("ctrl+f8", "\x1b[19;5~"),
    ("ctrl+f9", "\x1b[20;5~"),
    ("ctrl+f10", "\x1b[21;5~"),
    ("ctrl+f11", "\x1b[23;5~"),
    ("ctrl+f12", "\x1b[24;5~"),
];

/// Look up the escape sequence for a named key.
pub fn lookup(name: &str) -> Option<&'static str> {
    let lower = name.to_ascii_lowercase();
    SPECIAL_KEYS.iter().find(|(n, _)| *n == lower).map(|(_, seq)| *seq)
}

/// Resolve a key name to the bytes written to the PTY.
///
/// Unknown names fall back to the name's literal characters, so callers can
/// pass plain text through `send_keys` without pre-checking the table.
/// Returns `(bytes, known)`; callers log a warning when `known` is false.
pub fn encode(name: &str) -> (Vec<u8>, bool) {
    match lookup(name) {
        Some(seq) => (seq.as_bytes().to_vec(), true),
        None => (name.as_bytes().to_vec(), false),
    }
}

#[cfg(test)]
#[path = "keys_tests.rs"]
mod tests;
