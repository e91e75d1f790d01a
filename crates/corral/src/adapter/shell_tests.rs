// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn ready_at_prompt_only() {
    let adapter = ShellAdapter::default();
    assert!(adapter.detect_ready("pty> "));
    assert!(adapter.detect_ready("hello\npty> "));
    assert!(!adapter.detect_ready("hello"));
    assert!(!adapter.detect_ready("pty> running..."));
}

#[test]
fn task_complete_mirrors_prompt() {
    let adapter = ShellAdapter::default();
    assert_eq!(adapter.detect_task_complete("hi\npty> "), Some(true));
    assert_eq!(adapter.detect_task_complete("hi"), Some(false));
}

#[test]
fn custom_prompt() {
    let adapter = ShellAdapter::new("box$ ");
    assert!(adapter.detect_ready("done\nbox$ "));
    assert!(!adapter.detect_ready("done\npty> "));
}

#[test]
fn parse_drops_prompt_and_blank_lines() {
    let adapter = ShellAdapter::default();
    let parsed = adapter.parse_output("hi\npty> ");
    match parsed {
        Some(parsed) => {
            assert_eq!(parsed.content, "hi");
            assert!(parsed.is_complete);
            assert!(!parsed.is_question);
        }
        None => unreachable!("prompt-anchored output must parse"),
    }
    let multi = adapter.parse_output("one\n\ntwo\npty> ");
    match multi {
        Some(parsed) => assert_eq!(parsed.content, "one\ntwo"),
        None => unreachable!("multi-line output must parse"),
    }
}

#[test]
fn parse_returns_none_without_content() {
    let adapter = ShellAdapter::default();
    assert_eq!(adapter.parse_output("pty> "), None);
    assert_eq!(adapter.parse_output("mid-stream output"), None);
}

#[test]
fn env_pins_the_prompt() {
    let adapter = ShellAdapter::default();
    let config = SpawnConfig::new("sh", "shell");
    let env = adapter.env(&config);
    assert!(env.contains(&("PS1".to_owned(), "pty> ".to_owned())));
}

#[test]
fn exit_heuristics_disabled() {
    let adapter = ShellAdapter::default();
    assert_eq!(adapter.detect_exit("sh: foo: command not found"), None);
}
