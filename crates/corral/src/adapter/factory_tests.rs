// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;

use crate::event::PromptKind;
use crate::rules::RuleSpec;

use super::*;

fn spec() -> AdapterSpec {
    AdapterSpec {
        adapter_type: "mockcli".to_owned(),
        display_name: "Mock CLI".to_owned(),
        command: "mockcli".to_owned(),
        args: vec!["--no-color".to_owned()],
        env: HashMap::from([("MOCK".to_owned(), "1".to_owned())]),
        uses_tui_menus: true,
        ready_settle_ms: Some(250),
        ready_patterns: vec![r"❯\s*$".to_owned(), "Ready for input".to_owned()],
        task_complete_patterns: vec!["Task finished".to_owned()],
        loading_patterns: vec!["Thinking".to_owned()],
        login: Some(LoginSpec {
            patterns: vec!["Sign in to continue".to_owned()],
            kind: LoginKind::DeviceCode,
            instructions: Some("open the URL and enter the code".to_owned()),
        }),
        blocking_prompts: vec![PromptSpec {
            pattern: "Allow tool use".to_owned(),
            kind: PromptKind::Permission,
            response: None,
        }],
        exit_patterns: vec!["mockcli crashed".to_owned()],
        rules: vec![RuleSpec::new("update now", PromptKind::Update).with_response("n")],
        prompt_pattern: None,
    }
}

#[test]
fn compiles_and_exposes_launch_config() -> anyhow::Result<()> {
    let adapter = FactoryAdapter::compile(spec())?;
    let config = SpawnConfig::new("m", "mockcli");
    assert_eq!(adapter.adapter_type(), "mockcli");
    assert_eq!(adapter.command(&config), "mockcli");
    assert_eq!(adapter.args(&config), ["--no-color"]);
    assert_eq!(adapter.env(&config), [("MOCK".to_owned(), "1".to_owned())]);
    assert!(adapter.uses_tui_menus());
    assert_eq!(adapter.ready_settle(), Some(std::time::Duration::from_millis(250)));
    assert_eq!(adapter.auto_response_rules().len(), 1);
    Ok(())
}

#[test]
fn ready_and_task_complete_detection() -> anyhow::Result<()> {
    let adapter = FactoryAdapter::compile(spec())?;
    assert!(adapter.detect_ready("some output\nReady for input"));
    assert!(!adapter.detect_ready("still working"));
    assert_eq!(adapter.detect_task_complete("Task finished in 2s"), Some(true));
    assert_eq!(adapter.detect_task_complete("not yet"), Some(false));
    assert_eq!(adapter.detect_loading("Thinking hard"), Some(true));
    Ok(())
}

#[test]
fn task_complete_is_unsupported_without_patterns() -> anyhow::Result<()> {
    let mut bare = spec();
    bare.task_complete_patterns.clear();
    bare.loading_patterns.clear();
    let adapter = FactoryAdapter::compile(bare)?;
    assert_eq!(adapter.detect_task_complete("Task finished"), None);
    assert_eq!(adapter.detect_loading("Thinking"), None);
    Ok(())
}

#[test]
fn login_detection_extracts_code_and_url() -> anyhow::Result<()> {
    let adapter = FactoryAdapter::compile(spec())?;
    let notice =
        adapter.detect_login("Sign in to continue: https://auth.example/dev code WXYZ-7890");
    match notice {
        Some(notice) => {
            assert_eq!(notice.kind, LoginKind::DeviceCode);
            assert_eq!(notice.url.as_deref(), Some("https://auth.example/dev"));
            assert_eq!(notice.device_code.as_deref(), Some("WXYZ-7890"));
        }
        None => unreachable!("login must be detected"),
    }
    assert_eq!(adapter.detect_login("normal output"), None);
    Ok(())
}

#[test]
fn prompt_table_wins_over_generic_detection() -> anyhow::Result<()> {
    let adapter = FactoryAdapter::compile(spec())?;
    let info = adapter.detect_blocking_prompt("Allow tool use for `rm`? [y/n]");
    match info {
        Some(info) => assert_eq!(info.kind, PromptKind::Permission),
        None => unreachable!("table entry must match"),
    }
    Ok(())
}

#[test]
fn generic_detection_still_applies() -> anyhow::Result<()> {
    let adapter = FactoryAdapter::compile(spec())?;
    let info = adapter.detect_blocking_prompt("Continue? [y/n]");
    match info {
        Some(info) => assert_eq!(info.kind, PromptKind::Unknown),
        None => unreachable!("generic [y/n] must match"),
    }
    Ok(())
}

#[test]
fn custom_exit_patterns() -> anyhow::Result<()> {
    let adapter = FactoryAdapter::compile(spec())?;
    assert_eq!(
        adapter.detect_exit("oh no mockcli crashed"),
        Some(ExitNotice { code: None, error: None })
    );
    // generic fallback survives
    assert_eq!(
        adapter.detect_exit("Process exited with code 2"),
        Some(ExitNotice { code: Some(2), error: None })
    );
    Ok(())
}

#[test]
fn prompt_pattern_parse_strips_the_prompt() -> anyhow::Result<()> {
    let mut with_prompt = spec();
    with_prompt.prompt_pattern = Some(r"mock> $".to_owned());
    let adapter = FactoryAdapter::compile(with_prompt)?;
    let parsed = adapter.parse_output("result line\nmock> ");
    match parsed {
        Some(parsed) => {
            assert!(parsed.is_complete);
            assert_eq!(parsed.content, "result line");
        }
        None => unreachable!("prompt-anchored parse must fire"),
    }
    assert_eq!(adapter.parse_output("still streaming"), None);
    Ok(())
}

#[test]
fn bad_pattern_fails_compile() {
    let mut bad = spec();
    bad.ready_patterns = vec!["(unclosed".to_owned()];
    assert!(FactoryAdapter::compile(bad).is_err());
}
