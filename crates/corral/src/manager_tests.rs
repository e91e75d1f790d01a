// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use crate::adapter::SpawnConfig;
use crate::event::{
    ExitStatus, PromptKind, SessionEvent, SessionStatus, StallClassification, StallState,
};
use crate::rules::RuleSpec;
use crate::test_support::{ScriptHandle, ScriptedPty, StubAdapter};

use super::*;

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

fn manager() -> Manager {
    let m = Manager::default();
    m.register_adapter(Arc::new(StubAdapter::default()));
    m
}

async fn spawn_scripted(m: &Manager, id: &str) -> anyhow::Result<ScriptHandle> {
    let (pty, script) = ScriptedPty::new();
    let config = SpawnConfig::new(id, "stub").with_id(id);
    m.spawn_with(config, Box::new(pty)).await?;
    // Let the session task run its startup transition.
    tokio::time::sleep(Duration::from_millis(10)).await;
    Ok(script)
}

async fn wait_manager_event<F>(
    events_rx: &mut tokio::sync::broadcast::Receiver<ManagerEvent>,
    mut pred: F,
) -> Option<ManagerEvent>
where
    F: FnMut(&ManagerEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    loop {
        match tokio::time::timeout_at(deadline, events_rx.recv()).await {
            Ok(Ok(event)) if pred(&event) => return Some(event),
            Ok(Ok(_)) => continue,
            Ok(Err(_)) | Err(_) => return None,
        }
    }
}

#[tokio::test(start_paused = true)]
async fn spawn_registers_and_lists() -> anyhow::Result<()> {
    let m = manager();
    let _script_a = spawn_scripted(&m, "a").await?;
    let _script_b = spawn_scripted(&m, "b").await?;

    assert!(m.has("a"));
    assert!(m.has("b"));
    let all = m.list(&ListFilter::default());
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].id, "a");
    assert_eq!(all[0].kind, "stub");

    let filtered = m.list(&ListFilter { kind: Some("nope".to_owned()), ..Default::default() });
    assert!(filtered.is_empty());

    let handle = m.get("a");
    assert!(handle.is_some_and(|h| h.status == SessionStatus::Starting));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn spawn_unknown_adapter_fails_clean() -> anyhow::Result<()> {
    let m = Manager::default();
    let err = m.spawn(SpawnConfig::new("x", "clodex")).await;
    match err {
        Err(e) => assert!(e.to_string().contains("adapter not found")),
        Ok(_) => anyhow::bail!("unknown adapter must fail"),
    }
    assert!(m.list(&ListFilter::default()).is_empty(), "nothing registered on failure");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn duplicate_id_fails_clean() -> anyhow::Result<()> {
    let m = manager();
    let _script = spawn_scripted(&m, "dup").await?;
    let (pty, _script2) = ScriptedPty::new();
    let err = m.spawn_with(SpawnConfig::new("dup2", "stub").with_id("dup"), Box::new(pty)).await;
    match err {
        Err(e) => assert!(e.to_string().contains("duplicate session id")),
        Ok(_) => anyhow::bail!("duplicate id must fail"),
    }
    assert_eq!(m.list(&ListFilter::default()).len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn pty_spawn_failure_leaves_error_tombstone() -> anyhow::Result<()> {
    let m = Manager::default();
    // Built-in shell adapter over a workdir that cannot exist.
    let mut config = SpawnConfig::new("sh", "shell").with_id("broken");
    config.workdir = Some("/nonexistent/corral/workdir".into());
    let handle = m.spawn(config).await?;
    assert_eq!(handle.status, SessionStatus::Error);
    assert!(handle.error.is_some_and(|e| e.contains("pty spawn failed")));
    // The tombstone stays introspectable.
    assert!(m.has("broken"));
    // ... and stop() resolves immediately for it.
    m.stop("broken", StopOptions::default()).await?;
    assert!(!m.has("broken"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn forwarder_tags_events_and_captures_logs() -> anyhow::Result<()> {
    let m = manager();
    let mut events_rx = m.subscribe();
    let script = spawn_scripted(&m, "s").await?;

    script.feed("line one\nline two\npartial");
    let output = wait_manager_event(&mut events_rx, |e| {
        matches!(e, ManagerEvent::Session { event: SessionEvent::Output(_), .. })
    })
    .await;
    match output {
        Some(ManagerEvent::Session { id, .. }) => assert_eq!(id, "s"),
        other => anyhow::bail!("expected tagged output, got {other:?}"),
    }

    // Log ring sees split lines plus the trailing partial.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let logs = m.logs("s", None)?;
    assert_eq!(logs, ["line one", "line two", "partial"]);
    let tail = m.logs("s", Some(1))?;
    assert_eq!(tail, ["partial"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn send_marks_busy_and_writes() -> anyhow::Result<()> {
    let m = manager();
    let script = spawn_scripted(&m, "s").await?;
    let message = m.send("s", "do a thing").await?;
    assert_eq!(message.session_id, "s");
    assert!(script.wait_for_input(b"do a thing\r", EVENT_TIMEOUT).await);
    assert!(m.get("s").is_some_and(|h| h.status == SessionStatus::Busy));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stop_resolves_after_exit_and_cleans_up() -> anyhow::Result<()> {
    let m = manager();
    let script = spawn_scripted(&m, "s").await?;
    let mut events_rx = m.subscribe();

    let stopper = {
        let m = m.clone();
        tokio::spawn(async move { m.stop("s", StopOptions::default()).await })
    };
    // The scripted child ignores signals; it "dies" when we say so.
    tokio::time::sleep(Duration::from_millis(100)).await;
    script.exit(ExitStatus { code: Some(0), signal: None });

    stopper.await??;
    assert!(!m.has("s"), "stop must clean the session map");
    let stopped = wait_manager_event(&mut events_rx, |e| {
        matches!(e, ManagerEvent::SessionStopped { .. })
    })
    .await;
    match stopped {
        Some(ManagerEvent::SessionStopped { id, reason }) => {
            assert_eq!(id, "s");
            assert_eq!(reason, "normal exit");
        }
        other => anyhow::bail!("expected session_stopped, got {other:?}"),
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn session_exit_cleans_map_exactly_once() -> anyhow::Result<()> {
    let m = manager();
    let script = spawn_scripted(&m, "s").await?;
    let mut events_rx = m.subscribe();
    script.exit(ExitStatus { code: Some(2), signal: None });

    let stopped = wait_manager_event(&mut events_rx, |e| {
        matches!(e, ManagerEvent::SessionStopped { .. })
    })
    .await;
    match stopped {
        Some(ManagerEvent::SessionStopped { reason, .. }) => assert_eq!(reason, "exit code 2"),
        other => anyhow::bail!("expected session_stopped, got {other:?}"),
    }
    assert!(!m.has("s"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_everything() -> anyhow::Result<()> {
    let m = manager();
    let script_a = spawn_scripted(&m, "a").await?;
    let script_b = spawn_scripted(&m, "b").await?;

    let done = {
        let m = m.clone();
        tokio::spawn(async move { m.shutdown(Duration::from_secs(3)).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    script_a.exit(ExitStatus { code: Some(0), signal: None });
    script_b.exit(ExitStatus { code: Some(0), signal: None });
    done.await?;
    assert!(m.list(&ListFilter::default()).is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn status_counts_and_metrics() -> anyhow::Result<()> {
    let m = manager();
    let _script = spawn_scripted(&m, "s").await?;
    let counts = m.status_counts();
    assert_eq!(counts.get(&SessionStatus::Starting), Some(&1));

    let metrics = m.metrics("s")?;
    assert!(metrics.uptime_seconds.is_some());
    assert!(m.metrics("missing").is_err());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn terminal_attachment_shares_the_stream() -> anyhow::Result<()> {
    let m = manager();
    let script = spawn_scripted(&m, "s").await?;
    let attachment = match m.attach_terminal("s") {
        Some(a) => a,
        None => anyhow::bail!("attachment must exist"),
    };
    let mut view = attachment.subscribe();

    script.feed("live bytes");
    let seen = crate::test_support::wait_event(&mut view, EVENT_TIMEOUT, |e| {
        matches!(e, SessionEvent::Output(_))
    })
    .await;
    match seen {
        Some(SessionEvent::Output(bytes)) => assert_eq!(&bytes[..], b"live bytes"),
        other => anyhow::bail!("expected output, got {other:?}"),
    }

    attachment.write(b"typed".to_vec()).await?;
    assert!(script.wait_for_input(b"typed", EVENT_TIMEOUT).await);
    assert!(m.attach_terminal("missing").is_none());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn rule_crud_round_trip() -> anyhow::Result<()> {
    let m = manager();
    let _script = spawn_scripted(&m, "s").await?;

    m.add_rule("s", RuleSpec::new("pick one", PromptKind::Config).with_response("1")).await?;
    let rules = m.rules("s").await?;
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].pattern, "pick one");

    m.remove_rule("s", "pick one").await?;
    assert!(m.rules("s").await?.is_empty());

    m.set_rules(
        "s",
        vec![
            RuleSpec::new("a", PromptKind::Unknown),
            RuleSpec::new("b", PromptKind::Unknown),
        ],
    )
    .await?;
    assert_eq!(m.rules("s").await?.len(), 2);
    m.clear_rules("s").await?;
    assert!(m.rules("s").await?.is_empty());

    // Bad pattern surfaces as an error, not a panic.
    assert!(m.add_rule("s", RuleSpec::new("(open", PromptKind::Unknown)).await.is_err());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn classifier_hook_answers_stalls() -> anyhow::Result<()> {
    let m = manager();
    let hook: StallClassifier = Arc::new(|ctx: StallContext| -> ClassifyFuture {
        Box::pin(async move {
            assert!(ctx.recent_output.contains("stuck"));
            Some(StallClassification {
                state: StallState::WaitingForInput,
                prompt: Some("needs a nudge".to_owned()),
                suggested_response: Some("keys:enter".to_owned()),
            })
        })
    });
    m.configure_stall_detection(true, Some(1000), Some(hook));

    let script = spawn_scripted(&m, "s").await?;
    let mut events_rx = m.subscribe();
    m.send("s", "task").await?;
    script.feed("stuck on something");

    let prompt = wait_manager_event(&mut events_rx, |e| {
        matches!(
            e,
            ManagerEvent::Session {
                event: SessionEvent::BlockingPrompt { auto_responded: true, .. },
                ..
            }
        )
    })
    .await;
    assert!(prompt.is_some(), "hook result must auto-answer the stall");
    assert!(script.wait_for_input(b"\r", EVENT_TIMEOUT).await);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn register_module_resolves_builtins() {
    let m = Manager::default();
    assert!(m.register_module("shell").is_ok());
    assert!(m.register_module("definitely-not-a-module").is_err());
    assert_eq!(m.adapter_types(), ["shell"]);
}
