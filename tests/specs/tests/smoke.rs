// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `corral` binary and drive
//! a live `/bin/sh` through the stdio JSON protocol.

use std::time::Duration;

use serde_json::json;

use corral_specs::WorkerProcess;

const TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::test]
async fn worker_announces_readiness() -> anyhow::Result<()> {
    let mut worker = WorkerProcess::start()?;
    let frame = worker.next(TIMEOUT).await?;
    assert_eq!(frame["event"], "worker_ready");
    Ok(())
}

#[tokio::test]
async fn unknown_command_yields_error_frame() -> anyhow::Result<()> {
    let mut worker = WorkerProcess::start()?;
    worker.next_event("worker_ready", TIMEOUT).await?;

    worker.send(json!({"cmd": "levitate"})).await?;
    let frame = worker.next_event("error", TIMEOUT).await?;
    assert_eq!(frame["message"], "Unknown command: levitate");
    Ok(())
}

#[tokio::test]
async fn spawn_send_observe_shutdown() -> anyhow::Result<()> {
    let mut worker = WorkerProcess::start()?;
    worker.next_event("worker_ready", TIMEOUT).await?;

    // Spawn a supervised shell.
    worker
        .send(json!({
            "cmd": "spawn",
            "id": "s1",
            "config": {"name": "sh", "type": "shell"},
        }))
        .await?;
    let spawned = worker.next_event("spawned", TIMEOUT).await?;
    assert_eq!(spawned["id"], "s1");
    assert_eq!(spawned["type"], "shell");
    let ack = worker.next_event("ack", TIMEOUT).await?;
    assert_eq!(ack["cmd"], "spawn");
    assert_eq!(ack["id"], "s1");
    assert_eq!(ack["success"], true);

    // The pinned PS1 shows up on the wire and settles into ready.
    let prompt = corral::adapter::shell::DEFAULT_PROMPT.trim_end();
    worker
        .next_matching(TIMEOUT, |frame| {
            frame["event"] == "output"
                && frame["data"].as_str().is_some_and(|d| d.contains(prompt))
        })
        .await?;
    let ready = worker.next_event("ready", TIMEOUT).await?;
    assert_eq!(ready["id"], "s1");

    // Run a command and watch its output come back.
    worker.send(json!({"cmd": "send", "id": "s1", "data": "echo corral-smoke-marker"})).await?;
    let ack = worker.next_event("ack", TIMEOUT).await?;
    assert_eq!(ack["cmd"], "send");
    assert_eq!(ack["success"], true);

    worker
        .next_matching(TIMEOUT, |frame| {
            frame["event"] == "output"
                && frame["data"].as_str().is_some_and(|d| d.contains("corral-smoke-marker"))
        })
        .await?;

    // The turn settles back into ready.
    worker.next_event("task_complete", TIMEOUT).await?;

    worker.send(json!({"cmd": "list"})).await?;
    let list = worker.next_event("list", TIMEOUT).await?;
    let sessions = list["sessions"].as_array().cloned().unwrap_or_default();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["id"], "s1");

    // Clean shutdown: ack, then exit code 0.
    worker.send(json!({"cmd": "shutdown"})).await?;
    let ack = worker.next_event("ack", TIMEOUT).await?;
    assert_eq!(ack["cmd"], "shutdown");
    assert_eq!(ack["success"], true);
    let status = worker.wait_exit(TIMEOUT).await?;
    assert_eq!(status.code(), Some(0));
    Ok(())
}

#[tokio::test]
async fn rule_crud_over_the_wire() -> anyhow::Result<()> {
    let mut worker = WorkerProcess::start()?;
    worker.next_event("worker_ready", TIMEOUT).await?;

    worker
        .send(json!({
            "cmd": "spawn",
            "id": "r1",
            "config": {"name": "sh", "type": "shell"},
        }))
        .await?;
    worker.next_event("ack", TIMEOUT).await?;

    worker
        .send(json!({
            "cmd": "addRule",
            "id": "r1",
            "rule": {
                "pattern": "continue\\?",
                "flags": "i",
                "type": "update",
                "response": "n",
                "description": "decline",
            },
        }))
        .await?;
    let ack = worker.next_event("ack", TIMEOUT).await?;
    assert_eq!(ack["success"], true);

    worker.send(json!({"cmd": "getRules", "id": "r1"})).await?;
    let rules = worker.next_event("rules", TIMEOUT).await?;
    assert_eq!(rules["id"], "r1");
    assert_eq!(rules["rules"][0]["pattern"], "continue\\?");
    assert_eq!(rules["rules"][0]["flags"], "i");
    assert_eq!(rules["rules"][0]["type"], "update");
    worker.next_event("ack", TIMEOUT).await?;

    worker.send(json!({"cmd": "clearRules", "id": "r1"})).await?;
    worker.next_event("ack", TIMEOUT).await?;
    worker.send(json!({"cmd": "getRules", "id": "r1"})).await?;
    let rules = worker.next_event("rules", TIMEOUT).await?;
    assert_eq!(rules["rules"], json!([]));
    Ok(())
}

#[tokio::test]
async fn stdin_eof_shuts_down_with_nonzero_exit() -> anyhow::Result<()> {
    let mut worker = WorkerProcess::start()?;
    worker.next_event("worker_ready", TIMEOUT).await?;

    worker.close_stdin();
    let status = worker.wait_exit(TIMEOUT).await?;
    assert_eq!(status.code(), Some(1));
    Ok(())
}
