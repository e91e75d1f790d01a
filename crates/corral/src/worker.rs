// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stdio worker: wraps a [`Manager`] behind newline-delimited JSON so
//! non-native runtimes can drive the engine.
//!
//! One JSON object per line in each direction. Every command is
//! acknowledged exactly once with an `ack` frame; queries (`list`,
//! `getRules`) additionally emit a data frame before their ack. Unknown
//! verbs produce an `error` frame and no ack. Session events are
//! forwarded as they happen, tagged with the session id.
//!
//! Logs go to stderr — stdout carries only protocol frames.

use anyhow::anyhow;
use base64::prelude::{Engine as _, BASE64_STANDARD};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::adapter::SpawnConfig;
use crate::event::{PtySignal, SessionEvent, StallClassification};
use crate::manager::{Manager, ManagerEvent, DEFAULT_SHUTDOWN_TIMEOUT};
use crate::rules::RuleSpec;

type Out = mpsc::UnboundedSender<Value>;

enum Flow {
    Continue,
    Shutdown,
}

/// Run the worker over the process's stdio. Returns the exit code: 0 after
/// a clean `shutdown` command, 1 when stdin closed first.
pub async fn run(manager: Manager) -> i32 {
    run_io(manager, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Run the worker over arbitrary streams (tests use in-memory pipes).
pub async fn run_io<R, W>(manager: Manager, reader: R, writer: W) -> i32
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, out_rx) = mpsc::unbounded_channel::<Value>();
    let writer_task = tokio::spawn(write_frames(out_rx, writer));
    let forward_task = {
        let events_rx = manager.subscribe();
        let out = out_tx.clone();
        tokio::spawn(forward_events(events_rx, out))
    };

    let _ = out_tx.send(json!({"event": "worker_ready"}));

    let mut lines = BufReader::new(reader).lines();
    let mut exit_code = 1;
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Flow::Shutdown = handle_line(&manager, line, &out_tx).await {
                    exit_code = 0;
                    break;
                }
            }
            Ok(None) => {
                debug!("stdin closed, shutting down");
                break;
            }
            Err(e) => {
                warn!("stdin read error: {e}");
                break;
            }
        }
    }

    manager.shutdown(DEFAULT_SHUTDOWN_TIMEOUT).await;
    forward_task.abort();
    drop(out_tx);
    let _ = writer_task.await;
    exit_code
}

async fn handle_line(manager: &Manager, line: &str, out: &Out) -> Flow {
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            let _ = out.send(json!({"event": "error", "message": format!("Invalid JSON: {e}")}));
            return Flow::Continue;
        }
    };
    let Some(cmd) = value.get("cmd").and_then(Value::as_str).map(str::to_owned) else {
        let _ = out.send(json!({"event": "error", "message": "Missing command"}));
        return Flow::Continue;
    };
    let id = value.get("id").and_then(Value::as_str).map(str::to_owned);

    match cmd.as_str() {
        "spawn" => {
            let mut ack_id = id.clone();
            let result = spawn(manager, id, &value, out, &mut ack_id).await;
            ack(out, "spawn", ack_id.as_deref(), result);
        }
        "send" => {
            let result = async {
                let sid = require_id(&id)?;
                let data = require_str(&value, "data")?;
                manager.send(sid, &data).await.map(|_| ())
            }
            .await;
            ack(out, "send", id.as_deref(), result);
        }
        "sendKeys" => {
            let result = session_op(manager, &id, &value, |session, value| async move {
                let keys = require_string_array(&value, "keys")?;
                session.send_keys(keys).await
            })
            .await;
            ack(out, "sendKeys", id.as_deref(), result);
        }
        "paste" => {
            let result = session_op(manager, &id, &value, |session, value| async move {
                let text = require_str(&value, "text")?;
                let bracketed = value.get("bracketed").and_then(Value::as_bool).unwrap_or(true);
                session.paste(&text, bracketed).await
            })
            .await;
            ack(out, "paste", id.as_deref(), result);
        }
        "resize" => {
            let result = session_op(manager, &id, &value, |session, value| async move {
                let cols = require_u16(&value, "cols")?;
                let rows = require_u16(&value, "rows")?;
                session.resize(cols, rows).await
            })
            .await;
            ack(out, "resize", id.as_deref(), result);
        }
        "kill" => {
            let result = session_op(manager, &id, &value, |session, value| async move {
                let signal = match value.get("signal").and_then(Value::as_str) {
                    Some(name) => Some(
                        PtySignal::from_name(name)
                            .ok_or_else(|| anyhow!("Invalid signal: {name}"))?,
                    ),
                    None => None,
                };
                session.kill(signal).await
            })
            .await;
            ack(out, "kill", id.as_deref(), result);
        }
        "selectMenuOption" => {
            let result = session_op(manager, &id, &value, |session, value| async move {
                let option = require_u64(&value, "option")? as u32;
                session.select_menu_option(option).await
            })
            .await;
            ack(out, "selectMenuOption", id.as_deref(), result);
        }
        "list" => {
            let sessions = manager.list(&Default::default());
            let _ = out.send(json!({"event": "list", "sessions": sessions}));
            ack(out, "list", id.as_deref(), Ok(()));
        }
        "shutdown" => {
            manager.shutdown(DEFAULT_SHUTDOWN_TIMEOUT).await;
            ack(out, "shutdown", id.as_deref(), Ok(()));
            return Flow::Shutdown;
        }
        "registerAdapters" => {
            let result = async {
                let modules = require_string_array(&value, "modules")?;
                for module in &modules {
                    manager.register_module(module)?;
                }
                Ok(())
            }
            .await;
            ack(out, "registerAdapters", id.as_deref(), result);
        }
        "addRule" => {
            let result = async {
                let sid = require_id(&id)?;
                let rule: RuleSpec = parse_field(&value, "rule")?;
                manager.add_rule(sid, rule).await
            }
            .await;
            ack(out, "addRule", id.as_deref(), result);
        }
        "removeRule" => {
            let result = async {
                let sid = require_id(&id)?;
                let pattern = require_str(&value, "pattern")?;
                manager.remove_rule(sid, &pattern).await
            }
            .await;
            ack(out, "removeRule", id.as_deref(), result);
        }
        "setRules" => {
            let result = async {
                let sid = require_id(&id)?;
                let rules: Vec<RuleSpec> = parse_field(&value, "rules")?;
                manager.set_rules(sid, rules).await
            }
            .await;
            ack(out, "setRules", id.as_deref(), result);
        }
        "getRules" => {
            let result = async {
                let sid = require_id(&id)?;
                let rules = manager.rules(sid).await?;
                let _ = out.send(json!({"event": "rules", "id": sid, "rules": rules}));
                Ok(())
            }
            .await;
            ack(out, "getRules", id.as_deref(), result);
        }
        "clearRules" => {
            let result = async {
                let sid = require_id(&id)?;
                manager.clear_rules(sid).await
            }
            .await;
            ack(out, "clearRules", id.as_deref(), result);
        }
        "configureStallDetection" => {
            let result = async {
                let enabled = value
                    .get("enabled")
                    .and_then(Value::as_bool)
                    .ok_or_else(|| anyhow!("Missing enabled"))?;
                let timeout_ms = value.get("timeoutMs").and_then(Value::as_u64);
                manager.configure_stall_detection(enabled, timeout_ms, None);
                Ok(())
            }
            .await;
            ack(out, "configureStallDetection", id.as_deref(), result);
        }
        "classifyStallResult" => {
            let result = async {
                let sid = require_id(&id)?;
                let classification: Option<StallClassification> = match value.get("result") {
                    None | Some(Value::Null) => None,
                    Some(v) => Some(
                        serde_json::from_value(v.clone())
                            .map_err(|e| anyhow!("Invalid result: {e}"))?,
                    ),
                };
                manager.classify_stall_result(sid, classification).await
            }
            .await;
            ack(out, "classifyStallResult", id.as_deref(), result);
        }
        other => {
            let _ = out
                .send(json!({"event": "error", "message": format!("Unknown command: {other}")}));
        }
    }
    Flow::Continue
}

async fn spawn(
    manager: &Manager,
    id: Option<String>,
    value: &Value,
    out: &Out,
    ack_id: &mut Option<String>,
) -> anyhow::Result<()> {
    let config_value =
        value.get("config").cloned().ok_or_else(|| anyhow!("Missing config"))?;
    let mut config: SpawnConfig = serde_json::from_value(config_value)
        .map_err(|e| anyhow!("Missing or invalid config: {e}"))?;
    if config.id.is_none() {
        config.id = id;
    }
    let handle = manager.spawn(config).await?;
    *ack_id = Some(handle.id.clone());
    let mut frame = serde_json::to_value(&handle)?;
    frame["event"] = json!("spawned");
    let _ = out.send(frame);
    Ok(())
}

/// Resolve the target session and run `op` against it.
async fn session_op<F, Fut>(
    manager: &Manager,
    id: &Option<String>,
    value: &Value,
    op: F,
) -> anyhow::Result<()>
where
    F: FnOnce(std::sync::Arc<crate::session::Session>, Value) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    let sid = require_id(id)?;
    let session = manager.session(sid).ok_or_else(|| anyhow!("no such session: {sid}"))?;
    op(session, value.clone()).await
}

fn ack(out: &Out, cmd: &str, id: Option<&str>, result: anyhow::Result<()>) {
    let mut frame = json!({"event": "ack", "cmd": cmd, "success": result.is_ok()});
    if let Some(id) = id {
        frame["id"] = json!(id);
    }
    if let Err(e) = result {
        frame["error"] = json!(format!("{e:#}"));
    }
    let _ = out.send(frame);
}

fn require_id(id: &Option<String>) -> anyhow::Result<&str> {
    id.as_deref().ok_or_else(|| anyhow!("Missing id"))
}

fn require_str(value: &Value, field: &str) -> anyhow::Result<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| anyhow!("Missing {field}"))
}

fn require_u64(value: &Value, field: &str) -> anyhow::Result<u64> {
    value.get(field).and_then(Value::as_u64).ok_or_else(|| anyhow!("Missing {field}"))
}

fn require_u16(value: &Value, field: &str) -> anyhow::Result<u16> {
    u16::try_from(require_u64(value, field)?).map_err(|_| anyhow!("Invalid {field}"))
}

fn require_string_array(value: &Value, field: &str) -> anyhow::Result<Vec<String>> {
    let items = value
        .get(field)
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("Missing {field}"))?;
    items
        .iter()
        .map(|v| v.as_str().map(str::to_owned).ok_or_else(|| anyhow!("Invalid {field}")))
        .collect()
}

fn parse_field<T: serde::de::DeserializeOwned>(value: &Value, field: &str) -> anyhow::Result<T> {
    let v = value.get(field).cloned().ok_or_else(|| anyhow!("Missing {field}"))?;
    serde_json::from_value(v).map_err(|e| anyhow!("Invalid {field}: {e}"))
}

// -- event forwarding ---------------------------------------------------------

async fn forward_events(mut events_rx: broadcast::Receiver<ManagerEvent>, out: Out) {
    loop {
        match events_rx.recv().await {
            Ok(event) => {
                if let Some(frame) = event_frame(event) {
                    if out.send(frame).is_err() {
                        break;
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "event forwarder lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn event_frame(event: ManagerEvent) -> Option<Value> {
    match event {
        ManagerEvent::SessionStopped { id, reason } => {
            Some(json!({"event": "session_stopped", "id": id, "reason": reason}))
        }
        ManagerEvent::Session { id, event } => match event {
            SessionEvent::Output(bytes) => Some(output_frame(&id, &bytes)),
            SessionEvent::Ready => Some(json!({"event": "ready", "id": id})),
            // `auth_required` carries the detail; the bare signal would be
            // a duplicate frame on the wire.
            SessionEvent::LoginRequired { .. } => None,
            SessionEvent::AuthRequired(info) => {
                let mut frame = json!({"event": "login_required", "id": id});
                if let Ok(Value::Object(fields)) = serde_json::to_value(&info) {
                    for (key, val) in fields {
                        frame[key] = val;
                    }
                }
                Some(frame)
            }
            SessionEvent::BlockingPrompt { info, auto_responded } => Some(json!({
                "event": "blocking_prompt",
                "id": id,
                "prompt": info,
                "autoResponded": auto_responded,
            })),
            SessionEvent::Message(message) => {
                Some(json!({"event": "message", "id": id, "message": message}))
            }
            SessionEvent::Question(message) => {
                Some(json!({"event": "question", "id": id, "message": message}))
            }
            SessionEvent::Exit(status) => Some(json!({
                "event": "exit",
                "id": id,
                "code": status.code,
                "signal": status.signal,
            })),
            SessionEvent::Error { message } => {
                Some(json!({"event": "error", "id": id, "message": message}))
            }
            SessionEvent::StallDetected { recent_output, stall_ms } => Some(json!({
                "event": "stall_detected",
                "id": id,
                "recentOutput": recent_output,
                "stallMs": stall_ms,
            })),
            SessionEvent::StatusChanged { from, to } => Some(json!({
                "event": "status_changed",
                "id": id,
                "from": from,
                "to": to,
            })),
            SessionEvent::TaskComplete => Some(json!({"event": "task_complete", "id": id})),
        },
    }
}

/// Output bytes ride as a plain JSON string when they are valid UTF-8,
/// otherwise base64 with an `encoding` marker.
fn output_frame(id: &str, bytes: &[u8]) -> Value {
    match std::str::from_utf8(bytes) {
        Ok(text) => json!({"event": "output", "id": id, "data": text}),
        Err(_) => json!({
            "event": "output",
            "id": id,
            "data": BASE64_STANDARD.encode(bytes),
            "encoding": "base64",
        }),
    }
}

async fn write_frames<W: AsyncWrite + Unpin>(mut rx: mpsc::UnboundedReceiver<Value>, mut writer: W) {
    while let Some(frame) = rx.recv().await {
        let Ok(mut line) = serde_json::to_vec(&frame) else {
            continue;
        };
        line.push(b'\n');
        if writer.write_all(&line).await.is_err() {
            break;
        }
        let _ = writer.flush().await;
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
