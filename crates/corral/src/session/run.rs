// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The session task: one `tokio::select!` loop multiplexing PTY output,
//! commands, the three engine timers, and backend exit.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::event::ExitStatus;
use crate::pty::Backend;

use super::engine::Engine;
use super::{SessionCommand, Shared};

/// How long the loop waits for the backend to reap the child after the
/// loop exits, before escalating to SIGKILL.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// One write to the PTY, optionally followed by a pause.
///
/// Delays live on the writer task so staggered key sequences never block
/// detection or timers.
#[derive(Debug)]
pub(crate) struct WriteStep {
    pub bytes: Bytes,
    pub delay_after: Option<Duration>,
}

/// Run a session to completion over the given backend.
pub(crate) async fn session_loop(
    mut engine: Engine,
    mut backend: Box<dyn Backend>,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
    write_rx: mpsc::UnboundedReceiver<WriteStep>,
    shared: Arc<Shared>,
    cols: u16,
    rows: u16,
) {
    let (output_tx, mut output_rx) = mpsc::channel::<Bytes>(256);
    let (input_tx, input_rx) = mpsc::channel::<Bytes>(256);
    let (resize_tx, resize_rx) = mpsc::channel::<(u16, u16)>(4);

    if let Some(pid) = backend.child_pid() {
        shared.pid.store(pid, Ordering::Release);
    }
    *shared.started_at.lock() = Some(Utc::now());
    let _ = backend.resize(cols, rows);

    let mut backend_handle: JoinHandle<anyhow::Result<ExitStatus>> =
        tokio::spawn(async move { backend.run(output_tx, input_rx, resize_rx).await });
    let writer = tokio::spawn(write_loop(write_rx, input_tx));

    engine.begin();

    let mut exit_status: Option<ExitStatus> = None;
    loop {
        tokio::select! {
            // 1. PTY output → append, forward raw, run one detection pass.
            chunk = output_rx.recv() => match chunk {
                Some(bytes) => {
                    engine.ingest(&bytes);
                    // Coalesce whatever else already arrived so a burst
                    // costs one regex pass, not one per read.
                    while let Ok(more) = output_rx.try_recv() {
                        engine.ingest(&more);
                    }
                    engine.process();
                }
                None => break,
            },

            // 2. Controller commands.
            cmd = cmd_rx.recv() => match cmd {
                Some(cmd) => handle_command(&mut engine, cmd, &resize_tx),
                None => {
                    debug!("session handle dropped, stopping child");
                    engine.kill(None);
                    break;
                }
            },

            // 3. Ready-settle timer.
            _ = sleep_arm(engine.ready_settle_at), if engine.ready_settle_at.is_some() => {
                engine.on_ready_settle();
            }

            // 4. Task-complete settle timer.
            _ = sleep_arm(engine.task_complete_at), if engine.task_complete_at.is_some() => {
                engine.on_task_complete();
            }

            // 5. Stall timer.
            _ = sleep_arm(engine.stall_at), if engine.stall_at.is_some() => {
                engine.on_stall_timer();
            }

            // 6. Backend finished on its own.
            result = &mut backend_handle => {
                exit_status = Some(flatten_exit(result));
                break;
            }
        }
    }

    // Capture any final bytes still queued.
    while let Ok(bytes) = output_rx.try_recv() {
        engine.ingest(&bytes);
    }

    let status = match exit_status {
        Some(status) => status,
        None => reap_backend(&mut backend_handle, &shared).await,
    };

    writer.abort();
    engine.finish_exit(status, None);
}

/// Sleep until an armed deadline; pend forever when the arm is empty.
async fn sleep_arm(at: Option<Instant>) {
    match at {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Writer task: applies [`WriteStep`] delays without blocking the session.
async fn write_loop(mut rx: mpsc::UnboundedReceiver<WriteStep>, input_tx: mpsc::Sender<Bytes>) {
    while let Some(step) = rx.recv().await {
        if input_tx.send(step.bytes).await.is_err() {
            break;
        }
        if let Some(delay) = step.delay_after {
            tokio::time::sleep(delay).await;
        }
    }
}

fn handle_command(engine: &mut Engine, cmd: SessionCommand, resize_tx: &mpsc::Sender<(u16, u16)>) {
    match cmd {
        SessionCommand::Send { text, reply } => {
            let _ = reply.send(engine.send(&text));
        }
        SessionCommand::Write { data } => engine.write(&data),
        SessionCommand::WriteRaw { data } => engine.write_raw(data),
        SessionCommand::SendKeys { keys } => engine.send_keys(&keys),
        SessionCommand::SelectMenu { option } => engine.select_menu_option(option),
        SessionCommand::Paste { text, bracketed } => engine.paste(&text, bracketed),
        SessionCommand::Resize { cols, rows } => {
            let _ = resize_tx.try_send((cols, rows));
        }
        SessionCommand::Kill { signal } => engine.kill(signal),
        SessionCommand::OutputBuffer { reply } => {
            let _ = reply.send(engine.output_buffer());
        }
        SessionCommand::ClearBuffer => engine.clear_output_buffer(),
        SessionCommand::AddRule(rule) => engine.add_rule(rule),
        SessionCommand::RemoveRule { pattern } => engine.remove_rule(&pattern),
        SessionCommand::SetRules(rules) => engine.set_rules(rules),
        SessionCommand::ClearRules => engine.clear_rules(),
        SessionCommand::GetRules { reply } => {
            let _ = reply.send(engine.rules());
        }
        SessionCommand::StallClassified(result) => engine.handle_stall_classification(result),
        SessionCommand::ConfigureStall { enabled, timeout_ms } => {
            engine.configure_stall(enabled, timeout_ms);
        }
    }
}

fn flatten_exit(result: Result<anyhow::Result<ExitStatus>, tokio::task::JoinError>) -> ExitStatus {
    match result {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            warn!("backend error: {e:#}");
            ExitStatus { code: Some(1), signal: None }
        }
        Err(e) => {
            warn!("backend task panicked: {e}");
            ExitStatus { code: Some(1), signal: None }
        }
    }
}

/// Wait for the backend to reap the child, escalating to SIGKILL when it
/// outlives the grace period.
async fn reap_backend(
    handle: &mut JoinHandle<anyhow::Result<ExitStatus>>,
    shared: &Shared,
) -> ExitStatus {
    tokio::select! {
        result = &mut *handle => flatten_exit(result),
        _ = tokio::time::sleep(REAP_TIMEOUT) => {
            warn!("backend did not exit within {REAP_TIMEOUT:?}, sending SIGKILL");
            let pid = shared.pid.load(Ordering::Acquire);
            if pid != 0 {
                let _ = kill(Pid::from_raw(-(pid as i32)), Signal::SIGKILL);
            }
            handle.abort();
            ExitStatus { code: Some(137), signal: Some(9) }
        }
    }
}
