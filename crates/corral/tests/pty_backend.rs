// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the native PTY backend: spawn a real child on a
//! real pseudo-terminal and observe its lifecycle.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use corral::pty::spawn::NativePty;
use corral::pty::Backend;

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| (*s).to_owned()).collect()
}

async fn collect_output(
    mut output_rx: mpsc::Receiver<Bytes>,
    timeout: Duration,
) -> Vec<u8> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut out = Vec::new();
    loop {
        match tokio::time::timeout_at(deadline, output_rx.recv()).await {
            Ok(Some(bytes)) => out.extend_from_slice(&bytes),
            Ok(None) | Err(_) => return out,
        }
    }
}

#[tokio::test]
async fn spawn_captures_output_and_exit() -> anyhow::Result<()> {
    let mut pty = NativePty::spawn(
        &argv(&["/bin/sh", "-c", "printf 'pty-live\\n'; exit 3"]),
        &[],
        None,
        80,
        24,
    )?;
    assert!(pty.child_pid().is_some());

    let (output_tx, output_rx) = mpsc::channel(64);
    let (_input_tx, input_rx) = mpsc::channel(8);
    let (_resize_tx, resize_rx) = mpsc::channel(4);

    let run = tokio::spawn(async move { pty.run(output_tx, input_rx, resize_rx).await });
    let output = collect_output(output_rx, Duration::from_secs(10)).await;
    assert!(
        output.windows(8).any(|w| w == b"pty-live"),
        "missing marker in {output:?}"
    );

    let status = run.await??;
    assert_eq!(status.code, Some(3));
    assert_eq!(status.signal, None);
    Ok(())
}

#[tokio::test]
async fn child_sees_env_and_workdir() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut pty = NativePty::spawn(
        &argv(&["/bin/sh", "-c", "printf '%s:%s\\n' \"$CORRAL_MARK\" \"$(pwd)\""]),
        &[("CORRAL_MARK".to_owned(), "present".to_owned())],
        Some(dir.path()),
        80,
        24,
    )?;

    let (output_tx, output_rx) = mpsc::channel(64);
    let (_input_tx, input_rx) = mpsc::channel(8);
    let (_resize_tx, resize_rx) = mpsc::channel(4);
    let run = tokio::spawn(async move { pty.run(output_tx, input_rx, resize_rx).await });

    let output = collect_output(output_rx, Duration::from_secs(10)).await;
    let text = String::from_utf8_lossy(&output);
    assert!(text.contains("present:"), "env not applied: {text}");

    let status = run.await??;
    assert_eq!(status.code, Some(0));
    Ok(())
}

#[tokio::test]
async fn input_round_trips_through_cat() -> anyhow::Result<()> {
    let mut pty = NativePty::spawn(&argv(&["/bin/cat"]), &[], None, 80, 24)?;

    let (output_tx, output_rx) = mpsc::channel(64);
    let (input_tx, input_rx) = mpsc::channel::<Bytes>(8);
    let (_resize_tx, resize_rx) = mpsc::channel(4);
    let run = tokio::spawn(async move { pty.run(output_tx, input_rx, resize_rx).await });

    input_tx.send(Bytes::from_static(b"roundtrip\r")).await?;
    // EOT makes cat exit.
    input_tx.send(Bytes::from_static(b"\x04")).await?;

    let output = collect_output(output_rx, Duration::from_secs(10)).await;
    assert!(
        output.windows(9).any(|w| w == b"roundtrip"),
        "echo missing in {output:?}"
    );

    let status = run.await??;
    assert_eq!(status.code, Some(0));
    Ok(())
}

#[tokio::test]
async fn missing_workdir_fails_before_forking() {
    let result = NativePty::spawn(
        &argv(&["/bin/sh"]),
        &[],
        Some(std::path::Path::new("/nonexistent/corral/workdir")),
        80,
        24,
    );
    match result {
        Err(e) => assert!(e.to_string().contains("workdir")),
        Ok(_) => unreachable!("missing workdir must fail"),
    }
}

#[test]
fn empty_command_is_rejected() {
    assert!(NativePty::spawn(&[], &[], None, 80, 24).is_err());
}
