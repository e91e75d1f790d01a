// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::ffi::CString;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use bytes::Bytes;
use nix::libc;
use nix::pty::{forkpty, ForkptyResult, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execvp, Pid};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;

use super::nbio::{read_chunk, set_nonblocking, write_all, PtyFd};
use super::Backend;
use crate::event::ExitStatus;

/// Native PTY backend that spawns a child process via `forkpty`.
pub struct NativePty {
    master: AsyncFd<PtyFd>,
    child_pid: Pid,
}

impl NativePty {
    /// Spawn a child process on a new PTY.
    ///
    /// `command` must have at least one element (the program to run).
    /// `env` pairs are applied in order in the child before exec, after
    /// the inherited process environment; `workdir` becomes the child's
    /// working directory when given.
    // forkpty requires unsafe: post-fork child is partially initialized
    #[allow(unsafe_code)]
    pub fn spawn(
        command: &[String],
        env: &[(String, String)],
        workdir: Option<&Path>,
        cols: u16,
        rows: u16,
    ) -> anyhow::Result<Self> {
        if command.is_empty() {
            bail!("empty command");
        }
        let winsize = Winsize {
            ws_col: cols,
            ws_row: rows,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        // Resolve and validate before forking: failing in the parent gives
        // the caller a real error instead of a dead child.
        let c_args: Vec<CString> = command
            .iter()
            .map(|s| CString::new(s.as_bytes()))
            .collect::<Result<_, _>>()
            .context("invalid command argument")?;
        let env: Vec<(String, String)> = env.to_vec();
        let workdir: Option<PathBuf> = workdir.map(Path::to_path_buf);
        if let Some(ref dir) = workdir {
            if !dir.is_dir() {
                bail!("workdir does not exist: {}", dir.display());
            }
        }

        // SAFETY: forkpty is unsafe because the child is in a
        // partially-initialized state after fork. We immediately exec.
        let result = unsafe { forkpty(&winsize, None) }.context("forkpty failed")?;

        match result {
            ForkptyResult::Child => {
                // Child process: workdir, env, exec.
                if let Some(dir) = workdir {
                    let _ = std::env::set_current_dir(dir);
                }
                for (key, value) in env {
                    std::env::set_var(key, value);
                }

                execvp(&c_args[0], &c_args).context("execvp failed")?;
                unreachable!();
            }
            ForkptyResult::Parent { child, master } => {
                set_nonblocking(&master)?;
                let afd = AsyncFd::new(PtyFd(master)).context("AsyncFd::new failed")?;
                Ok(Self { master: afd, child_pid: child })
            }
        }
    }
}

impl Backend for NativePty {
    fn run(
        &mut self,
        output_tx: mpsc::Sender<Bytes>,
        mut input_rx: mpsc::Receiver<Bytes>,
        mut resize_rx: mpsc::Receiver<(u16, u16)>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<ExitStatus>> + Send + '_>>
    {
        let pid = self.child_pid;
        Box::pin(async move {
            let mut buf = vec![0u8; 8192];
            let mut input_closed = false;
            let mut resize_closed = false;

            loop {
                tokio::select! {
                    result = read_chunk(&self.master, &mut buf) => {
                        match result {
                            Ok(0) => break,
                            Ok(n) => {
                                let data = Bytes::copy_from_slice(&buf[..n]);
                                if output_tx.send(data).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) if e.raw_os_error() == Some(libc::EIO) => break,
                            Err(e) => return Err(e.into()),
                        }
                    }
                    input = input_rx.recv(), if !input_closed => {
                        match input {
                            Some(data) => {
                                write_all(&self.master, &data).await?;
                            }
                            None => input_closed = true,
                        }
                    }
                    size = resize_rx.recv(), if !resize_closed => {
                        match size {
                            Some((cols, rows)) => {
                                let _ = set_winsize(&self.master, cols, rows);
                            }
                            None => resize_closed = true,
                        }
                    }
                }
            }

            // Reap child on a blocking thread to avoid blocking the runtime
            let status = tokio::task::spawn_blocking(move || wait_for_exit(pid))
                .await
                .context("join wait thread")??;
            Ok(status)
        })
    }

    fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        set_winsize(&self.master, cols, rows)
    }

    fn child_pid(&self) -> Option<u32> {
        Some(self.child_pid.as_raw() as u32)
    }
}

impl Drop for NativePty {
    fn drop(&mut self) {
        // Best-effort graceful shutdown: SIGHUP then SIGKILL.
        let _ = kill(self.child_pid, Signal::SIGHUP);
        std::thread::sleep(std::time::Duration::from_millis(50));
        let _ = kill(self.child_pid, Signal::SIGKILL);
        let _ = waitpid(self.child_pid, Some(WaitPidFlag::WNOHANG));
    }
}

// TIOCSWINSZ ioctl requires unsafe for the libc::ioctl call
#[allow(unsafe_code)]
fn set_winsize(fd: &impl AsRawFd, cols: u16, rows: u16) -> anyhow::Result<()> {
    let ws = Winsize {
        ws_col: cols,
        ws_row: rows,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };

    // SAFETY: TIOCSWINSZ is a well-defined ioctl that sets the window
    // size on the PTY master fd. The Winsize struct is properly
    // initialized.
    let ret = unsafe { libc::ioctl(fd.as_raw_fd(), libc::TIOCSWINSZ, &ws) };
    if ret < 0 {
        bail!(
            "TIOCSWINSZ ioctl failed: {}",
            std::io::Error::last_os_error()
        );
    }

    Ok(())
}

/// Block until the child exits and convert to our `ExitStatus`.
fn wait_for_exit(pid: Pid) -> anyhow::Result<ExitStatus> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => {
                return Ok(ExitStatus {
                    code: Some(code),
                    signal: None,
                });
            }
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                return Ok(ExitStatus {
                    code: None,
                    signal: Some(sig as i32),
                });
            }
            Ok(_) => continue,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => bail!("waitpid failed: {e}"),
        }
    }
}
