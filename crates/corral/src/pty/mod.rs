// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PTY primitive: the `Backend` seam plus the native `forkpty` backend.
//!
//! The engine never inspects terminal cells; a backend only has to deliver
//! raw bytes, accept raw writes, resize, and report the child's exit.

pub mod nbio;
pub mod spawn;

use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc;

use crate::event::ExitStatus;

/// Terminal backend abstraction over a PTY (or a scripted stand-in).
///
/// Object-safe for use as `Box<dyn Backend>`. `run` owns the I/O loop:
/// it forwards child output to `output_tx`, writes bytes arriving on
/// `input_rx`, applies window sizes from `resize_rx`, and resolves with
/// the child's exit status.
pub trait Backend: Send + 'static {
    fn run(
        &mut self,
        output_tx: mpsc::Sender<Bytes>,
        input_rx: mpsc::Receiver<Bytes>,
        resize_rx: mpsc::Receiver<(u16, u16)>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ExitStatus>> + Send + '_>>;

    fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()>;

    fn child_pid(&self) -> Option<u32>;
}

/// Conversion trait so both concrete backends and `Box<dyn Backend>`
/// can be passed to `Session::start` without explicit boxing.
pub trait Boxed {
    fn boxed(self) -> Box<dyn Backend>;
}

impl<T: Backend> Boxed for T {
    fn boxed(self) -> Box<dyn Backend> {
        Box::new(self)
    }
}

impl Boxed for Box<dyn Backend> {
    fn boxed(self) -> Box<dyn Backend> {
        self
    }
}
