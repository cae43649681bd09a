//! Single-owner progress renderer.
//!
//! One task owns the terminal. Everyone else talks to it through
//! [`ProgressHandle`]: lane allocation is a request/reply, ticks go through a
//! one-slot channel so a burst of writers is throttled by the renderer's pace.
//! Each lane is one character cell on the current row; a tick repaints only
//! that cell with a color picked from the completion fraction.

use std::io::Write;
use std::sync::Arc;

use folio_core::{xterm_index, LinearGradient, NEUTRAL_COLOR};
use folio_logging::{folio_debug, folio_warn};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{Lane, Progress};

const HIDE_CURSOR: &str = "\x1b[?25l";
const SHOW_CURSOR: &str = "\x1b[?25h";

/// Returned by [`ProgressHandle::allocate_lane`] once the renderer is gone.
pub const UNTRACKED_LANE: Lane = Lane(0);

/// Terminal color for a download that has `sofar` out of `total` bytes.
pub fn progress_color(gradient: &LinearGradient, sofar: u64, total: Option<u64>) -> u8 {
    match total {
        Some(total) if total > 0 => {
            let fraction = (sofar as f64 / total as f64).clamp(0.0, 1.0);
            xterm_index(gradient.at(fraction))
        }
        _ => NEUTRAL_COLOR,
    }
}

/// Escape sequence that paints one lane.
pub fn render_cell(lane: Lane, color: u8) -> String {
    format!("\x1b[{lane}G\x1b[48;5;{color}m \x1b[0m")
}

#[derive(Clone)]
pub struct ProgressHandle {
    allocate_tx: mpsc::Sender<oneshot::Sender<Lane>>,
    tick_tx: mpsc::Sender<Progress>,
    stop: CancellationToken,
    owner: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ProgressHandle {
    /// Spawns the owner task on the current runtime, rendering into `out`.
    pub fn spawn<W>(out: W, gradient: LinearGradient) -> Self
    where
        W: Write + Send + 'static,
    {
        let (allocate_tx, allocate_rx) = mpsc::channel(1);
        let (tick_tx, tick_rx) = mpsc::channel(1);
        let stop = CancellationToken::new();

        let renderer = Renderer {
            out,
            gradient,
            next_lane: 1,
            broken: false,
        };
        let owner = tokio::spawn(renderer.run(allocate_rx, tick_rx, stop.clone()));

        Self {
            allocate_tx,
            tick_tx,
            stop,
            owner: Arc::new(Mutex::new(Some(owner))),
        }
    }

    pub async fn allocate_lane(&self) -> Lane {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.allocate_tx.send(reply_tx).await.is_err() {
            return UNTRACKED_LANE;
        }
        reply_rx.await.unwrap_or(UNTRACKED_LANE)
    }

    pub async fn tick(&self, lane: Lane, sofar: u64, total: Option<u64>) {
        if lane == UNTRACKED_LANE {
            return;
        }
        // A closed renderer just means nobody is watching anymore.
        let _ = self.tick_tx.send(Progress { lane, sofar, total }).await;
    }

    /// Stops the owner and waits for it to restore the cursor. Later calls are no-ops.
    pub async fn shutdown(&self) {
        self.stop.cancel();
        let owner = self.owner.lock().await.take();
        if let Some(owner) = owner {
            if let Err(err) = owner.await {
                folio_warn!("progress renderer ended abnormally: {}", err);
            }
        }
    }
}

struct Renderer<W> {
    out: W,
    gradient: LinearGradient,
    // Cursor column 0 and 1 address the same cell, so lanes start at 1.
    next_lane: u32,
    broken: bool,
}

impl<W: Write> Renderer<W> {
    async fn run(
        mut self,
        mut allocate_rx: mpsc::Receiver<oneshot::Sender<Lane>>,
        mut tick_rx: mpsc::Receiver<Progress>,
        stop: CancellationToken,
    ) {
        self.emit(HIDE_CURSOR);
        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    // Paint what was already queued so the last state is visible.
                    while let Ok(progress) = tick_rx.try_recv() {
                        self.paint(progress);
                    }
                    break;
                }
                Some(reply) = allocate_rx.recv() => {
                    let lane = Lane(self.next_lane);
                    self.next_lane += 1;
                    if reply.send(lane).is_ok() {
                        folio_debug!("allocated progress lane {}", lane);
                    }
                }
                Some(progress) = tick_rx.recv() => self.paint(progress),
                // Every handle is gone; nothing more can arrive.
                else => break,
            }
        }
        self.emit(SHOW_CURSOR);
    }

    fn paint(&mut self, progress: Progress) {
        let color = progress_color(&self.gradient, progress.sofar, progress.total);
        self.emit(&render_cell(progress.lane, color));
    }

    fn emit(&mut self, text: &str) {
        if self.broken {
            return;
        }
        let written = self
            .out
            .write_all(text.as_bytes())
            .and_then(|()| self.out.flush());
        if let Err(err) = written {
            folio_warn!("progress output failed, rendering disabled: {}", err);
            self.broken = true;
        }
    }
}
