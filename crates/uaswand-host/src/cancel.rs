//! Cooperative cancellation and per-step deadlines.
//!
//! Every long-running operation (connect sequences, network sweeps, framed
//! exchanges) accepts a [`CancelToken`]. Cancellation is cooperative: the
//! token never kills a task, it just resolves a future the task races
//! against. [`with_deadline`] composes the caller's token with a fixed
//! duration so each step is bounded by whichever fires first.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// A clonable cancellation handle backed by a watch channel.
///
/// Cloning is cheap and all clones observe the same flag. Once cancelled a
/// token stays cancelled.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    /// Flips the flag. All clones wake immediately.
    pub fn cancel(&self) {
        // send only fails when every receiver is gone, which cannot happen
        // while `self.rx` is alive.
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when the token is cancelled. Pends forever otherwise.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender dropped without cancelling; nothing will ever
                // cancel this token now.
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Why a deadline-bounded step stopped before its future completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    /// The fixed step duration elapsed first.
    Timeout,
    /// The caller's token was cancelled first.
    Cancelled,
}

/// Runs `fut` bounded by both a fixed duration and the caller's token.
///
/// Whichever fires first wins; the future is dropped at that point, which
/// for socket operations abandons the in-flight I/O.
pub async fn with_deadline<F>(
    duration: Duration,
    cancel: &CancelToken,
    fut: F,
) -> Result<F::Output, Interrupted>
where
    F: Future,
{
    tokio::select! {
        out = fut => Ok(out),
        () = cancel.cancelled() => Err(Interrupted::Cancelled),
        () = tokio::time::sleep(duration) => Err(Interrupted::Timeout),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
