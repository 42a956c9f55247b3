//! The foreground execution context.
//!
//! Interactive mutations (place, collect, join, upgrade) must never
//! interleave, and results of background database work must come back to
//! the same serialized context. [`ForegroundLoop`] is that context: a single
//! task draining a FIFO of boxed tasks, running each to completion before
//! starting the next. [`Foreground`] is the cloneable handle used to submit
//! work to it.
//!
//! ```text
//! HTTP handler ──call()──┐
//! DB callback ──schedule()┼──> mpsc FIFO ──> ForegroundLoop::run (one task at a time)
//! timer ───────schedule()─┘
//! ```

use std::future::Future;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};

/// A unit of foreground work.
pub type ForegroundTask = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// The foreground loop has stopped and no longer accepts work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("foreground loop is not running")]
pub struct ForegroundClosed;

/// Cloneable handle that submits work to the [`ForegroundLoop`].
#[derive(Debug, Clone)]
pub struct Foreground {
    tx: mpsc::UnboundedSender<ForegroundTask>,
}

impl Foreground {
    /// Create a handle and the loop it feeds.
    pub fn channel() -> (Self, ForegroundLoop) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, ForegroundLoop { rx })
    }

    /// Queue an async task. Returns [`ForegroundClosed`] if the loop is gone.
    pub fn schedule<F, Fut>(&self, task: F) -> Result<(), ForegroundClosed>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: ForegroundTask = Box::new(move || Box::pin(task()));
        self.tx.send(boxed).map_err(|_closed| ForegroundClosed)
    }

    /// Queue a synchronous callback.
    pub fn schedule_fn<F>(&self, callback: F) -> Result<(), ForegroundClosed>
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule(move || async move { callback() })
    }

    /// Run `task` on the foreground context and wait for its result.
    pub async fn call<T, F, Fut>(&self, task: F) -> Result<T, ForegroundClosed>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.schedule(move || async move {
            let value = task().await;
            // The caller may have given up waiting; nothing to do then.
            let _ = reply_tx.send(value);
        })?;
        reply_rx.await.map_err(|_dropped| ForegroundClosed)
    }

    /// Whether the loop has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The single serialized execution context.
#[derive(Debug)]
pub struct ForegroundLoop {
    rx: mpsc::UnboundedReceiver<ForegroundTask>,
}

impl ForegroundLoop {
    /// Run tasks in submission order until every [`Foreground`] handle is
    /// dropped or `shutdown` resolves.
    ///
    /// Tasks still queued when `shutdown` fires are drained before
    /// returning so scheduled callbacks are not lost.
    pub async fn run<S>(mut self, shutdown: S) -> usize
    where
        S: Future<Output = ()>,
    {
        let mut executed: usize = 0;
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                task = self.rx.recv() => match task {
                    Some(task) => {
                        task().await;
                        executed = executed.saturating_add(1);
                    }
                    None => break,
                },
                () = &mut shutdown => {
                    self.rx.close();
                    executed = executed.saturating_add(self.run_pending().await);
                    break;
                }
            }
        }
        tracing::info!(executed, "Foreground loop stopped");
        executed
    }

    /// Run every task queued right now and return how many ran.
    pub async fn run_pending(&mut self) -> usize {
        let mut executed: usize = 0;
        while let Ok(task) = self.rx.try_recv() {
            task().await;
            executed = executed.saturating_add(1);
        }
        executed
    }
}
