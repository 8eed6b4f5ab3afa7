//! 🎬 *[a worker sits at a small desk. a pneumatic tube delivers one action.]*
//! *[the worker files it in the batch tray. the tray is not full. back to
//! waiting.]* *[two seconds pass. the worker sighs, picks up the tray, and
//! carries the whole thing to the loading dock.]*
//!
//! 🧵 Workers — each one owns a private batch and a single-slot inbound
//! pipe. The deal with the routing loop is strict: the worker publishes its
//! pipe into the pool when it can take exactly one action, the routing loop
//! leases that pipe for exactly one handoff, and the worker re-publishes
//! after filing the action. Nobody shares a batch. Nobody contends on the
//! ingress queue.
//!
//! 🧠 Knowledge graph:
//! - Flush triggers, in order of drama: batch hits `max_batch`, the idle
//!   timer fires (`wait_interval` since the last receive), or shutdown.
//! - Flush discards the batch afterwards no matter what happened. No retry.
//!   An error goes to the handler; the worker moves on with its life.
//! - The batch lives behind a `RwLock` so `queue_len` can peek from outside
//!   while the owning task mutates.
//! - A panicked loop body is respawned by a small supervisor with the same
//!   state; the batch survives because it never left the struct.
//!
//! ⚠️ Workers are single-use. Once told to quit, a worker flushes, exits,
//! and does not come back. Build a new dispatcher for a new shift. 🦆

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::action::BoxAction;
use crate::error::{Error, ErrorHandler};
use crate::proxy::BulkBackend;
use crate::stats::DispatchMetrics;

/// A worker's inbound pipe, as seen by the routing loop: a capability to
/// hand one action to one worker.
pub(crate) type Pipe = async_channel::Sender<BoxAction>;

// ⏱️ Per-flush deadline. Independent of any producer's patience; a producer
// that gave up seconds ago has no say over a batch already in flight.
pub(crate) const FLUSH_DEADLINE: Duration = Duration::from_secs(60);

/// 🧵 One worker: an id for the logs, a pipe, a batch, and opinions about
/// when to flush.
pub(crate) struct Worker {
    pub(crate) id: usize,
    pipe_tx: async_channel::Sender<BoxAction>,
    pipe_rx: async_channel::Receiver<BoxAction>,
    pool: async_channel::Sender<Pipe>,
    batch: RwLock<Vec<BoxAction>>,
    pub(crate) max_batch: usize,
    pub(crate) wait_interval: Duration,
    backend: Arc<dyn BulkBackend>,
    metrics: Arc<DispatchMetrics>,
    on_error: ErrorHandler,
    quit_tx: async_channel::Sender<()>,
    quit_rx: async_channel::Receiver<()>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("max_batch", &self.max_batch)
            .field("wait_interval", &self.wait_interval)
            .finish()
    }
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        pool: async_channel::Sender<Pipe>,
        backend: Arc<dyn BulkBackend>,
        metrics: Arc<DispatchMetrics>,
        max_batch: usize,
        wait_interval: Duration,
        on_error: ErrorHandler,
    ) -> Arc<Self> {
        // Single-slot pipe: the routing loop can park at most one action at
        // this worker's door while the worker is busy filing the last one.
        let (pipe_tx, pipe_rx) = async_channel::bounded(1);
        let (quit_tx, quit_rx) = async_channel::bounded(1);
        Arc::new(Self {
            id,
            pipe_tx,
            pipe_rx,
            pool,
            batch: RwLock::new(Vec::with_capacity(max_batch)),
            max_batch,
            wait_interval,
            backend,
            metrics,
            on_error,
            quit_tx,
            quit_rx,
        })
    }

    /// File one action into the local batch.
    pub(crate) async fn enqueue(&self, act: BoxAction) {
        self.batch.write().await.push(act);
    }

    /// Peek at the batch length from outside the owning task.
    pub(crate) async fn queue_len(&self) -> usize {
        self.batch.read().await.len()
    }

    /// Tell the worker to flush and clock out. Idempotent; closing a closed
    /// channel is a shrug.
    pub(crate) fn stop(&self) {
        self.quit_tx.close();
    }

    /// 🚀 Spawn the worker under a tiny supervisor that respawns the loop
    /// body if it ever panics. A cluster-side protocol surprise must not
    /// take the whole pipeline down; the batch state survives the respawn
    /// because it never left this struct.
    pub(crate) fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let worker = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let body = tokio::spawn(Arc::clone(&worker).run());
                match body.await {
                    Ok(()) => return,
                    Err(join_err) if join_err.is_panic() => {
                        (worker.on_error)(Error::LoopFault {
                            loop_name: "worker",
                            detail: join_err.to_string(),
                        });
                        debug!(worker = worker.id, "worker loop respawning after panic");
                        continue;
                    }
                    // Cancelled from outside; nothing left to supervise.
                    Err(_) => return,
                }
            }
        })
    }

    /// The loop body: publish availability, then react to whichever of the
    /// three wake-up reasons arrives first.
    async fn run(self: Arc<Self>) {
        debug!(worker = self.id, "worker loop starting");

        // Make ourselves available. If the pool is already gone the
        // dispatcher is tearing down and there is nothing to do.
        if self.pool.send(self.pipe_tx.clone()).await.is_err() {
            return;
        }

        loop {
            tokio::select! {
                _ = self.quit_rx.recv() => {
                    // A handoff may have landed in the pipe at the same
                    // moment the quit signal fired; take it with us rather
                    // than strand it in a channel nobody will read again.
                    while let Ok(act) = self.pipe_rx.try_recv() {
                        self.enqueue(act).await;
                    }
                    self.flush().await;
                    debug!(worker = self.id, "worker loop exiting on quit");
                    return;
                }
                received = self.pipe_rx.recv() => {
                    let Ok(act) = received else {
                        self.flush().await;
                        return;
                    };
                    self.enqueue(act).await;
                    if self.queue_len().await >= self.max_batch {
                        self.flush().await;
                    }
                    // Back on the market for the next action.
                    if self.pool.send(self.pipe_tx.clone()).await.is_err() {
                        self.flush().await;
                        return;
                    }
                }
                _ = tokio::time::sleep(self.wait_interval) => {
                    // Idle too long; ship whatever has accumulated. An empty
                    // batch makes this a no-op inside flush.
                    self.flush().await;
                }
            }
        }
    }

    /// 📬 Ship the batch, report the verdict, clear the tray.
    ///
    /// The batch is cleared on every path out of here — success, transport
    /// error, bad status, deadline — because a batch that already failed
    /// once is not going to improve with age.
    async fn flush(&self) {
        let mut batch = self.batch.write().await;
        if batch.is_empty() {
            return;
        }
        let batch_len = batch.len();

        match tokio::time::timeout(FLUSH_DEADLINE, self.backend.bulk(&batch)).await {
            Err(_elapsed) => {
                (self.on_error)(Error::FlushDeadline(FLUSH_DEADLINE));
            }
            Ok(Err(err)) => {
                (self.on_error)(err);
            }
            Ok(Ok(response)) => {
                let (succeeded, failed) = response.count();
                self.metrics.record_flush(succeeded as u64, failed as u64);
                debug!(
                    worker = self.id,
                    batch = batch_len,
                    succeeded,
                    failed,
                    "bulk flush complete"
                );
                if failed > 0 {
                    if let Some(err) = response.result_error() {
                        (self.on_error)(err);
                    }
                }
            }
        }

        batch.clear();
    }
}
