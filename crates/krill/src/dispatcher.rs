//! 🎬 COLD OPEN — INT. DISPATCH FLOOR — SHIFT CHANGE
//!
//! Producers line up at the counter with actions. A clerk checks each form,
//! stamps it, and drops it on the conveyor. At the far end, a router reads
//! the belt one item at a time, waits for a worker to wave, and hands the
//! item to exactly that worker. Nobody shouts across the room. The room is
//! the architecture.
//!
//! 🚦 The dispatcher owns the whole floor: the bounded ingress queue, the
//! pool rendezvous channel of worker pipes, the routing loop that moves
//! actions between them, and the start/drain/stop lifecycle.
//!
//! 🧠 Knowledge graph:
//! - [`Dispatcher::add_action`]: validate → bounded blocking enqueue. The
//!   caller's cancellation token governs *admission only*; once the queue
//!   has the action, it belongs to the pipeline.
//! - Routing loop: ingress queue → pool lease → single-item pipe handoff.
//!   Pull model; workers never touch the ingress queue.
//! - Stop: reject new admissions immediately, drain the queue, retire the
//!   router, then the workers (each flushes on the way out), then sweep
//!   the pool. Synchronous from the caller's point of view.
//! - Lifecycle is one-shot: idle → running → stopped. Workers don't come
//!   back from the dead; a stopped dispatcher stays stopped.
//! - Panicked loops respawn via their supervisors and report through the
//!   error handler. An action caught mid-handoff by a panic is lost — the
//!   pipeline trades that corner of durability for staying up.
//!
//! ⚠️ DO NOT MAKE THE BREAKER PUB. The workers are the dispatcher's private
//! minions and the pool channel is a load-bearing implementation detail. 🦆

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::action::{self, Action, BoxAction};
use crate::config::Config;
use crate::error::{Error, ErrorHandler, Result};
use crate::proxy::EsProxy;
use crate::stats::{DispatchMetrics, DispatchStats};
use crate::worker::{Pipe, Worker};

// ⏱️ How often the drain loop re-checks the ingress queue during stop.
const DRAIN_POLL: Duration = Duration::from_millis(100);

/// 🔌 The breaker: every channel and worker the dispatcher owns, in one
/// private box. Workers share only the pool sender; the ingress queue has
/// exactly one reader (the routing loop) for its whole life.
struct Breaker {
    queue_tx: async_channel::Sender<BoxAction>,
    queue_rx: async_channel::Receiver<BoxAction>,
    pool_rx: async_channel::Receiver<Pipe>,
    workers: Vec<Arc<Worker>>,
    quit_tx: async_channel::Sender<()>,
    quit_rx: async_channel::Receiver<()>,
}

/// Where in its one-way life the dispatcher currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Stopped,
}

/// Task handles plus the phase, guarded together so start/stop are serial.
struct Lifecycle {
    phase: Phase,
    routing: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

/// 🚦 The public face of the pipeline.
///
/// ```no_run
/// # async fn demo() -> krill::Result<()> {
/// use krill::{Config, Dispatcher, EsOperation, StandardAction};
/// use tokio_util::sync::CancellationToken;
///
/// let dispatcher = Dispatcher::new(
///     Config::new().with_addresses(["http://localhost:9200"]),
/// )?;
/// dispatcher.start().await?;
///
/// let ctx = CancellationToken::new();
/// dispatcher
///     .add_action(&ctx, StandardAction {
///         op: EsOperation::Index,
///         index: "allan".into(),
///         doc: serde_json::json!({"field1": 200}).as_object().cloned(),
///         ..Default::default()
///     })
///     .await?;
///
/// dispatcher.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct Dispatcher {
    cfg: Config,
    bk: Breaker,
    metrics: Arc<DispatchMetrics>,
    on_error: ErrorHandler,
    /// Gate for `add_action`. Dropped the instant stop begins, so the drain
    /// can't be refilled by producers racing the shutdown.
    accepting: AtomicBool,
    running: AtomicBool,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("version", &self.cfg.version)
            .field("workers", &self.bk.workers.len())
            .field("pending", &self.bk.queue_tx.len())
            .field("running", &self.running.load(Ordering::Acquire))
            .finish()
    }
}

impl Dispatcher {
    /// 🏗️ Build the whole floor: proxy, metrics, channels, workers. Nothing
    /// runs yet; [`start`](Self::start) flips the switch.
    pub fn new(cfg: Config) -> Result<Self> {
        cfg.validate()?;

        let on_error: ErrorHandler = match &cfg.error_handler {
            Some(handler) => handler.clone(),
            // No handler configured: errors still get witnessed, via the log.
            None => Arc::new(|err| warn!(%err, "dispatch error (no error handler configured)")),
        };

        let metrics = Arc::new(DispatchMetrics::new(cfg.show_progress));
        let proxy = Arc::new(EsProxy::from_config(&cfg, metrics.clone())?);

        // A zero-capacity queue collapses to a single-slot handoff: the
        // producer parks until the routing loop takes the action.
        let (queue_tx, queue_rx) = async_channel::bounded(cfg.global_queue_size.max(1));
        let (pool_tx, pool_rx) = async_channel::bounded(cfg.worker_size);
        let (quit_tx, quit_rx) = async_channel::bounded(1);

        let workers = (0..cfg.worker_size)
            .map(|id| {
                Worker::new(
                    id,
                    pool_tx.clone(),
                    proxy.clone(),
                    metrics.clone(),
                    cfg.worker_queue_size,
                    cfg.wait_interval(),
                    on_error.clone(),
                )
            })
            .collect();

        Ok(Self {
            cfg,
            bk: Breaker {
                queue_tx,
                queue_rx,
                pool_rx,
                workers,
                quit_tx,
                quit_rx,
            },
            metrics,
            on_error,
            accepting: AtomicBool::new(false),
            running: AtomicBool::new(false),
            lifecycle: tokio::sync::Mutex::new(Lifecycle {
                phase: Phase::Idle,
                routing: None,
                workers: Vec::new(),
            }),
        })
    }

    /// 🚀 Launch the routing loop and every worker. Fails if the dispatcher
    /// is already running, or already lived its one life.
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        match lifecycle.phase {
            Phase::Running => return Err(Error::AlreadyRunning),
            Phase::Stopped => return Err(Error::Stopped),
            Phase::Idle => {}
        }

        lifecycle.routing = Some(self.spawn_routing());
        for worker in &self.bk.workers {
            lifecycle.workers.push(worker.start());
        }

        // Flip the gates before the lock drops so no caller can observe a
        // running pipeline that rejects admissions.
        self.accepting.store(true, Ordering::Release);
        self.running.store(true, Ordering::Release);
        lifecycle.phase = Phase::Running;

        info!(
            version = %self.cfg.version,
            workers = self.bk.workers.len(),
            queue = self.bk.queue_tx.capacity().unwrap_or(0),
            "dispatcher started"
        );
        Ok(())
    }

    /// 🛑 Drain and shut down, synchronously.
    ///
    /// Order matters here: admissions close first so producers can't refill
    /// the queue mid-drain; the router retires while the workers are still
    /// alive so an in-hand action still finds a pipe; the workers flush on
    /// their way out; the pool is swept last.
    pub async fn stop(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.phase != Phase::Running {
            return Err(Error::NotRunning);
        }

        self.accepting.store(false, Ordering::Release);

        // Drain: with admissions closed this converges; the routing loop
        // keeps feeding workers until the belt is visibly empty.
        while !self.bk.queue_tx.is_empty() {
            tokio::time::sleep(DRAIN_POLL).await;
        }

        // Retire the router. Workers are still publishing pipes, so a final
        // in-hand action completes its handoff before the loop sees quit.
        self.bk.quit_tx.close();
        if let Some(handle) = lifecycle.routing.take() {
            let _ = handle.await;
        }

        // Clock the workers out; each flushes its remaining batch.
        for worker in &self.bk.workers {
            worker.stop();
        }
        for handle in lifecycle.workers.drain(..) {
            let _ = handle.await;
        }

        // Sweep leftover pipe capabilities out of the pool.
        while self.bk.pool_rx.try_recv().is_ok() {}

        self.metrics.finish();
        self.running.store(false, Ordering::Release);
        lifecycle.phase = Phase::Stopped;

        info!("dispatcher stopped");
        debug!("dispatch summary:\n{}", self.metrics.summary_table());
        Ok(())
    }

    /// 📥 Validate and enqueue one action.
    ///
    /// Blocks while the ingress queue is full. The token governs admission
    /// only — cancel it and the call returns [`Error::Cancelled`], but an
    /// action the queue already accepted is past recalling.
    pub async fn add_action<A>(&self, ctx: &CancellationToken, act: A) -> Result<()>
    where
        A: Action + 'static,
    {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(Error::NotRunning);
        }
        action::validate(&act)?;

        let boxed: BoxAction = Box::new(act);
        tokio::select! {
            // Biased so an already-cancelled token rejects deterministically
            // instead of racing a queue with free space.
            biased;
            _ = ctx.cancelled() => Err(Error::Cancelled),
            sent = self.bk.queue_tx.send(boxed) => match sent {
                Ok(()) => {
                    self.metrics.record_submitted();
                    Ok(())
                }
                Err(_) => Err(Error::QueueClosed),
            },
        }
    }

    /// Whether the pipeline is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Actions sitting in the ingress queue right now.
    pub fn pending(&self) -> usize {
        self.bk.queue_tx.len()
    }

    /// Counter snapshot: admitted, flushed, succeeded, failed, and rates.
    pub fn stats(&self) -> DispatchStats {
        self.metrics.snapshot()
    }

    /// The end-of-run summary, rendered as an aligned table.
    pub fn summary(&self) -> String {
        self.metrics.summary_table().to_string()
    }

    /// The routing loop under its respawn supervisor. A panic in the loop
    /// body is reported and the loop starts fresh; the dispatcher stays up.
    fn spawn_routing(&self) -> JoinHandle<()> {
        let queue_rx = self.bk.queue_rx.clone();
        let pool_rx = self.bk.pool_rx.clone();
        let quit_rx = self.bk.quit_rx.clone();
        let on_error = self.on_error.clone();
        tokio::spawn(async move {
            loop {
                let body = tokio::spawn(route(
                    queue_rx.clone(),
                    pool_rx.clone(),
                    quit_rx.clone(),
                ));
                match body.await {
                    Ok(()) => return,
                    Err(join_err) if join_err.is_panic() => {
                        on_error(Error::LoopFault {
                            loop_name: "routing",
                            detail: join_err.to_string(),
                        });
                        debug!("routing loop respawning after panic");
                        continue;
                    }
                    Err(_) => return,
                }
            }
        })
    }
}

/// The routing loop body: belt → lease → handoff, until quit.
async fn route(
    queue_rx: async_channel::Receiver<BoxAction>,
    pool_rx: async_channel::Receiver<Pipe>,
    quit_rx: async_channel::Receiver<()>,
) {
    debug!("routing loop starting");
    loop {
        tokio::select! {
            _ = quit_rx.recv() => {
                debug!("routing loop exiting on quit");
                return;
            }
            received = queue_rx.recv() => {
                let Ok(act) = received else { return };
                // Lease exactly one worker pipe. Workers outlive the router
                // during shutdown, so this resolves rather than wedges.
                let Ok(pipe) = pool_rx.recv().await else { return };
                if pipe.send(act).await.is_err() {
                    // The leased worker vanished mid-handoff; the action
                    // goes with it. Availability over durability.
                    debug!("handoff failed; worker pipe closed");
                }
            }
        }
    }
}
