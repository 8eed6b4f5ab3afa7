//! 💀 The error module — a complete catalog of the ways this can go wrong.
//!
//! Every failure in krill is one of the variants below. Producers get the
//! synchronous ones back from `add_action`; everything that happens after an
//! action crosses the queue boundary goes to the [`ErrorHandler`] instead,
//! because by then the producer has long since wandered off. 🦆

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Crate-wide result alias. The `E` default means internal code can write
/// `Result<T>` and still hand a specific error type to callers.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// 📞 The callback invoked for every error that has no producer left to blame.
///
/// Invoked from worker tasks, the routing loop, and respawn supervisors —
/// any task, any time, possibly several at once. Implementations must be
/// `Send + Sync` and should return quickly; a slow handler stalls a flush.
pub type ErrorHandler = Arc<dyn Fn(Error) + Send + Sync>;

/// 💀 Everything that can go wrong, enumerated so callers can match on it
/// instead of grepping a message string like it's 2009.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// 🔧 Construction-time config rejection. Fix the config, build again.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// 🔄 `start` called while the pipeline is already running.
    #[error("dispatcher is already running")]
    AlreadyRunning,

    /// 🛑 `stop` or `add_action` called while the pipeline is not running.
    #[error("dispatcher is not running")]
    NotRunning,

    /// ⚰️ `start` called on a dispatcher that already ran and stopped.
    /// Workers are single-use. Build a new dispatcher.
    #[error("dispatcher already stopped; build a new one")]
    Stopped,

    /// 🐛 An action failed ingress validation. Never enqueued.
    #[error("invalid action: {0}")]
    InvalidAction(String),

    /// ✂️ The caller's cancellation token fired while the action was still
    /// waiting for the ingress queue to admit it.
    #[error("admission cancelled before the ingress queue accepted the action")]
    Cancelled,

    /// 📭 The bulk framer was handed zero actions. Only reachable when the
    /// framer is called directly; the proxy short-circuits empty batches.
    #[error("bulk framer called with an empty batch")]
    EmptyPayload,

    /// 📡 HTTP-level failure talking to the cluster. The batch is discarded.
    #[error("bulk transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// 💥 The cluster answered with a non-2xx envelope. `detail` is whatever
    /// JSON the cluster sent back with the bad news.
    #[error("bulk endpoint answered {status}: {detail}")]
    BackendStatus {
        status: u16,
        detail: serde_json::Value,
    },

    /// 📉 Per-item failures inside a 2xx envelope, aggregated per operation.
    #[error("bulk items failed: {0}")]
    ItemFailures(String),

    /// 🔣 JSON went in or out sideways — payload serialization or response
    /// decoding failed.
    #[error("bulk codec failure: {0}")]
    Codec(#[from] serde_json::Error),

    /// ⏱️ A flush outlived its deadline. The batch is discarded; the worker
    /// keeps going.
    #[error("flush deadline of {0:?} exceeded")]
    FlushDeadline(Duration),

    /// 🔥 A pipeline task panicked. The supervisor respawns it; this variant
    /// is how the error handler finds out it happened.
    #[error("{loop_name} loop fault: {detail}")]
    LoopFault {
        loop_name: &'static str,
        detail: String,
    },

    /// 🕳️ The ingress queue closed underneath a producer. Should only be
    /// observable during shutdown races.
    #[error("ingress queue closed")]
    QueueClosed,
}
