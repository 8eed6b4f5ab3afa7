// AI
//! 📊 stats.rs — "how's the indexing going?" answered with numbers instead
//! of vibes.
//!
//! 🚀 Counters for everything that moves: actions admitted, batches flushed,
//! items the cluster accepted, items it bounced, payload bytes shipped.
//! Plus a sliding five-second window so the docs/sec figure reflects *now*
//! rather than the average since last Tuesday.
//!
//! ⚠️ Watching the spinner will not make the cluster faster. We checked. 🦆

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressStyle};

// -- 📏 one mebibyte. Not a megabyte. The hill remains occupied.
const MIB: u64 = 1024 * 1024;

// ⏱️ rate window width — long enough to smooth spikes, short enough to react.
const RATE_WINDOW: Duration = Duration::from_secs(5);

/// 📦 Scale a byte count into something a human can read without counting
/// digits on their fingers.
fn format_bytes(bytes: u64) -> String {
    if bytes >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= 1024 {
        format!("{:.2} KiB", bytes as f64 / 1024.0)
    } else {
        format!("{} bytes", bytes)
    }
}

/// 🔢 Commas every three digits, for the readers in the audience.
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// 📷 A point-in-time copy of the counters, safe to hand to callers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchStats {
    /// Actions admitted through `add_action`.
    pub submitted: u64,
    /// Batches flushed to the cluster (including ones that failed in flight).
    pub batches: u64,
    /// Items the cluster accepted.
    pub succeeded: u64,
    /// Items the cluster bounced.
    pub failed: u64,
    /// Request payload bytes shipped.
    pub payload_bytes: u64,
    /// Items/sec over the recent window.
    pub docs_per_sec: f64,
}

/// 📊 The live counters shared across the dispatcher, proxy, and workers.
///
/// Everything is atomic or briefly locked; nothing here ever awaits, so it
/// is safe to poke from any task at any time.
pub(crate) struct DispatchMetrics {
    submitted: AtomicU64,
    batches: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    payload_bytes: AtomicU64,
    start: Instant,
    /// Sliding window of (when, items-flushed-at-that-point) samples.
    samples: Mutex<VecDeque<(Instant, u64)>>,
    bar: Option<ProgressBar>,
}

impl std::fmt::Debug for DispatchMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar doesn't Debug, and printing a live spinner into
        // -- debug output would be performance art anyway.
        f.debug_struct("DispatchMetrics")
            .field("submitted", &self.submitted.load(Ordering::Relaxed))
            .field("batches", &self.batches.load(Ordering::Relaxed))
            .field("succeeded", &self.succeeded.load(Ordering::Relaxed))
            .field("failed", &self.failed.load(Ordering::Relaxed))
            .field("payload_bytes", &self.payload_bytes.load(Ordering::Relaxed))
            .finish()
    }
}

impl DispatchMetrics {
    pub(crate) fn new(show_progress: bool) -> Self {
        let bar = show_progress.then(|| {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::with_template("{spinner:.green} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        });
        Self {
            submitted: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            payload_bytes: AtomicU64::new(0),
            start: Instant::now(),
            samples: Mutex::new(VecDeque::new()),
            bar,
        }
    }

    /// One action made it through the ingress queue.
    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// The proxy shipped a payload of this many bytes.
    pub(crate) fn record_payload(&self, bytes: u64) {
        self.payload_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// A worker finished a flush with these per-item counts.
    pub(crate) fn record_flush(&self, succeeded: u64, failed: u64) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.succeeded.fetch_add(succeeded, Ordering::Relaxed);
        self.failed.fetch_add(failed, Ordering::Relaxed);

        let flushed_total = self.succeeded.load(Ordering::Relaxed)
            + self.failed.load(Ordering::Relaxed);
        if let Ok(mut samples) = self.samples.lock() {
            let now = Instant::now();
            samples.push_back((now, flushed_total));
            while let Some((when, _)) = samples.front() {
                if now.duration_since(*when) > RATE_WINDOW {
                    samples.pop_front();
                } else {
                    break;
                }
            }
        }

        if let Some(bar) = &self.bar {
            bar.set_message(format!(
                "{} indexed / {} failed / {:.0} docs/s",
                format_number(self.succeeded.load(Ordering::Relaxed)),
                format_number(self.failed.load(Ordering::Relaxed)),
                self.docs_per_sec(),
            ));
        }
    }

    /// Items/sec over the recent window. Zero until two samples exist.
    pub(crate) fn docs_per_sec(&self) -> f64 {
        let Ok(samples) = self.samples.lock() else {
            return 0.0;
        };
        let (Some((first_t, first_n)), Some((last_t, last_n))) =
            (samples.front(), samples.back())
        else {
            return 0.0;
        };
        let span = last_t.duration_since(*first_t).as_secs_f64();
        if span <= f64::EPSILON {
            return 0.0;
        }
        (last_n - first_n) as f64 / span
    }

    /// Copy the counters out for a caller.
    pub(crate) fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            payload_bytes: self.payload_bytes.load(Ordering::Relaxed),
            docs_per_sec: self.docs_per_sec(),
        }
    }

    /// 📋 The end-of-run summary table. Renders with `comfy-table` so the
    /// columns line up no matter how big the numbers got.
    pub(crate) fn summary_table(&self) -> Table {
        let stats = self.snapshot();
        let mut table = Table::new();
        table
            .load_preset(NOTHING)
            .set_content_arrangement(ContentArrangement::Dynamic);

        let mut row = |label: &str, value: String| {
            table.add_row(vec![
                Cell::new(label),
                Cell::new(value).set_alignment(CellAlignment::Right),
            ]);
        };
        row("submitted", format_number(stats.submitted));
        row("batches flushed", format_number(stats.batches));
        row("items indexed", format_number(stats.succeeded));
        row("items failed", format_number(stats.failed));
        row("payload shipped", format_bytes(stats.payload_bytes));
        row(
            "elapsed",
            format!("{:.1}s", self.start.elapsed().as_secs_f64()),
        );
        table
    }

    /// Tear down the spinner, if one was running.
    pub(crate) fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}
