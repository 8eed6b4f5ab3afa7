//! 🔧 Configuration — every knob on the pipeline, turned once, at build time.
//!
//! 📐 DESIGN NOTE (tribal knowledge, now written down):
//!   - [`Config`] is plain data. Fill it via struct literal, the chainable
//!     `with_*` setters, or [`load_config`] (TOML + `KRILL_*` env vars,
//!     merged by figment). All three produce the same thing.
//!   - The dispatcher consumes the config at construction and never looks
//!     at anything else again. No env reads at runtime. No surprises.
//!   - Two fields can't be deserialized (an HTTP client and a closure), so
//!     they are `serde(skip)` and only reachable through setters. The file
//!     format doesn't get to inject executable behavior. This is a feature.
//!
//! 💀 Defaults were chosen by the time-honored method of shipping them and
//! seeing who complains: 5000 queued actions, 5 workers, 1000 actions per
//! batch, 2 seconds of idle patience. 🦆

use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::error::{Error, ErrorHandler, Result};
use crate::wirelog::WireLog;

/// 🏷️ Which generation of cluster we're talking to.
///
/// The version picks the bulk framing rules and the default-type plumbing.
/// Immutable per dispatcher; clusters don't change major versions mid-flight
/// and neither do we.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EsVersion {
    V5,
    V6,
    V7,
}

impl EsVersion {
    /// Human-facing label, for logs and tables.
    pub fn label(self) -> &'static str {
        match self {
            EsVersion::V5 => "ES5.X",
            EsVersion::V6 => "ES6.X",
            EsVersion::V7 => "ES7.X",
        }
    }
}

impl Default for EsVersion {
    fn default() -> Self {
        EsVersion::V6
    }
}

impl fmt::Display for EsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// 📦 5000 queued actions — enough to absorb a burst, small enough that a
// stalled cluster makes producers feel it instead of eating all the RAM.
fn default_global_queue_size() -> usize {
    5000
}

// 🧵 5 workers — five concurrent bulk requests in flight, tops.
fn default_worker_size() -> usize {
    5
}

// 📦 1000 actions per batch before a size-triggered flush.
fn default_worker_queue_size() -> usize {
    1000
}

// ⏱️ 2000 ms of idle before a time-triggered flush. Long enough to batch,
// short enough that a trickle of documents still lands promptly.
fn default_worker_wait_interval_ms() -> u64 {
    2000
}

/// 🔧 Everything the dispatcher needs to know, in one immutable bundle.
#[derive(Clone, Deserialize)]
pub struct Config {
    /// Cluster generation; selects framing rules and default-type plumbing.
    #[serde(default)]
    pub version: EsVersion,
    /// Endpoint URLs. Rotated round-robin per bulk request. Empty means
    /// fall back to `cloud_id`, or failing that, localhost:9200.
    #[serde(default)]
    pub addresses: Vec<String>,
    /// Basic-auth username.
    #[serde(default)]
    pub username: Option<String>,
    /// Basic-auth password.
    #[serde(default)]
    pub password: Option<String>,
    /// Cloud endpoint identifier; decoded into an HTTPS endpoint when no
    /// explicit address is given.
    #[serde(default)]
    pub cloud_id: Option<String>,
    /// Api-key token. Wins over basic auth when both are present.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Wire logging of bulk requests/responses. Off unless configured.
    #[serde(default)]
    pub wire_log: Option<WireLog>,
    /// Ingress queue capacity. Zero collapses to a single-slot handoff.
    #[serde(default = "default_global_queue_size")]
    pub global_queue_size: usize,
    /// Worker count, which is also the pool-channel capacity.
    #[serde(default = "default_worker_size")]
    pub worker_size: usize,
    /// Per-worker batch size threshold.
    #[serde(default = "default_worker_queue_size")]
    pub worker_queue_size: usize,
    /// Idle-flush interval in milliseconds.
    #[serde(default = "default_worker_wait_interval_ms")]
    pub worker_wait_interval_ms: u64,
    /// Render a live progress spinner while dispatching. Off by default;
    /// libraries should not draw on people's terminals uninvited.
    #[serde(default)]
    pub show_progress: bool,
    /// Injected HTTP client, for tests and exotic transports. Not part of
    /// the file format.
    #[serde(skip)]
    pub transport: Option<reqwest::Client>,
    /// Callback for every runtime error. Not part of the file format.
    #[serde(skip)]
    pub error_handler: Option<ErrorHandler>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: EsVersion::default(),
            addresses: Vec::new(),
            username: None,
            password: None,
            cloud_id: None,
            api_key: None,
            wire_log: None,
            global_queue_size: default_global_queue_size(),
            worker_size: default_worker_size(),
            worker_queue_size: default_worker_queue_size(),
            worker_wait_interval_ms: default_worker_wait_interval_ms(),
            show_progress: false,
            transport: None,
            error_handler: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Closures don't Debug and credentials shouldn't. Everything else
        // prints.
        f.debug_struct("Config")
            .field("version", &self.version)
            .field("addresses", &self.addresses)
            .field("username", &self.username.as_deref().map(|_| "<set>"))
            .field("password", &self.password.as_deref().map(|_| "<set>"))
            // cloud_id decodes straight to the cluster host and UUIDs, so it
            // is connection material like the three around it.
            .field("cloud_id", &self.cloud_id.as_deref().map(|_| "<set>"))
            .field("api_key", &self.api_key.as_deref().map(|_| "<set>"))
            .field("wire_log", &self.wire_log)
            .field("global_queue_size", &self.global_queue_size)
            .field("worker_size", &self.worker_size)
            .field("worker_queue_size", &self.worker_queue_size)
            .field("worker_wait_interval_ms", &self.worker_wait_interval_ms)
            .field("show_progress", &self.show_progress)
            .field("transport", &self.transport.as_ref().map(|_| "<injected>"))
            .field(
                "error_handler",
                &self.error_handler.as_ref().map(|_| "<set>"),
            )
            .finish()
    }
}

impl Config {
    /// Fresh config with every default applied.
    pub fn new() -> Self {
        Self::default()
    }

    /// The idle-flush interval as a [`Duration`].
    pub fn wait_interval(&self) -> Duration {
        Duration::from_millis(self.worker_wait_interval_ms)
    }

    // -- chainable setters, one per knob --

    pub fn with_version(mut self, version: EsVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_addresses<I, S>(mut self, addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.addresses = addrs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_cloud_id(mut self, cloud_id: impl Into<String>) -> Self {
        self.cloud_id = Some(cloud_id.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_transport(mut self, client: reqwest::Client) -> Self {
        self.transport = Some(client);
        self
    }

    pub fn with_wire_log(mut self, wire_log: WireLog) -> Self {
        self.wire_log = Some(wire_log);
        self
    }

    pub fn with_global_queue_size(mut self, size: usize) -> Self {
        self.global_queue_size = size;
        self
    }

    pub fn with_worker_size(mut self, size: usize) -> Self {
        self.worker_size = size;
        self
    }

    pub fn with_worker_queue_size(mut self, size: usize) -> Self {
        self.worker_queue_size = size;
        self
    }

    pub fn with_worker_wait_interval(mut self, interval: Duration) -> Self {
        self.worker_wait_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_error_handler(
        mut self,
        handler: impl Fn(Error) + Send + Sync + 'static,
    ) -> Self {
        self.error_handler = Some(std::sync::Arc::new(handler));
        self
    }

    pub fn with_show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// 🚪 Construction-time sanity check. A pipeline with zero workers or a
    /// zero batch threshold would sit there doing nothing forever, so both
    /// are rejected here rather than discovered in production.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.worker_size == 0 {
            return Err(Error::Config("worker_size must be at least 1".into()));
        }
        if self.worker_queue_size == 0 {
            return Err(Error::Config(
                "worker_queue_size must be at least 1".into(),
            ));
        }
        if self.worker_wait_interval_ms == 0 {
            return Err(Error::Config(
                "worker_wait_interval_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// 🚀 Load a [`Config`] from env vars and (optionally) a TOML file.
///
/// Env vars use the `KRILL_` prefix. When a file is given it is merged on
/// top, so the file wins on conflicts. When it isn't, the environment is the
/// whole story. This loader is strictly opt-in — embedding applications that
/// build their `Config` in code never touch figment or the environment.
pub fn load_config(config_file: Option<&Path>) -> anyhow::Result<Config> {
    info!(
        file = %config_file.unwrap_or_else(|| Path::new("<none>")).display(),
        "loading dispatcher configuration"
    );

    let figment = Figment::new().merge(Env::prefixed("KRILL_"));
    let figment = match config_file {
        Some(file) => figment.merge(Toml::file(file)),
        None => figment,
    };

    let context_msg = match config_file {
        Some(path) => format!(
            "failed to parse configuration from '{}' plus KRILL_* environment variables; \
             check the file for typos and the env for half-set overrides",
            path.display()
        ),
        None => "failed to parse configuration from KRILL_* environment variables; \
                 no file was given, so this one's entirely on the environment"
            .to_string(),
    };

    figment.extract().context(context_msg)
}
