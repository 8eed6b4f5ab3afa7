//! 📡 The backend proxy — the one part of the pipeline that actually talks
//! to the cluster.
//!
//! 🎬 *[a worker hands over a batch. the proxy straightens its tie.]*
//! *["I'll take it from here," it says, and dials the cluster.]*
//! *[the cluster picks up on the fourth ring. it always lets it ring.]*
//!
//! 🧠 Knowledge graph:
//! - One [`EsProxy`] per dispatcher, shared by every worker behind an `Arc`.
//! - The HTTP client is built lazily on first flush and read lock-free after
//!   (`OnceLock` does the double-checked dance so we don't have to).
//! - Endpoints rotate round-robin per request. One node down shouldn't mean
//!   every batch piles onto its neighbor.
//! - Version plumbing: the framer handles `_type` per meta line; this module
//!   handles the ES6 request-level `type=_doc` default parameter.
//! - Auth precedence: api-key beats basic auth. This is not a democracy,
//!   this is an Elasticsearch cluster.
//!
//! ⚠️ The proxy does not retry. Retries are a policy decision and policy
//! decisions belong to whoever configured the error handler. 🦆

use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::{Engine, prelude::BASE64_STANDARD};
use tracing::trace;

use crate::action::BoxAction;
use crate::bulk::{self, BulkResponse, DEFAULT_DOC_TYPE};
use crate::config::{Config, EsVersion};
use crate::error::{Error, Result};
use crate::stats::DispatchMetrics;
use crate::wirelog::WireLog;

// ⏱️ If the cluster can't complete a TCP handshake in ten seconds, the rest
// of the request was not going to go well either.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// 🚰 The seam workers flush through. One real implementation ([`EsProxy`])
/// plus whatever a test wants to stand behind it.
///
/// # Contract 📜
/// - An empty batch returns an empty response and performs no I/O.
/// - Implementations are shared by every worker at once; `&self` only.
#[async_trait]
pub(crate) trait BulkBackend: Send + Sync + std::fmt::Debug {
    /// Submit one batch and return the decoded per-item verdicts.
    async fn bulk(&self, acts: &[BoxAction]) -> Result<BulkResponse>;
}

/// 📡 Lazy, version-aware bulk client. Cheap to share, safe to hammer from
/// every worker at once.
pub(crate) struct EsProxy {
    version: EsVersion,
    /// Resolved base URLs, already stripped of trailing slashes.
    endpoints: Vec<String>,
    /// Round-robin position across `endpoints`.
    cursor: AtomicUsize,
    username: Option<String>,
    password: Option<String>,
    api_key: Option<String>,
    wire_log: Option<WireLog>,
    /// Injected client, when the caller brought their own transport.
    transport: Option<reqwest::Client>,
    /// The lazily-built client. Empty until the first flush needs it.
    client: OnceLock<reqwest::Client>,
    metrics: Arc<DispatchMetrics>,
}

impl std::fmt::Debug for EsProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EsProxy")
            .field("version", &self.version)
            .field("endpoints", &self.endpoints)
            .field("client_built", &self.client.get().is_some())
            .finish()
    }
}

impl EsProxy {
    pub(crate) fn from_config(cfg: &Config, metrics: Arc<DispatchMetrics>) -> Result<Self> {
        Ok(Self {
            version: cfg.version,
            endpoints: resolve_endpoints(cfg)?,
            cursor: AtomicUsize::new(0),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            api_key: cfg.api_key.clone(),
            wire_log: cfg.wire_log.clone(),
            transport: cfg.transport.clone(),
            client: OnceLock::new(),
            metrics,
        })
    }

    /// Lazily build (or fetch) the HTTP client. First caller pays the
    /// construction cost; everyone after reads the `OnceLock` without
    /// taking a lock.
    fn client(&self) -> Result<&reqwest::Client> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let built = match &self.transport {
            Some(injected) => injected.clone(),
            None => reqwest::Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()?,
        };
        // A racing flush may have beaten us to it; `get_or_init` keeps
        // whichever client landed first and drops the spare.
        Ok(self.client.get_or_init(|| built))
    }

    /// Next bulk URL in the rotation, with the ES6 default-type parameter
    /// attached where that generation wants it.
    fn next_bulk_url(&self) -> String {
        let slot = self.cursor.fetch_add(1, Ordering::Relaxed) % self.endpoints.len();
        let base = &self.endpoints[slot];
        match self.version {
            EsVersion::V6 => format!("{base}/_bulk?type={DEFAULT_DOC_TYPE}"),
            EsVersion::V5 | EsVersion::V7 => format!("{base}/_bulk"),
        }
    }
}

#[async_trait]
impl BulkBackend for EsProxy {
    /// 📬 Submit one batch to the bulk endpoint and decode the verdict.
    ///
    /// An empty batch is a polite no-op: empty response, no request, no
    /// error. Only the framer complains about emptiness, and only when
    /// called directly.
    async fn bulk(&self, acts: &[BoxAction]) -> Result<BulkResponse> {
        if acts.is_empty() {
            return Ok(BulkResponse::default());
        }

        let payload = bulk::frame(self.version, acts)?;
        self.metrics.record_payload(payload.len() as u64);

        let url = self.next_bulk_url();
        let client = self.client()?;

        let mut request = client
            .post(&url)
            // ⚠️ x-ndjson, not json. The cluster is picky about this and its
            // failure mode is not a clear error message.
            .header("Content-Type", "application/x-ndjson");

        // 🔒 api-key outranks basic auth when both are configured.
        if let Some(api_key) = &self.api_key {
            request = request.header("Authorization", format!("ApiKey {api_key}"));
        } else if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_ref());
        }

        if let Some(wire) = &self.wire_log {
            wire.request("POST", &url, &payload);
        }

        let started = Instant::now();
        let response = request.body(payload).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if let Some(wire) = &self.wire_log {
            wire.response(status.as_u16(), started.elapsed(), &text);
        }

        if !status.is_success() {
            // The body usually carries an `error` object explaining which
            // shard is having a rough morning. Keep it intact for the
            // handler; fall back to the raw text when it isn't JSON.
            let detail = serde_json::from_str(&text)
                .unwrap_or_else(|_| serde_json::Value::String(text));
            return Err(Error::BackendStatus {
                status: status.as_u16(),
                detail,
            });
        }

        trace!(target: "krill::wire", status = status.as_u16(), "bulk request landed");
        Ok(serde_json::from_str(&text)?)
    }
}

/// Resolve the configured endpoints, in priority order: explicit addresses,
/// then a decoded cloud id, then the localhost default every Elasticsearch
/// tutorial has relied on since the beginning of time.
fn resolve_endpoints(cfg: &Config) -> Result<Vec<String>> {
    if !cfg.addresses.is_empty() {
        return Ok(cfg
            .addresses
            .iter()
            .map(|addr| addr.trim_end_matches('/').to_string())
            .collect());
    }
    if let Some(cloud_id) = &cfg.cloud_id {
        return Ok(vec![decode_cloud_id(cloud_id)?]);
    }
    Ok(vec!["http://localhost:9200".to_string()])
}

/// Decode a cloud id (`label:base64(host$es-uuid[$kibana-uuid])`) into the
/// HTTPS endpoint it names.
fn decode_cloud_id(cloud_id: &str) -> Result<String> {
    // Everything after the first colon is the payload; the label is garnish.
    let payload = cloud_id
        .split_once(':')
        .map(|(_, rest)| rest)
        .unwrap_or(cloud_id);

    let decoded = BASE64_STANDARD
        .decode(payload)
        .map_err(|err| Error::Config(format!("cloud_id is not valid base64: {err}")))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| Error::Config("cloud_id payload is not valid UTF-8".into()))?;

    let mut parts = decoded.split('$');
    let (Some(host), Some(es_uuid)) = (parts.next(), parts.next()) else {
        return Err(Error::Config(
            "cloud_id payload must look like host$es-uuid".into(),
        ));
    };
    if host.is_empty() || es_uuid.is_empty() {
        return Err(Error::Config(
            "cloud_id payload must look like host$es-uuid".into(),
        ));
    }
    Ok(format!("https://{es_uuid}.{host}"))
}
