//! 🧪 Test support — a tiny in-process stand-in for a bulk endpoint.
//!
//! [`StubEs`] wraps a `wiremock::MockServer` mounted on `POST /_bulk`: every
//! payload that arrives has its meta lines tallied, and the answer is a
//! well-formed bulk response (or a canned failure, when a test wants to
//! watch things go wrong). It exists so the pipeline tests can assert on
//! exactly what reached "the cluster" without standing up an actual cluster.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing_subscriber::EnvFilter;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use crate::action::BoxAction;
use crate::bulk::{BulkItem, BulkItemStatus, BulkResponse};
use crate::error::Result;
use crate::proxy::BulkBackend;

/// Install a tracing subscriber for a test, if none is installed yet.
/// `RUST_LOG=debug cargo test` is the debugging move here.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// 🧪 An in-memory backend that records batch sizes and accepts every item.
/// The fastest possible cluster: it does nothing and agrees with everyone.
#[derive(Debug, Default)]
pub(crate) struct RecordingBackend {
    batches: Mutex<Vec<usize>>,
}

impl RecordingBackend {
    pub(crate) fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().expect("recording backend lock").clone()
    }
}

#[async_trait]
impl BulkBackend for RecordingBackend {
    async fn bulk(&self, acts: &[BoxAction]) -> Result<BulkResponse> {
        if acts.is_empty() {
            return Ok(BulkResponse::default());
        }
        if let Ok(mut sizes) = self.batches.lock() {
            sizes.push(acts.len());
        }
        let items = acts
            .iter()
            .map(|_| BulkItem {
                index: BulkItemStatus {
                    status: 200,
                    result: "ok".into(),
                    ..Default::default()
                },
                ..Default::default()
            })
            .collect();
        Ok(BulkResponse {
            errors: false,
            items,
        })
    }
}

/// 🧪 The stub endpoint: every bulk payload is tallied, every item succeeds
/// (unless the stub was spawned failing).
pub(crate) struct StubEs {
    server: MockServer,
    batches: Arc<Mutex<Vec<usize>>>,
}

impl StubEs {
    /// A stub that accepts everything with per-item status 200.
    pub(crate) async fn spawn() -> Self {
        Self::spawn_with(None).await
    }

    /// A stub that answers every request with the given HTTP status and
    /// body, for tests that want the cluster to say no.
    pub(crate) async fn spawn_failing(status: u16, body: serde_json::Value) -> Self {
        Self::spawn_with(Some((status, body))).await
    }

    async fn spawn_with(failure: Option<(u16, serde_json::Value)>) -> Self {
        let server = MockServer::start().await;
        let batches = Arc::new(Mutex::new(Vec::new()));

        // One mock for the one route the proxy ever calls. The path matcher
        // ignores the query string, so the ES6 `?type=_doc` variant lands
        // here too.
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(BulkResponder {
                batches: batches.clone(),
                failure,
            })
            .mount(&server)
            .await;

        Self { server, batches }
    }

    pub(crate) fn url(&self) -> String {
        self.server.uri()
    }

    /// Item counts per bulk request, in arrival order.
    pub(crate) fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().expect("stub batch lock").clone()
    }

    /// Total items seen across every bulk request.
    pub(crate) fn total_items(&self) -> usize {
        self.batch_sizes().iter().sum()
    }
}

/// The responder behind the `/_bulk` mock: tallies the meta lines of each
/// payload, then answers with a matching per-item verdict (or the canned
/// failure it was built with).
struct BulkResponder {
    batches: Arc<Mutex<Vec<usize>>>,
    failure: Option<(u16, serde_json::Value)>,
}

impl Respond for BulkResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let ops = meta_ops(&request.body);
        if let Ok(mut sizes) = self.batches.lock() {
            sizes.push(ops.len());
        }
        match &self.failure {
            Some((status, body)) => ResponseTemplate::new(*status).set_body_json(body),
            None => ResponseTemplate::new(200).set_body_json(accepted_response(&ops)),
        }
    }
}

/// Pull the operation of every meta line out of an NDJSON bulk body. A line
/// counts as a meta line when it is a single-key object whose key is one of
/// the four operations and whose value carries `_index` — which is exactly
/// the shape the framer emits, and a shape no doc line can collide with.
fn meta_ops(body: &[u8]) -> Vec<&'static str> {
    const OPS: [&str; 4] = ["index", "create", "update", "delete"];

    let text = String::from_utf8_lossy(body);
    let mut ops = Vec::new();
    for line in text.lines() {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        let Some(obj) = value.as_object() else {
            continue;
        };
        if obj.len() != 1 {
            continue;
        }
        for op in OPS {
            if let Some(inner) = obj.get(op) {
                if inner.get("_index").is_some() {
                    ops.push(op);
                }
            }
        }
    }
    ops
}

/// A bulk response body accepting every item with status 200, branch keyed
/// by the operation the request asked for.
fn accepted_response(ops: &[&'static str]) -> serde_json::Value {
    let items: Vec<serde_json::Value> = ops
        .iter()
        .map(|op| {
            let mut branch = serde_json::Map::new();
            branch.insert("_id".into(), serde_json::Value::String(String::new()));
            branch.insert("result".into(), serde_json::Value::String("ok".into()));
            branch.insert("status".into(), serde_json::Value::from(200u16));
            let mut item = serde_json::Map::new();
            item.insert((*op).to_string(), serde_json::Value::Object(branch));
            serde_json::Value::Object(item)
        })
        .collect();
    serde_json::json!({"errors": false, "items": items})
}
