// ai
//! 📜 Wire logging — for the days when "trust me, the request was fine"
//! stops being an acceptable debugging strategy.
//!
//! 🧠 Knowledge graph:
//! - [`WireLog`] is configured once and consulted by the proxy around every
//!   bulk call. Off by default; payloads can be large and logs are forever.
//! - Four render [`WireLogKind`]s: `Text` (plain), `Color` (the same, but
//!   with ANSI eyeliner), `Curl` (a paste-able reproduction command), and
//!   `Json` (one structured object per event, for log pipelines).
//! - Output goes through `tracing` under the `krill::wire` target, so the
//!   subscriber — not this module — decides where bytes land.
//! - Request/response bodies ride along only when the corresponding
//!   `enable_*_body` flag is set. Meta lines can contain ids; whole bodies
//!   can contain entire documents. Opt in deliberately.
//!
//! 🦆 The duck has read your bulk payloads. The duck judges no one.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

const WIRE_TARGET: &str = "krill::wire";

// ANSI bits for the Color renderer. Kept minimal on purpose.
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// 🎨 How a wire event should look when rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireLogKind {
    Text,
    Color,
    Curl,
    Json,
}

impl Default for WireLogKind {
    fn default() -> Self {
        WireLogKind::Text
    }
}

/// 📜 Wire-logging settings, consulted by the proxy around each bulk call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireLog {
    #[serde(default)]
    pub kind: WireLogKind,
    /// Include the request payload in request events.
    #[serde(default)]
    pub enable_request_body: bool,
    /// Include the response body in response events.
    #[serde(default)]
    pub enable_response_body: bool,
}

impl WireLog {
    pub fn new(kind: WireLogKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    pub fn with_request_body(mut self, enable: bool) -> Self {
        self.enable_request_body = enable;
        self
    }

    pub fn with_response_body(mut self, enable: bool) -> Self {
        self.enable_response_body = enable;
        self
    }

    /// Log an outbound bulk request.
    pub(crate) fn request(&self, method: &str, url: &str, body: &str) {
        debug!(target: WIRE_TARGET, "{}", self.render_request(method, url, body));
    }

    /// Log the response that came back.
    pub(crate) fn response(&self, status: u16, elapsed: Duration, body: &str) {
        debug!(target: WIRE_TARGET, "{}", self.render_response(status, elapsed, body));
    }

    /// Render a request event to a string. Pure, so it can be tested without
    /// wiring a subscriber.
    fn render_request(&self, method: &str, url: &str, body: &str) -> String {
        let body_field = self.enable_request_body.then_some(body);
        match self.kind {
            WireLogKind::Text => match body_field {
                Some(body) => format!("> {method} {url} ({} bytes)\n{body}", body.len()),
                None => format!("> {method} {url} ({} bytes)", body.len()),
            },
            WireLogKind::Color => match body_field {
                Some(body) => format!(
                    "{BOLD}> {method} {url}{RESET} {DIM}({} bytes){RESET}\n{body}",
                    body.len()
                ),
                None => format!(
                    "{BOLD}> {method} {url}{RESET} {DIM}({} bytes){RESET}",
                    body.len()
                ),
            },
            WireLogKind::Curl => {
                // A command someone can actually paste. Single quotes in the
                // body are the only thing that would break the quoting, so
                // they get the classic shell escape.
                let mut cmd = format!(
                    "curl -X {method} '{url}' -H 'Content-Type: application/x-ndjson'"
                );
                if let Some(body) = body_field {
                    let escaped = body.replace('\'', r"'\''");
                    cmd.push_str(&format!(" --data-binary '{escaped}'"));
                }
                cmd
            }
            WireLogKind::Json => serde_json::json!({
                "event": "request",
                "method": method,
                "url": url,
                "body_bytes": body.len(),
                "body": body_field,
            })
            .to_string(),
        }
    }

    /// Render a response event to a string.
    fn render_response(&self, status: u16, elapsed: Duration, body: &str) -> String {
        let body_field = self.enable_response_body.then_some(body);
        match self.kind {
            WireLogKind::Text => match body_field {
                Some(body) => format!("< {status} in {elapsed:?}\n{body}"),
                None => format!("< {status} in {elapsed:?}"),
            },
            WireLogKind::Color => match body_field {
                Some(body) => {
                    format!("{BOLD}< {status}{RESET} {DIM}in {elapsed:?}{RESET}\n{body}")
                }
                None => format!("{BOLD}< {status}{RESET} {DIM}in {elapsed:?}{RESET}"),
            },
            // There is no curl for a response; fall back to the text shape.
            WireLogKind::Curl => match body_field {
                Some(body) => format!("# <- {status} in {elapsed:?}\n{body}"),
                None => format!("# <- {status} in {elapsed:?}"),
            },
            WireLogKind::Json => serde_json::json!({
                "event": "response",
                "status": status,
                "elapsed_ms": elapsed.as_millis() as u64,
                "body": body_field,
            })
            .to_string(),
        }
    }
}
