//! 🎬 COLD OPEN — INT. BULK ENDPOINT — LOADING DOCK — 2:00 AM
//!
//! A payload arrives. Newline-delimited, as demanded. Meta line, doc line,
//! meta line, doc line. The dock inspector reads each pair, nods, and files
//! the documents away. One of them bounces. The inspector writes `"status":
//! 409` on a little slip and sends the slip back. Nobody apologizes.
//!
//! 📡 This module owns both directions of the bulk wire format:
//! - [`frame`] turns a batch of actions into the NDJSON request body, with
//!   the version-dependent `_type` rules applied per meta line.
//! - [`BulkResponse`] and friends decode the answer and count the slips.
//!
//! 🧠 Knowledge graph:
//! - Meta line: `{"<op>":{"_index":...[,"_type":...][,"_id":...]}}` — field
//!   order is fixed, values are JSON-escaped individually.
//! - Doc line: the serialized body, present only when the body is non-empty.
//! - `_type` by version: ES5 always (default `"doc"`), ES6 only when given
//!   (the request-level `type=_doc` parameter covers the default — that part
//!   lives in the proxy), ES7 only when given.
//! - Counting: a populated item branch with status > 299 is a failure,
//!   any other populated branch is a success. 299, not 201 — the cutoff
//!   follows HTTP, and 2xx means the cluster said yes.
//!
//! ⚠️ The trailing newline on the whole body matters. It has always
//! mattered. It will matter after the heat death of the universe. 🦆

use serde::Deserialize;

use crate::action::{Action, BoxAction};
use crate::config::EsVersion;
use crate::error::{Error, Result};

/// Default mapping type for ES6/ES7 clusters.
pub(crate) const DEFAULT_DOC_TYPE: &str = "_doc";
/// Default mapping type for ES5 clusters, which predate the underscore.
pub(crate) const DEFAULT_V5_DOC_TYPE: &str = "doc";

/// 📦 Frame a batch of actions into the NDJSON bulk request body.
///
/// One meta line per action, one doc line per action that has a non-empty
/// body, every line LF-terminated. Errors on an empty batch — callers with
/// nothing to say should not be calling the framer. (The proxy short-circuits
/// that case before it gets here.)
pub(crate) fn frame(version: EsVersion, acts: &[BoxAction]) -> Result<String> {
    if acts.is_empty() {
        return Err(Error::EmptyPayload);
    }

    // Rough guess: a meta line plus a smallish doc per action. The payload
    // grows past this for fat documents; that's what `String` is for.
    let mut payload = String::with_capacity(acts.len() * 128);
    for act in acts {
        meta_line(&mut payload, version, act.as_ref())?;
        payload.push('\n');

        if let Some(doc) = act.doc() {
            if !doc.is_empty() {
                payload.push_str(&serde_json::to_string(doc)?);
                payload.push('\n');
            }
        }
    }
    Ok(payload)
}

/// 🏷️ Append one meta line: `{"<op>":{"_index":...,"_type":...,"_id":...}}`.
///
/// Built by hand rather than through a map because the field order on the
/// wire is fixed (`_index`, `_type`, `_id`) and a sorted map would shuffle
/// it. Every value still goes through the JSON serializer for escaping;
/// nobody gets to smuggle a quote character into the meta line.
fn meta_line(out: &mut String, version: EsVersion, act: &dyn Action) -> Result<()> {
    // Empty-string doc types and ids are treated as absent, same as None.
    let explicit_type = act.doc_type().filter(|t| !t.is_empty());
    let doc_type = match version {
        // ES5 insists on a _type for every action.
        EsVersion::V5 => explicit_type.or(Some(DEFAULT_V5_DOC_TYPE)),
        // ES6 gets the default via a request-level parameter instead;
        // ES7 defaults server-side. Both only carry _type when given.
        EsVersion::V6 | EsVersion::V7 => explicit_type,
    };

    out.push('{');
    out.push_str(&serde_json::to_string(act.operation().as_str())?);
    out.push_str(":{\"_index\":");
    out.push_str(&serde_json::to_string(act.index())?);
    if let Some(doc_type) = doc_type {
        out.push_str(",\"_type\":");
        out.push_str(&serde_json::to_string(doc_type)?);
    }
    if let Some(id) = act.id().filter(|id| !id.is_empty()) {
        out.push_str(",\"_id\":");
        out.push_str(&serde_json::to_string(id)?);
    }
    out.push_str("}}");
    Ok(())
}

// ===== Response side =====

/// 🔍 The innermost `caused_by` object on a failed item.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct BulkItemCause {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub reason: String,
}

/// 💥 The error object attached to a failed item.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct BulkItemError {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default, rename = "caused_by")]
    pub cause: BulkItemCause,
}

/// 📋 The per-item status record inside one operation branch.
///
/// A zero `status` means the branch was absent from the response — the
/// cluster populates exactly one branch per item and this struct's
/// `Default` stands in for the other three.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct BulkItemStatus {
    #[serde(default, rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub error: BulkItemError,
}

/// 🎭 One response item: four branches, exactly one of them real.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct BulkItem {
    #[serde(default)]
    pub index: BulkItemStatus,
    #[serde(default)]
    pub create: BulkItemStatus,
    #[serde(default)]
    pub update: BulkItemStatus,
    #[serde(default)]
    pub delete: BulkItemStatus,
}

impl BulkItem {
    /// The populated branch, tagged with its operation name. `None` when the
    /// item somehow has no populated branch at all (it contributes nothing).
    pub fn populated(&self) -> Option<(&'static str, &BulkItemStatus)> {
        if self.index.status != 0 {
            Some(("index", &self.index))
        } else if self.create.status != 0 {
            Some(("create", &self.create))
        } else if self.update.status != 0 {
            Some(("update", &self.update))
        } else if self.delete.status != 0 {
            Some(("delete", &self.delete))
        } else {
            None
        }
    }
}

/// 📊 The decoded bulk response: an `errors` flag and the per-item slips.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct BulkResponse {
    #[serde(default)]
    pub errors: bool,
    #[serde(default)]
    pub items: Vec<BulkItem>,
}

impl BulkResponse {
    /// 🔢 Count (success, fail) across all items.
    ///
    /// For each item: find the populated branch; status above 299 is a
    /// failure, any other populated status is a success. Items with no
    /// populated branch contribute to neither column.
    pub fn count(&self) -> (usize, usize) {
        let mut success = 0;
        let mut fail = 0;
        for item in &self.items {
            if let Some((_, status)) = item.populated() {
                if status.status > 299 {
                    fail += 1;
                } else {
                    success += 1;
                }
            }
        }
        (success, fail)
    }

    /// 📉 Aggregate the failed items into one error, grouped per operation.
    ///
    /// Returns `None` when every item landed. The error message is a JSON
    /// rendering of `{op: [{id, status, type, reason, caused_by_*}, ...]}` —
    /// dense, but it's the whole story in one log line.
    pub fn result_error(&self) -> Option<Error> {
        let mut grouped = serde_json::Map::new();
        for item in &self.items {
            let Some((op, status)) = item.populated() else {
                continue;
            };
            if status.status <= 299 {
                continue;
            }
            let entry = serde_json::json!({
                "id": status.id,
                "status": status.status,
                "type": status.error.kind,
                "reason": status.error.reason,
                "caused_by_type": status.error.cause.kind,
                "caused_by_reason": status.error.cause.reason,
            });
            if let Some(list) = grouped
                .entry(op.to_string())
                .or_insert_with(|| serde_json::Value::Array(Vec::new()))
                .as_array_mut()
            {
                list.push(entry);
            }
        }

        if grouped.is_empty() {
            None
        } else {
            Some(Error::ItemFailures(
                serde_json::Value::Object(grouped).to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{EsOperation, StandardAction};
    use serde_json::json;

    fn boxed(act: StandardAction) -> BoxAction {
        Box::new(act)
    }

    fn item(op: EsOperation, status: u16) -> BulkItem {
        let slot = BulkItemStatus {
            status,
            ..Default::default()
        };
        let mut item = BulkItem::default();
        match op {
            EsOperation::Index => item.index = slot,
            EsOperation::Create => item.create = slot,
            EsOperation::Update => item.update = slot,
            EsOperation::Delete => item.delete = slot,
        }
        item
    }

    #[test]
    fn the_one_where_v6_skips_the_type_field() {
        // 🧪 ES6 without an explicit doc type: the meta line stays lean and
        // the request-level parameter (proxy's job) carries the default.
        let acts = vec![boxed(StandardAction {
            op: EsOperation::Index,
            index: "allan".into(),
            id: Some("1700000000100".into()),
            doc: json!({"field1": 200, "field2": "index-default"})
                .as_object()
                .cloned(),
            ..Default::default()
        })];

        let payload = frame(EsVersion::V6, &acts).expect("framing a valid action");
        let mut lines = payload.lines();
        assert_eq!(
            lines.next(),
            Some(r#"{"index":{"_index":"allan","_id":"1700000000100"}}"#)
        );
        // Doc line follows, and the body ends with a newline.
        assert!(lines.next().is_some());
        assert!(payload.ends_with('\n'));
    }

    #[test]
    fn the_one_where_v5_demands_a_type_and_gets_doc() {
        // 🧪 Same action, ES5 cluster: _type materializes with the old default.
        let acts = vec![boxed(StandardAction {
            op: EsOperation::Index,
            index: "allan".into(),
            id: Some("1700000000100".into()),
            doc: json!({"field1": 200}).as_object().cloned(),
            ..Default::default()
        })];

        let payload = frame(EsVersion::V5, &acts).expect("framing a valid action");
        assert_eq!(
            payload.lines().next(),
            Some(r#"{"index":{"_index":"allan","_type":"doc","_id":"1700000000100"}}"#)
        );
    }

    #[test]
    fn the_one_where_an_explicit_type_rides_along_on_every_version() {
        let act = StandardAction {
            op: EsOperation::Create,
            index: "allan".into(),
            doc_type: Some("mycustom".into()),
            id: Some("7".into()),
            ..Default::default()
        };
        for version in [EsVersion::V5, EsVersion::V6, EsVersion::V7] {
            let payload =
                frame(version, &[boxed(act.clone())]).expect("framing a valid action");
            assert_eq!(
                payload.trim_end(),
                r#"{"create":{"_index":"allan","_type":"mycustom","_id":"7"}}"#,
                "explicit doc types must survive {version:?}"
            );
        }
    }

    #[test]
    fn the_one_where_delete_is_just_a_meta_line() {
        // 🧪 No body, no doc line. One line per delete, that's the deal.
        let acts = vec![boxed(StandardAction {
            op: EsOperation::Delete,
            index: "allan".into(),
            id: Some("gone".into()),
            ..Default::default()
        })];
        let payload = frame(EsVersion::V7, &acts).expect("framing a valid action");
        assert_eq!(payload.lines().count(), 1);
        assert_eq!(
            payload.trim_end(),
            r#"{"delete":{"_index":"allan","_id":"gone"}}"#
        );
    }

    #[test]
    fn the_one_where_the_framer_refuses_an_empty_batch() {
        assert!(matches!(
            frame(EsVersion::V6, &[]),
            Err(Error::EmptyPayload)
        ));
    }

    #[test]
    fn the_one_where_spicy_index_names_get_escaped() {
        // 🧪 A quote in an index name must not break the meta line.
        let acts = vec![boxed(StandardAction {
            op: EsOperation::Index,
            index: r#"we"ird"#.into(),
            ..Default::default()
        })];
        let payload = frame(EsVersion::V7, &acts).expect("framing a valid action");
        let meta: serde_json::Value =
            serde_json::from_str(payload.trim_end()).expect("meta line is valid JSON");
        assert_eq!(meta["index"]["_index"], r#"we"ird"#);
    }

    #[test]
    fn the_one_where_framing_round_trips_through_a_parser() {
        // 🧪 Frame a mixed batch, then parse it back line by line and verify
        // op, index, type, id, and body all survive the trip.
        let acts: Vec<BoxAction> = vec![
            boxed(StandardAction {
                op: EsOperation::Create,
                index: "allan".into(),
                doc_type: Some("mycustom".into()),
                id: Some("a".into()),
                doc: json!({"field1": 100, "field2": "create"}).as_object().cloned(),
                ..Default::default()
            }),
            boxed(StandardAction {
                op: EsOperation::Update,
                index: "allan".into(),
                id: Some("b".into()),
                doc: json!({"doc": {"field1": 500}}).as_object().cloned(),
                ..Default::default()
            }),
            boxed(StandardAction {
                op: EsOperation::Delete,
                index: "allan".into(),
                id: Some("c".into()),
                ..Default::default()
            }),
        ];

        let payload = frame(EsVersion::V6, &acts).expect("framing a valid batch");
        let mut lines = payload.lines();
        let ops = ["create", "update", "delete"];
        let mut seen = Vec::new();

        while let Some(line) = lines.next() {
            let meta: serde_json::Value =
                serde_json::from_str(line).expect("meta line parses");
            let op = ops
                .iter()
                .find(|op| meta.get(**op).is_some())
                .expect("meta line names a known op");
            let inner = &meta[*op];
            seen.push((
                *op,
                inner["_index"].as_str().map(str::to_owned),
                inner["_id"].as_str().map(str::to_owned),
            ));
            // A doc line follows unless the next line is another meta line
            // (or the payload ended, as it does after delete).
            if *op != "delete" {
                let doc_line = lines.next().expect("doc line follows");
                let _: serde_json::Value =
                    serde_json::from_str(doc_line).expect("doc line parses");
            }
        }

        assert_eq!(
            seen,
            vec![
                ("create", Some("allan".into()), Some("a".into())),
                ("update", Some("allan".into()), Some("b".into())),
                ("delete", Some("allan".into()), Some("c".into())),
            ]
        );
    }

    #[test]
    fn the_one_where_the_count_matches_the_ledger() {
        // 🧪 The canonical mixed response: six landings, two bounces.
        let response = BulkResponse {
            errors: true,
            items: vec![
                item(EsOperation::Index, 200),
                item(EsOperation::Index, 200),
                item(EsOperation::Update, 500),
                item(EsOperation::Update, 200),
                item(EsOperation::Create, 200),
                item(EsOperation::Create, 400),
                item(EsOperation::Create, 201),
                item(EsOperation::Delete, 201),
            ],
        };
        assert_eq!(response.count(), (6, 2));
    }

    #[test]
    fn the_one_where_an_empty_response_counts_nothing() {
        assert_eq!(BulkResponse::default().count(), (0, 0));
        assert!(BulkResponse::default().result_error().is_none());
    }

    #[test]
    fn the_one_where_299_is_the_last_acceptable_status() {
        // 🧪 The fence sits exactly between 299 and 300.
        let response = BulkResponse {
            errors: true,
            items: vec![item(EsOperation::Index, 299), item(EsOperation::Index, 300)],
        };
        assert_eq!(response.count(), (1, 1));
    }

    #[test]
    fn the_one_where_failures_get_rolled_into_one_report() {
        let mut failed = item(EsOperation::Update, 409);
        failed.update.id = "doc-1".into();
        failed.update.error = BulkItemError {
            kind: "version_conflict_engine_exception".into(),
            reason: "somebody got there first".into(),
            cause: BulkItemCause {
                kind: "engine_exception".into(),
                reason: "deeper trouble".into(),
            },
        };
        let response = BulkResponse {
            errors: true,
            items: vec![item(EsOperation::Index, 200), failed],
        };

        let err = response.result_error().expect("a failure must aggregate");
        let text = err.to_string();
        assert!(text.contains("update"));
        assert!(text.contains("doc-1"));
        assert!(text.contains("version_conflict_engine_exception"));
        assert!(text.contains("deeper trouble"));
    }

    #[test]
    fn the_one_where_the_response_body_decodes_from_real_json() {
        // 🧪 Decode an actual response shape, absent branches and all.
        let body = json!({
            "errors": true,
            "items": [
                {"index": {"_id": "1", "result": "created", "status": 201}},
                {"delete": {"_id": "2", "status": 404, "error": {
                    "type": "not_found", "reason": "gone already",
                    "caused_by": {"type": "shard", "reason": "missing"}
                }}}
            ]
        });
        let decoded: BulkResponse =
            serde_json::from_value(body).expect("decoding a bulk response");
        assert_eq!(decoded.count(), (1, 1));
        assert_eq!(decoded.items[0].index.result, "created");
        assert_eq!(decoded.items[1].delete.error.cause.kind, "shard");
        // The other branches stay zero-valued.
        assert_eq!(decoded.items[0].create.status, 0);
    }
}
