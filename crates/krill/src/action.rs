//! 🎬 *[a document approaches the pipeline. it carries a small form.]*
//! *["operation?" asks the gate. "index?" "id, if applicable?"]*
//! *[the document hands over the form. the form is this module.]*
//!
//! 📦 Actions — the atomic unit of work in krill. One action, one document
//! mutation: index it, create it, partially update it, or delete it.
//!
//! 🧠 Knowledge graph:
//! - [`EsOperation`]: the four verbs the bulk API understands.
//! - [`Action`]: the object-safe trait producers implement. Boxed trait
//!   objects flow through every channel in the pipeline.
//! - [`StandardAction`]: the plain-struct implementation for callers who
//!   just want to fill in fields and go. Most callers. Basically all callers.
//! - [`validate`]: the ingress bouncer. Runs once, at `add_action`, before
//!   an action is allowed anywhere near the queue.
//!
//! ⚠️ Actions are immutable after submission. The queue owns them, then
//! exactly one worker owns them, then they are gone. No take-backs. 🦆

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// 📄 The document body type: a JSON object, keys to arbitrary values.
pub type DocBody = serde_json::Map<String, serde_json::Value>;

/// Boxed action as it travels the pipeline.
pub(crate) type BoxAction = Box<dyn Action>;

/// 🔨 The four things you can do to a document. There is no fifth thing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EsOperation {
    /// Upsert the full document.
    Index,
    /// Insert, fail if the id already exists. Requires an id.
    Create,
    /// Partial update. The body must wrap the changes in a `"doc"` envelope.
    Update,
    /// Remove by id. No body.
    Delete,
}

impl EsOperation {
    /// The operation string the bulk API expects as the meta-line key.
    pub fn as_str(self) -> &'static str {
        match self {
            EsOperation::Index => "index",
            EsOperation::Create => "create",
            EsOperation::Update => "update",
            EsOperation::Delete => "delete",
        }
    }
}

impl Default for EsOperation {
    fn default() -> Self {
        EsOperation::Index
    }
}

impl fmt::Display for EsOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 🎭 A document mutation, described by whoever produced it.
///
/// Object safe on purpose: the pipeline moves `Box<dyn Action>` around and
/// never cares what's behind the vtable. Implement this on your own type if
/// your actions are views over something you already have; otherwise use
/// [`StandardAction`] and save yourself the ceremony.
///
/// # Contract 📜
/// - `index` must be non-empty. The bouncer checks.
/// - `doc_type` and `id` are optional; `None` and `Some("")` are treated the
///   same way at the wire layer (absent).
/// - `doc` is the document body, or `None` for body-less operations (delete).
pub trait Action: Send + Sync + fmt::Debug {
    /// Which of the four verbs this action performs.
    fn operation(&self) -> EsOperation;
    /// Target index name.
    fn index(&self) -> &str;
    /// Optional mapping type. Version rules decide whether it hits the wire.
    fn doc_type(&self) -> Option<&str> {
        None
    }
    /// Optional document id.
    fn id(&self) -> Option<&str> {
        None
    }
    /// Optional document body.
    fn doc(&self) -> Option<&DocBody> {
        None
    }
}

/// 📦 The fill-in-the-fields action. No builder, no ceremony, just a struct.
///
/// ```
/// use krill::{EsOperation, StandardAction};
/// use serde_json::json;
///
/// let act = StandardAction {
///     op: EsOperation::Index,
///     index: "allan".into(),
///     id: Some("1700000000100".into()),
///     doc: json!({"field1": 200}).as_object().cloned(),
///     ..Default::default()
/// };
/// assert_eq!(act.index, "allan");
/// ```
#[derive(Debug, Clone, Default)]
pub struct StandardAction {
    pub op: EsOperation,
    pub index: String,
    pub doc_type: Option<String>,
    pub id: Option<String>,
    pub doc: Option<DocBody>,
}

impl Action for StandardAction {
    fn operation(&self) -> EsOperation {
        self.op
    }

    fn index(&self) -> &str {
        &self.index
    }

    fn doc_type(&self) -> Option<&str> {
        self.doc_type.as_deref()
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn doc(&self) -> Option<&DocBody> {
        self.doc.as_ref()
    }
}

/// 🚪 The ingress bouncer. Every action passes here exactly once, before it
/// is admitted to the queue. Anything rejected never reaches a worker.
///
/// Rules:
/// - `index` must be non-empty, always.
/// - CREATE without an id is a guaranteed cluster-side rejection, so it is
///   rejected here instead, while the producer is still around to hear it.
/// - UPDATE must carry the `{"doc": {...}}` envelope the partial-update API
///   requires. A bare body would 400 on every item in the batch.
pub(crate) fn validate(action: &dyn Action) -> Result<()> {
    if action.index().is_empty() {
        return Err(Error::InvalidAction("index must not be empty".into()));
    }

    match action.operation() {
        EsOperation::Create => {
            if action.id().map_or(true, str::is_empty) {
                return Err(Error::InvalidAction(
                    "create requires a non-empty document id".into(),
                ));
            }
        }
        EsOperation::Update => {
            let has_envelope = action.doc().map_or(false, |d| d.contains_key("doc"));
            if !has_envelope {
                return Err(Error::InvalidAction(
                    "update requires the body to wrap changes in a top-level \"doc\" key".into(),
                ));
            }
        }
        EsOperation::Index | EsOperation::Delete => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc_of(value: serde_json::Value) -> Option<DocBody> {
        value.as_object().cloned()
    }

    #[test]
    fn the_one_where_operations_know_their_wire_names() {
        assert_eq!(EsOperation::Index.as_str(), "index");
        assert_eq!(EsOperation::Create.as_str(), "create");
        assert_eq!(EsOperation::Update.as_str(), "update");
        assert_eq!(EsOperation::Delete.as_str(), "delete");
    }

    #[test]
    fn the_one_where_the_bouncer_checks_ids_at_the_door() {
        // 🧪 CREATE without an id: rejected before it wastes a network trip.
        let no_id = StandardAction {
            op: EsOperation::Create,
            index: "allan".into(),
            ..Default::default()
        };
        assert!(matches!(
            validate(&no_id),
            Err(Error::InvalidAction(_))
        ));

        // ✅ Same action with an id walks right in.
        let with_id = StandardAction {
            id: Some("doc-1".into()),
            ..no_id
        };
        assert!(validate(&with_id).is_ok());
    }

    #[test]
    fn the_one_where_update_needs_its_envelope() {
        // 🧪 A bare body on UPDATE is a guaranteed 400 per item downstream.
        let bare = StandardAction {
            op: EsOperation::Update,
            index: "allan".into(),
            doc: doc_of(json!({"field1": 100})),
            ..Default::default()
        };
        assert!(matches!(validate(&bare), Err(Error::InvalidAction(_))));

        // ✅ Wrapped in {"doc": ...} it passes.
        let wrapped = StandardAction {
            doc: doc_of(json!({"doc": {"field1": 100}})),
            ..bare
        };
        assert!(validate(&wrapped).is_ok());
    }

    #[test]
    fn the_one_where_an_empty_index_is_turned_away() {
        let nameless = StandardAction {
            op: EsOperation::Index,
            doc: doc_of(json!({"field1": 1})),
            ..Default::default()
        };
        assert!(matches!(validate(&nameless), Err(Error::InvalidAction(_))));
    }

    #[test]
    fn the_one_where_delete_travels_light() {
        // 🧪 DELETE has no body and that is fine.
        let bare_delete = StandardAction {
            op: EsOperation::Delete,
            index: "allan".into(),
            id: Some("doc-9".into()),
            ..Default::default()
        };
        assert!(validate(&bare_delete).is_ok());
        assert!(bare_delete.doc().is_none());
    }
}
