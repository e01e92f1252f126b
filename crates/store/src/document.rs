//! Stored documents and the query model.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use granary_core::DocumentId;

/// A document as returned by the store.
///
/// `created_at` and `seq` are assigned by the store when the document is
/// first committed; `version` counts the writes applied to the document and
/// serves as the optimistic concurrency token for transactions.
///
/// `seq` is a store-wide monotonic counter. Commit timestamps can collide,
/// so ordered queries use `seq` as a tiebreaker; "created-at descending" is
/// therefore deterministic even for documents written in the same instant.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: DocumentId,
    pub payload: JsonValue,
    pub created_at: DateTime<Utc>,
    pub seq: u64,
    pub version: u64,
}

impl StoredDocument {
    /// Look up a top-level payload field.
    pub fn field(&self, name: &str) -> Option<&JsonValue> {
        self.payload.get(name)
    }
}

/// Sort direction for ordered queries.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// What an ordered query sorts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderKey {
    /// The store-assigned creation timestamp (with `seq` as tiebreaker).
    CreatedAt,
    /// A top-level payload field.
    Field(String),
}

/// A filtered, ordered multi-document query.
///
/// Deliberately minimal: one equality filter on a top-level payload field
/// plus one ordering key. Unordered queries return documents in `seq` order
/// (insertion order) so results are always deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    filter: Option<(String, JsonValue)>,
    order: Option<(OrderKey, Direction)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only documents whose payload field equals `value`.
    pub fn filter_eq(mut self, field: impl Into<String>, value: JsonValue) -> Self {
        self.filter = Some((field.into(), value));
        self
    }

    /// Order the result set.
    pub fn order_by(mut self, key: OrderKey, direction: Direction) -> Self {
        self.order = Some((key, direction));
        self
    }

    pub(crate) fn matches(&self, doc: &StoredDocument) -> bool {
        match &self.filter {
            None => true,
            Some((field, value)) => doc.field(field) == Some(value),
        }
    }

    pub(crate) fn sort(&self, docs: &mut [StoredDocument]) {
        match &self.order {
            None => docs.sort_by_key(|d| d.seq),
            Some((OrderKey::CreatedAt, dir)) => {
                docs.sort_by_key(|d| (d.created_at, d.seq));
                if *dir == Direction::Desc {
                    docs.reverse();
                }
            }
            Some((OrderKey::Field(name), dir)) => {
                docs.sort_by(|a, b| {
                    compare_values(a.field(name), b.field(name)).then(a.seq.cmp(&b.seq))
                });
                if *dir == Direction::Desc {
                    docs.reverse();
                }
            }
        }
    }
}

/// Total order over JSON field values, by type class then value.
///
/// Missing < Null < Bool < Number < String < everything else. Numbers compare
/// as f64; NaN never occurs for values serde_json accepts.
fn compare_values(a: Option<&JsonValue>, b: Option<&JsonValue>) -> core::cmp::Ordering {
    use core::cmp::Ordering;

    fn class(v: Option<&JsonValue>) -> u8 {
        match v {
            None => 0,
            Some(JsonValue::Null) => 1,
            Some(JsonValue::Bool(_)) => 2,
            Some(JsonValue::Number(_)) => 3,
            Some(JsonValue::String(_)) => 4,
            Some(_) => 5,
        }
    }

    match (a, b) {
        (Some(JsonValue::Bool(x)), Some(JsonValue::Bool(y))) => x.cmp(y),
        (Some(JsonValue::Number(x)), Some(JsonValue::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(JsonValue::String(x)), Some(JsonValue::String(y))) => x.cmp(y),
        _ => class(a).cmp(&class(b)),
    }
}
