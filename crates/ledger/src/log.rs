//! Stock movement log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use granary_core::{DocumentId, DomainError, DomainResult, Entity};
use granary_store::StoredDocument;

use crate::item::PerishableItemId;

/// Log entry identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogId(pub DocumentId);

impl LogId {
    pub fn new(id: DocumentId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for LogId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Kind of a stock movement.
///
/// Informational for `adjust_stock` (the caller passes a signed delta), but
/// load-bearing for `update_log`: an edited magnitude is re-signed from the
/// entry's immutable kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogKind {
    StockIn,
    Sale,
}

impl LogKind {
    /// Coerce a magnitude to this kind's sign: sales subtract, everything
    /// else adds.
    pub fn signed(self, magnitude: i64) -> i64 {
        match self {
            LogKind::Sale => -magnitude.abs(),
            LogKind::StockIn => magnitude.abs(),
        }
    }
}

/// One recorded stock change.
///
/// `new_stock` is the item's stock immediately after this entry was written;
/// it is a snapshot, not a derived value, and `update_log` patches it
/// relative to the edit rather than recomputing history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockLog {
    pub id: LogId,
    pub item_id: PerishableItemId,
    pub change: i64,
    pub new_stock: i64,
    pub kind: LogKind,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

impl Entity for StockLog {
    type Id = LogId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

/// Stored payload shape (identity and creation time are store metadata).
#[derive(Debug, Serialize, Deserialize)]
struct StockLogPayload {
    item_id: PerishableItemId,
    change: i64,
    new_stock: i64,
    kind: LogKind,
    detail: String,
}

impl StockLog {
    pub fn from_document(doc: &StoredDocument) -> DomainResult<Self> {
        let payload: StockLogPayload = serde_json::from_value(doc.payload.clone())
            .map_err(|e| DomainError::unavailable(format!("malformed log document: {e}")))?;
        Ok(Self {
            id: LogId(doc.id),
            item_id: payload.item_id,
            change: payload.change,
            new_stock: payload.new_stock,
            kind: payload.kind,
            detail: payload.detail,
            created_at: doc.created_at,
        })
    }
}
