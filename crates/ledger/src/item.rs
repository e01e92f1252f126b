//! Ledger-tracked perishable inventory items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use granary_core::{DocumentId, DomainError, DomainResult, Entity};
use granary_store::StoredDocument;

/// Perishable item identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PerishableItemId(pub DocumentId);

impl PerishableItemId {
    pub fn new(id: DocumentId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PerishableItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// A perishable inventory line whose stock count is ledger-tracked.
///
/// Invariant: `current_stock` equals the initial recorded stock plus the
/// signed sum of `change` across all undeleted logs referencing this item.
/// The field is only ever written through the ledger operations; the typed
/// patch deliberately cannot reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerishableItem {
    pub id: PerishableItemId,
    pub name: String,
    pub current_stock: i64,
    pub expiry_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Entity for PerishableItem {
    type Id = PerishableItemId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

/// Stored payload shape (identity and creation time are store metadata).
#[derive(Debug, Serialize, Deserialize)]
struct PerishableItemPayload {
    name: String,
    current_stock: i64,
    expiry_date: Option<DateTime<Utc>>,
}

impl PerishableItem {
    pub fn from_document(doc: &StoredDocument) -> DomainResult<Self> {
        let payload: PerishableItemPayload = serde_json::from_value(doc.payload.clone())
            .map_err(|e| DomainError::unavailable(format!("malformed item document: {e}")))?;
        Ok(Self {
            id: PerishableItemId(doc.id),
            name: payload.name,
            current_stock: payload.current_stock,
            expiry_date: payload.expiry_date,
            created_at: doc.created_at,
        })
    }
}

/// Fields for a new perishable item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPerishableItem {
    pub name: String,
    pub initial_stock: i64,
    pub expiry_date: Option<DateTime<Utc>>,
}

impl NewPerishableItem {
    pub(crate) fn to_payload(&self) -> JsonValue {
        serde_json::json!({
            "name": self.name,
            "current_stock": self.initial_stock,
            "expiry_date": self.expiry_date,
        })
    }
}

/// Typed partial update for a perishable item.
///
/// Enumerates the only fields a generic edit is permitted to touch. There is
/// intentionally no way to express a `current_stock` write here; quantity
/// changes go through `InventoryLedger::adjust_stock`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PerishableItemPatch {
    pub name: Option<String>,
    /// `Some(None)` clears the expiry date.
    pub expiry_date: Option<Option<DateTime<Utc>>>,
}

impl PerishableItemPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.expiry_date.is_none()
    }

    pub(crate) fn to_fields(&self) -> JsonValue {
        let mut fields = serde_json::Map::new();
        if let Some(name) = &self.name {
            fields.insert("name".to_string(), JsonValue::String(name.clone()));
        }
        if let Some(expiry) = &self.expiry_date {
            let value = serde_json::to_value(expiry).unwrap_or(JsonValue::Null);
            fields.insert("expiry_date".to_string(), value);
        }
        JsonValue::Object(fields)
    }
}
