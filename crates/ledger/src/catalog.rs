//! Plain (untracked) stock catalog.
//!
//! Catalog lines have no log trail: fields, including the stock count, are
//! edited directly through a typed patch. The typed patch still enumerates
//! exactly the fields an edit may touch, so nothing outside this module can
//! smuggle arbitrary fields into storage.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use granary_core::{DocumentId, DomainError, DomainResult, Entity};
use granary_store::{Direction, DocumentStore, OrderKey, Query, StoredDocument};

use crate::watch::{Subscription, WatcherRegistry};

pub(crate) const STOCK_ITEMS: &str = "stock_items";

/// Catalog item identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StockItemId(pub DocumentId);

impl StockItemId {
    pub fn new(id: DocumentId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for StockItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// A generic inventory line: name, category, unit prices in two currencies
/// plus wholesale/retail, and a directly-edited stock count.
#[derive(Debug, Clone, PartialEq)]
pub struct StockItem {
    pub id: StockItemId,
    pub name: String,
    pub category: String,
    pub cost_kip: f64,
    pub cost_baht: f64,
    pub wholesale_price: f64,
    pub retail_price: f64,
    pub current_stock: i64,
}

impl Entity for StockItem {
    type Id = StockItemId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StockItemPayload {
    name: String,
    category: String,
    cost_kip: f64,
    cost_baht: f64,
    wholesale_price: f64,
    retail_price: f64,
    current_stock: i64,
}

impl StockItem {
    pub fn from_document(doc: &StoredDocument) -> DomainResult<Self> {
        let payload: StockItemPayload = serde_json::from_value(doc.payload.clone())
            .map_err(|e| DomainError::unavailable(format!("malformed stock item document: {e}")))?;
        Ok(Self {
            id: StockItemId(doc.id),
            name: payload.name,
            category: payload.category,
            cost_kip: payload.cost_kip,
            cost_baht: payload.cost_baht,
            wholesale_price: payload.wholesale_price,
            retail_price: payload.retail_price,
            current_stock: payload.current_stock,
        })
    }
}

/// Fields for a new catalog line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewStockItem {
    pub name: String,
    pub category: String,
    pub cost_kip: f64,
    pub cost_baht: f64,
    pub wholesale_price: f64,
    pub retail_price: f64,
    pub current_stock: i64,
}

/// Typed partial update for a catalog line.
///
/// Unlike the ledger-tracked items, `current_stock` is patchable here: no
/// log trail exists to keep consistent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StockItemPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_kip: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_baht: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wholesale_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retail_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_stock: Option<i64>,
}

impl StockItemPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.category.is_none()
            && self.cost_kip.is_none()
            && self.cost_baht.is_none()
            && self.wholesale_price.is_none()
            && self.retail_price.is_none()
            && self.current_stock.is_none()
    }

    fn to_fields(&self) -> DomainResult<JsonValue> {
        serde_json::to_value(self)
            .map_err(|e| DomainError::validation(format!("unserializable patch: {e}")))
    }
}

/// Catalog service over a document store.
pub struct StockCatalog<S> {
    store: S,
    watchers: WatcherRegistry<(), StockItem>,
}

impl<S: DocumentStore> StockCatalog<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            watchers: WatcherRegistry::new(),
        }
    }

    pub fn add_item(&self, new: &NewStockItem) -> DomainResult<StockItemId> {
        if new.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        let payload = serde_json::to_value(new)
            .map_err(|e| DomainError::validation(format!("unserializable item: {e}")))?;
        let doc = self.store.insert(STOCK_ITEMS, payload)?;
        let id = StockItemId(doc.id);

        debug!(item = %id, "catalog item added");
        self.notify_watchers()?;
        Ok(id)
    }

    pub fn update_item(&self, item_id: StockItemId, patch: &StockItemPatch) -> DomainResult<()> {
        if patch.is_empty() {
            return Ok(());
        }
        self.store.patch(STOCK_ITEMS, item_id.0, patch.to_fields()?)?;

        debug!(item = %item_id, "catalog item updated");
        self.notify_watchers()
    }

    pub fn delete_item(&self, item_id: StockItemId) -> DomainResult<()> {
        self.store.delete(STOCK_ITEMS, item_id.0)?;

        debug!(item = %item_id, "catalog item deleted");
        self.notify_watchers()
    }

    pub fn get_item(&self, item_id: StockItemId) -> DomainResult<Option<StockItem>> {
        match self.store.get(STOCK_ITEMS, item_id.0)? {
            Some(doc) => Ok(Some(StockItem::from_document(&doc)?)),
            None => Ok(None),
        }
    }

    /// All catalog lines, ordered by name.
    pub fn list_items(&self) -> DomainResult<Vec<StockItem>> {
        let docs = self.store.query(
            STOCK_ITEMS,
            &Query::new().order_by(OrderKey::Field("name".to_string()), Direction::Asc),
        )?;
        docs.iter().map(StockItem::from_document).collect()
    }

    /// Observe the catalog; fires with the current snapshot immediately and
    /// after every successful mutation.
    pub fn watch_items(
        &self,
        callback: impl Fn(&[StockItem]) + Send + Sync + 'static,
    ) -> DomainResult<Subscription> {
        let snapshot = self.list_items()?;
        callback(&snapshot);
        Ok(self.watchers.register((), callback))
    }

    fn notify_watchers(&self) -> DomainResult<()> {
        if !self.watchers.is_empty() {
            let items = self.list_items()?;
            self.watchers.notify(&(), &items);
        }
        Ok(())
    }
}
