//! The inventory ledger.
//!
//! Owns the stock-quantity invariant across item and log records. Every
//! quantity-changing operation runs as one atomic unit against the store, so
//! a concurrent adjustment can never act on a stale stock count: the store's
//! transaction retries on conflict, and the bounded retry surfaces as
//! `Conflict` when contention persists.

use serde_json::{Value as JsonValue, json};
use tracing::{debug, warn};

use granary_core::{DocumentId, DomainError, DomainResult};
use granary_store::{Direction, DocumentStore, OrderKey, Query, WriteBatch};

use crate::item::{NewPerishableItem, PerishableItem, PerishableItemId, PerishableItemPatch};
use crate::log::{LogId, LogKind, StockLog};
use crate::watch::{Subscription, WatcherRegistry};

pub(crate) const ITEMS: &str = "perishable_items";
pub(crate) const LOGS: &str = "stock_logs";

fn id_value(id: DocumentId) -> JsonValue {
    JsonValue::String(id.to_string())
}

/// Ledger over a document store.
///
/// Generic over the store so tests run against `InMemoryStore` and a real
/// backend slots in unchanged (an `Arc<S>` works too).
pub struct InventoryLedger<S> {
    store: S,
    item_watchers: WatcherRegistry<Option<PerishableItemId>, PerishableItem>,
    log_watchers: WatcherRegistry<Option<PerishableItemId>, StockLog>,
}

impl<S: DocumentStore> InventoryLedger<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            item_watchers: WatcherRegistry::new(),
            log_watchers: WatcherRegistry::new(),
        }
    }

    /// Create an item; a positive initial stock also writes the synthetic
    /// `stock-in` log in the same atomic batch, so the invariant holds from
    /// birth (an item can never exist with stock but no corroborating log).
    pub fn create_item(&self, new: &NewPerishableItem) -> DomainResult<PerishableItemId> {
        if new.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if new.initial_stock < 0 {
            return Err(DomainError::validation("initial stock cannot be negative"));
        }

        let item_id = PerishableItemId::new(DocumentId::new());
        let mut batch = WriteBatch::new();
        batch.set(ITEMS, item_id.0, new.to_payload());
        if new.initial_stock > 0 {
            let log_id = LogId::new(DocumentId::new());
            batch.set(
                LOGS,
                log_id.0,
                json!({
                    "item_id": item_id,
                    "change": new.initial_stock,
                    "new_stock": new.initial_stock,
                    "kind": LogKind::StockIn,
                    "detail": "Initial stock",
                }),
            );
        }
        self.store.commit_batch(batch)?;

        debug!(item = %item_id, initial_stock = new.initial_stock, "item created");
        self.notify_watchers()?;
        Ok(item_id)
    }

    /// Apply a signed stock delta and append the corresponding log entry.
    ///
    /// `kind` is informational here; the caller passes the signed `change`
    /// (sales negative by convention). Fails with `InvariantViolation` and
    /// zero side effects when the result would be negative, and with
    /// `NotFound` when the item does not exist.
    pub fn adjust_stock(
        &self,
        item_id: PerishableItemId,
        change: i64,
        kind: LogKind,
        detail: &str,
    ) -> DomainResult<()> {
        // Pre-generated so retried attempts reuse the same log identity.
        let log_id = LogId::new(DocumentId::new());

        self.store.run_transaction(|txn| -> DomainResult<()> {
            let doc = txn.get(ITEMS, item_id.0)?.ok_or(DomainError::NotFound)?;
            let item = PerishableItem::from_document(&doc)?;

            let new_stock = item.current_stock + change;
            if new_stock < 0 {
                return Err(DomainError::invariant(format!(
                    "stock cannot go negative (current {}, change {change})",
                    item.current_stock
                )));
            }

            txn.patch(ITEMS, item_id.0, json!({ "current_stock": new_stock }));
            txn.set(
                LOGS,
                log_id.0,
                json!({
                    "item_id": item_id,
                    "change": change,
                    "new_stock": new_stock,
                    "kind": kind,
                    "detail": detail,
                }),
            );
            Ok(())
        })?;

        debug!(item = %item_id, change, kind = ?kind, "stock adjusted");
        self.notify_watchers()
    }

    /// Edit a log's magnitude and detail, retroactively correcting the item.
    ///
    /// The new magnitude is re-signed from the log's immutable kind (`sale`
    /// entries stay non-positive, others non-negative); the item's stock and
    /// the log's recorded snapshot both move by `signed - old_change`. The
    /// snapshot is relative-patched rather than recomputed, which assumes the
    /// original snapshot was correct.
    pub fn update_log(
        &self,
        log_id: LogId,
        item_id: PerishableItemId,
        new_change: i64,
        new_detail: &str,
    ) -> DomainResult<()> {
        self.store.run_transaction(|txn| -> DomainResult<()> {
            let doc = txn.get(LOGS, log_id.0)?.ok_or(DomainError::NotFound)?;
            let log = StockLog::from_document(&doc)?;

            let signed = log.kind.signed(new_change);
            let difference = signed - log.change;

            txn.increment(ITEMS, item_id.0, "current_stock", difference);
            txn.patch(LOGS, log_id.0, json!({ "change": signed, "detail": new_detail }));
            txn.increment(LOGS, log_id.0, "new_stock", difference);
            Ok(())
        })?;

        debug!(log = %log_id, item = %item_id, "log updated");
        self.notify_watchers()
    }

    /// Delete a log, reversing its contribution to the item's stock.
    ///
    /// Reversals of historical entries are exempt from the live
    /// non-negativity rule (correcting a bogus entry must stay possible even
    /// when the stock has since been consumed); a reversal that takes stock
    /// negative is logged rather than blocked.
    pub fn delete_log(&self, log_id: LogId, item_id: PerishableItemId) -> DomainResult<()> {
        self.store.run_transaction(|txn| -> DomainResult<()> {
            let log_doc = txn.get(LOGS, log_id.0)?.ok_or(DomainError::NotFound)?;
            let log = StockLog::from_document(&log_doc)?;
            let item_doc = txn.get(ITEMS, item_id.0)?.ok_or(DomainError::NotFound)?;
            let item = PerishableItem::from_document(&item_doc)?;

            let reversed = item.current_stock - log.change;
            if reversed < 0 {
                warn!(item = %item_id, log = %log_id, reversed, "log reversal drives stock negative");
            }

            txn.increment(ITEMS, item_id.0, "current_stock", -log.change);
            txn.delete(LOGS, log_id.0);
            Ok(())
        })?;

        debug!(log = %log_id, item = %item_id, "log deleted");
        self.notify_watchers()
    }

    /// Delete an item and every log referencing it, all-or-nothing.
    ///
    /// Runs as a transaction whose query footprint covers the item's log
    /// set: a concurrent `adjust_stock` that appends a log mid-delete
    /// invalidates the commit and the cascade retries against the new state.
    /// No orphan log can survive and no stock can be resurrected.
    pub fn delete_item(&self, item_id: PerishableItemId) -> DomainResult<()> {
        let filter = Query::new().filter_eq("item_id", id_value(item_id.0));

        self.store.run_transaction(|txn| -> DomainResult<()> {
            txn.get(ITEMS, item_id.0)?.ok_or(DomainError::NotFound)?;
            let logs = txn.query(LOGS, &filter)?;
            for log in &logs {
                txn.delete(LOGS, log.id);
            }
            txn.delete(ITEMS, item_id.0);
            Ok(())
        })?;

        debug!(item = %item_id, "item deleted with cascading logs");
        self.notify_watchers()
    }

    /// Patch item metadata. The patch type cannot express a stock write;
    /// quantity changes must go through [`Self::adjust_stock`].
    pub fn update_item(
        &self,
        item_id: PerishableItemId,
        patch: &PerishableItemPatch,
    ) -> DomainResult<()> {
        if patch.is_empty() {
            return Ok(());
        }
        self.store.patch(ITEMS, item_id.0, patch.to_fields())?;

        debug!(item = %item_id, "item metadata updated");
        self.notify_watchers()
    }

    pub fn get_item(&self, item_id: PerishableItemId) -> DomainResult<Option<PerishableItem>> {
        match self.store.get(ITEMS, item_id.0)? {
            Some(doc) => Ok(Some(PerishableItem::from_document(&doc)?)),
            None => Ok(None),
        }
    }

    /// All items, newest first.
    pub fn list_items(&self) -> DomainResult<Vec<PerishableItem>> {
        let docs = self.store.query(
            ITEMS,
            &Query::new().order_by(OrderKey::CreatedAt, Direction::Desc),
        )?;
        docs.iter().map(PerishableItem::from_document).collect()
    }

    /// Logs for one item, newest first.
    pub fn list_logs(&self, item_id: PerishableItemId) -> DomainResult<Vec<StockLog>> {
        let docs = self.store.query(
            LOGS,
            &Query::new()
                .filter_eq("item_id", id_value(item_id.0))
                .order_by(OrderKey::CreatedAt, Direction::Desc),
        )?;
        docs.iter().map(StockLog::from_document).collect()
    }

    /// Every log in the ledger, newest first. Aggregates (e.g. month-to-date
    /// totals) are derived by the caller from this raw stream.
    pub fn list_all_logs(&self) -> DomainResult<Vec<StockLog>> {
        let docs = self.store.query(
            LOGS,
            &Query::new().order_by(OrderKey::CreatedAt, Direction::Desc),
        )?;
        docs.iter().map(StockLog::from_document).collect()
    }

    /// Observe the full item list; the callback fires with the current
    /// snapshot immediately and again after every successful mutation.
    pub fn watch_items(
        &self,
        callback: impl Fn(&[PerishableItem]) + Send + Sync + 'static,
    ) -> DomainResult<Subscription> {
        let snapshot = self.list_items()?;
        callback(&snapshot);
        Ok(self.item_watchers.register(None, callback))
    }

    /// Observe a single item. The snapshot holds one element while the item
    /// exists and becomes empty once it is deleted.
    pub fn watch_item(
        &self,
        item_id: PerishableItemId,
        callback: impl Fn(&[PerishableItem]) + Send + Sync + 'static,
    ) -> DomainResult<Subscription> {
        let snapshot: Vec<PerishableItem> = self.get_item(item_id)?.into_iter().collect();
        callback(&snapshot);
        Ok(self.item_watchers.register(Some(item_id), callback))
    }

    /// Observe the logs of one item (`Some`) or the whole log stream (`None`).
    pub fn watch_logs(
        &self,
        item_id: Option<PerishableItemId>,
        callback: impl Fn(&[StockLog]) + Send + Sync + 'static,
    ) -> DomainResult<Subscription> {
        let snapshot = match item_id {
            Some(id) => self.list_logs(id)?,
            None => self.list_all_logs()?,
        };
        callback(&snapshot);
        Ok(self.log_watchers.register(item_id, callback))
    }

    fn notify_watchers(&self) -> DomainResult<()> {
        for key in self.item_watchers.distinct_keys() {
            let items: Vec<PerishableItem> = match key {
                Some(item_id) => self.get_item(item_id)?.into_iter().collect(),
                None => self.list_items()?,
            };
            self.item_watchers.notify(&key, &items);
        }
        for key in self.log_watchers.distinct_keys() {
            let logs = match key {
                Some(item_id) => self.list_logs(item_id)?,
                None => self.list_all_logs()?,
            };
            self.log_watchers.notify(&key, &logs);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use granary_store::InMemoryStore;

    fn ledger() -> InventoryLedger<InMemoryStore> {
        InventoryLedger::new(InMemoryStore::new())
    }

    fn new_item(name: &str, initial_stock: i64) -> NewPerishableItem {
        NewPerishableItem {
            name: name.to_string(),
            initial_stock,
            expiry_date: None,
        }
    }

    #[test]
    fn create_with_initial_stock_writes_synthetic_log() {
        let ledger = ledger();
        let id = ledger.create_item(&new_item("pork", 10)).unwrap();

        let item = ledger.get_item(id).unwrap().unwrap();
        assert_eq!(item.current_stock, 10);

        let logs = ledger.list_logs(id).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].change, 10);
        assert_eq!(logs[0].new_stock, 10);
        assert_eq!(logs[0].kind, LogKind::StockIn);
        assert_eq!(logs[0].detail, "Initial stock");
    }

    #[test]
    fn create_with_zero_stock_writes_no_log() {
        let ledger = ledger();
        let id = ledger.create_item(&new_item("beef", 0)).unwrap();

        assert_eq!(ledger.get_item(id).unwrap().unwrap().current_stock, 0);
        assert!(ledger.list_logs(id).unwrap().is_empty());
    }

    #[test]
    fn create_rejects_blank_name_and_negative_stock() {
        let ledger = ledger();
        assert!(matches!(
            ledger.create_item(&new_item("  ", 1)).unwrap_err(),
            DomainError::Validation(_)
        ));
        assert!(matches!(
            ledger.create_item(&new_item("pork", -1)).unwrap_err(),
            DomainError::Validation(_)
        ));
    }

    #[test]
    fn sale_adjustment_decrements_and_logs() {
        let ledger = ledger();
        let id = ledger.create_item(&new_item("pork", 10)).unwrap();

        ledger.adjust_stock(id, -3, LogKind::Sale, "sold 3").unwrap();

        let item = ledger.get_item(id).unwrap().unwrap();
        assert_eq!(item.current_stock, 7);

        let logs = ledger.list_logs(id).unwrap();
        assert_eq!(logs.len(), 2);
        // Newest first.
        assert_eq!(logs[0].change, -3);
        assert_eq!(logs[0].new_stock, 7);
        assert_eq!(logs[0].kind, LogKind::Sale);
        assert_eq!(logs[0].detail, "sold 3");
    }

    #[test]
    fn insufficient_stock_fails_with_zero_side_effects() {
        let ledger = ledger();
        let id = ledger.create_item(&new_item("pork", 10)).unwrap();
        ledger.adjust_stock(id, -3, LogKind::Sale, "sold 3").unwrap();

        let err = ledger.adjust_stock(id, -20, LogKind::Sale, "oversell").unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        assert_eq!(ledger.get_item(id).unwrap().unwrap().current_stock, 7);
        assert_eq!(ledger.list_logs(id).unwrap().len(), 2);
    }

    #[test]
    fn adjust_of_missing_item_is_not_found() {
        let ledger = ledger();
        let ghost = PerishableItemId::new(DocumentId::new());
        let err = ledger.adjust_stock(ghost, 1, LogKind::StockIn, "x").unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn delete_log_reverses_its_contribution() {
        let ledger = ledger();
        let id = ledger.create_item(&new_item("pork", 10)).unwrap();
        ledger.adjust_stock(id, -3, LogKind::Sale, "sold 3").unwrap();

        let sale = ledger.list_logs(id).unwrap().remove(0);
        assert_eq!(sale.change, -3);

        ledger.delete_log(sale.id, id).unwrap();

        assert_eq!(ledger.get_item(id).unwrap().unwrap().current_stock, 10);
        let logs = ledger.list_logs(id).unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs.iter().all(|l| l.id != sale.id));
    }

    #[test]
    fn delete_of_missing_log_is_not_found() {
        let ledger = ledger();
        let id = ledger.create_item(&new_item("pork", 10)).unwrap();
        let ghost = LogId::new(DocumentId::new());
        assert_eq!(ledger.delete_log(ghost, id).unwrap_err(), DomainError::NotFound);
        // No partial reversal happened.
        assert_eq!(ledger.get_item(id).unwrap().unwrap().current_stock, 10);
    }

    #[test]
    fn delete_log_may_take_stock_negative() {
        // Reverse the initial stock-in after the stock was partly consumed.
        let ledger = ledger();
        let id = ledger.create_item(&new_item("pork", 10)).unwrap();
        ledger.adjust_stock(id, -4, LogKind::Sale, "sold 4").unwrap();

        let initial = ledger.list_logs(id).unwrap().pop().unwrap();
        assert_eq!(initial.change, 10);

        ledger.delete_log(initial.id, id).unwrap();
        assert_eq!(ledger.get_item(id).unwrap().unwrap().current_stock, -4);
    }

    #[test]
    fn update_log_resigns_from_kind_and_moves_stock_by_difference() {
        let ledger = ledger();
        let id = ledger.create_item(&new_item("pork", 10)).unwrap();
        ledger.adjust_stock(id, -3, LogKind::Sale, "sold 3").unwrap();
        let sale = ledger.list_logs(id).unwrap().remove(0);

        // Editing a sale to magnitude 5 coerces to -5; difference is -2.
        ledger.update_log(sale.id, id, 5, "sold 5 actually").unwrap();

        assert_eq!(ledger.get_item(id).unwrap().unwrap().current_stock, 5);

        let edited = ledger
            .list_logs(id)
            .unwrap()
            .into_iter()
            .find(|l| l.id == sale.id)
            .unwrap();
        assert_eq!(edited.change, -5);
        assert_eq!(edited.new_stock, sale.new_stock - 2);
        assert_eq!(edited.detail, "sold 5 actually");
        assert_eq!(edited.kind, LogKind::Sale);
    }

    #[test]
    fn update_log_coerces_stock_in_to_positive() {
        let ledger = ledger();
        let id = ledger.create_item(&new_item("pork", 10)).unwrap();
        let initial = ledger.list_logs(id).unwrap().remove(0);

        ledger.update_log(initial.id, id, -25, "recount").unwrap();

        // -25 coerced to +25; difference +15.
        assert_eq!(ledger.get_item(id).unwrap().unwrap().current_stock, 25);
        let edited = ledger.list_logs(id).unwrap().remove(0);
        assert_eq!(edited.change, 25);
        assert_eq!(edited.new_stock, 25);
    }

    #[test]
    fn update_of_missing_log_is_not_found() {
        let ledger = ledger();
        let id = ledger.create_item(&new_item("pork", 10)).unwrap();
        let ghost = LogId::new(DocumentId::new());
        assert_eq!(
            ledger.update_log(ghost, id, 1, "x").unwrap_err(),
            DomainError::NotFound
        );
    }

    #[test]
    fn delete_item_cascades_to_all_logs() {
        let ledger = ledger();
        let id = ledger.create_item(&new_item("pork", 10)).unwrap();
        ledger.adjust_stock(id, -3, LogKind::Sale, "sold 3").unwrap();
        ledger.adjust_stock(id, 5, LogKind::StockIn, "restock").unwrap();

        ledger.delete_item(id).unwrap();

        assert!(ledger.get_item(id).unwrap().is_none());
        assert!(ledger.list_logs(id).unwrap().is_empty());
    }

    #[test]
    fn delete_item_leaves_other_items_logs_alone() {
        let ledger = ledger();
        let doomed = ledger.create_item(&new_item("pork", 10)).unwrap();
        let kept = ledger.create_item(&new_item("beef", 4)).unwrap();

        ledger.delete_item(doomed).unwrap();

        assert_eq!(ledger.list_logs(kept).unwrap().len(), 1);
        assert!(ledger.get_item(kept).unwrap().is_some());
    }

    #[test]
    fn delete_of_missing_item_is_not_found() {
        let ledger = ledger();
        let ghost = PerishableItemId::new(DocumentId::new());
        assert_eq!(ledger.delete_item(ghost).unwrap_err(), DomainError::NotFound);
    }

    #[test]
    fn update_item_touches_metadata_but_never_stock() {
        let ledger = ledger();
        let id = ledger.create_item(&new_item("pork", 10)).unwrap();

        let patch = PerishableItemPatch {
            name: Some("pork belly".to_string()),
            expiry_date: None,
        };
        ledger.update_item(id, &patch).unwrap();

        let item = ledger.get_item(id).unwrap().unwrap();
        assert_eq!(item.name, "pork belly");
        assert_eq!(item.current_stock, 10);
    }

    #[test]
    fn list_items_is_newest_first() {
        let ledger = ledger();
        let first = ledger.create_item(&new_item("pork", 1)).unwrap();
        let second = ledger.create_item(&new_item("beef", 1)).unwrap();

        let items = ledger.list_items().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, second);
        assert_eq!(items[1].id, first);
    }
}
