//! `granary-ledger` — inventory ledger and stock catalog.
//!
//! The ledger owns the one non-trivial invariant in the system: an item's
//! current stock equals its initial recorded stock plus the signed sum of
//! `change` across all undeleted logs referencing it. Every mutation that
//! could disturb that relation runs as a single atomic unit against the
//! document store.
//!
//! The catalog is the plain (untracked) inventory surface: field patches,
//! no log trail.

pub mod catalog;
pub mod item;
pub mod ledger;
pub mod log;
pub mod watch;


pub use catalog::{NewStockItem, StockCatalog, StockItem, StockItemId, StockItemPatch};
pub use item::{NewPerishableItem, PerishableItem, PerishableItemId, PerishableItemPatch};
pub use ledger::InventoryLedger;
pub use log::{LogId, LogKind, StockLog};
pub use watch::Subscription;
