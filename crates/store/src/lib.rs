//! `granary-store` — collection-based document storage abstraction.
//!
//! The ledger is written against the [`DocumentStore`] trait, which models the
//! primitives a transactional document database provides: per-document CRUD,
//! filtered/ordered queries, atomic read-modify-write transactions with
//! optimistic-conflict retry, blind atomic write batches, server-assigned
//! timestamps, and numeric field increments.
//!
//! [`InMemoryStore`] is the reference implementation, intended for tests/dev;
//! a real backend would implement the same trait.

pub mod batch;
pub mod document;
pub mod error;
pub mod memory;
pub mod store;

pub use batch::{WriteBatch, WriteOp};
pub use document::{Direction, OrderKey, Query, StoredDocument};
pub use error::StoreError;
pub use memory::InMemoryStore;
pub use store::{DocumentStore, TransactionOps, MAX_TRANSACTION_ATTEMPTS};
