//! The document-store contract.
//!
//! This module defines the **persistence seam** the domain layer is written
//! against. It makes no storage assumptions: the in-memory implementation
//! backs tests/dev, and a real document database would implement the same
//! trait.
//!
//! ## Transactions
//!
//! `run_transaction` is the only way to perform a read-then-conditional-write.
//! The closure receives a [`TransactionOps`] handle; reads record a footprint
//! (the version of each document read, or its absence, and the membership of
//! each query's result set) while writes are buffered. At commit time the
//! footprint is re-validated under exclusion and the buffered writes are
//! applied all-or-nothing.
//!
//! When validation fails the closure is re-run against fresh state, up to
//! [`MAX_TRANSACTION_ATTEMPTS`] times; exhaustion surfaces as
//! `StoreError::Conflict`. The bounded retry keeps contention from blocking a
//! caller indefinitely. Closures therefore must be free of side effects other
//! than through the handle.
//!
//! A closure error aborts the transaction immediately with zero writes
//! applied; it is returned to the caller unchanged. The closure's error type
//! only needs a `From<StoreError>` conversion so that store failures and
//! domain failures can travel in one `Result`.
//!
//! ## Isolation
//!
//! Within one transaction, commit-time validation of the read footprint gives
//! serializable-on-conflict semantics: two concurrent transactions that read
//! the same document cannot both commit a write based on a stale read. Query
//! footprints extend the same guarantee to predicate reads, so a transaction
//! that deletes "all logs for item X" conflicts with a concurrent insert of
//! such a log.

use serde_json::Value as JsonValue;

use granary_core::DocumentId;

use crate::batch::WriteBatch;
use crate::document::{Query, StoredDocument};
use crate::error::StoreError;

/// Upper bound on transaction re-runs under contention.
pub const MAX_TRANSACTION_ATTEMPTS: u32 = 5;

/// Read/write handle passed to a transaction closure.
///
/// Reads observe committed state and record a footprint; writes are buffered
/// until commit. Write methods are infallible at call time: targets are
/// validated at commit (e.g. patching a missing document fails the whole
/// transaction with `NotFound`).
pub trait TransactionOps {
    /// Read one document, recording its version (or absence) in the footprint.
    fn get(&mut self, collection: &str, id: DocumentId) -> Result<Option<StoredDocument>, StoreError>;

    /// Run a query, recording its result-set membership in the footprint.
    fn query(&mut self, collection: &str, query: &Query) -> Result<Vec<StoredDocument>, StoreError>;

    /// Buffer a create-or-replace write.
    fn set(&mut self, collection: &str, id: DocumentId, payload: JsonValue);

    /// Buffer a shallow field merge into an existing document.
    fn patch(&mut self, collection: &str, id: DocumentId, fields: JsonValue);

    /// Buffer a read-free numeric increment of a top-level field.
    fn increment(&mut self, collection: &str, id: DocumentId, field: &str, delta: i64);

    /// Buffer a delete.
    fn delete(&mut self, collection: &str, id: DocumentId);
}

/// Collection-based document storage.
///
/// Note: `run_transaction` is generic over the closure's result, so this
/// trait is not usable as a trait object; consumers are generic over
/// `S: DocumentStore` instead (the in-memory store and an `Arc` of any store
/// both qualify).
pub trait DocumentStore: Send + Sync {
    /// Insert a new document under a fresh id. Timestamps are store-assigned.
    fn insert(&self, collection: &str, payload: JsonValue) -> Result<StoredDocument, StoreError>;

    /// Insert a new document under a caller-chosen (pre-generated) id.
    ///
    /// Fails with `Invalid` if the id already exists in the collection.
    fn insert_with_id(
        &self,
        collection: &str,
        id: DocumentId,
        payload: JsonValue,
    ) -> Result<StoredDocument, StoreError>;

    /// Fetch one document.
    fn get(&self, collection: &str, id: DocumentId) -> Result<Option<StoredDocument>, StoreError>;

    /// Shallow-merge top-level fields into an existing document.
    fn patch(&self, collection: &str, id: DocumentId, fields: JsonValue) -> Result<(), StoreError>;

    /// Delete a document. Deleting a missing document is Ok (idempotent).
    fn delete(&self, collection: &str, id: DocumentId) -> Result<(), StoreError>;

    /// Run a filtered, ordered query over one collection.
    fn query(&self, collection: &str, query: &Query) -> Result<Vec<StoredDocument>, StoreError>;

    /// Commit a blind write batch atomically (all writes or none).
    fn commit_batch(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Run `f` as an atomic read-modify-write transaction.
    ///
    /// See the module docs for retry, abort and isolation semantics. `f` may
    /// be invoked several times and must not capture effects of earlier
    /// attempts.
    fn run_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnMut(&mut dyn TransactionOps) -> Result<T, E>,
        E: From<StoreError>;
}

impl<S> DocumentStore for std::sync::Arc<S>
where
    S: DocumentStore + ?Sized,
{
    fn insert(&self, collection: &str, payload: JsonValue) -> Result<StoredDocument, StoreError> {
        (**self).insert(collection, payload)
    }

    fn insert_with_id(
        &self,
        collection: &str,
        id: DocumentId,
        payload: JsonValue,
    ) -> Result<StoredDocument, StoreError> {
        (**self).insert_with_id(collection, id, payload)
    }

    fn get(&self, collection: &str, id: DocumentId) -> Result<Option<StoredDocument>, StoreError> {
        (**self).get(collection, id)
    }

    fn patch(&self, collection: &str, id: DocumentId, fields: JsonValue) -> Result<(), StoreError> {
        (**self).patch(collection, id, fields)
    }

    fn delete(&self, collection: &str, id: DocumentId) -> Result<(), StoreError> {
        (**self).delete(collection, id)
    }

    fn query(&self, collection: &str, query: &Query) -> Result<Vec<StoredDocument>, StoreError> {
        (**self).query(collection, query)
    }

    fn commit_batch(&self, batch: WriteBatch) -> Result<(), StoreError> {
        (**self).commit_batch(batch)
    }

    fn run_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnMut(&mut dyn TransactionOps) -> Result<T, E>,
        E: From<StoreError>,
    {
        (**self).run_transaction(f)
    }
}
