//! In-memory document store.
//!
//! Intended for tests/dev. Not optimized for performance: every read clones
//! the document, and transactions validate their whole read footprint under
//! the write lock at commit time (serializable-on-conflict).

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::debug;

use granary_core::DocumentId;

use crate::batch::{WriteBatch, WriteOp};
use crate::document::{Query, StoredDocument};
use crate::error::StoreError;
use crate::store::{DocumentStore, MAX_TRANSACTION_ATTEMPTS, TransactionOps};

#[derive(Debug, Clone)]
struct DocRecord {
    payload: JsonValue,
    created_at: DateTime<Utc>,
    seq: u64,
    version: u64,
}

impl DocRecord {
    fn to_stored(&self, id: DocumentId) -> StoredDocument {
        StoredDocument {
            id,
            payload: self.payload.clone(),
            created_at: self.created_at,
            seq: self.seq,
            version: self.version,
        }
    }
}

type Overlay = HashMap<(String, DocumentId), Option<DocRecord>>;

#[derive(Debug, Default)]
struct Shelves {
    collections: HashMap<String, BTreeMap<DocumentId, DocRecord>>,
    next_seq: u64,
}

impl Shelves {
    fn record(&self, collection: &str, id: DocumentId) -> Option<&DocRecord> {
        self.collections.get(collection).and_then(|col| col.get(&id))
    }

    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn run_query(&self, collection: &str, query: &Query) -> Vec<StoredDocument> {
        let mut docs: Vec<StoredDocument> = self
            .collections
            .get(collection)
            .into_iter()
            .flatten()
            .map(|(id, rec)| rec.to_stored(*id))
            .filter(|doc| query.matches(doc))
            .collect();
        query.sort(&mut docs);
        docs
    }

    /// Apply a sequence of writes all-or-nothing.
    ///
    /// Writes are staged in an overlay keyed by (collection, id); nothing
    /// touches the shelves until every op has validated, so a failing op
    /// leaves no partial state. Sequence numbers consumed by a failed batch
    /// are not reused (gaps are fine, only monotonicity matters).
    fn apply_ops(&mut self, ops: &[WriteOp]) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut overlay: Overlay = HashMap::new();

        for op in ops {
            match op {
                WriteOp::Set {
                    collection,
                    id,
                    payload,
                } => {
                    if !payload.is_object() {
                        return Err(StoreError::Invalid(format!(
                            "document payload must be a JSON object: {}",
                            StoreError::doc(collection, id)
                        )));
                    }
                    let rec = match effective(self, &overlay, collection, *id) {
                        Some(prev) => DocRecord {
                            payload: payload.clone(),
                            created_at: prev.created_at,
                            seq: prev.seq,
                            version: prev.version + 1,
                        },
                        None => DocRecord {
                            payload: payload.clone(),
                            created_at: now,
                            seq: self.bump_seq(),
                            version: 1,
                        },
                    };
                    overlay.insert((collection.clone(), *id), Some(rec));
                }
                WriteOp::Patch {
                    collection,
                    id,
                    fields,
                } => {
                    let prev = effective(self, &overlay, collection, *id).ok_or_else(|| {
                        StoreError::NotFound(StoreError::doc(collection, id))
                    })?;
                    let incoming = fields.as_object().ok_or_else(|| {
                        StoreError::Invalid(format!(
                            "patch fields must be a JSON object: {}",
                            StoreError::doc(collection, id)
                        ))
                    })?;
                    let mut merged = object_of(&prev, collection, *id)?;
                    for (key, value) in incoming {
                        merged.insert(key.clone(), value.clone());
                    }
                    overlay.insert(
                        (collection.clone(), *id),
                        Some(DocRecord {
                            payload: JsonValue::Object(merged),
                            created_at: prev.created_at,
                            seq: prev.seq,
                            version: prev.version + 1,
                        }),
                    );
                }
                WriteOp::Increment {
                    collection,
                    id,
                    field,
                    delta,
                } => {
                    let prev = effective(self, &overlay, collection, *id).ok_or_else(|| {
                        StoreError::NotFound(StoreError::doc(collection, id))
                    })?;
                    let mut merged = object_of(&prev, collection, *id)?;
                    let current = match merged.get(field) {
                        None | Some(JsonValue::Null) => 0,
                        Some(JsonValue::Number(n)) => n.as_i64().ok_or_else(|| {
                            StoreError::Invalid(format!(
                                "cannot increment non-integer field '{field}': {}",
                                StoreError::doc(collection, id)
                            ))
                        })?,
                        Some(_) => {
                            return Err(StoreError::Invalid(format!(
                                "cannot increment non-numeric field '{field}': {}",
                                StoreError::doc(collection, id)
                            )));
                        }
                    };
                    merged.insert(field.clone(), JsonValue::from(current + delta));
                    overlay.insert(
                        (collection.clone(), *id),
                        Some(DocRecord {
                            payload: JsonValue::Object(merged),
                            created_at: prev.created_at,
                            seq: prev.seq,
                            version: prev.version + 1,
                        }),
                    );
                }
                WriteOp::Delete { collection, id } => {
                    overlay.insert((collection.clone(), *id), None);
                }
            }
        }

        // Every op validated; flush the overlay.
        for ((collection, id), entry) in overlay {
            match entry {
                Some(rec) => {
                    self.collections.entry(collection).or_default().insert(id, rec);
                }
                None => {
                    if let Some(col) = self.collections.get_mut(&collection) {
                        col.remove(&id);
                    }
                }
            }
        }

        Ok(())
    }
}

fn effective(
    shelves: &Shelves,
    overlay: &Overlay,
    collection: &str,
    id: DocumentId,
) -> Option<DocRecord> {
    match overlay.get(&(collection.to_string(), id)) {
        Some(entry) => entry.clone(),
        None => shelves.record(collection, id).cloned(),
    }
}

fn object_of(
    rec: &DocRecord,
    collection: &str,
    id: DocumentId,
) -> Result<serde_json::Map<String, JsonValue>, StoreError> {
    rec.payload.as_object().cloned().ok_or_else(|| {
        StoreError::Invalid(format!(
            "stored payload is not a JSON object: {}",
            StoreError::doc(collection, id)
        ))
    })
}

/// In-memory [`DocumentStore`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Shelves>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Shelves>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Shelves>, StoreError> {
        self.inner
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }

    fn commit_txn(&self, view: TxnView<'_>) -> Result<(), StoreError> {
        let mut shelves = self.write()?;

        for (collection, id, expected) in &view.reads {
            let actual = shelves.record(collection, *id).map(|rec| rec.version);
            if actual != *expected {
                return Err(StoreError::Conflict(format!(
                    "read footprint invalidated: {}",
                    StoreError::doc(collection, id)
                )));
            }
        }

        for (collection, query, expected) in &view.query_reads {
            let actual: Vec<(DocumentId, u64)> = shelves
                .run_query(collection, query)
                .iter()
                .map(|doc| (doc.id, doc.version))
                .collect();
            if &actual != expected {
                return Err(StoreError::Conflict(format!(
                    "query footprint invalidated: {collection}"
                )));
            }
        }

        shelves.apply_ops(&view.ops)
    }
}

/// Transaction handle over an [`InMemoryStore`].
///
/// Reads go to committed state under the read lock and record a footprint;
/// writes are buffered in order. Successive reads inside one closure may
/// observe different committed states under contention, but the footprint
/// validation rejects any commit built on such a torn view, so the retried
/// closure always acts on a consistent snapshot.
struct TxnView<'a> {
    store: &'a InMemoryStore,
    reads: Vec<(String, DocumentId, Option<u64>)>,
    query_reads: Vec<(String, Query, Vec<(DocumentId, u64)>)>,
    ops: Vec<WriteOp>,
}

impl TransactionOps for TxnView<'_> {
    fn get(&mut self, collection: &str, id: DocumentId) -> Result<Option<StoredDocument>, StoreError> {
        let doc = {
            let shelves = self.store.read()?;
            shelves.record(collection, id).map(|rec| rec.to_stored(id))
        };
        self.reads
            .push((collection.to_string(), id, doc.as_ref().map(|d| d.version)));
        Ok(doc)
    }

    fn query(&mut self, collection: &str, query: &Query) -> Result<Vec<StoredDocument>, StoreError> {
        let docs = {
            let shelves = self.store.read()?;
            shelves.run_query(collection, query)
        };
        self.query_reads.push((
            collection.to_string(),
            query.clone(),
            docs.iter().map(|doc| (doc.id, doc.version)).collect(),
        ));
        Ok(docs)
    }

    fn set(&mut self, collection: &str, id: DocumentId, payload: JsonValue) {
        self.ops.push(WriteOp::Set {
            collection: collection.to_string(),
            id,
            payload,
        });
    }

    fn patch(&mut self, collection: &str, id: DocumentId, fields: JsonValue) {
        self.ops.push(WriteOp::Patch {
            collection: collection.to_string(),
            id,
            fields,
        });
    }

    fn increment(&mut self, collection: &str, id: DocumentId, field: &str, delta: i64) {
        self.ops.push(WriteOp::Increment {
            collection: collection.to_string(),
            id,
            field: field.to_string(),
            delta,
        });
    }

    fn delete(&mut self, collection: &str, id: DocumentId) {
        self.ops.push(WriteOp::Delete {
            collection: collection.to_string(),
            id,
        });
    }
}

impl DocumentStore for InMemoryStore {
    fn insert(&self, collection: &str, payload: JsonValue) -> Result<StoredDocument, StoreError> {
        self.insert_with_id(collection, DocumentId::new(), payload)
    }

    fn insert_with_id(
        &self,
        collection: &str,
        id: DocumentId,
        payload: JsonValue,
    ) -> Result<StoredDocument, StoreError> {
        if !payload.is_object() {
            return Err(StoreError::Invalid(format!(
                "document payload must be a JSON object: {}",
                StoreError::doc(collection, id)
            )));
        }

        let mut shelves = self.write()?;
        if shelves.record(collection, id).is_some() {
            return Err(StoreError::Invalid(format!(
                "insert over existing document: {}",
                StoreError::doc(collection, id)
            )));
        }

        let rec = DocRecord {
            payload,
            created_at: Utc::now(),
            seq: shelves.bump_seq(),
            version: 1,
        };
        let stored = rec.to_stored(id);
        shelves
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id, rec);
        Ok(stored)
    }

    fn get(&self, collection: &str, id: DocumentId) -> Result<Option<StoredDocument>, StoreError> {
        let shelves = self.read()?;
        Ok(shelves.record(collection, id).map(|rec| rec.to_stored(id)))
    }

    fn patch(&self, collection: &str, id: DocumentId, fields: JsonValue) -> Result<(), StoreError> {
        let mut shelves = self.write()?;
        shelves.apply_ops(&[WriteOp::Patch {
            collection: collection.to_string(),
            id,
            fields,
        }])
    }

    fn delete(&self, collection: &str, id: DocumentId) -> Result<(), StoreError> {
        let mut shelves = self.write()?;
        shelves.apply_ops(&[WriteOp::Delete {
            collection: collection.to_string(),
            id,
        }])
    }

    fn query(&self, collection: &str, query: &Query) -> Result<Vec<StoredDocument>, StoreError> {
        let shelves = self.read()?;
        Ok(shelves.run_query(collection, query))
    }

    fn commit_batch(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut shelves = self.write()?;
        shelves.apply_ops(batch.ops())
    }

    fn run_transaction<T, E, F>(&self, mut f: F) -> Result<T, E>
    where
        F: FnMut(&mut dyn TransactionOps) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let mut view = TxnView {
                store: self,
                reads: Vec::new(),
                query_reads: Vec::new(),
                ops: Vec::new(),
            };
            let out = f(&mut view)?;

            match self.commit_txn(view) {
                Ok(()) => return Ok(out),
                Err(StoreError::Conflict(msg)) if attempt < MAX_TRANSACTION_ATTEMPTS => {
                    debug!(attempt, error = %msg, "transaction conflict; retrying");
                }
                Err(other) => return Err(E::from(other)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::document::{Direction, OrderKey};

    const COL: &str = "things";

    #[test]
    fn insert_then_get_roundtrips() {
        let store = InMemoryStore::new();
        let doc = store.insert(COL, json!({ "name": "rice" })).unwrap();
        assert_eq!(doc.version, 1);

        let fetched = store.get(COL, doc.id).unwrap().unwrap();
        assert_eq!(fetched, doc);
    }

    #[test]
    fn insert_assigns_monotonic_seq() {
        let store = InMemoryStore::new();
        let a = store.insert(COL, json!({})).unwrap();
        let b = store.insert(COL, json!({})).unwrap();
        assert!(b.seq > a.seq);
    }

    #[test]
    fn insert_rejects_non_object_payload() {
        let store = InMemoryStore::new();
        let err = store.insert(COL, json!(42)).unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[test]
    fn patch_merges_fields_and_bumps_version() {
        let store = InMemoryStore::new();
        let doc = store.insert(COL, json!({ "name": "rice", "count": 3 })).unwrap();

        store.patch(COL, doc.id, json!({ "count": 5 })).unwrap();

        let fetched = store.get(COL, doc.id).unwrap().unwrap();
        assert_eq!(fetched.payload, json!({ "name": "rice", "count": 5 }));
        assert_eq!(fetched.version, 2);
        assert_eq!(fetched.created_at, doc.created_at);
    }

    #[test]
    fn patch_of_missing_document_is_not_found() {
        let store = InMemoryStore::new();
        let err = store.patch(COL, DocumentId::new(), json!({ "x": 1 })).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn delete_is_idempotent() {
        let store = InMemoryStore::new();
        let doc = store.insert(COL, json!({})).unwrap();
        store.delete(COL, doc.id).unwrap();
        store.delete(COL, doc.id).unwrap();
        assert!(store.get(COL, doc.id).unwrap().is_none());
    }

    #[test]
    fn query_filters_and_orders() {
        let store = InMemoryStore::new();
        store.insert(COL, json!({ "kind": "a", "name": "zebra" })).unwrap();
        store.insert(COL, json!({ "kind": "b", "name": "ant" })).unwrap();
        store.insert(COL, json!({ "kind": "a", "name": "ant" })).unwrap();

        let docs = store
            .query(
                COL,
                &Query::new()
                    .filter_eq("kind", json!("a"))
                    .order_by(OrderKey::Field("name".into()), Direction::Asc),
            )
            .unwrap();

        let names: Vec<_> = docs.iter().map(|d| d.field("name").cloned()).collect();
        assert_eq!(names, vec![Some(json!("ant")), Some(json!("zebra"))]);
    }

    #[test]
    fn batch_is_all_or_nothing() {
        let store = InMemoryStore::new();
        let fresh = DocumentId::new();

        let mut batch = WriteBatch::new();
        batch.set(COL, fresh, json!({ "name": "ok" }));
        batch.patch(COL, DocumentId::new(), json!({ "x": 1 })); // missing target

        let err = store.commit_batch(batch).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(store.get(COL, fresh).unwrap().is_none());
    }

    #[test]
    fn increment_treats_missing_field_as_zero() {
        let store = InMemoryStore::new();
        let doc = store.insert(COL, json!({})).unwrap();

        let mut batch = WriteBatch::new();
        batch.increment(COL, doc.id, "count", 4);
        store.commit_batch(batch).unwrap();

        let fetched = store.get(COL, doc.id).unwrap().unwrap();
        assert_eq!(fetched.field("count"), Some(&json!(4)));
    }

    #[test]
    fn increment_of_missing_document_is_not_found() {
        let store = InMemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.increment(COL, DocumentId::new(), "count", 1);
        let err = store.commit_batch(batch).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn transaction_applies_buffered_writes() {
        let store = InMemoryStore::new();
        let doc = store.insert(COL, json!({ "count": 1 })).unwrap();

        store
            .run_transaction(|txn| -> Result<(), StoreError> {
                let current = txn.get(COL, doc.id)?.ok_or_else(|| {
                    StoreError::NotFound(StoreError::doc(COL, doc.id))
                })?;
                let count = current.field("count").and_then(|v| v.as_i64()).unwrap_or(0);
                txn.patch(COL, doc.id, json!({ "count": count + 1 }));
                Ok(())
            })
            .unwrap();

        let fetched = store.get(COL, doc.id).unwrap().unwrap();
        assert_eq!(fetched.field("count"), Some(&json!(2)));
    }

    #[test]
    fn closure_error_aborts_without_side_effects() {
        let store = InMemoryStore::new();
        let doc = store.insert(COL, json!({ "count": 1 })).unwrap();

        let err = store
            .run_transaction(|txn| -> Result<(), StoreError> {
                txn.patch(COL, doc.id, json!({ "count": 99 }));
                Err(StoreError::Invalid("nope".to_string()))
            })
            .unwrap_err();

        assert!(matches!(err, StoreError::Invalid(_)));
        let fetched = store.get(COL, doc.id).unwrap().unwrap();
        assert_eq!(fetched.field("count"), Some(&json!(1)));
    }

    #[test]
    fn invalidated_read_footprint_retries() {
        let store = InMemoryStore::new();
        let doc = store.insert(COL, json!({ "count": 0 })).unwrap();

        let mut attempts = 0;
        store
            .run_transaction(|txn| -> Result<(), StoreError> {
                attempts += 1;
                let current = txn.get(COL, doc.id)?.ok_or_else(|| {
                    StoreError::NotFound(StoreError::doc(COL, doc.id))
                })?;
                if attempts == 1 {
                    // Out-of-band write between read and commit.
                    store.patch(COL, doc.id, json!({ "count": 10 }))?;
                }
                let count = current.field("count").and_then(|v| v.as_i64()).unwrap_or(0);
                txn.patch(COL, doc.id, json!({ "count": count + 1 }));
                Ok(())
            })
            .unwrap();

        assert_eq!(attempts, 2);
        let fetched = store.get(COL, doc.id).unwrap().unwrap();
        // Second attempt read the out-of-band value.
        assert_eq!(fetched.field("count"), Some(&json!(11)));
    }

    #[test]
    fn exhausted_retries_surface_conflict() {
        let store = InMemoryStore::new();
        let doc = store.insert(COL, json!({ "count": 0 })).unwrap();

        let mut attempts: u32 = 0;
        let err = store
            .run_transaction(|txn| -> Result<(), StoreError> {
                attempts += 1;
                txn.get(COL, doc.id)?;
                // Invalidate our own footprint every attempt.
                store.patch(COL, doc.id, json!({ "count": attempts }))?;
                txn.patch(COL, doc.id, json!({ "count": -1 }));
                Ok(())
            })
            .unwrap_err();

        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(attempts, MAX_TRANSACTION_ATTEMPTS);
        let fetched = store.get(COL, doc.id).unwrap().unwrap();
        assert_ne!(fetched.field("count"), Some(&json!(-1)));
    }

    #[test]
    fn query_footprint_detects_phantom_inserts() {
        let store = InMemoryStore::new();
        store.insert(COL, json!({ "kind": "a" })).unwrap();

        let mut attempts = 0;
        let seen = store
            .run_transaction(|txn| -> Result<usize, StoreError> {
                attempts += 1;
                let docs = txn.query(COL, &Query::new().filter_eq("kind", json!("a")))?;
                if attempts == 1 {
                    // Phantom insert between query and commit.
                    store.insert(COL, json!({ "kind": "a" }))?;
                }
                for doc in &docs {
                    txn.delete(COL, doc.id);
                }
                Ok(docs.len())
            })
            .unwrap();

        assert_eq!(attempts, 2);
        assert_eq!(seen, 2);
        let remaining = store
            .query(COL, &Query::new().filter_eq("kind", json!("a")))
            .unwrap();
        assert!(remaining.is_empty());
    }

    #[test]
    fn concurrent_transactions_serialize() {
        use std::sync::Arc;

        let store = Arc::new(InMemoryStore::new());
        let doc_id = store.insert(COL, json!({ "count": 0 })).unwrap().id;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..10 {
                    // Unbounded retry for the test: contention among 8 threads
                    // can exceed the per-call bound.
                    loop {
                        let outcome = store.run_transaction(|txn| -> Result<(), StoreError> {
                            let current = txn.get(COL, doc_id)?.ok_or_else(|| {
                                StoreError::NotFound(StoreError::doc(COL, doc_id))
                            })?;
                            let count =
                                current.field("count").and_then(|v| v.as_i64()).unwrap_or(0);
                            txn.patch(COL, doc_id, json!({ "count": count + 1 }));
                            Ok(())
                        });
                        match outcome {
                            Ok(()) => break,
                            Err(StoreError::Conflict(_)) => continue,
                            Err(other) => panic!("unexpected store error: {other}"),
                        }
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let fetched = store.get(COL, doc_id).unwrap().unwrap();
        assert_eq!(fetched.field("count"), Some(&json!(80)));
    }
}
