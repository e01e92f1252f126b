//! Atomic multi-document write batches.

use serde_json::Value as JsonValue;

use granary_core::DocumentId;

/// A single buffered write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Create or fully replace a document. A replace keeps the document's
    /// `created_at`/`seq` and bumps its version.
    Set {
        collection: String,
        id: DocumentId,
        payload: JsonValue,
    },
    /// Shallow-merge top-level fields into an existing document.
    Patch {
        collection: String,
        id: DocumentId,
        fields: JsonValue,
    },
    /// Add `delta` to a numeric top-level field of an existing document.
    /// A missing field is treated as zero.
    Increment {
        collection: String,
        id: DocumentId,
        field: String,
        delta: i64,
    },
    /// Delete a document (deleting a missing document is a no-op).
    Delete { collection: String, id: DocumentId },
}

/// A blind (read-free) batch of writes, committed all-or-nothing.
///
/// Unlike a transaction, a batch performs no reads and carries no footprint:
/// it cannot conflict, only fail validation (and then applies nothing).
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, collection: &str, id: DocumentId, payload: JsonValue) {
        self.ops.push(WriteOp::Set {
            collection: collection.to_string(),
            id,
            payload,
        });
    }

    pub fn patch(&mut self, collection: &str, id: DocumentId, fields: JsonValue) {
        self.ops.push(WriteOp::Patch {
            collection: collection.to_string(),
            id,
            fields,
        });
    }

    pub fn increment(&mut self, collection: &str, id: DocumentId, field: &str, delta: i64) {
        self.ops.push(WriteOp::Increment {
            collection: collection.to_string(),
            id,
            field: field.to_string(),
            delta,
        });
    }

    pub fn delete(&mut self, collection: &str, id: DocumentId) {
        self.ops.push(WriteOp::Delete {
            collection: collection.to_string(),
            id,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}
