//! The resource map: in-memory owner of one collection's documents.
//!
//! A [`ResourceMap`] owns the encoded documents and shares the store's
//! [`Clock`], stamping every local write from it. All reads filter tombstoned
//! documents; all merges are computed functionally and swapped in only on
//! success, so a failed merge leaves the map untouched.
//!
//! Transaction staging is a [`ResourceMap::clone_for_staging`] copy: the
//! document table is cloned shallowly (documents are `Arc`-shared) while the
//! clock stays shared, so stamps drawn inside a transaction that later rolls
//! back are simply never reused -- time does not rewind.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::collection::{ChangeSet, Collection, DocumentMap};
use crate::document::EncodedDocument;
use crate::error::StoreError;
use crate::value::Value;

/// Owning container of one collection's encoded documents.
pub struct ResourceMap {
    documents: DocumentMap,
    clock: Arc<Mutex<Clock>>,
}

impl ResourceMap {
    /// Creates an empty map over the given shared clock.
    #[must_use]
    pub fn new(clock: Arc<Mutex<Clock>>) -> Self {
        Self {
            documents: DocumentMap::new(),
            clock,
        }
    }

    /// Whether a document exists; tombstoned documents only count when
    /// `include_deleted` is set.
    #[must_use]
    pub fn has(&self, id: &str, include_deleted: bool) -> bool {
        self.documents
            .get(id)
            .is_some_and(|doc| include_deleted || doc.is_visible())
    }

    /// Decodes a visible document's value. `None` for missing or tombstoned.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Value> {
        self.documents
            .get(id)
            .filter(|doc| doc.is_visible())
            .map(|doc| doc.decode().value)
    }

    /// The raw encoded document, tombstoned or not.
    #[must_use]
    pub fn document(&self, id: &str) -> Option<&Arc<EncodedDocument>> {
        self.documents.get(id)
    }

    /// Iterates decoded values of all visible documents.
    pub fn entries(&self) -> impl Iterator<Item = (String, Value)> + '_ {
        self.documents
            .iter()
            .filter(|(_, doc)| doc.is_visible())
            .map(|(id, doc)| (id.clone(), doc.decode().value))
    }

    /// Number of visible documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.values().filter(|doc| doc.is_visible()).count()
    }

    /// Whether no document is visible.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encodes `value` at a fresh stamp and stores it under `id`,
    /// overwriting any existing entry without merging.
    pub fn add(&mut self, id: &str, value: &Value) {
        let stamp = self.clock.lock().now();
        self.documents.insert(
            id.to_string(),
            Arc::new(EncodedDocument::encode(id, value, stamp)),
        );
    }

    /// Encodes `partial` at a fresh stamp and merges it into the existing
    /// document (field-level LWW); inserts when the id is unknown.
    ///
    /// Returns the merged document's decoded value. Merging into a
    /// tombstoned document refreshes its data without making it visible.
    ///
    /// # Errors
    ///
    /// [`StoreError::StructureMismatch`] when the partial disagrees with the
    /// stored record about a node being interior or leaf; the map is left
    /// untouched.
    pub fn update(&mut self, id: &str, partial: &Value) -> Result<Value, StoreError> {
        let stamp = self.clock.lock().now();
        let incoming = EncodedDocument::encode(id, partial, stamp);
        let merged = match self.documents.get(id) {
            Some(existing) => EncodedDocument::merge(existing, &incoming)?.0,
            None => incoming,
        };
        let value = merged.data.decode();
        self.documents.insert(id.to_string(), Arc::new(merged));
        Ok(value)
    }

    /// Tombstones a document at a fresh stamp. No-op for unknown ids;
    /// returns whether a document was tombstoned.
    pub fn delete(&mut self, id: &str) -> bool {
        let Some(existing) = self.documents.get(id) else {
            return false;
        };
        let stamp = self.clock.lock().now();
        let deleted = Arc::new(existing.delete(stamp));
        self.documents.insert(id.to_string(), deleted);
        true
    }

    /// Takes a snapshot: a shallow copy of the document table plus the
    /// clock's latest stamp.
    #[must_use]
    pub fn snapshot(&self) -> Collection {
        Collection {
            documents: self.documents.clone(),
            eventstamp: self.clock.lock().latest(),
        }
    }

    /// Merges a remote snapshot in.
    ///
    /// The merge is computed functionally; only on success is the document
    /// table replaced and the clock forwarded to the merged eventstamp.
    ///
    /// # Errors
    ///
    /// [`StoreError::StructureMismatch`] from the collection merge; state is
    /// untouched.
    pub fn merge(&mut self, snapshot: &Collection) -> Result<ChangeSet, StoreError> {
        let current = self.snapshot();
        let (merged, changes) = Collection::merge(&current, snapshot)?;
        self.documents = merged.documents;
        self.clock.lock().forward(merged.eventstamp);
        tracing::debug!(
            added = changes.added.len(),
            updated = changes.updated.len(),
            deleted = changes.deleted.len(),
            "merged remote snapshot"
        );
        Ok(changes)
    }

    /// A staging copy for transactions: shallow document table, shared clock.
    #[must_use]
    pub fn clone_for_staging(&self) -> Self {
        Self {
            documents: self.documents.clone(),
            clock: Arc::clone(&self.clock),
        }
    }

    /// Replaces the document table wholesale (transaction commit).
    pub(crate) fn replace_documents(&mut self, documents: DocumentMap) {
        self.documents = documents;
    }

    /// Consumes the map, yielding its document table.
    pub(crate) fn into_documents(self) -> DocumentMap {
        self.documents
    }
}
