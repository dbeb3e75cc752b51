//! Collections: whole-store snapshots and the unit of synchronization.
//!
//! A [`Collection`] is every encoded document of one store plus the greatest
//! eventstamp the replica has ever observed. Replicas synchronize by
//! exchanging whole collections; [`Collection::merge`] combines two of them
//! and classifies what changed per document so the store can emit the same
//! mutation events a local transaction would.
//!
//! Documents are held behind [`Arc`] so snapshots and transaction staging are
//! shallow copies; merging replicas that share documents skips them by
//! pointer identity before falling back to the structural version check.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::document::EncodedDocument;
use crate::error::StoreError;
use crate::eventstamp::Eventstamp;

/// The document table of a collection, keyed by document id.
pub type DocumentMap = HashMap<String, Arc<EncodedDocument>>;

/// A whole-collection snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    /// Every document of the collection, tombstoned ones included.
    pub documents: DocumentMap,
    /// Greatest stamp observed by the replica across writes and merges.
    pub eventstamp: Eventstamp,
}

/// Per-document classification of what a merge changed.
///
/// Maps and the set iterate in id order, so events built from a change set
/// are deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    /// Documents that appeared, visible, with no local counterpart.
    pub added: BTreeMap<String, Arc<EncodedDocument>>,
    /// Documents whose merged version is visible and differs from the local one.
    pub updated: BTreeMap<String, Arc<EncodedDocument>>,
    /// Documents that went from visible to tombstoned.
    pub deleted: BTreeSet<String>,
}

impl ChangeSet {
    /// Whether the merge changed nothing worth reporting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

impl Default for Collection {
    fn default() -> Self {
        Self::new()
    }
}

impl Collection {
    /// An empty collection at [`Eventstamp::MIN`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            documents: HashMap::new(),
            eventstamp: Eventstamp::MIN,
        }
    }

    /// Merges two collections.
    ///
    /// Starts from `into`, folds every document of `from` in by id, and
    /// reports per-document changes from `into`'s point of view:
    ///
    /// - unknown id, visible -> `added`; unknown id, already tombstoned ->
    ///   recorded silently;
    /// - known id with an identical version -> skipped;
    /// - merged result visible -> `updated`;
    /// - visible before, tombstoned after -> `deleted`;
    /// - tombstoned on both sides -> data refreshed, nothing classified.
    ///
    /// The merged eventstamp is the max of the two inputs.
    ///
    /// # Errors
    ///
    /// [`StoreError::StructureMismatch`] from a document merge; no partial
    /// result is produced.
    pub fn merge(into: &Self, from: &Self) -> Result<(Self, ChangeSet), StoreError> {
        let mut documents = into.documents.clone();
        let mut changes = ChangeSet::default();

        for (id, from_doc) in &from.documents {
            match into.documents.get(id) {
                None => {
                    documents.insert(id.clone(), Arc::clone(from_doc));
                    if from_doc.is_visible() {
                        changes.added.insert(id.clone(), Arc::clone(from_doc));
                    }
                }
                Some(into_doc) => {
                    if Arc::ptr_eq(into_doc, from_doc) || same_version(into_doc, from_doc) {
                        continue;
                    }
                    let (merged, _) = EncodedDocument::merge(into_doc, from_doc)?;
                    let was_visible = into_doc.is_visible();
                    let is_visible = merged.is_visible();
                    let merged = Arc::new(merged);
                    documents.insert(id.clone(), Arc::clone(&merged));

                    if was_visible && !is_visible {
                        changes.deleted.insert(id.clone());
                    } else if is_visible {
                        changes.updated.insert(id.clone(), merged);
                    }
                }
            }
        }

        Ok((
            Self {
                documents,
                eventstamp: into.eventstamp.max(from.eventstamp),
            },
            changes,
        ))
    }

    /// Serializes the snapshot to its canonical JSON form.
    ///
    /// # Errors
    ///
    /// [`StoreError::Codec`] when serialization fails.
    pub fn to_json(&self) -> Result<String, StoreError> {
        serde_json::to_string(self).map_err(StoreError::from)
    }

    /// Deserializes a snapshot from its canonical JSON form.
    ///
    /// # Errors
    ///
    /// [`StoreError::Codec`] when the input is not a valid snapshot.
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        serde_json::from_str(json).map_err(StoreError::from)
    }
}

/// Version identity: the encoded record is fully determined by this triple,
/// so equal triples mean the merge would be a no-op.
fn same_version(a: &EncodedDocument, b: &EncodedDocument) -> bool {
    a.id == b.id && a.deleted_at == b.deleted_at && a.latest() == b.latest()
}
