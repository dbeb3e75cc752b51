//! Encoded documents: an identified record plus a soft-delete tombstone.
//!
//! Documents are never physically removed. Deletion sets `deleted_at`, which
//! hides the document from reads while its data keeps flowing through merges,
//! so a late update from a replica that never saw the deletion still lands in
//! the carried record without resurrecting the document.
//!
//! All operations here are pure: they take documents by reference and return
//! new ones, leaving the inputs untouched.

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::eventstamp::Eventstamp;
use crate::record::EncodedNode;
use crate::value::Value;

/// An encoded document: identity, stamped record data, optional tombstone.
///
/// The document is visible iff `deleted_at` is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedDocument {
    /// Opaque identity; documents merge by id.
    pub id: String,
    /// The stamped record tree.
    pub data: EncodedNode,
    /// Soft-delete tombstone. `None` means visible.
    pub deleted_at: Option<Eventstamp>,
}

/// A fully decoded document.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedDocument {
    /// The document id.
    pub id: String,
    /// The decoded user value.
    pub value: Value,
    /// Tombstone, carried through so callers can inspect deletions.
    pub deleted_at: Option<Eventstamp>,
}

impl EncodedDocument {
    /// Wraps a user value into a visible document, every leaf stamped `stamp`.
    #[must_use]
    pub fn encode(id: impl Into<String>, value: &Value, stamp: Eventstamp) -> Self {
        Self {
            id: id.into(),
            data: EncodedNode::encode(value, stamp),
            deleted_at: None,
        }
    }

    /// Decodes the record data back into a plain value.
    #[must_use]
    pub fn decode(&self) -> DecodedDocument {
        DecodedDocument {
            id: self.id.clone(),
            value: self.data.decode(),
            deleted_at: self.deleted_at,
        }
    }

    /// Whether the document is visible to reads.
    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Merges two versions of the same document.
    ///
    /// The inner records merge field-by-field; tombstones merge as `max`,
    /// where any `Some` beats `None` -- merged-in data never resurrects a
    /// deleted document. Returns the merged document and the greatest stamp
    /// observed, tombstone included.
    ///
    /// # Errors
    ///
    /// [`StoreError::StructureMismatch`] from the record merge.
    pub fn merge(into: &Self, from: &Self) -> Result<(Self, Eventstamp), StoreError> {
        let (data, stamp) = EncodedNode::merge(&into.data, &from.data)?;
        let deleted_at = into.deleted_at.max(from.deleted_at);
        let latest = deleted_at.map_or(stamp, |tombstone| stamp.max(tombstone));
        Ok((
            Self {
                id: into.id.clone(),
                data,
                deleted_at,
            },
            latest,
        ))
    }

    /// Returns a copy with the tombstone set at `stamp`.
    ///
    /// Idempotent under stamp order: a greater stamp refreshes the tombstone,
    /// a lesser one leaves it alone.
    #[must_use]
    pub fn delete(&self, stamp: Eventstamp) -> Self {
        Self {
            id: self.id.clone(),
            data: self.data.clone(),
            deleted_at: Some(self.deleted_at.map_or(stamp, |current| current.max(stamp))),
        }
    }

    /// The greatest stamp carried by this document, tombstone included.
    ///
    /// Together with `id` and `deleted_at` this triple identifies a document
    /// version: the encoded record is fully determined by them.
    #[must_use]
    pub fn latest(&self) -> Eventstamp {
        let data = self.data.latest();
        self.deleted_at.map_or(data, |tombstone| data.max(tombstone))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp(n: u64) -> Eventstamp {
        Eventstamp::new(n, 0, 0).unwrap()
    }

    fn user(name: &str, email: &str) -> Value {
        serde_json::json!({"name": name, "email": email}).into()
    }

    // ---- encode / decode ----

    #[test]
    fn encode_decode_roundtrip() {
        let value = user("Alice", "a@x");
        let doc = EncodedDocument::encode("u1", &value, stamp(1));
        let decoded = doc.decode();
        assert_eq!(decoded.id, "u1");
        assert_eq!(decoded.value, value);
        assert_eq!(decoded.deleted_at, None);
        assert!(doc.is_visible());
    }

    // ---- merge ----

    #[test]
    fn merge_is_field_level() {
        let base = EncodedDocument::encode("u1", &user("Alice", "a@x"), stamp(1));
        let rename = EncodedDocument::encode(
            "u1",
            &serde_json::json!({"name": "Alicia"}).into(),
            stamp(2),
        );
        let remail =
            EncodedDocument::encode("u1", &serde_json::json!({"email": "b@x"}).into(), stamp(3));

        let (doc, _) = EncodedDocument::merge(&base, &rename).unwrap();
        let (doc, latest) = EncodedDocument::merge(&doc, &remail).unwrap();
        assert_eq!(doc.decode().value, user("Alicia", "b@x"));
        assert_eq!(latest, stamp(3));
    }

    #[test]
    fn merge_tombstone_wins_over_none() {
        let alive = EncodedDocument::encode("u1", &user("Alice", "a@x"), stamp(5));
        let dead = alive.delete(stamp(3));
        // Order does not matter; the tombstone survives both ways.
        let (a, _) = EncodedDocument::merge(&alive, &dead).unwrap();
        let (b, _) = EncodedDocument::merge(&dead, &alive).unwrap();
        assert_eq!(a.deleted_at, Some(stamp(3)));
        assert_eq!(b.deleted_at, Some(stamp(3)));
    }

    #[test]
    fn merge_takes_greater_tombstone() {
        let doc = EncodedDocument::encode("u1", &user("Alice", "a@x"), stamp(1));
        let first = doc.delete(stamp(4));
        let second = doc.delete(stamp(9));
        let (merged, latest) = EncodedDocument::merge(&first, &second).unwrap();
        assert_eq!(merged.deleted_at, Some(stamp(9)));
        assert_eq!(latest, stamp(9));
    }

    #[test]
    fn merge_into_deleted_updates_data_but_stays_hidden() {
        let doc = EncodedDocument::encode("u1", &user("Alice", "a@x"), stamp(1));
        let dead = doc.delete(stamp(10));
        // A replica that never saw the deletion keeps editing.
        let edit =
            EncodedDocument::encode("u1", &serde_json::json!({"name": "Bob"}).into(), stamp(5));

        let (merged, _) = EncodedDocument::merge(&dead, &edit).unwrap();
        assert!(!merged.is_visible());
        // The carried record is up to date for replay and diagnostics.
        assert_eq!(
            merged.data.decode().get("name"),
            Some(&Value::String("Bob".to_string()))
        );
    }

    #[test]
    fn merge_propagates_structure_mismatch() {
        let a = EncodedDocument::encode(
            "u1",
            &serde_json::json!({"profile": {"city": "Berlin"}}).into(),
            stamp(1),
        );
        let b = EncodedDocument::encode("u1", &serde_json::json!({"profile": 3}).into(), stamp(2));
        assert!(matches!(
            EncodedDocument::merge(&a, &b),
            Err(StoreError::StructureMismatch { .. })
        ));
    }

    // ---- delete ----

    #[test]
    fn delete_sets_tombstone() {
        let doc = EncodedDocument::encode("u1", &user("Alice", "a@x"), stamp(1));
        let dead = doc.delete(stamp(2));
        assert!(!dead.is_visible());
        assert_eq!(dead.deleted_at, Some(stamp(2)));
        // The original is untouched.
        assert!(doc.is_visible());
    }

    #[test]
    fn redelete_with_lesser_stamp_keeps_tombstone() {
        let doc = EncodedDocument::encode("u1", &user("Alice", "a@x"), stamp(1));
        let dead = doc.delete(stamp(8));
        let redead = dead.delete(stamp(4));
        assert_eq!(redead.deleted_at, Some(stamp(8)));
    }

    #[test]
    fn redelete_with_greater_stamp_refreshes_tombstone() {
        let doc = EncodedDocument::encode("u1", &user("Alice", "a@x"), stamp(1));
        let dead = doc.delete(stamp(4));
        let redead = dead.delete(stamp(8));
        assert_eq!(redead.deleted_at, Some(stamp(8)));
    }

    // ---- latest ----

    #[test]
    fn latest_covers_data_and_tombstone() {
        let doc = EncodedDocument::encode("u1", &user("Alice", "a@x"), stamp(5));
        assert_eq!(doc.latest(), stamp(5));
        let dead = doc.delete(stamp(9));
        assert_eq!(dead.latest(), stamp(9));
        // Data newer than the tombstone still dominates.
        let (merged, _) = EncodedDocument::merge(
            &dead,
            &EncodedDocument::encode("u1", &serde_json::json!({"name": "Z"}).into(), stamp(12)),
        )
        .unwrap();
        assert_eq!(merged.latest(), stamp(12));
    }

    // ---- wire shape ----

    #[test]
    fn serializes_with_null_tombstone() {
        let doc = EncodedDocument::encode(
            "u1",
            &serde_json::json!({"name": "Alice"}).into(),
            Eventstamp::new(1_700_000_000_000, 0, 0).unwrap(),
        );
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["id"], "u1");
        assert_eq!(json["deleted_at"], serde_json::Value::Null);
        let back: EncodedDocument = serde_json::from_value(json).unwrap();
        assert_eq!(back, doc);
    }
}
