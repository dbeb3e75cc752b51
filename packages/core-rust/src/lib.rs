//! Roost Core -- a local-first, in-memory document store with an embedded
//! field-level LWW CRDT engine.
//!
//! Replicas mutate documents through a transactional store, observe mutations
//! through reactive queries, and synchronize by exchanging whole-collection
//! snapshots. Convergence is automatic: any two replicas that have observed
//! the same writes, in any order, show the same visible state.
//!
//! - **Eventstamp** ([`eventstamp`]): hybrid logical clock readings with a
//!   total order that survives serialization
//! - **Clock** ([`clock`]): monotonic stamp generator with remote
//!   fast-forward
//! - **Value** ([`value`]): JSON-shaped dynamic document values and the typed
//!   serde bridge
//! - **Record** ([`record`]): per-leaf stamped encoding and the field-level
//!   LWW merge
//! - **Document** ([`document`]): identified records with soft-delete
//!   tombstones
//! - **Collection** ([`collection`]): whole-store snapshots, the unit of
//!   sync, with per-document change classification
//! - **Resource map** ([`resource`]): the owning container stamping writes
//!   from the store clock
//! - **Store** ([`store`]): transactions, batched mutation events, snapshot
//!   merge, plugin host
//! - **Query** ([`query`]): incrementally maintained filtered / projected /
//!   ordered views
//! - **Plugin** ([`plugin`]): lifecycle and mutation hooks plus
//!   name-dispatched store extensions

pub mod clock;
pub mod collection;
pub mod document;
pub mod error;
pub mod eventstamp;
pub mod plugin;
pub mod query;
pub mod record;
pub mod resource;
pub mod store;
pub mod value;

// Clock
pub use clock::{Clock, ClockSource, SystemClock};

// Collection
pub use collection::{ChangeSet, Collection, DocumentMap};

// Document
pub use document::{DecodedDocument, EncodedDocument};

// Errors
pub use error::StoreError;

// Eventstamp
pub use eventstamp::{Eventstamp, ParseEventstampError};

// Plugin
pub use plugin::{Plugin, PluginMethod};

// Query
pub use query::{Query, QueryConfig, Subscription};

// Record
pub use record::{EncodedLeaf, EncodedNode};

// Resource map
pub use resource::ResourceMap;

// Store
pub use store::{Store, StoreHandle, Transaction, TransactionOptions};

// Value
pub use value::{from_value, to_value, Value};

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        title: String,
        pinned: bool,
    }

    /// The snapshot wire format stays stable: stamps as canonical strings,
    /// leaves as `{value, stamp}`, tombstones as `deleted_at`.
    #[test]
    fn snapshot_wire_format() {
        let store: Store<Note> = Store::new();
        store
            .add_with_id(
                "n1",
                Note {
                    title: "hello".to_string(),
                    pinned: false,
                },
            )
            .unwrap();
        store.del("n1").unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&store.collection().to_json().unwrap()).unwrap();

        let stamp = json["eventstamp"].as_str().unwrap();
        assert!(stamp.parse::<Eventstamp>().is_ok());

        let doc = &json["documents"]["n1"];
        assert_eq!(doc["id"], "n1");
        assert!(doc["deleted_at"].as_str().unwrap().parse::<Eventstamp>().is_ok());
        assert_eq!(doc["data"]["title"]["value"], "hello");
        assert!(doc["data"]["title"]["stamp"]
            .as_str()
            .unwrap()
            .parse::<Eventstamp>()
            .is_ok());
    }

    #[test]
    fn snapshot_survives_foreign_replicas() {
        let origin: Store<Note> = Store::new();
        origin
            .add_with_id(
                "n1",
                Note {
                    title: "sync me".to_string(),
                    pinned: true,
                },
            )
            .unwrap();

        let json = origin.collection().to_json().unwrap();
        let replica: Store<Note> = Store::new();
        replica.merge(&Collection::from_json(&json).unwrap()).unwrap();

        assert_eq!(
            replica.get("n1").unwrap().map(|note| note.title),
            Some("sync me".to_string())
        );
    }

    /// Verify all re-exports are accessible from the crate root.
    #[test]
    fn reexports_accessible() {
        let _stamp = Eventstamp::MIN;
        let _clock = Clock::system();
        let _ = SystemClock;
        let _value = Value::Null;
        let _collection = Collection::new();
        let _node = EncodedNode::encode(&Value::Null, Eventstamp::MIN);
        let _doc = EncodedDocument::encode("id", &Value::Null, Eventstamp::MIN);
        let _store: Store<Note> = Store::new();
        let _options = TransactionOptions::default();
    }
}
