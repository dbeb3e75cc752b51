//! Encoded records: the CRDT representation of document data.
//!
//! An encoded record shadows the user value one-to-one at record boundaries:
//! interior nodes mirror the value's records key-for-key, and every leaf
//! carries the exact user value together with the [`Eventstamp`] of the write
//! that last set it. Merging two encoded records resolves each leaf
//! independently -- the greater stamp wins -- which is what makes conflict
//! resolution field-level rather than document-level.
//!
//! # Structural invariant
//!
//! For every path from the root to a leaf, two replicas must agree on
//! "interior vs leaf" at every step. A record on one side and a leaf on the
//! other at the same path is unresolvable and fails the merge with
//! [`StoreError::StructureMismatch`] carrying the dotted path.
//!
//! # Wire shape
//!
//! Leaves serialize as `{"value": ..., "stamp": "..."}` objects and interior
//! nodes as plain maps of their children; the stamp's strict string grammar is
//! what tells the two apart when decoding.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::eventstamp::Eventstamp;
use crate::value::Value;

/// A leaf: one user value plus the stamp of the write that set it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncodedLeaf {
    /// The exact user value, `null` included.
    pub value: Value,
    /// Stamp of the winning write.
    pub stamp: Eventstamp,
}

/// A node of an encoded record tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EncodedNode {
    /// Atomic leaf value.
    Leaf(EncodedLeaf),
    /// Interior record node; children keyed by field name.
    Branch(BTreeMap<String, EncodedNode>),
}

impl EncodedNode {
    /// Encodes a user value at stamp `stamp`.
    ///
    /// Plain records recurse field-by-field; everything else -- arrays
    /// included -- becomes an atomic leaf.
    #[must_use]
    pub fn encode(value: &Value, stamp: Eventstamp) -> Self {
        match value {
            Value::Object(fields) => EncodedNode::Branch(
                fields
                    .iter()
                    .map(|(key, field)| (key.clone(), Self::encode(field, stamp)))
                    .collect(),
            ),
            leaf => EncodedNode::Leaf(EncodedLeaf {
                value: leaf.clone(),
                stamp,
            }),
        }
    }

    /// Decodes back to the user value; the structural inverse of
    /// [`encode`](EncodedNode::encode).
    #[must_use]
    pub fn decode(&self) -> Value {
        match self {
            EncodedNode::Leaf(leaf) => leaf.value.clone(),
            EncodedNode::Branch(children) => Value::Object(
                children
                    .iter()
                    .map(|(key, child)| (key.clone(), child.decode()))
                    .collect(),
            ),
        }
    }

    /// The greatest stamp carried anywhere in this subtree.
    ///
    /// [`Eventstamp::MIN`] for an empty branch.
    #[must_use]
    pub fn latest(&self) -> Eventstamp {
        match self {
            EncodedNode::Leaf(leaf) => leaf.stamp,
            EncodedNode::Branch(children) => children
                .values()
                .map(EncodedNode::latest)
                .max()
                .unwrap_or(Eventstamp::MIN),
        }
    }

    /// Merges two encoded records, leaf by leaf.
    ///
    /// At each path: a subtree unknown to one side is taken verbatim from the
    /// other; two leaves keep the one with the greater stamp, an exact tie
    /// going to `from`; two records recurse over the union of their keys.
    /// Inputs are untouched; the result is a new tree plus the greatest stamp
    /// observed among its surviving leaves.
    ///
    /// # Errors
    ///
    /// [`StoreError::StructureMismatch`] when one side is a record and the
    /// other a leaf at the same path.
    pub fn merge(
        into: &EncodedNode,
        from: &EncodedNode,
    ) -> Result<(EncodedNode, Eventstamp), StoreError> {
        let mut path = Vec::new();
        Self::merge_at(into, from, &mut path)
    }

    fn merge_at(
        into: &EncodedNode,
        from: &EncodedNode,
        path: &mut Vec<String>,
    ) -> Result<(EncodedNode, Eventstamp), StoreError> {
        match (into, from) {
            (EncodedNode::Leaf(local), EncodedNode::Leaf(remote)) => {
                let winner = if local.stamp > remote.stamp {
                    local
                } else {
                    remote
                };
                Ok((EncodedNode::Leaf(winner.clone()), winner.stamp))
            }
            (EncodedNode::Branch(local), EncodedNode::Branch(remote)) => {
                let mut merged = BTreeMap::new();
                let mut latest = Eventstamp::MIN;
                for (key, child) in local {
                    let (child, stamp) = match remote.get(key) {
                        Some(other) => {
                            path.push(key.clone());
                            let result = Self::merge_at(child, other, path);
                            path.pop();
                            result?
                        }
                        None => (child.clone(), child.latest()),
                    };
                    latest = latest.max(stamp);
                    merged.insert(key.clone(), child);
                }
                for (key, child) in remote {
                    if !local.contains_key(key) {
                        latest = latest.max(child.latest());
                        merged.insert(key.clone(), child.clone());
                    }
                }
                Ok((EncodedNode::Branch(merged), latest))
            }
            _ => Err(StoreError::StructureMismatch {
                path: render_path(path),
            }),
        }
    }
}

fn render_path(path: &[String]) -> String {
    if path.is_empty() {
        "(root)".to_string()
    } else {
        path.join(".")
    }
}


/// Property-based convergence checks at the record level.
#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use super::*;

    /// Stamps drawn from a small dense range so concurrent edits genuinely
    /// collide on fields; nonces keep them distinct.
    fn arb_stamp() -> impl Strategy<Value = Eventstamp> {
        (1_u64..100, any::<u16>()).prop_map(|(ms, nonce)| Eventstamp::new(ms, 0, nonce).unwrap())
    }

    fn arb_leaf_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            "[a-z0-9 ]{0,12}".prop_map(Value::String),
        ]
    }

    /// Flat records over a small key universe; same shape on both sides so
    /// merges never hit the structural error.
    fn arb_record_node() -> impl Strategy<Value = EncodedNode> {
        proptest::collection::btree_map("[abc]", (arb_leaf_value(), arb_stamp()), 0..4).prop_map(
            |fields| {
                EncodedNode::Branch(
                    fields
                        .into_iter()
                        .map(|(key, (value, stamp))| {
                            (key, EncodedNode::Leaf(EncodedLeaf { value, stamp }))
                        })
                        .collect(),
                )
            },
        )
    }

    proptest! {
        /// Merge is idempotent: merging a record with itself changes nothing.
        #[test]
        fn merge_idempotent(node in arb_record_node()) {
            let (merged, _) = EncodedNode::merge(&node, &node).unwrap();
            prop_assert_eq!(merged, node);
        }

        /// Merge converges: both operand orders produce the same tree
        /// whenever no two leaves carry the exact same stamp.
        #[test]
        fn merge_commutes_without_ties(a in arb_record_node(), b in arb_record_node()) {
            let (EncodedNode::Branch(left), EncodedNode::Branch(right)) = (&a, &b) else {
                unreachable!("strategy only builds branches");
            };
            for (key, node) in left {
                if let Some(other) = right.get(key) {
                    prop_assume!(node.latest() != other.latest());
                }
            }

            let (ab, _) = EncodedNode::merge(&a, &b).unwrap();
            let (ba, _) = EncodedNode::merge(&b, &a).unwrap();
            prop_assert_eq!(ab, ba);
        }

        /// Merge is associative.
        #[test]
        fn merge_associates(
            a in arb_record_node(),
            b in arb_record_node(),
            c in arb_record_node(),
        ) {
            let (ab, _) = EncodedNode::merge(&a, &b).unwrap();
            let (ab_c, _) = EncodedNode::merge(&ab, &c).unwrap();
            let (bc, _) = EncodedNode::merge(&b, &c).unwrap();
            let (a_bc, _) = EncodedNode::merge(&a, &bc).unwrap();
            prop_assert_eq!(ab_c, a_bc);
        }

        /// Encode then decode returns the original value for any record.
        #[test]
        fn encode_decode_roundtrip(node in arb_record_node()) {
            let value = node.decode();
            let reencoded = EncodedNode::encode(&value, Eventstamp::new(1, 0, 0).unwrap());
            prop_assert_eq!(reencoded.decode(), value);
        }
    }
}
