//! Error taxonomy for the store core.
//!
//! The core never swallows errors: merge failures surface before any state is
//! swapped in, plugin failures carry the offending plugin's name, and codec
//! failures from the typed adapter propagate unchanged.

use thiserror::Error;

/// Errors produced by the store core.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An encoded-record merge found a record on one side and a leaf on the
    /// other at the same path. Fatal for that merge; no state is committed.
    #[error("structure mismatch at `{path}`: record on one side, leaf on the other")]
    StructureMismatch {
        /// Dotted path from the document root to the offending node.
        path: String,
    },

    /// A plugin tried to attach a method whose name is already taken, either
    /// by the built-in store API or by a previously registered plugin.
    #[error("plugin method `{name}` conflicts with an existing store method")]
    PluginConflict {
        /// The colliding method name.
        name: String,
    },

    /// A plugin's init hook failed; initialization is aborted.
    #[error("plugin `{name}` failed to initialize")]
    PluginInitFailure {
        /// Name of the failing plugin.
        name: String,
        /// The hook's own error.
        #[source]
        source: anyhow::Error,
    },

    /// A plugin's dispose hook failed. Hook lists are cleared regardless.
    #[error("plugin `{name}` failed to dispose")]
    PluginDisposeFailure {
        /// Name of the failing plugin.
        name: String,
        /// The hook's own error.
        #[source]
        source: anyhow::Error,
    },

    /// `invoke` was called with a method name no plugin has registered.
    #[error("no plugin method named `{name}`")]
    UnknownMethod {
        /// The requested method name.
        name: String,
    },

    /// A document failed to convert to or from the caller's document type.
    #[error("document codec error: {0}")]
    Codec(#[from] serde_json::Error),
}
