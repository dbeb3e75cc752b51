//! The plugin interface: lifecycle hooks, mutation observers, and
//! name-dispatched store extensions.
//!
//! Plugins subscribe to a store's lifecycle (`on_init` / `on_dispose`, both
//! async and awaited sequentially) and to its mutation event batches
//! (`on_add` / `on_update` / `on_delete`, synchronous observers running after
//! commit). They can also contribute named methods that callers reach through
//! [`Store::invoke`](crate::store::Store::invoke); method names must not
//! shadow the built-in API.
//!
//! Mutation hooks are observers, not gatekeepers: by the time one runs, the
//! data is committed, and a failing hook never rolls it back.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::store::StoreHandle;
use crate::value::Value;

/// A named store extension contributed by a plugin.
///
/// Dispatch is dynamic by name; arguments and results travel as [`Value`] so
/// methods of any shape share one registry.
pub type PluginMethod = Box<dyn Fn(Value) -> Result<Value, StoreError> + Send + Sync>;

/// A store plugin.
///
/// Every hook has a default no-op implementation; a plugin overrides only
/// what it needs. Used as `Arc<dyn Plugin<T>>`.
#[async_trait]
pub trait Plugin<T: Send + Sync + 'static>: Send + Sync {
    /// Stable name, used in error reports.
    fn name(&self) -> &str;

    /// Runs during [`Store::init`](crate::store::Store::init), in
    /// registration order. A failure aborts initialization.
    ///
    /// # Errors
    ///
    /// Any error; the store wraps it with this plugin's name.
    async fn on_init(&self, store: StoreHandle<T>) -> anyhow::Result<()> {
        let _ = store;
        Ok(())
    }

    /// Runs during [`Store::dispose`](crate::store::Store::dispose), in
    /// reverse registration order.
    ///
    /// # Errors
    ///
    /// Any error; hook lists are cleared regardless.
    async fn on_dispose(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// One batch of documents added by a committed transaction or merge,
    /// in the order the operations were issued.
    fn on_add(&self, entries: &[(String, T)]) {
        let _ = entries;
    }

    /// One batch of updated documents with their merged values.
    fn on_update(&self, entries: &[(String, T)]) {
        let _ = entries;
    }

    /// One batch of tombstoned document ids.
    fn on_delete(&self, keys: &[String]) {
        let _ = keys;
    }

    /// Methods to attach to the store, typically closing over `store`.
    ///
    /// Called once, at registration. Name collisions fail
    /// [`use_plugin`](crate::store::Store::use_plugin) with
    /// [`StoreError::PluginConflict`].
    fn methods(&self, store: StoreHandle<T>) -> Vec<(String, PluginMethod)> {
        let _ = store;
        Vec::new()
    }
}
