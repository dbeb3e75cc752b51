//! The transactional store: the only thing callers mutate.
//!
//! A [`Store`] is a typed facade over one resource map and one clock. Every
//! mutation path -- the `add`/`update`/`del` conveniences included -- runs
//! through [`Store::begin`]: the document table is cloned shallowly into a
//! staging map, the transaction callback mutates staging while buffering what
//! it did, and on success the staging table atomically replaces the live one.
//! Mutation events then fire as batches in the order `add -> update ->
//! delete`, driving live queries first and plugin hooks second; a rolled-back
//! or failed callback leaves no trace beyond its own error.
//!
//! Synchronization is whole-state: [`Store::collection`] exports a snapshot,
//! [`Store::merge`] folds a remote one in and emits the same event batches a
//! local transaction would, classified per document.
//!
//! # Concurrency
//!
//! The store is a cheap-clone handle; all state sits behind coarse locks.
//! One transaction (or merge) runs at a time, and its events are emitted
//! before the next one starts. Reads are allowed anywhere -- including from
//! hooks and query callbacks, which run after the data lock is released --
//! but opening a transaction from inside a hook or transaction deadlocks by
//! construction and is not supported.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::clock::{Clock, ClockSource, SystemClock};
use crate::collection::{ChangeSet, Collection};
use crate::error::StoreError;
use crate::plugin::Plugin;
use crate::query::{Query, QueryConfig, QueryCore, QueryRegistry, QuerySink};
use crate::resource::ResourceMap;
use crate::value::{from_value, to_value, Value};

/// Built-in API names plugin methods may not shadow.
const RESERVED_METHODS: &[&str] = &[
    "add",
    "add_with_id",
    "begin",
    "begin_with_options",
    "collection",
    "del",
    "dispose",
    "entries",
    "get",
    "has",
    "init",
    "invoke",
    "merge",
    "query",
    "update",
    "use_plugin",
];

/// Options for [`Store::begin_with_options`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionOptions {
    /// Suppress mutation events for this transaction. Merges ignore this --
    /// they always emit.
    pub silent: bool,
}

type MethodFn = dyn Fn(Value) -> Result<Value, StoreError> + Send + Sync;

struct StoreInner<T> {
    resources: Mutex<ResourceMap>,
    /// Serializes transactions and merges, and their event emission.
    transaction: Mutex<()>,
    plugins: Mutex<Vec<Arc<dyn Plugin<T>>>>,
    methods: Mutex<HashMap<String, Arc<MethodFn>>>,
    queries: QueryRegistry<T>,
}

/// One store's batched mutation events.
struct MutationBatch<T> {
    added: Vec<(String, T)>,
    updated: Vec<(String, T)>,
    deleted: Vec<String>,
}

impl<T> MutationBatch<T> {
    fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// A local-first document store with automatic conflict resolution.
///
/// Typed over the document shape `T`, which converts through serde; the
/// conflict resolution underneath is schema-agnostic and field-level.
/// Cloning a `Store` clones a handle to the same state.
///
/// # Examples
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use roost_core::store::Store;
///
/// #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// struct User {
///     name: String,
/// }
///
/// let store: Store<User> = Store::new();
/// store.add_with_id("u1", User { name: "Alice".into() }).unwrap();
/// assert_eq!(store.get("u1").unwrap().unwrap().name, "Alice");
/// ```
pub struct Store<T> {
    inner: Arc<StoreInner<T>>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Store<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Store<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Creates an empty store over the real system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock_source(Box::new(SystemClock))
    }

    /// Creates an empty store over an injected clock source.
    #[must_use]
    pub fn with_clock_source(source: Box<dyn ClockSource>) -> Self {
        let clock = Arc::new(Mutex::new(Clock::new(source)));
        Self {
            inner: Arc::new(StoreInner {
                resources: Mutex::new(ResourceMap::new(clock)),
                transaction: Mutex::new(()),
                plugins: Mutex::new(Vec::new()),
                methods: Mutex::new(HashMap::new()),
                queries: QueryRegistry::new(),
            }),
        }
    }

    /// The restricted view handed to plugins: the data API without
    /// `use_plugin`/`init`/`dispose`.
    #[must_use]
    pub fn handle(&self) -> StoreHandle<T> {
        StoreHandle {
            store: self.clone(),
        }
    }

    // ---- reads ----

    /// Whether a visible document exists under `id`.
    #[must_use]
    pub fn has(&self, id: &str) -> bool {
        self.inner.resources.lock().has(id, false)
    }

    /// Decodes the visible document under `id`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Codec`] when the stored document does not match `T`.
    pub fn get(&self, id: &str) -> Result<Option<T>, StoreError> {
        self.inner
            .resources
            .lock()
            .get(id)
            .map(from_value)
            .transpose()
            .map_err(StoreError::from)
    }

    /// Decodes every visible document.
    ///
    /// # Errors
    ///
    /// [`StoreError::Codec`] when a stored document does not match `T`.
    pub fn entries(&self) -> Result<Vec<(String, T)>, StoreError> {
        self.inner
            .resources
            .lock()
            .entries()
            .map(|(id, value)| Ok((id, from_value(value)?)))
            .collect()
    }

    /// Exports the whole-collection snapshot: the unit of synchronization.
    #[must_use]
    pub fn collection(&self) -> Collection {
        self.inner.resources.lock().snapshot()
    }

    // ---- single-operation transactions ----

    /// Inserts a document under a fresh UUID id. Returns the id.
    ///
    /// # Errors
    ///
    /// [`StoreError::Codec`] when `value` does not serialize to a record.
    pub fn add(&self, value: T) -> Result<String, StoreError> {
        self.begin(move |tx| tx.add(value))
    }

    /// Inserts a document under `id`, overwriting any existing entry.
    ///
    /// # Errors
    ///
    /// [`StoreError::Codec`] when `value` does not serialize to a record.
    pub fn add_with_id(&self, id: &str, value: T) -> Result<(), StoreError> {
        self.begin(move |tx| tx.add_with_id(id, value))
    }

    /// Merges a partial value into the document under `id` (field-level
    /// last-write-wins); inserts when the id is unknown. Returns the merged
    /// document.
    ///
    /// # Errors
    ///
    /// [`StoreError::StructureMismatch`] when the partial disagrees with the
    /// stored record's shape; [`StoreError::Codec`] when the patch does not
    /// serialize or the merged document no longer matches `T`.
    pub fn update<P: Serialize>(&self, id: &str, patch: &P) -> Result<T, StoreError> {
        self.begin(|tx| tx.update(id, patch))
    }

    /// Soft-deletes the document under `id`. Unknown ids are a no-op.
    ///
    /// # Errors
    ///
    /// None today; `Result` for parity with the other mutation paths.
    pub fn del(&self, id: &str) -> Result<(), StoreError> {
        self.begin(|tx| {
            tx.del(id);
            Ok(())
        })
    }

    // ---- transactions ----

    /// Runs `f` inside a transaction and commits unless it rolled back.
    ///
    /// See [`Store::begin_with_options`].
    ///
    /// # Errors
    ///
    /// Whatever `f` returns; the staging state is discarded and the error
    /// propagates unchanged.
    pub fn begin<R, E>(
        &self,
        f: impl FnOnce(&mut Transaction<T>) -> Result<R, E>,
    ) -> Result<R, E>
    where
        E: From<StoreError>,
    {
        self.begin_with_options(f, TransactionOptions::default())
    }

    /// Runs `f` against a staging copy of the store.
    ///
    /// If `f` succeeds and did not call [`Transaction::rollback`], staging
    /// replaces the live table atomically and the buffered mutations fire as
    /// events -- `add` then `update` then `delete`, each kind one batch,
    /// empty batches skipped -- unless `options.silent`. If `f` fails (or
    /// panics), staging is dropped and nothing happened as far as any
    /// observer can tell.
    ///
    /// # Errors
    ///
    /// Whatever `f` returns, unchanged.
    pub fn begin_with_options<R, E>(
        &self,
        f: impl FnOnce(&mut Transaction<T>) -> Result<R, E>,
        options: TransactionOptions,
    ) -> Result<R, E>
    where
        E: From<StoreError>,
    {
        let _guard = self.inner.transaction.lock();
        let staging = self.inner.resources.lock().clone_for_staging();
        let mut tx = Transaction {
            staging,
            added: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
            rolled_back: false,
        };

        let result = f(&mut tx)?;
        if tx.rolled_back {
            return Ok(result);
        }

        let batch = MutationBatch {
            added: tx.added,
            updated: tx.updated,
            deleted: tx.deleted,
        };
        self.inner
            .resources
            .lock()
            .replace_documents(tx.staging.into_documents());
        tracing::debug!(
            added = batch.added.len(),
            updated = batch.updated.len(),
            deleted = batch.deleted.len(),
            "committed transaction"
        );
        if !options.silent {
            self.emit(&batch);
        }
        Ok(result)
    }

    // ---- synchronization ----

    /// Merges a remote snapshot and emits the classified mutation events.
    /// Merges always emit; there is no silent variant.
    ///
    /// # Errors
    ///
    /// [`StoreError::StructureMismatch`] when the snapshot structurally
    /// disagrees with local documents -- nothing is committed.
    /// [`StoreError::Codec`] when a merged document does not match `T`; the
    /// data merge has already committed by then, like any failure in an
    /// observer.
    pub fn merge(&self, snapshot: &Collection) -> Result<(), StoreError> {
        let _guard = self.inner.transaction.lock();
        let changes = self.inner.resources.lock().merge(snapshot)?;
        let batch = Self::decode_changes(&changes)?;
        self.emit(&batch);
        Ok(())
    }

    fn decode_changes(changes: &ChangeSet) -> Result<MutationBatch<T>, StoreError> {
        let mut added = Vec::with_capacity(changes.added.len());
        for (id, doc) in &changes.added {
            added.push((id.clone(), from_value(doc.data.decode())?));
        }
        let mut updated = Vec::with_capacity(changes.updated.len());
        for (id, doc) in &changes.updated {
            updated.push((id.clone(), from_value(doc.data.decode())?));
        }
        Ok(MutationBatch {
            added,
            updated,
            deleted: changes.deleted.iter().cloned().collect(),
        })
    }

    // ---- queries ----

    /// Opens a reactive query: hydrates it from the current visible entries
    /// and keeps it incrementally maintained from this store's events.
    ///
    /// # Errors
    ///
    /// [`StoreError::Codec`] when an existing document does not match `T`.
    pub fn query<U>(&self, config: QueryConfig<T, U>) -> Result<Query<T, U>, StoreError>
    where
        U: Clone + Send + Sync + 'static,
    {
        let core = Arc::new(QueryCore::new(config));
        {
            let resources = self.inner.resources.lock();
            for (id, value) in resources.entries() {
                let value: T = from_value(value)?;
                core.seed(&id, &value);
            }
        }
        let core_dyn: Arc<dyn QuerySink<T>> = core.clone();
        let sink: Weak<dyn QuerySink<T>> = Arc::downgrade(&core_dyn);
        self.inner.queries.register(sink);
        Ok(Query::new(core))
    }

    // ---- plugins ----

    /// Registers a plugin: its mutation hooks join the event fan-out and its
    /// methods become reachable through [`Store::invoke`].
    ///
    /// # Errors
    ///
    /// [`StoreError::PluginConflict`] when a contributed method name shadows
    /// the built-in API or an already registered method; the plugin is not
    /// registered at all in that case.
    pub fn use_plugin(&self, plugin: Arc<dyn Plugin<T>>) -> Result<(), StoreError> {
        let methods = plugin.methods(self.handle());
        {
            let mut registered = self.inner.methods.lock();
            let mut accepted: HashMap<String, Arc<MethodFn>> = HashMap::new();
            for (name, method) in methods {
                if RESERVED_METHODS.contains(&name.as_str())
                    || registered.contains_key(&name)
                    || accepted.contains_key(&name)
                {
                    return Err(StoreError::PluginConflict { name });
                }
                accepted.insert(name, Arc::from(method));
            }
            registered.extend(accepted);
        }
        self.inner.plugins.lock().push(plugin);
        Ok(())
    }

    /// Calls a plugin-contributed method by name.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownMethod`] when no such method is registered,
    /// otherwise whatever the method returns.
    pub fn invoke(&self, name: &str, args: Value) -> Result<Value, StoreError> {
        let method = self
            .inner
            .methods
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::UnknownMethod {
                name: name.to_string(),
            })?;
        method(args)
    }

    /// Runs every plugin's `on_init` hook in registration order, awaiting
    /// each.
    ///
    /// # Errors
    ///
    /// [`StoreError::PluginInitFailure`] wrapping the first hook failure;
    /// later plugins are not initialized.
    pub async fn init(&self) -> Result<(), StoreError> {
        let plugins: Vec<Arc<dyn Plugin<T>>> = self.inner.plugins.lock().clone();
        for plugin in plugins {
            plugin
                .on_init(self.handle())
                .await
                .map_err(|source| StoreError::PluginInitFailure {
                    name: plugin.name().to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Runs every plugin's `on_dispose` hook in reverse registration order,
    /// then the store is inert: plugins, methods, and queries are all
    /// deregistered (before the hooks run, so a failing hook cannot leave a
    /// half-disposed store observing events).
    ///
    /// # Errors
    ///
    /// [`StoreError::PluginDisposeFailure`] wrapping the first hook failure.
    pub async fn dispose(&self) -> Result<(), StoreError> {
        let plugins: Vec<Arc<dyn Plugin<T>>> = std::mem::take(&mut *self.inner.plugins.lock());
        self.inner.methods.lock().clear();
        self.inner.queries.clear();

        for plugin in plugins.iter().rev() {
            plugin
                .on_dispose()
                .await
                .map_err(|source| StoreError::PluginDisposeFailure {
                    name: plugin.name().to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    // ---- event fan-out ----

    fn emit(&self, batch: &MutationBatch<T>) {
        if batch.is_empty() {
            return;
        }
        let sinks = self.inner.queries.live();
        let mut dirty = vec![false; sinks.len()];
        let plugins: Vec<Arc<dyn Plugin<T>>> = self.inner.plugins.lock().clone();

        if !batch.added.is_empty() {
            for (sink, dirty) in sinks.iter().zip(dirty.iter_mut()) {
                *dirty |= sink.apply_add(&batch.added);
            }
            for plugin in &plugins {
                plugin.on_add(&batch.added);
            }
        }
        if !batch.updated.is_empty() {
            for (sink, dirty) in sinks.iter().zip(dirty.iter_mut()) {
                *dirty |= sink.apply_update(&batch.updated);
            }
            for plugin in &plugins {
                plugin.on_update(&batch.updated);
            }
        }
        if !batch.deleted.is_empty() {
            for (sink, dirty) in sinks.iter().zip(dirty.iter_mut()) {
                *dirty |= sink.apply_delete(&batch.deleted);
            }
            for plugin in &plugins {
                plugin.on_delete(&batch.deleted);
            }
        }

        for (sink, dirty) in sinks.iter().zip(dirty) {
            if dirty {
                sink.notify();
            }
        }
    }
}

/// A transaction handle: mutates staging only, buffers events.
pub struct Transaction<T> {
    staging: ResourceMap,
    added: Vec<(String, T)>,
    updated: Vec<(String, T)>,
    deleted: Vec<String>,
    rolled_back: bool,
}

impl<T> Transaction<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Stages an insert under a fresh UUID id. Returns the id.
    ///
    /// # Errors
    ///
    /// [`StoreError::Codec`] when `value` does not serialize.
    pub fn add(&mut self, value: T) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        self.add_with_id(&id, value)?;
        Ok(id)
    }

    /// Stages an insert under `id`, overwriting any staged entry.
    ///
    /// # Errors
    ///
    /// [`StoreError::Codec`] when `value` does not serialize.
    pub fn add_with_id(&mut self, id: &str, value: T) -> Result<(), StoreError> {
        let encoded = to_value(&value)?;
        self.staging.add(id, &encoded);
        self.added.push((id.to_string(), value));
        Ok(())
    }

    /// Stages a field-level merge of `patch` into `id`; inserts when the id
    /// is unknown. Returns (and buffers) the merged document.
    ///
    /// # Errors
    ///
    /// [`StoreError::StructureMismatch`] or [`StoreError::Codec`], as for
    /// [`Store::update`].
    pub fn update<P: Serialize>(&mut self, id: &str, patch: &P) -> Result<T, StoreError> {
        let patch = to_value(patch)?;
        let merged = self.staging.update(id, &patch)?;
        let value: T = from_value(merged)?;
        // Updates landing under a tombstone refresh the carried data but stay
        // invisible, so they do not join the event batch.
        if self.staging.has(id, false) {
            self.updated.push((id.to_string(), value.clone()));
        }
        Ok(value)
    }

    /// Stages a soft delete. Ids not present in staging are a no-op.
    pub fn del(&mut self, id: &str) {
        if self.staging.delete(id) {
            self.deleted.push(id.to_string());
        }
    }

    /// Reads the staged visible document under `id` -- this transaction's
    /// own writes included.
    ///
    /// # Errors
    ///
    /// [`StoreError::Codec`] when the staged document does not match `T`.
    pub fn get(&self, id: &str) -> Result<Option<T>, StoreError> {
        self.staging
            .get(id)
            .map(from_value)
            .transpose()
            .map_err(StoreError::from)
    }

    /// Marks the transaction rolled back: further writes still run against
    /// staging, but nothing will be committed and no events will fire.
    pub fn rollback(&mut self) {
        self.rolled_back = true;
    }
}

/// The store view handed to plugins: the data API without
/// `use_plugin`/`init`/`dispose`.
pub struct StoreHandle<T> {
    store: Store<T>,
}

impl<T> Clone for StoreHandle<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<T> StoreHandle<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// See [`Store::has`].
    #[must_use]
    pub fn has(&self, id: &str) -> bool {
        self.store.has(id)
    }

    /// See [`Store::get`].
    ///
    /// # Errors
    ///
    /// As [`Store::get`].
    pub fn get(&self, id: &str) -> Result<Option<T>, StoreError> {
        self.store.get(id)
    }

    /// See [`Store::entries`].
    ///
    /// # Errors
    ///
    /// As [`Store::entries`].
    pub fn entries(&self) -> Result<Vec<(String, T)>, StoreError> {
        self.store.entries()
    }

    /// See [`Store::add`].
    ///
    /// # Errors
    ///
    /// As [`Store::add`].
    pub fn add(&self, value: T) -> Result<String, StoreError> {
        self.store.add(value)
    }

    /// See [`Store::add_with_id`].
    ///
    /// # Errors
    ///
    /// As [`Store::add_with_id`].
    pub fn add_with_id(&self, id: &str, value: T) -> Result<(), StoreError> {
        self.store.add_with_id(id, value)
    }

    /// See [`Store::update`].
    ///
    /// # Errors
    ///
    /// As [`Store::update`].
    pub fn update<P: Serialize>(&self, id: &str, patch: &P) -> Result<T, StoreError> {
        self.store.update(id, patch)
    }

    /// See [`Store::del`].
    ///
    /// # Errors
    ///
    /// As [`Store::del`].
    pub fn del(&self, id: &str) -> Result<(), StoreError> {
        self.store.del(id)
    }

    /// See [`Store::begin`].
    ///
    /// # Errors
    ///
    /// As [`Store::begin`].
    pub fn begin<R, E>(
        &self,
        f: impl FnOnce(&mut Transaction<T>) -> Result<R, E>,
    ) -> Result<R, E>
    where
        E: From<StoreError>,
    {
        self.store.begin(f)
    }

    /// See [`Store::collection`].
    #[must_use]
    pub fn collection(&self) -> Collection {
        self.store.collection()
    }

    /// See [`Store::merge`].
    ///
    /// # Errors
    ///
    /// As [`Store::merge`].
    pub fn merge(&self, snapshot: &Collection) -> Result<(), StoreError> {
        self.store.merge(snapshot)
    }

    /// See [`Store::query`].
    ///
    /// # Errors
    ///
    /// As [`Store::query`].
    pub fn query<U>(&self, config: QueryConfig<T, U>) -> Result<Query<T, U>, StoreError>
    where
        U: Clone + Send + Sync + 'static,
    {
        self.store.query(config)
    }

    /// See [`Store::invoke`].
    ///
    /// # Errors
    ///
    /// As [`Store::invoke`].
    pub fn invoke(&self, name: &str, args: Value) -> Result<Value, StoreError> {
        self.store.invoke(name, args)
    }
}
