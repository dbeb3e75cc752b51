//! Reactive queries: incrementally maintained views over a store.
//!
//! A query is a filter plus an optional projection and ordering. It hydrates
//! once from the store's visible entries and is then maintained incrementally
//! from mutation event batches -- no rescan on change. After each batch, a
//! query whose cached results were touched fires its change callbacks exactly
//! once.
//!
//! Queries cache projected results keyed by document id; reads return cloned
//! snapshots, so callbacks may freely read the query (or the store) without
//! holding any internal lock.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Filter, projection, and ordering of one query.
///
/// Built fluently: [`QueryConfig::filter`] starts with the identity
/// projection, [`select`](QueryConfig::select) replaces it,
/// [`order`](QueryConfig::order) sorts on the projected value. `order` must
/// come after `select` -- it compares projections.
pub struct QueryConfig<T, U = T> {
    filter: Box<dyn Fn(&T) -> bool + Send + Sync>,
    select: Box<dyn Fn(&T) -> U + Send + Sync>,
    order: Option<Box<dyn Fn(&U, &U) -> Ordering + Send + Sync>>,
}

impl<T: Clone + 'static> QueryConfig<T, T> {
    /// Starts a query matching `predicate`, projecting entries unchanged.
    #[must_use]
    pub fn filter(predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        Self {
            filter: Box::new(predicate),
            select: Box::new(T::clone),
            order: None,
        }
    }
}

impl<T, U> QueryConfig<T, U> {
    /// Replaces the projection. Resets any ordering, which compares
    /// projections of the previous type.
    #[must_use]
    pub fn select<V>(
        self,
        select: impl Fn(&T) -> V + Send + Sync + 'static,
    ) -> QueryConfig<T, V> {
        QueryConfig {
            filter: self.filter,
            select: Box::new(select),
            order: None,
        }
    }

    /// Orders results by comparing projected values.
    ///
    /// The sort is stable and falls back to id order on ties; callers that
    /// need a total tie-break should fold identity into the comparator.
    #[must_use]
    pub fn order(mut self, order: impl Fn(&U, &U) -> Ordering + Send + Sync + 'static) -> Self {
        self.order = Some(Box::new(order));
        self
    }
}

type CallbackList = Vec<(u64, Arc<dyn Fn() + Send + Sync>)>;

/// Shared state of one live query.
pub(crate) struct QueryCore<T, U> {
    filter: Box<dyn Fn(&T) -> bool + Send + Sync>,
    select: Box<dyn Fn(&T) -> U + Send + Sync>,
    order: Option<Box<dyn Fn(&U, &U) -> Ordering + Send + Sync>>,
    results: Mutex<BTreeMap<String, U>>,
    callbacks: Arc<Mutex<CallbackList>>,
    next_callback: AtomicU64,
    disposed: AtomicBool,
}

impl<T, U> QueryCore<T, U> {
    pub(crate) fn new(config: QueryConfig<T, U>) -> Self {
        Self {
            filter: config.filter,
            select: config.select,
            order: config.order,
            results: Mutex::new(BTreeMap::new()),
            callbacks: Arc::new(Mutex::new(Vec::new())),
            next_callback: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
        }
    }

    /// Hydration: considers one existing entry, before any events flow.
    pub(crate) fn seed(&self, id: &str, value: &T) {
        if (self.filter)(value) {
            self.results
                .lock()
                .insert(id.to_string(), (self.select)(value));
        }
    }
}

/// The store-facing half of a query: batch maintenance and notification.
///
/// `apply_*` return whether the batch touched this query's results; the store
/// calls [`notify`](QuerySink::notify) once per touched query per batch.
pub(crate) trait QuerySink<T>: Send + Sync {
    fn apply_add(&self, entries: &[(String, T)]) -> bool;
    fn apply_update(&self, entries: &[(String, T)]) -> bool;
    fn apply_delete(&self, keys: &[String]) -> bool;
    fn notify(&self);
    fn is_disposed(&self) -> bool;
}

impl<T, U> QuerySink<T> for QueryCore<T, U>
where
    T: Send + Sync,
    U: Send + Sync,
{
    fn apply_add(&self, entries: &[(String, T)]) -> bool {
        if self.is_disposed() {
            return false;
        }
        let mut results = self.results.lock();
        let mut dirty = false;
        for (id, value) in entries {
            if (self.filter)(value) {
                results.insert(id.clone(), (self.select)(value));
                dirty = true;
            }
        }
        dirty
    }

    fn apply_update(&self, entries: &[(String, T)]) -> bool {
        if self.is_disposed() {
            return false;
        }
        let mut results = self.results.lock();
        let mut dirty = false;
        for (id, value) in entries {
            let matches = (self.filter)(value);
            let cached = results.contains_key(id);
            match (cached, matches) {
                // Still matching: the projection may have changed.
                (true, true) | (false, true) => {
                    results.insert(id.clone(), (self.select)(value));
                    dirty = true;
                }
                (true, false) => {
                    results.remove(id);
                    dirty = true;
                }
                (false, false) => {}
            }
        }
        dirty
    }

    fn apply_delete(&self, keys: &[String]) -> bool {
        if self.is_disposed() {
            return false;
        }
        let mut results = self.results.lock();
        let mut dirty = false;
        for key in keys {
            dirty |= results.remove(key).is_some();
        }
        dirty
    }

    fn notify(&self) {
        // Snapshot under the lock, invoke outside it, so a callback may
        // subscribe or unsubscribe without deadlocking.
        let callbacks: Vec<Arc<dyn Fn() + Send + Sync>> = self
            .callbacks
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback();
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(AtomicOrdering::Relaxed)
    }
}

/// A live, incrementally maintained view over a store.
///
/// Created by [`Store::query`](crate::store::Store::query). The view stays
/// registered with its store until [`dispose`](Query::dispose); dropping the
/// handle without disposing leaves maintenance running for any clones still
/// alive and deregisters once the last handle drops.
pub struct Query<T, U = T> {
    core: Arc<QueryCore<T, U>>,
}

impl<T, U> Clone for Query<T, U> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T, U> Query<T, U>
where
    U: Clone,
{
    pub(crate) fn new(core: Arc<QueryCore<T, U>>) -> Self {
        Self { core }
    }

    /// A snapshot of the cached results as `(id, projection)` pairs.
    ///
    /// Sorted by the configured ordering when present, ascending id
    /// otherwise.
    #[must_use]
    pub fn results(&self) -> Vec<(String, U)> {
        let mut items: Vec<(String, U)> = self
            .core
            .results
            .lock()
            .iter()
            .map(|(id, value)| (id.clone(), value.clone()))
            .collect();
        if let Some(order) = &self.core.order {
            items.sort_by(|a, b| order(&a.1, &b.1));
        }
        items
    }

    /// Registers a change callback, fired once per mutation batch that
    /// touches this query's results. Returns the unsubscribe handle.
    pub fn on_change(&self, callback: impl Fn() + Send + Sync + 'static) -> Subscription {
        let id = self.core.next_callback.fetch_add(1, AtomicOrdering::Relaxed);
        self.core.callbacks.lock().push((id, Arc::new(callback)));
        Subscription {
            callbacks: Arc::downgrade(&self.core.callbacks),
            id,
        }
    }

    /// Stops maintenance: clears callbacks and cached results and drops the
    /// query from its store's registry on the next event batch.
    pub fn dispose(&self) {
        self.core.disposed.store(true, AtomicOrdering::Relaxed);
        self.core.callbacks.lock().clear();
        self.core.results.lock().clear();
    }
}

/// Undo handle for [`Query::on_change`].
pub struct Subscription {
    callbacks: Weak<Mutex<CallbackList>>,
    id: u64,
}

impl Subscription {
    /// Removes the callback this subscription registered.
    pub fn unsubscribe(self) {
        if let Some(callbacks) = self.callbacks.upgrade() {
            callbacks.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

/// Store-side registry of live queries.
pub(crate) struct QueryRegistry<T> {
    sinks: Mutex<Vec<Weak<dyn QuerySink<T>>>>,
}

impl<T> QueryRegistry<T> {
    pub(crate) fn new() -> Self {
        Self {
            sinks: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn register(&self, sink: Weak<dyn QuerySink<T>>) {
        self.sinks.lock().push(sink);
    }

    /// Live sinks, pruning dropped and disposed queries as a side effect.
    pub(crate) fn live(&self) -> Vec<Arc<dyn QuerySink<T>>> {
        let mut sinks = self.sinks.lock();
        sinks.retain(|sink| sink.upgrade().is_some_and(|sink| !sink.is_disposed()));
        sinks.iter().filter_map(Weak::upgrade).collect()
    }

    pub(crate) fn clear(&self) {
        self.sinks.lock().clear();
    }
}
