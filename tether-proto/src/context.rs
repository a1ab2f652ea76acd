//! Task-local call-context propagation.
//!
//! A call-context is a name → opaque-bytes map that travels with every call
//! and back with its result. The client snapshots its current context at the
//! point of each outbound call; the server restores the snapshot into a
//! task-local slot for the duration of the invocation; mutations made by the
//! service flow back and merge into the caller's context.
//!
//! Propagation is explicit: wrap a future in [`CallContext::scope`] to
//! install a context. Outside any scope, [`CallContext::snapshot`] is empty
//! and returned entries are dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::messages::ContextEntry;

tokio::task_local! {
    static CURRENT: CallContext;
}

/// A shared, mutable name → value map scoped to one logical task tree.
///
/// Cheap to clone; clones share the same underlying map.
#[derive(Clone, Default)]
pub struct CallContext {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl CallContext {
    /// An empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from wire entries.
    pub fn from_entries(entries: Vec<ContextEntry>) -> Self {
        let map = entries.into_iter().map(|e| (e.name, e.value)).collect();
        Self { entries: Arc::new(Mutex::new(map)) }
    }

    /// Set an entry.
    pub fn set(&self, name: impl Into<String>, value: Vec<u8>) {
        self.entries.lock().unwrap().insert(name.into(), value);
    }

    /// Read an entry.
    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.entries.lock().unwrap().get(name).cloned()
    }

    /// Remove an entry, returning its previous value.
    pub fn remove(&self, name: &str) -> Option<Vec<u8>> {
        self.entries.lock().unwrap().remove(name)
    }

    /// Snapshot all entries in unspecified order.
    pub fn entries(&self) -> Vec<ContextEntry> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(name, value)| ContextEntry { name: name.clone(), value: value.clone() })
            .collect()
    }

    /// Merge `entries` into this context, overwriting existing names.
    pub fn merge(&self, entries: Vec<ContextEntry>) {
        let mut map = self.entries.lock().unwrap();
        for e in entries {
            map.insert(e.name, e.value);
        }
    }

    /// Run `fut` with `self` installed as the task-local context.
    pub async fn scope<F>(self, fut: F) -> F::Output
    where
        F: std::future::Future,
    {
        CURRENT.scope(self, fut).await
    }

    /// The context installed on the current task, if any.
    pub fn current() -> Option<CallContext> {
        CURRENT.try_with(|c| c.clone()).ok()
    }

    /// Wire snapshot of the current task's context; empty outside a scope.
    pub fn snapshot() -> Vec<ContextEntry> {
        Self::current().map(|c| c.entries()).unwrap_or_default()
    }

    /// Merge returned entries into the current task's context, if one is
    /// installed.
    pub fn merge_current(entries: Vec<ContextEntry>) {
        if let Some(c) = Self::current() {
            c.merge(entries);
        }
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let map = self.entries.lock().unwrap();
        f.debug_struct("CallContext").field("entries", &map.len()).finish()
    }
}
