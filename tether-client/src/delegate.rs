//! Client-side delegate handlers.
//!
//! A [`RemoteDelegate`] wraps a local callback so it can travel as a call
//! argument: the first subscription generates a fresh 128-bit handler key and
//! registers the callback in the client's handler map; further subscriptions
//! of the same delegate increment a ref-count, and unsubscriptions decrement
//! it. When the count reaches zero the handler is removed and the next
//! subscription produces a fresh key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tether_proto::fault::FaultRecord;
use tether_proto::{DelegateSignature, HandlerKey};

/// The local callback type: raw argument blobs in, optional serialized
/// return value out.
pub type DelegateCallback =
    Arc<dyn Fn(Vec<Vec<u8>>) -> Result<Option<Vec<u8>>, FaultRecord> + Send + Sync>;

struct DelegateInner {
    signature: DelegateSignature,
    callback: DelegateCallback,
    key: Mutex<Option<HandlerKey>>,
}

/// A local callback that can be passed to a remote method. Cheap to clone;
/// clones are the same logical delegate.
#[derive(Clone)]
pub struct RemoteDelegate {
    inner: Arc<DelegateInner>,
}

impl RemoteDelegate {
    /// Wrap `callback` with the given signature.
    pub fn new<F>(signature: DelegateSignature, callback: F) -> Self
    where
        F: Fn(Vec<Vec<u8>>) -> Result<Option<Vec<u8>>, FaultRecord> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(DelegateInner {
                signature,
                callback: Arc::new(callback),
                key: Mutex::new(None),
            }),
        }
    }

    /// The delegate's declared signature.
    pub fn signature(&self) -> &DelegateSignature {
        &self.inner.signature
    }

    /// The currently registered handler key, if subscribed.
    pub fn current_key(&self) -> Option<HandlerKey> {
        *self.inner.key.lock().unwrap()
    }
}

struct HandlerEntry {
    callback: DelegateCallback,
    signature: DelegateSignature,
    refcount: usize,
}

/// The client's handler map: handler key → callback, with per-key
/// ref-counting across outstanding subscriptions.
#[derive(Default)]
pub struct DelegateHandlers {
    map: Mutex<HashMap<HandlerKey, HandlerEntry>>,
}

impl DelegateHandlers {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-reference) `delegate`, returning the key to ship.
    pub fn subscribe(&self, delegate: &RemoteDelegate) -> HandlerKey {
        let mut key_slot = delegate.inner.key.lock().unwrap();
        let mut map = self.map.lock().unwrap();
        match *key_slot {
            Some(key) => {
                if let Some(entry) = map.get_mut(&key) {
                    entry.refcount += 1;
                    return key;
                }
                // Stale key (map was cleared); fall through to re-register.
                *key_slot = None;
                self.register_locked(&mut map, &mut key_slot, delegate)
            }
            None => self.register_locked(&mut map, &mut key_slot, delegate),
        }
    }

    fn register_locked(
        &self,
        map: &mut HashMap<HandlerKey, HandlerEntry>,
        key_slot: &mut Option<HandlerKey>,
        delegate: &RemoteDelegate,
    ) -> HandlerKey {
        let key = HandlerKey::generate();
        map.insert(
            key,
            HandlerEntry {
                callback: delegate.inner.callback.clone(),
                signature: delegate.inner.signature.clone(),
                refcount: 1,
            },
        );
        *key_slot = Some(key);
        key
    }

    /// Undo one `subscribe` whose call never reached the server.
    pub fn rollback_subscribe(&self, delegate: &RemoteDelegate) {
        self.decrement(delegate);
    }

    /// Confirm one successful unsubscription.
    pub fn confirm_release(&self, delegate: &RemoteDelegate) {
        self.decrement(delegate);
    }

    fn decrement(&self, delegate: &RemoteDelegate) {
        let mut key_slot = delegate.inner.key.lock().unwrap();
        let Some(key) = *key_slot else { return };
        let mut map = self.map.lock().unwrap();
        if let Some(entry) = map.get_mut(&key) {
            entry.refcount -= 1;
            if entry.refcount == 0 {
                map.remove(&key);
                *key_slot = None;
            }
        } else {
            *key_slot = None;
        }
    }

    /// The callback and signature bound to `key`, if still registered.
    pub fn lookup(&self, key: &HandlerKey) -> Option<(DelegateCallback, DelegateSignature)> {
        self.map
            .lock()
            .unwrap()
            .get(key)
            .map(|e| (e.callback.clone(), e.signature.clone()))
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.map.lock().unwrap().len()
    }

    /// Whether no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.map.lock().unwrap().is_empty()
    }
}
