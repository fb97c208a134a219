use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam::channel::Sender;
use serde_json::Value;

use super::SharedHandler;
use crate::error::LmStudioError;

pub(crate) type RpcSink = Sender<Result<Value, LmStudioError>>;

#[derive(Debug)]
pub(crate) struct PendingCall {
    pub endpoint: String,
    pub sink: RpcSink,
}

#[derive(Debug)]
struct Entries<V> {
    entries: HashMap<u64, V>,
    closed: bool,
}

/// In-flight records keyed by id. Once drained, the registry refuses new entries
/// so nothing registered after the socket closed can wait forever.
#[derive(Debug)]
pub(crate) struct Registry<V> {
    inner: Mutex<Entries<V>>,
}

impl<V> Default for Registry<V> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Entries {
                entries: HashMap::new(),
                closed: false,
            }),
        }
    }
}

impl<V> Registry<V> {
    fn lock(&self) -> MutexGuard<'_, Entries<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, id: u64, value: V) -> Result<(), LmStudioError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(LmStudioError::ConnectionClosed);
        }
        if inner.entries.insert(id, value).is_some() {
            log::error!("Id {id} registered twice");
        }
        Ok(())
    }

    pub fn remove(&self, id: u64) -> Option<V> {
        self.lock().entries.remove(&id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.lock().entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Removes every entry and closes the registry.
    pub fn drain(&self) -> Vec<(u64, V)> {
        let mut inner = self.lock();
        inner.closed = true;
        let mut drained: Vec<_> = inner.entries.drain().collect();
        drained.sort_by_key(|(id, _)| *id);
        drained
    }
}

impl<V: Clone> Registry<V> {
    pub fn get(&self, id: u64) -> Option<V> {
        self.lock().entries.get(&id).cloned()
    }
}

#[derive(Default)]
pub(crate) struct PortRegistry {
    pub rpcs: Registry<PendingCall>,
    pub channels: Registry<SharedHandler>,
}

impl PortRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_remove_round_trip() {
        let registry = Registry::<&str>::default();
        registry.insert(1, "a").unwrap();
        registry.insert(2, "b").unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(1));
        assert_eq!(registry.get(2), Some("b"));

        assert_eq!(registry.remove(1), Some("a"));
        assert_eq!(registry.remove(1), None);
        assert!(!registry.contains(1));
    }

    #[test]
    fn drained_registry_rejects_new_entries() {
        let registry = Registry::<&str>::default();
        registry.insert(3, "c").unwrap();
        registry.insert(1, "a").unwrap();

        assert_eq!(registry.drain(), vec![(1, "a"), (3, "c")]);
        assert_eq!(registry.len(), 0);
        assert_eq!(registry.insert(4, "d"), Err(LmStudioError::ConnectionClosed));
    }
}
