//! Process-wide session registry: `id -> SessionHandle`, lazily loaded
//! from the store, with deferred eviction of idle sessions.
//!
//! The map lock is only ever held for lookup/insert; store reads and the
//! skeleton persist for brand-new sessions happen outside it. Eviction is
//! epoch-guarded: any re-reference bumps the entry's epoch, which disarms
//! every timer scheduled before it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::session::{self, SessionHandle};
use crate::store::{BoardStore, SessionRecord, StoreError};

/// How long a session stays loaded after its subscriber set empties.
pub const EVICTION_DELAY: Duration = Duration::from_secs(60);

struct Entry {
    handle: SessionHandle,
    epoch: u64,
}

struct RegistryInner {
    store: BoardStore,
    sessions: Mutex<HashMap<String, Entry>>,
    eviction_delay: Duration,
}

/// Cloneable registry handle; clones share the same map and store.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    pub fn new(store: BoardStore) -> Self {
        Self::with_eviction_delay(store, EVICTION_DELAY)
    }

    pub fn with_eviction_delay(store: BoardStore, eviction_delay: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                store,
                sessions: Mutex::new(HashMap::new()),
                eviction_delay,
            }),
        }
    }

    pub fn store(&self) -> &BoardStore {
        &self.inner.store
    }

    /// The session for `id`, rehydrated from the store or freshly created.
    /// A brand-new session has its skeleton persisted before the handle is
    /// returned.
    pub async fn get_or_create(&self, id: &str) -> Result<SessionHandle, StoreError> {
        if let Some(handle) = self.touch(id) {
            return Ok(handle);
        }
        let record = match self.inner.store.get_async(id).await? {
            Some(record) => record,
            None => {
                let record = SessionRecord::new(id);
                self.inner.store.put_async(record.clone()).await?;
                log::info!("created session {}", id);
                record
            }
        };
        Ok(self.insert(record))
    }

    /// The session for `id` only if it is loaded or persisted.
    pub async fn get(&self, id: &str) -> Result<Option<SessionHandle>, StoreError> {
        if let Some(handle) = self.touch(id) {
            return Ok(Some(handle));
        }
        match self.inner.store.get_async(id).await? {
            Some(record) => Ok(Some(self.insert(record))),
            None => Ok(None),
        }
    }

    /// Arm an eviction timer for `id` at its current epoch. Fires after the
    /// eviction delay; a session that was re-referenced or still has
    /// subscribers by then stays loaded.
    pub fn schedule_eviction(&self, id: &str) {
        let epoch = match self.lock().get(id) {
            Some(entry) => entry.epoch,
            None => return,
        };
        let registry = self.clone();
        let id = id.to_owned();
        tokio::spawn(async move {
            tokio::time::sleep(registry.inner.eviction_delay).await;
            registry.try_evict(&id, epoch).await;
        });
    }

    pub fn is_loaded(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn loaded_count(&self) -> usize {
        self.lock().len()
    }

    fn touch(&self, id: &str) -> Option<SessionHandle> {
        let mut sessions = self.lock();
        sessions.get_mut(id).map(|entry| {
            entry.epoch += 1;
            entry.handle.clone()
        })
    }

    fn insert(&self, record: SessionRecord) -> SessionHandle {
        let id = record.id.clone();
        let handle = {
            let mut sessions = self.lock();
            if let Some(entry) = sessions.get_mut(&id) {
                // Lost a load race; the session already in the map wins.
                entry.epoch += 1;
                return entry.handle.clone();
            }
            let handle = session::spawn(record, self.inner.store.clone());
            sessions.insert(
                id.clone(),
                Entry {
                    handle: handle.clone(),
                    epoch: 0,
                },
            );
            handle
        };
        // Loaded with zero subscribers; do not let it linger if nobody
        // attaches.
        self.schedule_eviction(&id);
        handle
    }

    async fn try_evict(&self, id: &str, epoch: u64) {
        let handle = match self.lock().get(id) {
            Some(entry) if entry.epoch == epoch => entry.handle.clone(),
            Some(_) => {
                // Re-referenced since the timer was armed; check again one
                // delay later.
                self.schedule_eviction(id);
                return;
            }
            None => return,
        };
        if handle.subscriber_count().await.unwrap_or(0) > 0 {
            // A live subscriber's eventual detach re-arms the timer.
            return;
        }
        let mut sessions = self.lock();
        if sessions.get(id).map(|entry| entry.epoch) == Some(epoch) {
            sessions.remove(id);
            log::info!("evicted idle session {}", id);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.inner.sessions.lock().expect("registry lock poisoned")
    }
}
