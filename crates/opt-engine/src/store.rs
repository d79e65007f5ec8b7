//! The config store: cached, persisted, observed.
//!
//! All mutation funnels through [`ConfigStore::set`] (partial merge) or
//! [`ConfigStore::replace`] (wholesale install, sync pull path). Commits are
//! strictly ordered by arrival: the cache mutex is held across the
//! read-merge-write, so each commit sees the record its predecessor
//! produced. Records handed out are clones; mutating one has no effect on
//! the store.

use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

use opt_core::config::{ConfigPatch, ConfigRecord};
use opt_core::hosts::{Persistence, StorageError};

use crate::observers::ObserverQueue;

pub struct ConfigStore {
    persistence: Arc<dyn Persistence>,
    queue: Arc<ObserverQueue>,
    cache: Mutex<Option<Arc<ConfigRecord>>>,
    changed_tx: broadcast::Sender<u64>,
}

impl ConfigStore {
    pub fn new(persistence: Arc<dyn Persistence>, queue: Arc<ObserverQueue>) -> Self {
        let (changed_tx, _) = broadcast::channel(64);
        Self {
            persistence,
            queue,
            cache: Mutex::new(None),
            changed_tx,
        }
    }

    /// The current record, loading and caching it on first call. Callers
    /// arriving during the initial load queue on the cache lock and reuse
    /// the loaded record instead of issuing duplicate reads.
    pub async fn get(&self) -> Result<ConfigRecord, StorageError> {
        let mut cache = self.cache.lock().await;
        let record = self.loaded(&mut cache).await?;
        Ok((*record).clone())
    }

    /// Merge a partial update over the current record, persist, bump the
    /// revision, then notify: the broadcast channel first (UI refresh), the
    /// observer queue second. Storage failures propagate and leave the
    /// cache untouched.
    pub async fn set(&self, patch: &ConfigPatch) -> Result<ConfigRecord, StorageError> {
        let mut cache = self.cache.lock().await;
        let old = self.loaded(&mut cache).await?;

        let mut merged = (*old).clone();
        merged.apply(patch);
        self.persistence.store(&merged).await?;

        let new = Arc::new(merged);
        *cache = Some(Arc::clone(&new));
        drop(cache);

        let _ = self.changed_tx.send(new.revision);
        self.queue.execute(Arc::clone(&new), old);
        Ok((*new).clone())
    }

    /// Install a record wholesale without touching its revision. This is
    /// the sync pull path: the remote record, revision included, becomes
    /// the local truth.
    pub async fn replace(&self, record: ConfigRecord) -> Result<ConfigRecord, StorageError> {
        let mut cache = self.cache.lock().await;
        let old = self.loaded(&mut cache).await?;

        self.persistence.store(&record).await?;
        let new = Arc::new(record);
        *cache = Some(Arc::clone(&new));
        drop(cache);

        let _ = self.changed_tx.send(new.revision);
        self.queue.execute(Arc::clone(&new), old);
        Ok((*new).clone())
    }

    /// Drop the cache so the next `get` reloads from storage. Used when
    /// another process wrote the persisted key directly.
    pub async fn clear(&self) {
        *self.cache.lock().await = None;
    }

    /// Change notifications carrying the committed revision.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<u64> {
        self.changed_tx.subscribe()
    }

    async fn loaded(
        &self,
        cache: &mut Option<Arc<ConfigRecord>>,
    ) -> Result<Arc<ConfigRecord>, StorageError> {
        if let Some(record) = cache.as_ref() {
            return Ok(Arc::clone(record));
        }
        let record = Arc::new(self.persistence.load().await?.unwrap_or_default());
        *cache = Some(Arc::clone(&record));
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use opt_core::config::PausedEntry;

    use crate::emulated::MemoryPersistence;

    use super::*;

    fn store_on(persistence: Arc<MemoryPersistence>) -> Arc<ConfigStore> {
        let queue = Arc::new(ObserverQueue::new());
        queue.seal();
        Arc::new(ConfigStore::new(persistence, queue))
    }

    #[tokio::test]
    async fn first_get_loads_defaults_when_storage_is_empty() {
        let store = store_on(Arc::new(MemoryPersistence::new()));
        let record = store.get().await.unwrap();
        assert_eq!(record, ConfigRecord::default());
    }

    #[tokio::test]
    async fn revision_increases_by_one_per_commit() {
        let store = store_on(Arc::new(MemoryPersistence::new()));
        for expected in 1..=5u64 {
            let record = store.set(&ConfigPatch::default()).await.unwrap();
            assert_eq!(record.revision, expected);
        }
    }

    #[tokio::test]
    async fn concurrent_sets_are_serialized_not_lost() {
        let store = store_on(Arc::new(MemoryPersistence::new()));
        let mut handles = Vec::new();
        for i in 0..10 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .set(&ConfigPatch::pause(
                        format!("site-{i}.example"),
                        PausedEntry {
                            revoke_at: None,
                            assist: false,
                        },
                    ))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let record = store.get().await.unwrap();
        assert_eq!(record.revision, 10);
        assert_eq!(record.paused.len(), 10);
    }

    #[tokio::test]
    async fn set_persists_and_clear_reloads() {
        let persistence = Arc::new(MemoryPersistence::new());
        let store = store_on(Arc::clone(&persistence));
        store
            .set(&ConfigPatch {
                sync_enabled: Some(true),
                ..ConfigPatch::default()
            })
            .await
            .unwrap();

        // Another process rewrites storage behind our back.
        let mut foreign = persistence.snapshot().unwrap();
        foreign.terms_accepted = true;
        persistence.install(foreign);

        // Cached read does not see it; after clear it does.
        assert!(!store.get().await.unwrap().terms_accepted);
        store.clear().await;
        assert!(store.get().await.unwrap().terms_accepted);
    }

    #[tokio::test]
    async fn storage_write_failure_propagates_and_keeps_old_record() {
        let persistence = Arc::new(MemoryPersistence::new());
        let store = store_on(Arc::clone(&persistence));
        store.set(&ConfigPatch::default()).await.unwrap();

        persistence.fail_writes(true);
        let result = store
            .set(&ConfigPatch {
                sync_enabled: Some(true),
                ..ConfigPatch::default()
            })
            .await;
        assert!(result.is_err());

        persistence.fail_writes(false);
        let record = store.get().await.unwrap();
        assert_eq!(record.revision, 1);
        assert!(!record.sync_enabled);
    }

    #[tokio::test]
    async fn replace_installs_remote_revision_verbatim() {
        let store = store_on(Arc::new(MemoryPersistence::new()));
        store.set(&ConfigPatch::default()).await.unwrap();

        let mut remote = ConfigRecord::default();
        remote.revision = 41;
        remote.sync_enabled = true;
        store.replace(remote).await.unwrap();

        let record = store.get().await.unwrap();
        assert_eq!(record.revision, 41);
        assert!(record.sync_enabled);
    }

    #[tokio::test]
    async fn change_broadcast_carries_committed_revision() {
        let store = store_on(Arc::new(MemoryPersistence::new()));
        let mut changes = store.subscribe_changes();
        store.set(&ConfigPatch::default()).await.unwrap();
        assert_eq!(changes.recv().await.unwrap(), 1);
    }
}
