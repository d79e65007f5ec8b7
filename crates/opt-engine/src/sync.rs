//! Revision-based reconciliation with the remote account service.
//!
//! Last-writer-wins over the monotonic revision counter: pull when remote
//! is ahead, push the allow-listed subset when local is ahead, otherwise do
//! nothing. A process-local watermark short-circuits repeat runs against an
//! unchanged local revision; any service error clears it so the next
//! trigger reconciles from scratch instead of wedging in a believed-synced
//! state.

use std::sync::Arc;

use tokio::sync::Mutex;

use opt_core::config::SyncPayload;
use opt_core::hosts::{AccountError, AccountService, AlarmHost, AlarmSchedule, StorageError};

use crate::store::ConfigStore;

/// Prefix shared by both sync alarms.
pub const SYNC_ALARM_PREFIX: &str = "sync:";
/// Periodic resync alarm.
pub const SYNC_PERIODIC_ALARM: &str = "sync:periodic";
/// One-shot "is the session still valid" check after login.
pub const SYNC_SESSION_ALARM: &str = "sync:session";

/// Resync period while a session is live.
pub const SYNC_PERIOD_MINUTES: u64 = 30;
/// Delay before the one-shot session check.
pub const SESSION_CHECK_DELAY_MS: u64 = 5 * 60 * 1_000;

/// Error type for one reconciliation run.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Account(#[from] AccountError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub struct SyncManager {
    account: Arc<dyn AccountService>,
    watermark: Mutex<Option<u64>>,
}

impl SyncManager {
    pub fn new(account: Arc<dyn AccountService>) -> Self {
        Self {
            account,
            watermark: Mutex::new(None),
        }
    }

    /// One reconciliation run against the store's current record.
    pub async fn sync(&self, store: &ConfigStore) -> Result<(), SyncError> {
        let local = store.get().await?;
        if !local.sync_enabled {
            return Ok(());
        }

        let mut watermark = self.watermark.lock().await;
        if *watermark == Some(local.revision) {
            return Ok(());
        }

        let outcome = self.reconcile(store, &local, &mut watermark).await;
        if let Err(SyncError::Account(e)) = &outcome {
            // Forget what we believed; the next trigger starts over.
            log::warn!("sync failed, resetting watermark: {e}");
            *watermark = None;
        }
        outcome
    }

    async fn reconcile(
        &self,
        store: &ConfigStore,
        local: &opt_core::config::ConfigRecord,
        watermark: &mut Option<u64>,
    ) -> Result<(), SyncError> {
        let Some(remote) = self.account.get_options().await? else {
            return Ok(());
        };

        if remote.revision == local.revision {
            *watermark = Some(local.revision);
        } else if remote.revision > local.revision {
            let pulled = store.replace(remote).await?;
            *watermark = Some(pulled.revision);
        } else {
            self.account
                .set_options(&SyncPayload::from_record(local))
                .await?;
            *watermark = Some(local.revision);
        }
        Ok(())
    }

    /// Drop the watermark, e.g. on logout.
    pub async fn reset(&self) {
        *self.watermark.lock().await = None;
    }

    /// Arm or disarm the periodic and session-check alarms on a
    /// login/logout transition. Best-effort: failures are logged.
    pub async fn session_changed(&self, alarms: &dyn AlarmHost, logged_in: bool, now: u64) {
        if logged_in {
            if let Err(e) = alarms
                .create(
                    SYNC_PERIODIC_ALARM,
                    AlarmSchedule::Every(SYNC_PERIOD_MINUTES),
                )
                .await
            {
                log::warn!("arming periodic sync failed: {e}");
            }
            if let Err(e) = alarms
                .create(
                    SYNC_SESSION_ALARM,
                    AlarmSchedule::At(now + SESSION_CHECK_DELAY_MS),
                )
                .await
            {
                log::warn!("arming session check failed: {e}");
            }
        } else {
            for name in [SYNC_PERIODIC_ALARM, SYNC_SESSION_ALARM] {
                if let Err(e) = alarms.clear(name).await {
                    log::warn!("disarming {name} failed: {e}");
                }
            }
            self.reset().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use opt_core::config::{ConfigPatch, ConfigRecord};

    use crate::emulated::{MemoryAccount, MemoryAlarms, MemoryPersistence};
    use crate::observers::ObserverQueue;

    use super::*;

    async fn synced_store() -> Arc<ConfigStore> {
        let queue = Arc::new(ObserverQueue::new());
        queue.seal();
        let store = Arc::new(ConfigStore::new(Arc::new(MemoryPersistence::new()), queue));
        store
            .set(&ConfigPatch {
                sync_enabled: Some(true),
                ..ConfigPatch::default()
            })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn disabled_sync_never_touches_the_network() {
        let queue = Arc::new(ObserverQueue::new());
        queue.seal();
        let store = Arc::new(ConfigStore::new(Arc::new(MemoryPersistence::new()), queue));
        store.set(&ConfigPatch::default()).await.unwrap();

        let account = Arc::new(MemoryAccount::new());
        let sync = SyncManager::new(account.clone());
        sync.sync(&store).await.unwrap();
        assert_eq!(account.get_calls(), 0);
    }

    #[tokio::test]
    async fn second_run_short_circuits_on_watermark() {
        let store = synced_store().await;
        let account = Arc::new(MemoryAccount::new());
        account.install_remote(store.get().await.unwrap());

        let sync = SyncManager::new(account.clone());
        sync.sync(&store).await.unwrap();
        sync.sync(&store).await.unwrap();

        // Exactly one fetch; the second run never reached the service.
        assert_eq!(account.get_calls(), 1);
    }

    #[tokio::test]
    async fn no_session_is_a_noop() {
        let store = synced_store().await;
        let account = Arc::new(MemoryAccount::new());
        let sync = SyncManager::new(account.clone());
        sync.sync(&store).await.unwrap();
        assert_eq!(account.get_calls(), 1);
        assert_eq!(account.set_calls(), 0);
    }

    #[tokio::test]
    async fn remote_ahead_pulls_wholesale() {
        let store = synced_store().await;
        let mut remote = ConfigRecord::default();
        remote.revision = 50;
        remote.sync_enabled = true;
        remote.terms_accepted = true;

        let account = Arc::new(MemoryAccount::new());
        account.install_remote(remote);

        let sync = SyncManager::new(account.clone());
        sync.sync(&store).await.unwrap();

        let local = store.get().await.unwrap();
        assert_eq!(local.revision, 50);
        assert!(local.terms_accepted);
        assert_eq!(account.set_calls(), 0);
    }

    #[tokio::test]
    async fn local_ahead_pushes_allow_listed_subset() {
        let store = synced_store().await;
        let mut remote = ConfigRecord::default();
        remote.sync_enabled = true; // revision 0, behind local
        let account = Arc::new(MemoryAccount::new());
        account.install_remote(remote);

        let sync = SyncManager::new(account.clone());
        sync.sync(&store).await.unwrap();

        assert_eq!(account.set_calls(), 1);
        let pushed = account.last_pushed().unwrap();
        assert_eq!(pushed.revision, store.get().await.unwrap().revision);
    }

    #[tokio::test]
    async fn service_error_resets_watermark_and_retries_fully() {
        let store = synced_store().await;
        let account = Arc::new(MemoryAccount::new());
        account.install_remote(store.get().await.unwrap());

        let sync = SyncManager::new(account.clone());
        sync.sync(&store).await.unwrap();
        assert_eq!(account.get_calls(), 1);

        // Local changes, then the service goes down for one run.
        store.set(&ConfigPatch::default()).await.unwrap();
        account.set_failing(true);
        assert!(sync.sync(&store).await.is_err());

        // The retry goes back to the network instead of trusting the
        // watermark.
        account.set_failing(false);
        account.install_remote(store.get().await.unwrap());
        sync.sync(&store).await.unwrap();
        assert_eq!(account.get_calls(), 3);
    }

    #[tokio::test]
    async fn session_transitions_arm_and_disarm_alarms() {
        let alarms = MemoryAlarms::new();
        let account = Arc::new(MemoryAccount::new());
        let sync = SyncManager::new(account);

        sync.session_changed(&alarms, true, 1_000).await;
        let mut names = alarms.names();
        names.sort();
        assert_eq!(
            names,
            vec![SYNC_PERIODIC_ALARM.to_string(), SYNC_SESSION_ALARM.to_string()]
        );

        sync.session_changed(&alarms, false, 2_000).await;
        assert!(alarms.names().is_empty());
    }
}
