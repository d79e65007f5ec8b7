//! Engine wiring and the inbound message surface.
//!
//! Construction is the setup phase: `Engine::new` builds the store and
//! registers the built-in observers; the embedder may add its own listeners
//! before calling [`Engine::start`], which seals the registry, primes rules
//! and schedules from the persisted record, and opens the lifecycle gate.

use std::sync::{Arc, Weak};
use std::time::Duration;

use opt_compiler::{compile, Platform};
use opt_core::categories::TrackerIndex;
use opt_core::config::{ConfigKey, ConfigPatch, ConfigRecord, PausedEntry};
use opt_core::hosts::{
    AccountService, AlarmHost, Persistence, RuleHost, StorageError,
};
use tokio::sync::broadcast;

use crate::gate::{Gate, GateError};
use crate::now_ms;
use crate::observers::{FirstRun, ObserverError, ObserverQueue};
use crate::scheduler::{RevocationScheduler, REVOKE_ALARM_PREFIX};
use crate::store::ConfigStore;
use crate::sync::{SyncManager, SYNC_ALARM_PREFIX, SYNC_PERIODIC_ALARM, SYNC_SESSION_ALARM};

/// Config slices that feed the rule compiler.
const RULE_KEYS: [ConfigKey; 5] = [
    ConfigKey::Exceptions,
    ConfigKey::Paused,
    ConfigKey::RegionalFilters,
    ConfigKey::CustomFilters,
    ConfigKey::ExperimentalFilters,
];

/// The host browser surfaces the engine runs against.
pub struct Hosts {
    pub persistence: Arc<dyn Persistence>,
    pub rules: Arc<dyn RuleHost>,
    pub alarms: Arc<dyn AlarmHost>,
    pub account: Arc<dyn AccountService>,
}

pub struct Engine {
    store: Arc<ConfigStore>,
    queue: Arc<ObserverQueue>,
    scheduler: Arc<RevocationScheduler>,
    sync: Arc<SyncManager>,
    gate: Gate,
    rules: Arc<dyn RuleHost>,
    alarms: Arc<dyn AlarmHost>,
    tracker_index: Arc<TrackerIndex>,
    platform: Platform,
}

impl Engine {
    pub fn new(hosts: Hosts, tracker_index: TrackerIndex, platform: Platform) -> Self {
        let queue = Arc::new(ObserverQueue::new());
        let store = Arc::new(ConfigStore::new(hosts.persistence, Arc::clone(&queue)));
        let scheduler = Arc::new(RevocationScheduler::new(Arc::clone(&hosts.alarms)));
        let sync = Arc::new(SyncManager::new(hosts.account));
        let tracker_index = Arc::new(tracker_index);

        // Built-in observers. Rule recompilation reacts to the compiler's
        // input slices; revocation scheduling follows the paused table; sync
        // runs on every commit and short-circuits via its watermark.
        {
            let rules = Arc::clone(&hosts.rules);
            let index = Arc::clone(&tracker_index);
            queue.add_listener("rules", move |new, old| {
                let rules = Arc::clone(&rules);
                let index = Arc::clone(&index);
                async move {
                    let relevant = RULE_KEYS
                        .iter()
                        .any(|&key| new.slice(key) != old.slice(key));
                    if !relevant {
                        return Ok(());
                    }
                    apply_rules(rules.as_ref(), &index, platform, &new).await
                }
            });
        }
        {
            let scheduler = Arc::clone(&scheduler);
            queue.add_scoped_listener("revocations", ConfigKey::Paused, move |new, _old| {
                let scheduler = Arc::clone(&scheduler);
                async move {
                    scheduler.reconcile(&new.paused, now_ms()).await;
                    Ok(())
                }
            });
        }
        {
            let sync = Arc::clone(&sync);
            let store_weak: Weak<ConfigStore> = Arc::downgrade(&store);
            queue.add_listener("sync", move |_new, _old| {
                let sync = Arc::clone(&sync);
                let store_weak = Weak::clone(&store_weak);
                async move {
                    let Some(store) = store_weak.upgrade() else {
                        return Ok(());
                    };
                    sync.sync(&store)
                        .await
                        .map_err(|e| ObserverError(e.to_string()))
                }
            });
        }

        Self {
            store,
            queue,
            scheduler,
            sync,
            gate: Gate::new("engine"),
            rules: hosts.rules,
            alarms: hosts.alarms,
            tracker_index,
            platform,
        }
    }

    /// Register an embedder observer. Only valid before [`start`](Self::start).
    pub fn add_listener<F, Fut>(&self, name: impl Into<String>, callback: F) -> FirstRun
    where
        F: Fn(Arc<ConfigRecord>, Arc<ConfigRecord>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), ObserverError>> + Send + 'static,
    {
        self.queue.add_listener(name, callback)
    }

    /// Register an embedder observer scoped to one top-level key. Only valid
    /// before [`start`](Self::start).
    pub fn add_scoped_listener<F, Fut>(
        &self,
        name: impl Into<String>,
        scope: ConfigKey,
        callback: F,
    ) -> FirstRun
    where
        F: Fn(Arc<ConfigRecord>, Arc<ConfigRecord>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), ObserverError>> + Send + 'static,
    {
        self.queue.add_scoped_listener(name, scope, callback)
    }

    /// Seal the observer registry and bring the engine up: install rules and
    /// revocation alarms derived from the persisted record, then open the
    /// gate.
    pub async fn start(&self) {
        self.queue.seal();
        self.gate
            .start(async {
                let record = self
                    .store
                    .get()
                    .await
                    .map_err(|e| format!("initial load failed: {e}"))?;

                // Rule application is allowed to fail here; the next config
                // change retries with freshly computed rules.
                if let Err(e) =
                    apply_rules(self.rules.as_ref(), &self.tracker_index, self.platform, &record)
                        .await
                {
                    log::warn!("initial rule install failed: {e}");
                }
                self.scheduler.reconcile(&record.paused, now_ms()).await;
                Ok::<(), String>(())
            })
            .await;
    }

    /// Close the gate (pending `is_ready` waiters reject immediately) and
    /// disarm the sync timers.
    pub async fn stop(&self) {
        self.gate
            .stop(async {
                for name in [SYNC_PERIODIC_ALARM, SYNC_SESSION_ALARM] {
                    if let Err(e) = self.alarms.clear(name).await {
                        log::warn!("disarming {name} failed: {e}");
                    }
                }
                Ok::<(), String>(())
            })
            .await;
    }

    /// Immediate answer or bounded wait for "is the engine up".
    pub async fn is_ready(&self, timeout: Duration, error_message: &str) -> Result<(), GateError> {
        self.gate.is_ready(timeout, error_message).await
    }

    // -------------------------------------------------------------------------
    // Inbound message surface
    // -------------------------------------------------------------------------

    /// Apply a partial config update ("update config" message).
    pub async fn update(&self, patch: &ConfigPatch) -> Result<ConfigRecord, StorageError> {
        self.store.set(patch).await
    }

    /// Pause a domain, optionally with an auto-resume deadline.
    pub async fn pause_domain(
        &self,
        id: &str,
        revoke_at: Option<u64>,
        assist: bool,
    ) -> Result<ConfigRecord, StorageError> {
        self.store
            .set(&ConfigPatch::pause(id, PausedEntry { revoke_at, assist }))
            .await
    }

    /// Resume a paused domain.
    pub async fn resume_domain(&self, id: &str) -> Result<ConfigRecord, StorageError> {
        self.store.set(&ConfigPatch::resume(id)).await
    }

    /// Another process wrote our persisted key; drop the cache so the next
    /// read reloads.
    pub async fn external_change(&self) {
        self.store.clear().await;
    }

    /// Login/logout detected: arm or disarm the sync timers, and reconcile
    /// right away on login.
    pub async fn session_changed(&self, logged_in: bool) {
        self.sync
            .session_changed(self.alarms.as_ref(), logged_in, now_ms())
            .await;
        if logged_in {
            if let Err(e) = self.sync.sync(&self.store).await {
                log::warn!("sync after login failed: {e}");
            }
        }
    }

    /// Single dispatcher for fired alarms, routed by name prefix.
    pub async fn alarm_fired(&self, name: &str) {
        if let Some(id) = name.strip_prefix(REVOKE_ALARM_PREFIX) {
            // Read-modify-write against the live record; the normal
            // change-notification path does the rest.
            if let Err(e) = self.store.set(&ConfigPatch::resume(id)).await {
                log::warn!("auto-resume of {id:?} failed: {e}");
            }
        } else if name.starts_with(SYNC_ALARM_PREFIX) {
            if let Err(e) = self.sync.sync(&self.store).await {
                log::warn!("scheduled sync failed: {e}");
            }
        } else {
            log::debug!("alarm {name:?} has no route");
        }
    }

    /// Resolves once all currently pending observer batches have settled.
    pub async fn wait_for_idle(&self) {
        self.queue.wait_for_idle().await;
    }

    /// Change notifications for UI refresh, carrying the committed revision.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<u64> {
        self.store.subscribe_changes()
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }
}

/// Recompute the full desired rule state and hand it to the host. A host
/// rejection leaves the installed set alone; the next change retries.
async fn apply_rules(
    host: &dyn RuleHost,
    index: &TrackerIndex,
    platform: Platform,
    record: &ConfigRecord,
) -> Result<(), ObserverError> {
    let installed = host
        .list_rules()
        .await
        .map_err(|e| ObserverError(e.to_string()))?;
    let output = compile(record, index, platform, &installed);
    if output.skipped_filters > 0 {
        log::info!(
            "{} custom filter lines were not compiled",
            output.skipped_filters
        );
    }
    host.set_enabled_rulesets(&output.rulesets)
        .await
        .map_err(|e| ObserverError(e.to_string()))?;
    if !output.update.is_empty() {
        host.update_rules(output.update)
            .await
            .map_err(|e| ObserverError(e.to_string()))?;
    }
    Ok(())
}
