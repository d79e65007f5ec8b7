//! In-process host implementations.
//!
//! These back the engine in tests and in the CLI `simulate` harness, where
//! no real browser surface exists. `MemoryRuleHost` mimics the host's
//! duplicate-id rejection so id hygiene bugs surface in tests; `TokioAlarms`
//! drives real timer-based firing for the simulator.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use opt_core::config::{ConfigRecord, SyncPayload};
use opt_core::hosts::{
    AccountError, AccountService, AlarmError, AlarmHost, AlarmInfo, AlarmSchedule, Persistence,
    RuleHost, RuleHostError, StorageError,
};
use opt_core::rules::{NetRule, RuleUpdate, RulesetToggle};

use crate::now_ms;

// =============================================================================
// Persistence
// =============================================================================

#[derive(Default)]
pub struct MemoryPersistence {
    record: Mutex<Option<ConfigRecord>>,
    fail_writes: AtomicBool,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current stored record, as another process would see it.
    pub fn snapshot(&self) -> Option<ConfigRecord> {
        self.record.lock().unwrap().clone()
    }

    /// Overwrite storage directly, bypassing the store (a foreign writer).
    pub fn install(&self, record: ConfigRecord) {
        *self.record.lock().unwrap() = Some(record);
    }

    pub fn fail_writes(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn load(&self) -> Result<Option<ConfigRecord>, StorageError> {
        Ok(self.record.lock().unwrap().clone())
    }

    async fn store(&self, record: &ConfigRecord) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Write("injected write failure".to_string()));
        }
        *self.record.lock().unwrap() = Some(record.clone());
        Ok(())
    }
}

// =============================================================================
// Rule host
// =============================================================================

#[derive(Default)]
pub struct MemoryRuleHost {
    rules: Mutex<Vec<NetRule>>,
    enabled_rulesets: Mutex<BTreeSet<String>>,
    rejecting: AtomicBool,
    update_calls: AtomicUsize,
}

impl MemoryRuleHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rules(&self) -> Vec<NetRule> {
        self.rules.lock().unwrap().clone()
    }

    pub fn enabled_rulesets(&self) -> BTreeSet<String> {
        self.enabled_rulesets.lock().unwrap().clone()
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }
}

#[async_trait]
impl RuleHost for MemoryRuleHost {
    async fn update_rules(&self, update: RuleUpdate) -> Result<(), RuleHostError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(RuleHostError::Rejected("injected rejection".to_string()));
        }

        let mut rules = self.rules.lock().unwrap();
        let mut next: Vec<NetRule> = rules
            .iter()
            .filter(|rule| !update.remove_rule_ids.contains(&rule.id))
            .cloned()
            .collect();
        for rule in &update.add_rules {
            if next.iter().any(|existing| existing.id == rule.id) {
                // Like the browser API, a duplicate id rejects the whole
                // update and leaves the installed set untouched.
                return Err(RuleHostError::Rejected(format!(
                    "duplicate rule id {}",
                    rule.id
                )));
            }
            next.push(rule.clone());
        }
        *rules = next;
        Ok(())
    }

    async fn list_rules(&self) -> Result<Vec<NetRule>, RuleHostError> {
        Ok(self.rules())
    }

    async fn set_enabled_rulesets(&self, toggle: &RulesetToggle) -> Result<(), RuleHostError> {
        let mut enabled = self.enabled_rulesets.lock().unwrap();
        for id in &toggle.disable {
            enabled.remove(id);
        }
        for id in &toggle.enable {
            enabled.insert(id.clone());
        }
        Ok(())
    }
}

// =============================================================================
// Alarms
// =============================================================================

/// Recording alarm host; never fires. Tests drive firing by calling the
/// engine's dispatcher directly.
#[derive(Default)]
pub struct MemoryAlarms {
    alarms: Mutex<BTreeMap<String, AlarmInfo>>,
    create_calls: AtomicUsize,
}

impl MemoryAlarms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names(&self) -> Vec<String> {
        self.alarms.lock().unwrap().keys().cloned().collect()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AlarmHost for MemoryAlarms {
    async fn create(&self, name: &str, schedule: AlarmSchedule) -> Result<(), AlarmError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let fire_at = match schedule {
            AlarmSchedule::At(when) => when,
            AlarmSchedule::Every(minutes) => now_ms() + minutes * 60_000,
        };
        self.alarms.lock().unwrap().insert(
            name.to_string(),
            AlarmInfo {
                name: name.to_string(),
                fire_at,
            },
        );
        Ok(())
    }

    async fn clear(&self, name: &str) -> Result<bool, AlarmError> {
        Ok(self.alarms.lock().unwrap().remove(name).is_some())
    }

    async fn get(&self, name: &str) -> Result<Option<AlarmInfo>, AlarmError> {
        Ok(self.alarms.lock().unwrap().get(name).cloned())
    }

    async fn get_all(&self) -> Result<Vec<AlarmInfo>, AlarmError> {
        Ok(self.alarms.lock().unwrap().values().cloned().collect())
    }
}

/// Timer-backed alarm host. Fired names arrive on the receiver returned by
/// [`TokioAlarms::new`]; the embedder forwards them to `Engine::alarm_fired`.
pub struct TokioAlarms {
    inner: Mutex<HashMap<String, (u64, JoinHandle<()>)>>,
    fired_tx: mpsc::UnboundedSender<String>,
}

impl TokioAlarms {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                inner: Mutex::new(HashMap::new()),
                fired_tx,
            }),
            fired_rx,
        )
    }

    fn spawn_timer(&self, name: &str, schedule: AlarmSchedule) -> (u64, JoinHandle<()>) {
        let tx = self.fired_tx.clone();
        let name_owned = name.to_string();
        match schedule {
            AlarmSchedule::At(when) => {
                let delay = Duration::from_millis(when.saturating_sub(now_ms()));
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(name_owned);
                });
                (when, handle)
            }
            AlarmSchedule::Every(minutes) => {
                let period = Duration::from_millis(minutes * 60_000);
                let fire_at = now_ms() + minutes * 60_000;
                let handle = tokio::spawn(async move {
                    loop {
                        tokio::time::sleep(period).await;
                        if tx.send(name_owned.clone()).is_err() {
                            break;
                        }
                    }
                });
                (fire_at, handle)
            }
        }
    }
}

#[async_trait]
impl AlarmHost for TokioAlarms {
    async fn create(&self, name: &str, schedule: AlarmSchedule) -> Result<(), AlarmError> {
        let timer = self.spawn_timer(name, schedule);
        let mut inner = self.inner.lock().unwrap();
        if let Some((_, old)) = inner.insert(name.to_string(), timer) {
            old.abort();
        }
        Ok(())
    }

    async fn clear(&self, name: &str) -> Result<bool, AlarmError> {
        match self.inner.lock().unwrap().remove(name) {
            Some((_, handle)) => {
                handle.abort();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get(&self, name: &str) -> Result<Option<AlarmInfo>, AlarmError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .get(name)
            .map(|(fire_at, _)| AlarmInfo {
                name: name.to_string(),
                fire_at: *fire_at,
            }))
    }

    async fn get_all(&self) -> Result<Vec<AlarmInfo>, AlarmError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .iter()
            .map(|(name, (fire_at, _))| AlarmInfo {
                name: name.clone(),
                fire_at: *fire_at,
            })
            .collect())
    }
}

impl Drop for TokioAlarms {
    fn drop(&mut self) {
        for (_, (_, handle)) in self.inner.lock().unwrap().drain() {
            handle.abort();
        }
    }
}

// =============================================================================
// Account service
// =============================================================================

#[derive(Default)]
pub struct MemoryAccount {
    remote: Mutex<Option<ConfigRecord>>,
    last_pushed: Mutex<Option<SyncPayload>>,
    get_calls: AtomicUsize,
    set_calls: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryAccount {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace the remote record ("another device synced").
    pub fn install_remote(&self, record: ConfigRecord) {
        *self.remote.lock().unwrap() = Some(record);
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    pub fn last_pushed(&self) -> Option<SyncPayload> {
        self.last_pushed.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl AccountService for MemoryAccount {
    async fn get_options(&self) -> Result<Option<ConfigRecord>, AccountError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(AccountError::Network("injected outage".to_string()));
        }
        Ok(self.remote.lock().unwrap().clone())
    }

    async fn set_options(&self, payload: &SyncPayload) -> Result<(), AccountError> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(AccountError::Network("injected outage".to_string()));
        }
        let mut remote = self.remote.lock().unwrap();
        let mut record = remote.take().unwrap_or_default();
        record.revision = payload.revision;
        record.exceptions = payload.exceptions.clone();
        record.regional_filters = payload.regional_filters.clone();
        record.custom_filters = payload.custom_filters.clone();
        record.experimental_filters = payload.experimental_filters;
        *remote = Some(record);
        *self.last_pushed.lock().unwrap() = Some(payload.clone());
        Ok(())
    }
}
