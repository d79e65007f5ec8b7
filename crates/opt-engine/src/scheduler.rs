//! Auto-resume scheduling for paused domains.
//!
//! Keeps the host's scheduled callbacks in lockstep with the paused table:
//! after reconciliation, the alarms carrying our prefix are exactly the
//! paused entries with a concrete future deadline. Everything here is
//! best-effort — a failed create or clear is logged, and the next config
//! change reconciles against the full actual state again.

use std::collections::BTreeMap;
use std::sync::Arc;

use opt_core::config::PausedEntry;
use opt_core::hosts::{AlarmHost, AlarmSchedule};

/// Name prefix for auto-resume alarms; the id follows the colon.
pub const REVOKE_ALARM_PREFIX: &str = "revoke:";

/// Composite alarm name for one paused id.
pub fn revoke_alarm_name(id: &str) -> String {
    format!("{REVOKE_ALARM_PREFIX}{id}")
}

pub struct RevocationScheduler {
    alarms: Arc<dyn AlarmHost>,
}

impl RevocationScheduler {
    pub fn new(alarms: Arc<dyn AlarmHost>) -> Self {
        Self { alarms }
    }

    /// Drive the scheduled set to match the desired set.
    ///
    /// Desired = ids whose entry has a future `revoke_at`; entries paused
    /// forever (`None`) or not yet scheduled (`Some(0)`) get no alarm, and
    /// stale alarms for resumed or rescheduled ids are cancelled.
    pub async fn reconcile(&self, paused: &BTreeMap<String, PausedEntry>, now: u64) {
        let existing = match self.alarms.get_all().await {
            Ok(alarms) => alarms,
            Err(e) => {
                log::warn!("listing revocation alarms failed: {e}");
                return;
            }
        };

        let mut scheduled: Vec<String> = Vec::new();
        for alarm in existing {
            let Some(id) = alarm.name.strip_prefix(REVOKE_ALARM_PREFIX) else {
                continue;
            };
            let wanted = paused
                .get(id)
                .map(|entry| entry.has_future_deadline(now))
                .unwrap_or(false);
            if wanted {
                scheduled.push(id.to_string());
            } else if let Err(e) = self.alarms.clear(&alarm.name).await {
                log::warn!("clearing stale revocation alarm for {id:?} failed: {e}");
            }
        }

        for (id, entry) in paused {
            if !entry.has_future_deadline(now) || scheduled.iter().any(|s| s == id) {
                continue;
            }
            let revoke_at = entry.revoke_at.unwrap_or_default();
            if let Err(e) = self
                .alarms
                .create(&revoke_alarm_name(id), AlarmSchedule::At(revoke_at))
                .await
            {
                log::warn!("scheduling revocation for {id:?} failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::emulated::MemoryAlarms;

    use super::*;

    const NOW: u64 = 1_000_000;

    fn entry(revoke_at: Option<u64>) -> PausedEntry {
        PausedEntry {
            revoke_at,
            assist: false,
        }
    }

    fn table(entries: &[(&str, Option<u64>)]) -> BTreeMap<String, PausedEntry> {
        entries
            .iter()
            .map(|(id, revoke_at)| (id.to_string(), entry(*revoke_at)))
            .collect()
    }

    async fn scheduled_ids(alarms: &MemoryAlarms) -> Vec<String> {
        let mut ids: Vec<String> = alarms
            .names()
            .into_iter()
            .filter_map(|name| {
                name.strip_prefix(REVOKE_ALARM_PREFIX)
                    .map(|id| id.to_string())
            })
            .collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn only_future_deadlines_get_alarms() {
        let alarms = Arc::new(MemoryAlarms::new());
        let scheduler = RevocationScheduler::new(alarms.clone());

        let paused = table(&[
            ("forever.example", None),
            ("unscheduled.example", Some(0)),
            ("past.example", Some(NOW - 1)),
            ("future.example", Some(NOW + 60_000)),
        ]);
        scheduler.reconcile(&paused, NOW).await;

        assert_eq!(scheduled_ids(&alarms).await, vec!["future.example"]);
    }

    #[tokio::test]
    async fn resumed_ids_lose_their_alarms() {
        let alarms = Arc::new(MemoryAlarms::new());
        let scheduler = RevocationScheduler::new(alarms.clone());

        let both = table(&[
            ("a.example", Some(NOW + 1_000)),
            ("b.example", Some(NOW + 2_000)),
        ]);
        scheduler.reconcile(&both, NOW).await;
        assert_eq!(scheduled_ids(&alarms).await, vec!["a.example", "b.example"]);

        let only_b = table(&[("b.example", Some(NOW + 2_000))]);
        scheduler.reconcile(&only_b, NOW).await;
        assert_eq!(scheduled_ids(&alarms).await, vec!["b.example"]);
    }

    #[tokio::test]
    async fn deadline_cleared_to_forever_cancels_the_alarm() {
        let alarms = Arc::new(MemoryAlarms::new());
        let scheduler = RevocationScheduler::new(alarms.clone());

        scheduler
            .reconcile(&table(&[("a.example", Some(NOW + 1_000))]), NOW)
            .await;
        assert_eq!(scheduled_ids(&alarms).await, vec!["a.example"]);

        scheduler.reconcile(&table(&[("a.example", None)]), NOW).await;
        assert!(scheduled_ids(&alarms).await.is_empty());
    }

    #[tokio::test]
    async fn reconcile_is_idempotent() {
        let alarms = Arc::new(MemoryAlarms::new());
        let scheduler = RevocationScheduler::new(alarms.clone());

        let paused = table(&[("a.example", Some(NOW + 1_000))]);
        scheduler.reconcile(&paused, NOW).await;
        scheduler.reconcile(&paused, NOW).await;
        assert_eq!(alarms.names().len(), 1);
        assert_eq!(alarms.create_calls(), 1);
    }

    #[tokio::test]
    async fn foreign_alarms_are_left_alone() {
        let alarms = Arc::new(MemoryAlarms::new());
        alarms
            .create("sync:periodic", AlarmSchedule::Every(30))
            .await
            .unwrap();
        let scheduler = RevocationScheduler::new(alarms.clone());

        scheduler.reconcile(&BTreeMap::new(), NOW).await;
        assert_eq!(alarms.names(), vec!["sync:periodic".to_string()]);
    }
}
