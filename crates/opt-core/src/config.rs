//! The options record owned by the background engine.
//!
//! A single `ConfigRecord` holds every user-facing setting. All mutation goes
//! through [`ConfigRecord::apply`], which merges a partial update and bumps
//! the revision counter by exactly one. The record is what gets persisted,
//! what observers diff against, and what the sync protocol reconciles.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::categories::Category;

// =============================================================================
// Record entries
// =============================================================================

/// A paused ("zapped") domain: all blocking is suspended for this hostname.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PausedEntry {
    /// Auto-resume deadline in epoch milliseconds. Absent means paused
    /// forever; `0` means paused but not yet scheduled for auto-resume.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoke_at: Option<u64>,
    /// Whether the pause was created by the assist flow.
    #[serde(default)]
    pub assist: bool,
}

impl PausedEntry {
    /// True when this entry carries a concrete future deadline.
    pub fn has_future_deadline(&self, now: u64) -> bool {
        matches!(self.revoke_at, Some(t) if t > now)
    }
}

/// Per-tracker override of the category default policy.
///
/// Absence of an entry means "use the category default". `overwrite_status`
/// is the user's explicit status choice for this tracker; whether it results
/// in a polarity-flipped rule is decided by [`crate::categories::should_negate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ExceptionEntry {
    /// The override applies on every site.
    pub global: bool,
    /// Sites the override applies to when not global.
    #[serde(default)]
    pub domains: Vec<String>,
    /// The user's explicit status choice for this tracker.
    pub overwrite_status: bool,
    /// Category the tracker belongs to, recorded at the time the user made
    /// the choice so the override survives tracker database updates.
    #[serde(default)]
    pub category: Category,
}

/// Onboarding progress. Owned here because it is part of the synced record,
/// even though the screens themselves live outside the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Onboarding {
    pub done: bool,
    pub shown: u32,
}

// =============================================================================
// The record
// =============================================================================

/// The single versioned settings record.
///
/// Every committed write increments `revision` by exactly one; the revision
/// is part of the record and is itself synced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct ConfigRecord {
    pub revision: u64,
    /// Per-tracker overrides, keyed by tracker pattern.
    pub exceptions: BTreeMap<String, ExceptionEntry>,
    /// Paused domains, keyed by hostname or pattern.
    pub paused: BTreeMap<String, PausedEntry>,
    /// Enabled regional filter list ids (e.g. `"lang-de"`).
    pub regional_filters: BTreeSet<String>,
    /// User-authored filter lines.
    pub custom_filters: Vec<String>,
    /// Experimental filter list opt-in.
    pub experimental_filters: bool,
    /// Whether the user accepted settings sync.
    pub sync_enabled: bool,
    pub onboarding: Onboarding,
    pub terms_accepted: bool,
}

/// Partial update over [`ConfigRecord`].
///
/// `None` leaves a key untouched; `Some` replaces it wholesale — except for
/// `paused`, which merges by entry id: `Some(entry)` upserts, `None` removes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct ConfigPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exceptions: Option<BTreeMap<String, ExceptionEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<BTreeMap<String, Option<PausedEntry>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regional_filters: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_filters: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental_filters: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onboarding: Option<Onboarding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terms_accepted: Option<bool>,
}

impl ConfigPatch {
    /// Shorthand for a patch that upserts one paused entry.
    pub fn pause(id: impl Into<String>, entry: PausedEntry) -> Self {
        let mut paused = BTreeMap::new();
        paused.insert(id.into(), Some(entry));
        Self {
            paused: Some(paused),
            ..Self::default()
        }
    }

    /// Shorthand for a patch that removes one paused entry.
    pub fn resume(id: impl Into<String>) -> Self {
        let mut paused = BTreeMap::new();
        paused.insert(id.into(), None);
        Self {
            paused: Some(paused),
            ..Self::default()
        }
    }
}

impl ConfigRecord {
    /// Merge a partial update into this record and bump the revision.
    ///
    /// Top-level keys are replaced wholesale; the paused table merges by
    /// entry id. Always increments `revision` by exactly one, even when the
    /// patch is empty.
    pub fn apply(&mut self, patch: &ConfigPatch) {
        if let Some(exceptions) = &patch.exceptions {
            self.exceptions = exceptions.clone();
        }
        if let Some(entries) = &patch.paused {
            for (id, entry) in entries {
                match entry {
                    Some(entry) => {
                        self.paused.insert(id.clone(), entry.clone());
                    }
                    None => {
                        self.paused.remove(id);
                    }
                }
            }
        }
        if let Some(regional) = &patch.regional_filters {
            self.regional_filters = regional.clone();
        }
        if let Some(filters) = &patch.custom_filters {
            self.custom_filters = filters.clone();
        }
        if let Some(experimental) = patch.experimental_filters {
            self.experimental_filters = experimental;
        }
        if let Some(sync_enabled) = patch.sync_enabled {
            self.sync_enabled = sync_enabled;
        }
        if let Some(onboarding) = &patch.onboarding {
            self.onboarding = onboarding.clone();
        }
        if let Some(terms) = patch.terms_accepted {
            self.terms_accepted = terms;
        }
        self.revision += 1;
    }

    /// Borrow the value behind a top-level key for change detection.
    pub fn slice(&self, key: ConfigKey) -> ConfigSlice<'_> {
        match key {
            ConfigKey::Exceptions => ConfigSlice::Exceptions(&self.exceptions),
            ConfigKey::Paused => ConfigSlice::Paused(&self.paused),
            ConfigKey::RegionalFilters => ConfigSlice::RegionalFilters(&self.regional_filters),
            ConfigKey::CustomFilters => ConfigSlice::CustomFilters(&self.custom_filters),
            ConfigKey::ExperimentalFilters => {
                ConfigSlice::ExperimentalFilters(self.experimental_filters)
            }
            ConfigKey::SyncEnabled => ConfigSlice::SyncEnabled(self.sync_enabled),
            ConfigKey::Onboarding => ConfigSlice::Onboarding(&self.onboarding),
            ConfigKey::TermsAccepted => ConfigSlice::TermsAccepted(self.terms_accepted),
        }
    }
}

// =============================================================================
// Change detection
// =============================================================================

/// Top-level keys an observer can scope itself to.
///
/// `revision` changes on every commit and is deliberately not listenable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    Exceptions,
    Paused,
    RegionalFilters,
    CustomFilters,
    ExperimentalFilters,
    SyncEnabled,
    Onboarding,
    TermsAccepted,
}

/// A borrowed view of one top-level key's value.
///
/// Equality between two slices of the same key is the structural equality
/// scoped listeners filter on: identical key sets with recursively equal
/// values. The derived `PartialEq` over the typed fields provides exactly
/// that.
#[derive(Debug, PartialEq)]
pub enum ConfigSlice<'a> {
    Exceptions(&'a BTreeMap<String, ExceptionEntry>),
    Paused(&'a BTreeMap<String, PausedEntry>),
    RegionalFilters(&'a BTreeSet<String>),
    CustomFilters(&'a [String]),
    ExperimentalFilters(bool),
    SyncEnabled(bool),
    Onboarding(&'a Onboarding),
    TermsAccepted(bool),
}

// =============================================================================
// Sync wire subset
// =============================================================================

/// The allow-listed subset of keys pushed to the remote account service.
///
/// Device-local state (paused table, onboarding progress) never leaves the
/// device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SyncPayload {
    pub revision: u64,
    pub exceptions: BTreeMap<String, ExceptionEntry>,
    pub regional_filters: BTreeSet<String>,
    pub custom_filters: Vec<String>,
    pub experimental_filters: bool,
}

impl SyncPayload {
    pub fn from_record(record: &ConfigRecord) -> Self {
        Self {
            revision: record.revision,
            exceptions: record.exceptions.clone(),
            regional_filters: record.regional_filters.clone(),
            custom_filters: record.custom_filters.clone(),
            experimental_filters: record.experimental_filters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paused_forever() -> PausedEntry {
        PausedEntry {
            revoke_at: None,
            assist: false,
        }
    }

    #[test]
    fn apply_bumps_revision_by_one() {
        let mut record = ConfigRecord::default();
        assert_eq!(record.revision, 0);
        record.apply(&ConfigPatch::default());
        assert_eq!(record.revision, 1);
        record.apply(&ConfigPatch {
            sync_enabled: Some(true),
            ..ConfigPatch::default()
        });
        assert_eq!(record.revision, 2);
        assert!(record.sync_enabled);
    }

    #[test]
    fn apply_replaces_untouched_keys_only() {
        let mut record = ConfigRecord::default();
        record.apply(&ConfigPatch {
            custom_filters: Some(vec!["||ads.example.com^".into()]),
            ..ConfigPatch::default()
        });
        record.apply(&ConfigPatch {
            experimental_filters: Some(true),
            ..ConfigPatch::default()
        });
        assert_eq!(record.custom_filters.len(), 1);
        assert!(record.experimental_filters);
    }

    #[test]
    fn paused_table_merges_by_id() {
        let mut record = ConfigRecord::default();
        record.apply(&ConfigPatch::pause("example.com", paused_forever()));
        record.apply(&ConfigPatch::pause(
            "other.com",
            PausedEntry {
                revoke_at: Some(0),
                assist: true,
            },
        ));
        assert_eq!(record.paused.len(), 2);

        // Upsert one entry, the other survives.
        record.apply(&ConfigPatch::pause(
            "example.com",
            PausedEntry {
                revoke_at: Some(123),
                assist: false,
            },
        ));
        assert_eq!(record.paused.len(), 2);
        assert_eq!(record.paused["example.com"].revoke_at, Some(123));

        // Tombstone removes exactly one entry.
        record.apply(&ConfigPatch::resume("example.com"));
        assert_eq!(record.paused.len(), 1);
        assert!(record.paused.contains_key("other.com"));
    }

    #[test]
    fn slice_equality_tracks_value_changes() {
        let mut old = ConfigRecord::default();
        old.apply(&ConfigPatch::pause("example.com", paused_forever()));
        let mut new = old.clone();
        new.apply(&ConfigPatch {
            sync_enabled: Some(true),
            ..ConfigPatch::default()
        });

        // Revision differs, but the paused slice is structurally equal.
        assert_eq!(old.slice(ConfigKey::Paused), new.slice(ConfigKey::Paused));
        assert_ne!(
            old.slice(ConfigKey::SyncEnabled),
            new.slice(ConfigKey::SyncEnabled)
        );
    }

    #[test]
    fn revoke_at_is_absent_when_paused_forever() {
        let json = serde_json::to_string(&paused_forever()).unwrap();
        assert!(!json.contains("revokeAt"));

        let entry: PausedEntry = serde_json::from_str("{}").unwrap();
        assert_eq!(entry.revoke_at, None);
        let entry: PausedEntry = serde_json::from_str(r#"{"revokeAt":0}"#).unwrap();
        assert_eq!(entry.revoke_at, Some(0));
    }

    #[test]
    fn future_deadline_ignores_zero_and_absent() {
        let now = 1_000;
        assert!(!paused_forever().has_future_deadline(now));
        let not_scheduled = PausedEntry {
            revoke_at: Some(0),
            assist: false,
        };
        assert!(!not_scheduled.has_future_deadline(now));
        let past = PausedEntry {
            revoke_at: Some(999),
            assist: false,
        };
        assert!(!past.has_future_deadline(now));
        let future = PausedEntry {
            revoke_at: Some(1_001),
            assist: false,
        };
        assert!(future.has_future_deadline(now));
    }

    #[test]
    fn sync_payload_excludes_device_local_state() {
        let mut record = ConfigRecord::default();
        record.apply(&ConfigPatch::pause("example.com", paused_forever()));
        let payload = SyncPayload::from_record(&record);
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("paused").is_none());
        assert!(json.get("onboarding").is_none());
        assert_eq!(payload.revision, record.revision);
    }
}
