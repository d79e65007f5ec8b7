//! Trait seams for the host browser surfaces.
//!
//! The engine never talks to a browser API directly; it goes through these
//! traits so tests and the CLI harness can substitute in-process
//! implementations. All methods are async because every host call is an I/O
//! boundary.

use async_trait::async_trait;

use crate::config::{ConfigRecord, SyncPayload};
use crate::rules::{NetRule, RuleUpdate, RulesetToggle};

// =============================================================================
// Persistence
// =============================================================================

/// Error type for durable local storage.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage read failed: {0}")]
    Read(String),
    #[error("storage write failed: {0}")]
    Write(String),
    #[error("stored record is corrupt: {0}")]
    Corrupt(String),
}

/// Durable local storage for the options record.
///
/// External-change notifications (another extension surface wrote the same
/// persisted key) are delivered by the embedder calling
/// `Engine::external_change`, not through this trait.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Read the persisted record. `None` means nothing was ever stored.
    async fn load(&self) -> Result<Option<ConfigRecord>, StorageError>;

    /// Persist the full record.
    async fn store(&self, record: &ConfigRecord) -> Result<(), StorageError>;
}

// =============================================================================
// Network rule host
// =============================================================================

/// Error type for the declarative network rule host.
#[derive(Debug, thiserror::Error)]
pub enum RuleHostError {
    #[error("rule rejected by host: {0}")]
    Rejected(String),
    #[error("dynamic rule quota exceeded")]
    QuotaExceeded,
    #[error("rule host unavailable: {0}")]
    Unavailable(String),
}

/// The host's declarative network-filtering subsystem.
#[async_trait]
pub trait RuleHost: Send + Sync {
    /// Apply removals, then additions, atomically. A rejection must leave
    /// the previously installed rules untouched.
    async fn update_rules(&self, update: RuleUpdate) -> Result<(), RuleHostError>;

    /// Currently installed dynamic rules.
    async fn list_rules(&self) -> Result<Vec<NetRule>, RuleHostError>;

    /// Enable/disable static rulesets (regional and experimental lists).
    async fn set_enabled_rulesets(&self, toggle: &RulesetToggle) -> Result<(), RuleHostError>;
}

// =============================================================================
// Scheduled callbacks
// =============================================================================

/// Error type for the scheduled-callback service.
#[derive(Debug, thiserror::Error)]
pub enum AlarmError {
    #[error("alarm service unavailable: {0}")]
    Unavailable(String),
    #[error("invalid alarm schedule: {0}")]
    InvalidSchedule(String),
}

/// When a scheduled callback fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmSchedule {
    /// One shot at an epoch-millisecond timestamp.
    At(u64),
    /// Periodic, every `n` minutes.
    Every(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmInfo {
    pub name: String,
    /// Next fire time in epoch milliseconds.
    pub fire_at: u64,
}

/// The host's scheduled-callback ("alarms") service.
///
/// Fired alarms deliver their name to a single dispatcher that routes by
/// name prefix; see `Engine::alarm_fired`.
#[async_trait]
pub trait AlarmHost: Send + Sync {
    async fn create(&self, name: &str, schedule: AlarmSchedule) -> Result<(), AlarmError>;

    /// Cancel by name. Returns whether an alarm existed.
    async fn clear(&self, name: &str) -> Result<bool, AlarmError>;

    async fn get(&self, name: &str) -> Result<Option<AlarmInfo>, AlarmError>;

    async fn get_all(&self) -> Result<Vec<AlarmInfo>, AlarmError>;
}

// =============================================================================
// Remote account service
// =============================================================================

/// Error type for the remote account service.
#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("account service unreachable: {0}")]
    Network(String),
    #[error("account service rejected request: {0}")]
    Rejected(String),
    #[error("malformed account response: {0}")]
    Malformed(String),
}

/// The remote account service the sync protocol reconciles against.
#[async_trait]
pub trait AccountService: Send + Sync {
    /// Fetch the remote record. `None` means no authenticated session.
    async fn get_options(&self) -> Result<Option<ConfigRecord>, AccountError>;

    /// Push the allow-listed local subset.
    async fn set_options(&self, payload: &SyncPayload) -> Result<(), AccountError>;
}
