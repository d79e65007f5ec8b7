//! OptShield Engine Library
//!
//! The reactive core of the extension background: a versioned config store
//! with an ordered async observer queue, rule recompilation on relevant
//! changes, auto-resume scheduling for paused domains, revision-based
//! account sync, and a resettable lifecycle gate.
//!
//! # Modules
//!
//! - `store`: cached + persisted config record, strictly ordered commits
//! - `observers`: registry and ordered batch execution queue
//! - `scheduler`: paused-domain auto-resume alarms
//! - `sync`: last-writer-wins reconciliation with the account service
//! - `gate`: resettable start/stop gate with bounded waits
//! - `engine`: wiring and the inbound message surface
//! - `emulated`: in-process hosts for tests and the CLI harness

pub mod emulated;
pub mod engine;
pub mod gate;
pub mod observers;
pub mod scheduler;
pub mod store;
pub mod sync;

pub use engine::{Engine, Hosts};
pub use gate::{Gate, GateError};
pub use observers::{FirstRun, ObserverError, ObserverQueue};
pub use scheduler::{revoke_alarm_name, RevocationScheduler, REVOKE_ALARM_PREFIX};
pub use store::ConfigStore;
pub use sync::{SyncError, SyncManager, SYNC_PERIODIC_ALARM, SYNC_SESSION_ALARM};

/// Milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
