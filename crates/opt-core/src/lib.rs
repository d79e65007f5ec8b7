//! OptShield Core Library
//!
//! This crate provides the domain model for the OptShield background engine:
//! the versioned options record, the tracker category policy table, the
//! declarative network rule model, and the trait seams behind which the host
//! browser APIs (storage, rules, alarms, account service) live.
//!
//! # Modules
//!
//! - `config`: the options record, partial updates, revision tracking
//! - `categories`: tracker categories and the exception negation policy
//! - `rules`: declarative network rule model and reserved id ranges
//! - `hosts`: async traits for the host browser surfaces

pub mod categories;
pub mod config;
pub mod hosts;
pub mod rules;

// Re-export commonly used types
pub use categories::{should_negate, Category, TrackerIndex};
pub use config::{
    ConfigKey, ConfigPatch, ConfigRecord, ExceptionEntry, Onboarding, PausedEntry, SyncPayload,
};
pub use hosts::{
    AccountError, AccountService, AlarmError, AlarmHost, AlarmInfo, AlarmSchedule, Persistence,
    RuleHost, RuleHostError, StorageError,
};
pub use rules::{
    DomainType, NetRule, ResourceType, RuleAction, RuleCondition, RuleUpdate, RulesetToggle,
};
