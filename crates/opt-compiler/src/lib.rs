//! OptShield rule compiler.
//!
//! Pure derivation of declarative network rules from config slices. Three
//! independent inputs feed it: per-tracker exceptions, the paused-domain
//! table, and user custom filters; regional/experimental toggles map to
//! static ruleset switches. The compiler never talks to the host — the
//! engine applies its output through the `RuleHost` seam.

pub mod exceptions;
pub mod filters;
pub mod paused;
pub mod rulesets;

use opt_core::categories::TrackerIndex;
use opt_core::config::ConfigRecord;
use opt_core::rules::{is_engine_rule_id, NetRule, RuleUpdate, RulesetToggle};

pub use exceptions::compile_exceptions;
pub use filters::{compile_custom_filters, FilterStats};
pub use paused::{compile_paused, Platform};
pub use rulesets::compile_rulesets;

/// Everything one recompute produces.
#[derive(Debug, Clone, Default)]
pub struct CompiledOutput {
    /// Dynamic rule changes. `remove_rule_ids` always covers every
    /// installed id in the engine-owned range, so a recompute replaces
    /// rather than accumulates.
    pub update: RuleUpdate,
    /// Static ruleset switches.
    pub rulesets: RulesetToggle,
    /// Custom filter lines that could not be compiled.
    pub skipped_filters: usize,
}

/// Recompute the full desired rule state from a config record.
///
/// `installed` is the host's current dynamic rule list; every id of ours in
/// it is scheduled for removal before the fresh set is added, which keeps
/// recomputes idempotent and avoids duplicate-id rejections.
pub fn compile(
    config: &ConfigRecord,
    index: &TrackerIndex,
    platform: Platform,
    installed: &[NetRule],
) -> CompiledOutput {
    let mut add_rules = Vec::new();

    add_rules.extend(compile_exceptions(&config.exceptions, index));

    if let Some(rule) = compile_paused(&config.paused, platform) {
        add_rules.push(rule);
    }

    let (custom, stats) = compile_custom_filters(&config.custom_filters);
    add_rules.extend(custom);

    let remove_rule_ids: Vec<u32> = installed
        .iter()
        .map(|rule| rule.id)
        .filter(|&id| is_engine_rule_id(id))
        .collect();

    CompiledOutput {
        update: RuleUpdate {
            add_rules,
            remove_rule_ids,
        },
        rulesets: compile_rulesets(config),
        skipped_filters: stats.skipped,
    }
}
