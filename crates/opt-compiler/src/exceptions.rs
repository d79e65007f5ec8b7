//! Per-tracker exception rules.
//!
//! An exception entry only produces a rule when the pattern/category pair
//! must flip polarity, as decided by `should_negate`. A blocked-by-default
//! tracker negates into an allow rule; an allowed-by-default tracker negates
//! into a block rule. Scoping comes from the entry: global, or limited to
//! the listed sites via initiator domains.

use std::collections::BTreeMap;

use opt_core::categories::{should_negate, Category, TrackerIndex};
use opt_core::config::ExceptionEntry;
use opt_core::rules::{
    NetRule, RuleAction, RuleCondition, EXCEPTION_RULE_ID_END, EXCEPTION_RULE_ID_START,
    EXCEPTION_RULE_PRIORITY,
};

pub fn compile_exceptions(
    exceptions: &BTreeMap<String, ExceptionEntry>,
    index: &TrackerIndex,
) -> Vec<NetRule> {
    let mut rules = Vec::new();
    let mut next_id = EXCEPTION_RULE_ID_START;

    for (pattern, entry) in exceptions {
        let category = if entry.category == Category::Unknown {
            index.category_of(pattern)
        } else {
            entry.category
        };

        if !should_negate(category.blocked_by_default(), entry.overwrite_status) {
            continue;
        }

        if !entry.global && entry.domains.is_empty() {
            // Scoped override with no sites left; nothing to apply.
            log::debug!("exception for {pattern} has no scope, skipping");
            continue;
        }

        if next_id >= EXCEPTION_RULE_ID_END {
            log::warn!(
                "exception rule id range exhausted, {} entries dropped",
                exceptions.len() - rules.len()
            );
            break;
        }

        let action = if category.blocked_by_default() {
            RuleAction::allow()
        } else {
            RuleAction::block()
        };

        let initiator_domains = if entry.global {
            None
        } else {
            Some(entry.domains.clone())
        };

        rules.push(NetRule {
            id: next_id,
            priority: EXCEPTION_RULE_PRIORITY,
            action,
            condition: RuleCondition {
                url_filter: Some(format!("||{pattern}^")),
                initiator_domains,
                ..RuleCondition::default()
            },
        });
        next_id += 1;
    }

    rules
}
