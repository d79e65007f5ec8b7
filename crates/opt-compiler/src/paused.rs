//! The pause/"zap" allow rule.
//!
//! All paused ids collapse into a single high-priority rule under the
//! reserved `PAUSED_RULE_ID`, so every recompute replaces the previous rule
//! instead of accumulating. The encoding differs per platform: Chromium
//! takes `allowAllRequests` scoped by request domain; Safari's content
//! blocker converter mishandles domain exclusion on `allowAllRequests`, so
//! there we fall back to a plain `allow` keyed on the initiator.

use std::collections::BTreeMap;

use opt_core::config::PausedEntry;
use opt_core::rules::{
    NetRule, ResourceType, RuleAction, RuleCondition, PAUSED_RULE_ID, PAUSED_RULE_PRIORITY,
};

/// Host platform flavor, which picks the pause-rule encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Chromium,
    Safari,
}

/// Build the single allow rule covering every paused id.
///
/// Returns `None` when nothing is paused; the caller's removal of
/// `PAUSED_RULE_ID` then retires the previous rule.
pub fn compile_paused(
    paused: &BTreeMap<String, PausedEntry>,
    platform: Platform,
) -> Option<NetRule> {
    if paused.is_empty() {
        return None;
    }

    let domains: Vec<String> = paused.keys().map(|id| normalize_id(id)).collect();

    let condition = match platform {
        Platform::Chromium => RuleCondition {
            request_domains: Some(domains),
            resource_types: Some(vec![ResourceType::MainFrame, ResourceType::SubFrame]),
            ..RuleCondition::default()
        },
        Platform::Safari => RuleCondition {
            url_filter: Some("*".to_string()),
            initiator_domains: Some(domains),
            ..RuleCondition::default()
        },
    };

    let action = match platform {
        Platform::Chromium => RuleAction::allow_all_requests(),
        Platform::Safari => RuleAction::allow(),
    };

    Some(NetRule {
        id: PAUSED_RULE_ID,
        priority: PAUSED_RULE_PRIORITY,
        action,
        condition,
    })
}

/// Hostname normalization: lowercase, strip a `www.` prefix and any port.
fn normalize_id(id: &str) -> String {
    let lower = id.to_ascii_lowercase();
    let without_port = match lower.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => lower.as_str(),
    };
    without_port
        .strip_prefix("www.")
        .unwrap_or(without_port)
        .to_string()
}
