//! Declarative network rule model.
//!
//! Only the fields this engine populates are modeled; the host consumes the
//! serialized form directly. Dynamic rule ids 1..2,000,000 are reserved for
//! the engine, carved into non-overlapping sub-ranges per feature so a
//! recompute of one feature can remove exactly its own rules.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// =============================================================================
// Reserved id ranges
// =============================================================================

/// Lowest id the engine may own.
pub const DYNAMIC_RULE_ID_MIN: u32 = 1;
/// One past the highest id the engine may own.
pub const DYNAMIC_RULE_ID_END: u32 = 2_000_000;

/// The single pause/"zap" allow rule.
pub const PAUSED_RULE_ID: u32 = 1;
/// Priority of the pause rule; must outrank every blocking rule.
pub const PAUSED_RULE_PRIORITY: u32 = 1_000_000;

/// Exception (per-tracker override) rules.
pub const EXCEPTION_RULE_ID_START: u32 = 10_000;
pub const EXCEPTION_RULE_ID_END: u32 = 100_000;
pub const EXCEPTION_RULE_PRIORITY: u32 = 2_000;

/// User custom filter rules.
pub const CUSTOM_FILTER_RULE_ID_START: u32 = 1_000_000;
pub const CUSTOM_FILTER_RULE_ID_END: u32 = DYNAMIC_RULE_ID_END;
pub const CUSTOM_FILTER_RULE_PRIORITY: u32 = 1_000;

/// Is this id inside the engine-owned dynamic range?
pub fn is_engine_rule_id(id: u32) -> bool {
    (DYNAMIC_RULE_ID_MIN..DYNAMIC_RULE_ID_END).contains(&id)
}

// =============================================================================
// Rule model
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub enum RuleActionKind {
    Allow,
    AllowAllRequests,
    Block,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RuleAction {
    #[serde(rename = "type")]
    pub kind: RuleActionKind,
}

impl RuleAction {
    pub fn allow() -> Self {
        Self {
            kind: RuleActionKind::Allow,
        }
    }

    pub fn allow_all_requests() -> Self {
        Self {
            kind: RuleActionKind::AllowAllRequests,
        }
    }

    pub fn block() -> Self {
        Self {
            kind: RuleActionKind::Block,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub enum ResourceType {
    MainFrame,
    SubFrame,
    Script,
    Image,
    Stylesheet,
    Font,
    Media,
    Xmlhttprequest,
    Websocket,
    Other,
}

/// First-party / third-party constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub enum DomainType {
    FirstParty,
    ThirdParty,
}

/// Request condition. Absent fields do not constrain the match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RuleCondition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_domains: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initiator_domains: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excluded_initiator_domains: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_types: Option<Vec<ResourceType>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_type: Option<DomainType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct NetRule {
    pub id: u32,
    pub priority: u32,
    pub action: RuleAction,
    pub condition: RuleCondition,
}

/// One atomic change handed to the rule host: removals apply before adds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RuleUpdate {
    pub add_rules: Vec<NetRule>,
    pub remove_rule_ids: Vec<u32>,
}

impl RuleUpdate {
    pub fn is_empty(&self) -> bool {
        self.add_rules.is_empty() && self.remove_rule_ids.is_empty()
    }
}

/// Static ruleset toggles (regional and experimental filter lists).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RulesetToggle {
    pub enable: Vec<String>,
    pub disable: Vec<String>,
}

impl RulesetToggle {
    pub fn is_empty(&self) -> bool {
        self.enable.is_empty() && self.disable.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_ranges_do_not_overlap() {
        assert!(PAUSED_RULE_ID < EXCEPTION_RULE_ID_START);
        assert!(EXCEPTION_RULE_ID_END <= CUSTOM_FILTER_RULE_ID_START);
        assert!(CUSTOM_FILTER_RULE_ID_END <= DYNAMIC_RULE_ID_END);
    }

    #[test]
    fn engine_id_range_is_half_open() {
        assert!(is_engine_rule_id(DYNAMIC_RULE_ID_MIN));
        assert!(is_engine_rule_id(DYNAMIC_RULE_ID_END - 1));
        assert!(!is_engine_rule_id(0));
        assert!(!is_engine_rule_id(DYNAMIC_RULE_ID_END));
    }

    #[test]
    fn action_type_serializes_with_host_field_name() {
        let rule = NetRule {
            id: PAUSED_RULE_ID,
            priority: PAUSED_RULE_PRIORITY,
            action: RuleAction::allow_all_requests(),
            condition: RuleCondition {
                request_domains: Some(vec!["example.com".into()]),
                resource_types: Some(vec![ResourceType::MainFrame, ResourceType::SubFrame]),
                ..RuleCondition::default()
            },
        };
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["action"]["type"], "allowAllRequests");
        assert_eq!(json["condition"]["requestDomains"][0], "example.com");
        assert!(json["condition"].get("urlFilter").is_none());
    }
}
