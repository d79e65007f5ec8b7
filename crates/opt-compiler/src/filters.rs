//! User custom filter compilation.
//!
//! Parses the ABP-flavored subset users actually write (`||host^`, `@@`
//! exceptions, `$` options with request types, party and `domain=`
//! constraints) into declarative rules. Anything outside that subset —
//! cosmetic filters, regexes, unknown options — is skipped and counted, not
//! an error: a bad line in a user list must never poison the rest.

use opt_core::rules::{
    DomainType, NetRule, ResourceType, RuleAction, RuleCondition, CUSTOM_FILTER_RULE_ID_END,
    CUSTOM_FILTER_RULE_ID_START, CUSTOM_FILTER_RULE_PRIORITY,
};

/// Outcome counters for one compilation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub parsed: usize,
    pub skipped: usize,
}

const ALL_RESOURCE_TYPES: [ResourceType; 10] = [
    ResourceType::MainFrame,
    ResourceType::SubFrame,
    ResourceType::Script,
    ResourceType::Image,
    ResourceType::Stylesheet,
    ResourceType::Font,
    ResourceType::Media,
    ResourceType::Xmlhttprequest,
    ResourceType::Websocket,
    ResourceType::Other,
];

pub fn compile_custom_filters(lines: &[String]) -> (Vec<NetRule>, FilterStats) {
    let mut rules = Vec::new();
    let mut stats = FilterStats::default();
    let mut next_id = CUSTOM_FILTER_RULE_ID_START;

    for raw_line in lines {
        let line = raw_line.trim();
        if line.is_empty() || is_comment_line(line) {
            continue;
        }

        if next_id >= CUSTOM_FILTER_RULE_ID_END {
            log::warn!("custom filter rule id range exhausted, remaining lines dropped");
            stats.skipped += 1;
            continue;
        }

        match parse_filter_line(line) {
            Some(parsed) => {
                rules.push(NetRule {
                    id: next_id,
                    priority: CUSTOM_FILTER_RULE_PRIORITY,
                    action: parsed.action,
                    condition: parsed.condition,
                });
                next_id += 1;
                stats.parsed += 1;
            }
            None => {
                log::debug!("skipping unsupported filter line: {line}");
                stats.skipped += 1;
            }
        }
    }

    (rules, stats)
}

fn is_comment_line(line: &str) -> bool {
    line.starts_with('!') || line.starts_with('[') || line.starts_with("# ") || line == "#"
}

struct ParsedFilter {
    action: RuleAction,
    condition: RuleCondition,
}

fn parse_filter_line(line: &str) -> Option<ParsedFilter> {
    // Cosmetic and procedural filters are not network rules.
    if line.contains("##") || line.contains("#@#") || line.contains("#?#") {
        return None;
    }

    let mut line = line;
    let mut action = RuleAction::block();
    if let Some(rest) = line.strip_prefix("@@") {
        action = RuleAction::allow();
        line = rest.trim_start();
    }

    let (pattern_part, options_text) = split_rule_options(line);
    let options = match options_text {
        Some(options_text) => parse_options(options_text)?,
        None => ParsedOptions::default(),
    };

    let pattern = pattern_part.trim();
    if pattern.is_empty() || pattern == "|" || pattern == "||" {
        return None;
    }
    // Raw regex filters are out of the supported subset.
    if pattern.len() >= 2 && pattern.starts_with('/') && pattern.ends_with('/') {
        return None;
    }

    Some(ParsedFilter {
        action,
        condition: RuleCondition {
            url_filter: Some(pattern.to_string()),
            initiator_domains: options.initiator_include,
            excluded_initiator_domains: options.initiator_exclude,
            resource_types: options.resource_types,
            domain_type: options.domain_type,
            ..RuleCondition::default()
        },
    })
}

#[derive(Default)]
struct ParsedOptions {
    resource_types: Option<Vec<ResourceType>>,
    domain_type: Option<DomainType>,
    initiator_include: Option<Vec<String>>,
    initiator_exclude: Option<Vec<String>>,
}

fn split_rule_options(line: &str) -> (&str, Option<&str>) {
    match line.find('$') {
        Some(pos) => (&line[..pos], Some(&line[pos + 1..])),
        None => (line, None),
    }
}

fn parse_options(text: &str) -> Option<ParsedOptions> {
    let mut type_include: Vec<ResourceType> = Vec::new();
    let mut type_exclude: Vec<ResourceType> = Vec::new();
    let mut first_party = false;
    let mut third_party = false;
    let mut initiator_include: Vec<String> = Vec::new();
    let mut initiator_exclude: Vec<String> = Vec::new();

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Some(ParsedOptions::default());
    }

    for raw in trimmed.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let raw_lower = raw.to_ascii_lowercase();
        let raw_lower = raw_lower.as_str();

        if let Some(domain_value) = raw_lower.strip_prefix("domain=") {
            parse_domain_option(domain_value, &mut initiator_include, &mut initiator_exclude)?;
            continue;
        }

        let (negated, name) = match raw_lower.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, raw_lower),
        };

        if name.is_empty() || name.contains('=') {
            return None;
        }

        if name == "third-party" || name == "3p" {
            if negated {
                first_party = true;
            } else {
                third_party = true;
            }
            continue;
        }
        if name == "first-party" || name == "1p" {
            if negated {
                third_party = true;
            } else {
                first_party = true;
            }
            continue;
        }

        if let Some(resource_type) = resource_type_for(name) {
            if negated {
                type_exclude.push(resource_type);
            } else {
                type_include.push(resource_type);
            }
            continue;
        }

        // Unknown option: reject the whole line, like any strict parser.
        return None;
    }

    let resource_types = finalize_resource_types(&type_include, &type_exclude)?;

    let domain_type = match (first_party, third_party) {
        (true, true) | (false, false) => None,
        (true, false) => Some(DomainType::FirstParty),
        (false, true) => Some(DomainType::ThirdParty),
    };

    Some(ParsedOptions {
        resource_types,
        domain_type,
        initiator_include: non_empty(initiator_include),
        initiator_exclude: non_empty(initiator_exclude),
    })
}

fn parse_domain_option(
    value: &str,
    include: &mut Vec<String>,
    exclude: &mut Vec<String>,
) -> Option<()> {
    let mut any = false;
    for raw in value.split('|') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        any = true;
        match raw.strip_prefix('~') {
            Some(rest) => exclude.push(rest.to_ascii_lowercase()),
            None => include.push(raw.to_ascii_lowercase()),
        }
    }
    if any {
        Some(())
    } else {
        None
    }
}

fn resource_type_for(name: &str) -> Option<ResourceType> {
    let resource_type = match name {
        "document" | "doc" => ResourceType::MainFrame,
        "subdocument" | "frame" => ResourceType::SubFrame,
        "script" => ResourceType::Script,
        "image" => ResourceType::Image,
        "stylesheet" | "css" => ResourceType::Stylesheet,
        "font" => ResourceType::Font,
        "media" => ResourceType::Media,
        "xmlhttprequest" | "xhr" => ResourceType::Xmlhttprequest,
        "websocket" => ResourceType::Websocket,
        "other" => ResourceType::Other,
        _ => return None,
    };
    Some(resource_type)
}

/// `None` outer means the whole line is invalid; `None` inner means
/// unconstrained (all types).
fn finalize_resource_types(
    include: &[ResourceType],
    exclude: &[ResourceType],
) -> Option<Option<Vec<ResourceType>>> {
    if include.is_empty() && exclude.is_empty() {
        return Some(None);
    }
    let base: Vec<ResourceType> = if include.is_empty() {
        ALL_RESOURCE_TYPES.to_vec()
    } else {
        include.to_vec()
    };
    let remaining: Vec<ResourceType> = base
        .into_iter()
        .filter(|t| !exclude.contains(t))
        .collect();
    if remaining.is_empty() {
        return None;
    }
    if remaining.len() == ALL_RESOURCE_TYPES.len() {
        return Some(None);
    }
    Some(Some(remaining))
}

fn non_empty(values: Vec<String>) -> Option<Vec<String>> {
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

#[cfg(test)]
mod tests {
    use opt_core::rules::RuleActionKind;

    use super::*;

    fn compile(lines: &[&str]) -> (Vec<NetRule>, FilterStats) {
        let owned: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
        compile_custom_filters(&owned)
    }

    #[test]
    fn host_anchored_block_rule() {
        let (rules, stats) = compile(&["||ads.example.com^"]);
        assert_eq!(stats, FilterStats { parsed: 1, skipped: 0 });
        assert_eq!(rules[0].id, CUSTOM_FILTER_RULE_ID_START);
        assert_eq!(rules[0].action.kind, RuleActionKind::Block);
        assert_eq!(
            rules[0].condition.url_filter.as_deref(),
            Some("||ads.example.com^")
        );
    }

    #[test]
    fn exception_rule_allows() {
        let (rules, _) = compile(&["@@||cdn.example.com^"]);
        assert_eq!(rules[0].action.kind, RuleActionKind::Allow);
    }

    #[test]
    fn options_map_to_condition_fields() {
        let (rules, _) = compile(&["||ads.example.com^$script,third-party,domain=news.example|~blog.example"]);
        let condition = &rules[0].condition;
        assert_eq!(condition.resource_types, Some(vec![ResourceType::Script]));
        assert_eq!(condition.domain_type, Some(DomainType::ThirdParty));
        assert_eq!(
            condition.initiator_domains,
            Some(vec!["news.example".to_string()])
        );
        assert_eq!(
            condition.excluded_initiator_domains,
            Some(vec!["blog.example".to_string()])
        );
    }

    #[test]
    fn negated_type_excludes_from_all() {
        let (rules, _) = compile(&["||ads.example.com^$~script"]);
        let types = rules[0].condition.resource_types.as_ref().unwrap();
        assert_eq!(types.len(), ALL_RESOURCE_TYPES.len() - 1);
        assert!(!types.contains(&ResourceType::Script));
    }

    #[test]
    fn comments_are_ignored_not_counted() {
        let (rules, stats) = compile(&["! my list", "[Adblock Plus 2.0]", "||ads.example.com^"]);
        assert_eq!(rules.len(), 1);
        assert_eq!(stats, FilterStats { parsed: 1, skipped: 0 });
    }

    #[test]
    fn unsupported_lines_are_skipped_and_counted() {
        let (rules, stats) = compile(&[
            "example.com##.banner",
            "/^https?:\\/\\/ads/",
            "||ads.example.com^$unknown-option",
            "||ok.example.com^",
        ]);
        assert_eq!(rules.len(), 1);
        assert_eq!(stats, FilterStats { parsed: 1, skipped: 3 });
    }

    #[test]
    fn bad_line_does_not_poison_the_rest() {
        let (rules, stats) = compile(&["$$$", "||a.example^", "||b.example^"]);
        assert_eq!(rules.len(), 2);
        assert_eq!(stats.skipped, 1);
        // Ids stay dense even across skips.
        assert_eq!(rules[0].id + 1, rules[1].id);
    }

    #[test]
    fn conflicting_party_options_cancel_out() {
        let (rules, _) = compile(&["||ads.example.com^$third-party,~third-party"]);
        assert_eq!(rules[0].condition.domain_type, None);
    }
}
