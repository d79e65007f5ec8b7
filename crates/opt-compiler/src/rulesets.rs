//! Static ruleset toggles for regional and experimental filter lists.
//!
//! The extension bundle ships one static ruleset per supported region plus
//! an experimental list; config only chooses which of them are active. The
//! toggle always names the full catalog so the host converges to the
//! desired state no matter what was enabled before.

use opt_core::config::ConfigRecord;
use opt_core::rules::RulesetToggle;

/// Regional rulesets shipped with the extension bundle.
pub const REGIONAL_RULESETS: [&str; 8] = [
    "lang-de", "lang-fr", "lang-es", "lang-it", "lang-ja", "lang-nl", "lang-pl", "lang-ru",
];

/// The experimental filters ruleset.
pub const EXPERIMENTAL_RULESET: &str = "experimental";

pub fn compile_rulesets(config: &ConfigRecord) -> RulesetToggle {
    let mut toggle = RulesetToggle::default();

    for id in REGIONAL_RULESETS {
        if config.regional_filters.contains(id) {
            toggle.enable.push(id.to_string());
        } else {
            toggle.disable.push(id.to_string());
        }
    }

    for unknown in config
        .regional_filters
        .iter()
        .filter(|id| !REGIONAL_RULESETS.contains(&id.as_str()))
    {
        log::warn!("unknown regional ruleset {unknown:?} requested, ignoring");
    }

    if config.experimental_filters {
        toggle.enable.push(EXPERIMENTAL_RULESET.to_string());
    } else {
        toggle.disable.push(EXPERIMENTAL_RULESET.to_string());
    }

    toggle
}

#[cfg(test)]
mod tests {
    use opt_core::config::ConfigPatch;

    use super::*;

    #[test]
    fn default_config_disables_everything() {
        let toggle = compile_rulesets(&ConfigRecord::default());
        assert!(toggle.enable.is_empty());
        assert_eq!(toggle.disable.len(), REGIONAL_RULESETS.len() + 1);
    }

    #[test]
    fn enabled_regions_split_the_catalog() {
        let mut config = ConfigRecord::default();
        config.apply(&ConfigPatch {
            regional_filters: Some(["lang-de".to_string(), "lang-fr".to_string()].into()),
            experimental_filters: Some(true),
            ..ConfigPatch::default()
        });
        let toggle = compile_rulesets(&config);
        assert!(toggle.enable.contains(&"lang-de".to_string()));
        assert!(toggle.enable.contains(&"lang-fr".to_string()));
        assert!(toggle.enable.contains(&EXPERIMENTAL_RULESET.to_string()));
        assert!(toggle.disable.contains(&"lang-ja".to_string()));
        assert!(!toggle.disable.contains(&"lang-de".to_string()));
    }

    #[test]
    fn unknown_regions_are_ignored() {
        let mut config = ConfigRecord::default();
        config.apply(&ConfigPatch {
            regional_filters: Some(["lang-xx".to_string()].into()),
            ..ConfigPatch::default()
        });
        let toggle = compile_rulesets(&config);
        assert!(toggle.enable.is_empty());
    }
}
