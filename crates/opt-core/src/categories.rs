//! Tracker categories and the exception negation policy.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Tracker category, as assigned by the tracker database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum Category {
    Advertising,
    SiteAnalytics,
    Consent,
    Essential,
    Hosting,
    CustomerInteraction,
    AudioVideoPlayer,
    Extensions,
    Misc,
    SocialMedia,
    #[default]
    Unknown,
}

impl Category {
    /// Default policy: is this category blocked without any user override?
    pub fn blocked_by_default(self) -> bool {
        match self {
            Category::Advertising
            | Category::SiteAnalytics
            | Category::Consent
            | Category::AudioVideoPlayer
            | Category::Misc
            | Category::SocialMedia
            | Category::Unknown => true,
            Category::Essential
            | Category::Hosting
            | Category::CustomerInteraction
            | Category::Extensions => false,
        }
    }
}

/// Whether a tracker's filter must flip its block/allow polarity.
///
/// The pattern/category pair is negated iff the category default equals the
/// user's explicit status choice. This single comparison is the whole
/// decision table; resist the temptation to special-case it further.
pub fn should_negate(category_blocked_by_default: bool, overwrite_status: bool) -> bool {
    category_blocked_by_default == overwrite_status
}

/// Pattern -> category lookup, extracted from the tracker database.
#[derive(Debug, Clone, Default)]
pub struct TrackerIndex {
    categories: HashMap<String, Category>,
}

impl TrackerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Category)>,
        S: Into<String>,
    {
        Self {
            categories: entries
                .into_iter()
                .map(|(pattern, category)| (pattern.into(), category))
                .collect(),
        }
    }

    /// Category for a tracker pattern. Unlisted patterns are `Unknown`.
    pub fn category_of(&self, pattern: &str) -> Category {
        self.categories
            .get(pattern)
            .copied()
            .unwrap_or(Category::Unknown)
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negation_truth_table() {
        // All four combinations, exactly as specified.
        assert!(should_negate(true, true));
        assert!(!should_negate(true, false));
        assert!(!should_negate(false, true));
        assert!(should_negate(false, false));
    }

    #[test]
    fn essential_is_never_blocked_by_default() {
        assert!(!Category::Essential.blocked_by_default());
        assert!(!Category::Hosting.blocked_by_default());
        assert!(Category::Advertising.blocked_by_default());
        assert!(Category::Unknown.blocked_by_default());
    }

    #[test]
    fn index_falls_back_to_unknown() {
        let index =
            TrackerIndex::from_entries([("doubleclick.net", Category::Advertising)]);
        assert_eq!(index.category_of("doubleclick.net"), Category::Advertising);
        assert_eq!(index.category_of("nobody-knows.example"), Category::Unknown);
    }
}
