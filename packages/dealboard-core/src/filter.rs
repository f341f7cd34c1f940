/// Filtered board projection.
///
/// Pure view derivation: `project` never mutates the input stage list
/// and is cheap enough to recompute on every render at expected board
/// sizes (a few hundred deals).
use std::collections::HashSet;

use chrono::NaiveDate;
use unicode_normalization::UnicodeNormalization;

use crate::types::{Deal, Stage};

/// Local-only filter state. All predicates are conjunctive.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardFilter {
    /// Substring match against deal title or contact display name.
    pub search: String,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    /// Empty set means "any tags".
    pub tag_ids: HashSet<String>,
    /// Empty set means "all stages"; a non-empty set empties excluded
    /// stages instead of hiding them.
    pub stage_ids: HashSet<String>,
    pub show_won: bool,
    pub show_lost: bool,
}

impl Default for BoardFilter {
    fn default() -> Self {
        Self {
            search: String::new(),
            date_from: None,
            date_to: None,
            tag_ids: HashSet::new(),
            stage_ids: HashSet::new(),
            show_won: true,
            show_lost: true,
        }
    }
}

impl BoardFilter {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    fn matches(&self, deal: &Deal) -> bool {
        if deal.won_at.is_some() && !self.show_won {
            return false;
        }
        if deal.lost_at.is_some() && !self.show_lost {
            return false;
        }

        let query = self.search.trim();
        if !query.is_empty() {
            let in_title = contains_text(&deal.title, query);
            let in_contact = deal
                .contact_name
                .as_deref()
                .map(|name| contains_text(name, query))
                .unwrap_or(false);
            if !in_title && !in_contact {
                return false;
            }
        }

        // Deals with no expected close date pass the date filter.
        if let Some(date) = deal.expected_close_date {
            if let Some(from) = self.date_from {
                if date < from {
                    return false;
                }
            }
            if let Some(to) = self.date_to {
                if date > to {
                    return false;
                }
            }
        }

        if !self.tag_ids.is_empty() && !deal.tag_ids.iter().any(|tag| self.tag_ids.contains(tag)) {
            return false;
        }

        true
    }
}

/// Derive the filtered view of a board. Excluded stages are emitted with
/// an empty deal list so the column itself stays visible.
pub fn project(stages: &[Stage], filter: &BoardFilter) -> Vec<Stage> {
    stages
        .iter()
        .map(|stage| {
            let mut projected = stage.clone();
            if !filter.stage_ids.is_empty() && !filter.stage_ids.contains(&stage.id) {
                projected.deals = Vec::new();
            } else {
                projected.deals.retain(|deal| filter.matches(deal));
            }
            projected
        })
        .collect()
}

/// Unicode-aware normalization for search: lowercases, NFD-decomposes,
/// and strips combining marks so "muller" matches "Müller" etc.
fn normalize_for_search(value: &str) -> String {
    value
        .to_lowercase()
        .nfd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .collect()
}

fn contains_text(haystack: &str, needle: &str) -> bool {
    normalize_for_search(haystack).contains(&normalize_for_search(needle))
}
