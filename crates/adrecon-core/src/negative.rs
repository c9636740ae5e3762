use serde::{Deserialize, Serialize};

use crate::delta::safe_ratio;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchType {
    #[serde(alias = "broad")]
    Broad,
    #[serde(alias = "phrase")]
    Phrase,
    #[serde(alias = "exact")]
    Exact,
    /// Anything the evaluator does not understand. Never blocks.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegativeTerm {
    pub text: String,
    pub match_type: MatchType,
}

impl NegativeTerm {
    pub fn new(text: &str, match_type: MatchType) -> Self {
        Self {
            text: text.to_string(),
            match_type,
        }
    }
}

fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether `term` would suppress ads for `query`.
///
/// Broad terms block when every token appears in the query, phrase terms when
/// their words appear contiguously, exact terms when the query equals the
/// bracket-stripped text. Empty terms and unknown match types never block.
pub fn blocks(term: &NegativeTerm, query: &str) -> bool {
    let query = normalize(query);
    match term.match_type {
        MatchType::Broad => {
            let text = normalize(&term.text);
            if text.is_empty() {
                return false;
            }
            let query_tokens: Vec<&str> = query.split(' ').collect();
            text.split(' ').all(|token| query_tokens.contains(&token))
        }
        MatchType::Phrase => {
            let text = normalize(term.text.trim().trim_matches('"'));
            if text.is_empty() {
                return false;
            }
            format!(" {query} ").contains(&format!(" {text} "))
        }
        MatchType::Exact => {
            let stripped: String = term.text.chars().filter(|c| *c != '[' && *c != ']').collect();
            let text = normalize(&stripped);
            !text.is_empty() && query == text
        }
        MatchType::Unknown => false,
    }
}

/// First term in `negatives` that blocks `query`.
pub fn first_blocking<'a>(negatives: &'a [NegativeTerm], query: &str) -> Option<&'a NegativeTerm> {
    negatives.iter().find(|term| blocks(term, query))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryAudit {
    pub query: String,
    pub blocked: bool,
    pub blocked_by: Option<NegativeTerm>,
}

pub fn audit<S: AsRef<str>>(negatives: &[NegativeTerm], queries: &[S]) -> Vec<QueryAudit> {
    queries
        .iter()
        .map(|query| {
            let query = query.as_ref();
            let blocked_by = first_blocking(negatives, query).cloned();
            QueryAudit {
                query: query.to_string(),
                blocked: blocked_by.is_some(),
                blocked_by,
            }
        })
        .collect()
}

/// Performance of one search term over the review period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchTermStats {
    pub search_term: String,
    #[serde(default)]
    pub campaign: Option<String>,
    #[serde(default)]
    pub ad_group: Option<String>,
    #[serde(default)]
    pub impressions: f64,
    #[serde(default)]
    pub clicks: f64,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub conversions: f64,
}

/// A search term is a negative candidate when it exceeds both the click and
/// cost floors while staying under the conversion ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SuggestionThresholds {
    pub min_clicks: f64,
    pub min_cost: f64,
    pub max_conversions: f64,
}

impl Default for SuggestionThresholds {
    fn default() -> Self {
        Self {
            min_clicks: 5.0,
            min_cost: 10.0,
            max_conversions: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NegativeCandidate {
    #[serde(flatten)]
    pub stats: SearchTermStats,
    pub ctr: f64,
    pub conversion_rate: f64,
    pub cpc: f64,
    pub blocked_by: Option<NegativeTerm>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NegativeSuggestions {
    /// Wasteful terms not yet covered by any negative, highest cost first.
    pub candidates: Vec<NegativeCandidate>,
    /// Wasteful terms an existing negative already blocks.
    pub already_negated: Vec<NegativeCandidate>,
}

pub fn suggest_negatives(
    terms: &[SearchTermStats],
    negatives: &[NegativeTerm],
    thresholds: &SuggestionThresholds,
) -> NegativeSuggestions {
    let mut suggestions = NegativeSuggestions::default();
    for stats in terms {
        let wasteful = stats.clicks > thresholds.min_clicks
            && stats.cost > thresholds.min_cost
            && stats.conversions < thresholds.max_conversions;
        if !wasteful {
            continue;
        }
        let blocked_by = first_blocking(negatives, &stats.search_term).cloned();
        let candidate = NegativeCandidate {
            ctr: safe_ratio(stats.clicks, stats.impressions),
            conversion_rate: safe_ratio(stats.conversions, stats.clicks),
            cpc: safe_ratio(stats.cost, stats.clicks),
            stats: stats.clone(),
            blocked_by,
        };
        if candidate.blocked_by.is_some() {
            suggestions.already_negated.push(candidate);
        } else {
            suggestions.candidates.push(candidate);
        }
    }
    let by_cost = |a: &NegativeCandidate, b: &NegativeCandidate| {
        b.stats
            .cost
            .total_cmp(&a.stats.cost)
            .then_with(|| a.stats.search_term.cmp(&b.stats.search_term))
    };
    suggestions.candidates.sort_by(by_cost);
    suggestions.already_negated.sort_by(by_cost);
    suggestions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documented_scenarios() {
        assert!(blocks(&NegativeTerm::new("red shoes", MatchType::Broad), "buy red shoes online"));
        assert!(!blocks(&NegativeTerm::new("red shoes", MatchType::Phrase), "red running shoes"));
        assert!(blocks(&NegativeTerm::new("[shoes]", MatchType::Exact), "shoes"));
    }

    #[test]
    fn broad_is_order_independent_token_containment() {
        let term = NegativeTerm::new("shoes red", MatchType::Broad);
        assert!(blocks(&term, "red running shoes"));
        assert!(!blocks(&term, "red shoe"));
        assert!(!blocks(&NegativeTerm::new("red", MatchType::Broad), "reddish shoes"));
    }

    #[test]
    fn phrase_requires_whole_words() {
        let term = NegativeTerm::new("\"red shoes\"", MatchType::Phrase);
        assert!(blocks(&term, "cheap red shoes"));
        assert!(blocks(&term, "RED   SHOES sale"));
        assert!(!blocks(&term, "red shoestring"));
        assert!(!blocks(&term, "bored red shoesx"));
    }

    #[test]
    fn exact_needs_full_equality() {
        let term = NegativeTerm::new("[red shoes]", MatchType::Exact);
        assert!(blocks(&term, "Red Shoes"));
        assert!(!blocks(&term, "red shoes sale"));
    }

    #[test]
    fn unknown_and_empty_terms_never_block() {
        assert!(!blocks(&NegativeTerm::new("shoes", MatchType::Unknown), "shoes"));
        assert!(!blocks(&NegativeTerm::new("  ", MatchType::Broad), "shoes"));
        assert!(!blocks(&NegativeTerm::new("\"\"", MatchType::Phrase), "shoes"));
        assert!(!blocks(&NegativeTerm::new("[]", MatchType::Exact), ""));
    }

    #[test]
    fn match_type_deserializes_leniently() {
        let term: NegativeTerm =
            serde_json::from_str(r#"{"text":"x","match_type":"BROAD"}"#).expect("term");
        assert_eq!(term.match_type, MatchType::Broad);
        let term: NegativeTerm =
            serde_json::from_str(r#"{"text":"x","match_type":"phrase"}"#).expect("term");
        assert_eq!(term.match_type, MatchType::Phrase);
        let term: NegativeTerm =
            serde_json::from_str(r#"{"text":"x","match_type":"MODIFIED_BROAD"}"#).expect("term");
        assert_eq!(term.match_type, MatchType::Unknown);
    }

    #[test]
    fn audit_reports_first_blocking_term() {
        let negatives = vec![
            NegativeTerm::new("free", MatchType::Broad),
            NegativeTerm::new("free shoes", MatchType::Phrase),
        ];
        let rows = audit(&negatives, &["free shoes", "paid shoes"]);
        assert!(rows[0].blocked);
        assert_eq!(rows[0].blocked_by.as_ref().map(|t| t.text.as_str()), Some("free"));
        assert!(!rows[1].blocked);
        assert_eq!(rows[1].blocked_by, None);
    }

    #[test]
    fn suggestions_split_by_existing_negatives() {
        let term = |text: &str, clicks: f64, cost: f64, conversions: f64| SearchTermStats {
            search_term: text.to_string(),
            campaign: None,
            ad_group: None,
            impressions: 100.0,
            clicks,
            cost,
            conversions,
        };
        let terms = vec![
            term("free shoes", 10.0, 30.0, 0.0),
            term("cheap shoes", 8.0, 50.0, 0.0),
            term("buy shoes", 20.0, 90.0, 4.0),
            term("shoe repair", 2.0, 5.0, 0.0),
        ];
        let negatives = vec![NegativeTerm::new("free", MatchType::Broad)];
        let out = suggest_negatives(&terms, &negatives, &SuggestionThresholds::default());
        assert_eq!(out.candidates.len(), 1);
        assert_eq!(out.candidates[0].stats.search_term, "cheap shoes");
        assert!((out.candidates[0].cpc - 6.25).abs() < 1e-12);
        assert_eq!(out.already_negated.len(), 1);
        assert_eq!(out.already_negated[0].stats.search_term, "free shoes");
    }
}
