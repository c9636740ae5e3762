use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Serializer};
use tracing::warn;

use crate::delta::safe_ratio;
use crate::matcher::{normalize_label, CampaignUniverse};
use crate::rules::RuleSet;

/// Label reported for CRM rows with a blank source label.
pub const NO_LABEL: &str = "(no label)";

/// How a label was attributed. Serialized as `generic` or `rule:<name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchMethod {
    Generic,
    Rule(String),
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchMethod::Generic => f.write_str("generic"),
            MatchMethod::Rule(name) => write!(f, "rule:{name}"),
        }
    }
}

impl Serialize for MatchMethod {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelMatch {
    pub label: String,
    pub campaign: String,
    pub method: MatchMethod,
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnmatchedLabel {
    pub label: String,
    pub rows: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AttributionReport {
    pub matches: Vec<LabelMatch>,
    /// Attribution leakage, largest first.
    pub unmatched: Vec<UnmatchedLabel>,
    pub total_rows: usize,
    pub matched_rows: usize,
    pub coverage: f64,
}

impl AttributionReport {
    pub fn campaign_for(&self, label: &str) -> Option<&str> {
        let label = label.trim();
        self.matches
            .binary_search_by(|m| m.label.as_str().cmp(label))
            .ok()
            .map(|idx| self.matches[idx].campaign.as_str())
    }

    pub fn unmatched_rows(&self) -> usize {
        self.total_rows - self.matched_rows
    }

    /// Folds the report of another CRM source produced by the same
    /// attributor into this one.
    pub fn absorb(&mut self, other: AttributionReport) {
        for incoming in other.matches {
            match self.matches.binary_search_by(|m| m.label.cmp(&incoming.label)) {
                Ok(idx) => self.matches[idx].rows += incoming.rows,
                Err(idx) => self.matches.insert(idx, incoming),
            }
        }
        for incoming in other.unmatched {
            match self.unmatched.iter_mut().find(|u| u.label == incoming.label) {
                Some(existing) => existing.rows += incoming.rows,
                None => self.unmatched.push(incoming),
            }
        }
        self.total_rows += other.total_rows;
        self.matched_rows += other.matched_rows;
        self.finish();
    }

    fn finish(&mut self) {
        self.unmatched
            .sort_by(|a, b| b.rows.cmp(&a.rows).then_with(|| a.label.cmp(&b.label)));
        self.coverage = safe_ratio(self.matched_rows as f64, self.total_rows as f64);
    }
}

/// Maps free-text CRM labels onto a request's campaign universe: the generic
/// substring match first, then the ordered fallback rules.
#[derive(Debug, Clone, Copy)]
pub struct CampaignAttributor<'a> {
    universe: &'a CampaignUniverse,
    rules: &'a RuleSet,
}

impl<'a> CampaignAttributor<'a> {
    pub fn new(universe: &'a CampaignUniverse, rules: &'a RuleSet) -> Self {
        Self { universe, rules }
    }

    pub fn attribute_label(&self, label: &str) -> Option<(&'a str, MatchMethod)> {
        let normalized = normalize_label(label);
        if normalized.is_empty() {
            return None;
        }
        if let Some(campaign) = self.universe.find_containing(&normalized) {
            return Some((campaign, MatchMethod::Generic));
        }
        self.rules
            .apply(&normalized, self.universe)
            .map(|(rule, campaign)| (campaign, MatchMethod::Rule(rule.name.clone())))
    }

    /// Attributes every label occurrence and summarizes coverage.
    pub fn attribute<'l, I>(&self, labels: I) -> AttributionReport
    where
        I: IntoIterator<Item = &'l str>,
    {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for label in labels {
            let label = label.trim();
            let key = if label.is_empty() { NO_LABEL } else { label };
            *counts.entry(key.to_string()).or_insert(0) += 1;
        }

        let mut report = AttributionReport::default();
        for (label, rows) in counts {
            report.total_rows += rows;
            let attributed = if label == NO_LABEL {
                None
            } else {
                self.attribute_label(&label)
            };
            match attributed {
                Some((campaign, method)) => {
                    report.matched_rows += rows;
                    report.matches.push(LabelMatch {
                        label,
                        campaign: campaign.to_string(),
                        method,
                        rows,
                    });
                }
                None => report.unmatched.push(UnmatchedLabel { label, rows }),
            }
        }
        report.finish();

        if !report.unmatched.is_empty() {
            warn!(
                unmatched_labels = report.unmatched.len(),
                unmatched_rows = report.unmatched_rows(),
                coverage = report.coverage,
                "attribution leakage"
            );
        }
        report
    }
}
