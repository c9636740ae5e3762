//! Ordered attribution fallback rules.
//!
//! Rules are data so that account specific naming conventions live in a JSON
//! file instead of code. Each rule pairs a predicate over the normalized CRM
//! label with an ordered list of campaign selectors.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::matcher::{normalize_label, CampaignUniverse};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Contains(String),
    StartsWith(String),
    Equals(String),
    Empty,
    AllOf(Vec<Predicate>),
    AnyOf(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// Evaluates against a label already passed through [`normalize_label`].
    pub fn matches(&self, label: &str) -> bool {
        match self {
            Predicate::Contains(p) => !p.is_empty() && label.contains(p.as_str()),
            Predicate::StartsWith(p) => !p.is_empty() && label.starts_with(p.as_str()),
            Predicate::Equals(p) => label == p,
            Predicate::Empty => label.is_empty(),
            Predicate::AllOf(all) => all.iter().all(|p| p.matches(label)),
            Predicate::AnyOf(any) => any.iter().any(|p| p.matches(label)),
            Predicate::Not(inner) => !inner.matches(label),
        }
    }

    fn normalized(self) -> Self {
        match self {
            Predicate::Contains(p) => Predicate::Contains(normalize_label(&p)),
            Predicate::StartsWith(p) => Predicate::StartsWith(normalize_label(&p)),
            Predicate::Equals(p) => Predicate::Equals(normalize_label(&p)),
            Predicate::Empty => Predicate::Empty,
            Predicate::AllOf(all) => Predicate::AllOf(all.into_iter().map(Self::normalized).collect()),
            Predicate::AnyOf(any) => Predicate::AnyOf(any.into_iter().map(Self::normalized).collect()),
            Predicate::Not(inner) => Predicate::Not(Box::new(inner.normalized())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSelector {
    /// First campaign whose normalized name contains every token.
    NameContainsAll(Vec<String>),
}

impl TargetSelector {
    pub fn select<'u>(&self, universe: &'u CampaignUniverse) -> Option<&'u str> {
        match self {
            TargetSelector::NameContainsAll(tokens) => universe.find_containing_all(tokens),
        }
    }

    fn normalized(self) -> Self {
        match self {
            TargetSelector::NameContainsAll(tokens) => TargetSelector::NameContainsAll(
                tokens
                    .iter()
                    .map(|t| normalize_label(t))
                    .filter(|t| !t.is_empty())
                    .collect(),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionRule {
    pub name: String,
    pub when: Predicate,
    pub targets: Vec<TargetSelector>,
}

impl AttributionRule {
    /// Resolves the first target present in `universe` when the predicate
    /// holds for `label`.
    pub fn resolve<'u>(&self, label: &str, universe: &'u CampaignUniverse) -> Option<&'u str> {
        if !self.when.matches(label) {
            return None;
        }
        self.targets.iter().find_map(|target| target.select(universe))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RuleFile {
    rules: Vec<AttributionRule>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSet {
    rules: Vec<AttributionRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<AttributionRule>) -> Result<Self, CoreError> {
        let mut normalized = Vec::with_capacity(rules.len());
        for rule in rules {
            if rule.name.trim().is_empty() {
                return Err(CoreError::InvalidRules("rule name must not be empty".to_string()));
            }
            if normalized.iter().any(|r: &AttributionRule| r.name == rule.name) {
                return Err(CoreError::InvalidRules(format!("duplicate rule name: {}", rule.name)));
            }
            if rule.targets.is_empty() {
                return Err(CoreError::InvalidRules(format!("rule {} has no targets", rule.name)));
            }
            let targets: Vec<TargetSelector> = rule.targets.into_iter().map(TargetSelector::normalized).collect();
            if targets
                .iter()
                .any(|t| matches!(t, TargetSelector::NameContainsAll(tokens) if tokens.is_empty()))
            {
                return Err(CoreError::InvalidRules(format!("rule {} has an empty selector", rule.name)));
            }
            normalized.push(AttributionRule {
                name: rule.name,
                when: rule.when.normalized(),
                targets,
            });
        }
        Ok(Self { rules: normalized })
    }

    /// The generic keyword rule: a label mentioning "brand" maps to a brand
    /// campaign.
    pub fn builtin() -> Self {
        Self {
            rules: vec![AttributionRule {
                name: "brand".to_string(),
                when: Predicate::Contains("brand".to_string()),
                targets: vec![TargetSelector::NameContainsAll(vec!["brand".to_string()])],
            }],
        }
    }

    /// Accepts either `{"rules": [...]}` or a bare array of rules.
    pub fn from_json(text: &str) -> Result<Self, CoreError> {
        let rules = match serde_json::from_str::<RuleFile>(text) {
            Ok(file) => file.rules,
            Err(_) => serde_json::from_str::<Vec<AttributionRule>>(text)?,
        };
        Self::new(rules)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn rules(&self) -> &[AttributionRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluates rules in priority order. A rule whose predicate holds but
    /// whose targets are all absent yields to the next rule.
    pub fn apply<'r, 'u>(
        &'r self,
        label: &str,
        universe: &'u CampaignUniverse,
    ) -> Option<(&'r AttributionRule, &'u str)> {
        self.rules
            .iter()
            .find_map(|rule| rule.resolve(label, universe).map(|campaign| (rule, campaign)))
    }
}
