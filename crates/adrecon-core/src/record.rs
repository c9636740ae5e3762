use std::borrow::Cow;
use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CoreError;

/// Canonical metric names shared by every source and report.
pub mod metric {
    pub const SPEND: &str = "spend";
    pub const IMPRESSIONS: &str = "impressions";
    pub const CLICKS: &str = "clicks";
    pub const LP_VIEWS: &str = "lp_views";
    pub const PLATFORM_LEADS: &str = "platform_leads";
    pub const CONVERSIONS: &str = "conversions";
    pub const CONVERSION_VALUE: &str = "conversion_value";
    pub const SESSIONS: &str = "sessions";
    pub const WEB_VIEWS: &str = "web_views";
    pub const WEB_CONVERSIONS: &str = "web_conversions";
    pub const LEADS: &str = "leads";
    /// Leads whose utm source or medium names a paid channel.
    pub const PAID_LEADS: &str = "paid_leads";
    pub const ORGANIC_LEADS: &str = "organic_leads";
    pub const QUALIFIED: &str = "qualified";
    pub const DEALS: &str = "deals";
    pub const WON_DEALS: &str = "won_deals";
    pub const REVENUE: &str = "revenue";
}

/// Campaign key used when a row carries no campaign name.
pub const NO_CAMPAIGN: &str = "(no campaign)";
/// Campaign key for CRM rows that could not be attributed.
pub const UNMATCHED: &str = "(unmatched)";

/// One cell of an upstream export. Anything that is not a scalar is kept as
/// `Other` and treated as empty by the parsers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Other(serde_json::Value),
}

impl CellValue {
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            CellValue::Text(s) => Some(Cow::Borrowed(s.as_str())),
            CellValue::Number(n) => Some(Cow::Owned(n.to_string())),
            CellValue::Bool(b) => Some(Cow::Owned(b.to_string())),
            CellValue::Null | CellValue::Other(_) => None,
        }
    }

    /// Trimmed text content, `None` when blank.
    pub fn trimmed_text(&self) -> Option<String> {
        self.as_text()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Number(value as f64)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Bool(value)
    }
}

/// A single upstream row keyed by its raw column headers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord {
    cells: BTreeMap<String, CellValue>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, header: &str, value: impl Into<CellValue>) -> Self {
        self.insert(header, value);
        self
    }

    pub fn insert(&mut self, header: &str, value: impl Into<CellValue>) {
        self.cells.insert(header.to_string(), value.into());
    }

    pub fn get(&self, header: &str) -> Option<&CellValue> {
        self.cells.get(header)
    }

    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.cells.keys().map(String::as_str)
    }

    pub fn cells(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.cells.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl FromIterator<(String, CellValue)> for RawRecord {
    fn from_iter<T: IntoIterator<Item = (String, CellValue)>>(iter: T) -> Self {
        Self {
            cells: iter.into_iter().collect(),
        }
    }
}

/// Metric name to value. Absent metrics read as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricTotals(BTreeMap<String, f64>);

impl MetricTotals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, metric: &str) -> f64 {
        self.0.get(metric).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, metric: &str, value: f64) {
        self.0.insert(metric.to_string(), value);
    }

    pub fn add(&mut self, metric: &str, value: f64) {
        *self.0.entry(metric.to_string()).or_insert(0.0) += value;
    }

    pub fn add_all(&mut self, other: &MetricTotals) {
        for (name, value) in &other.0 {
            self.add(name, *value);
        }
    }

    /// Keeps the larger value per metric.
    pub fn max_all(&mut self, other: &MetricTotals) {
        for (name, value) in &other.0 {
            self.0
                .entry(name.clone())
                .and_modify(|current| {
                    if *value > *current {
                        *current = *value;
                    }
                })
                .or_insert(*value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_zero(&self) -> bool {
        self.0.values().all(|v| *v == 0.0)
    }
}

impl FromIterator<(String, f64)> for MetricTotals {
    fn from_iter<T: IntoIterator<Item = (String, f64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DedupKey {
    pub day: NaiveDate,
    pub campaign_key: String,
}

impl DedupKey {
    pub fn new(day: NaiveDate, campaign_key: impl Into<String>) -> Self {
        Self {
            day,
            campaign_key: campaign_key.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalDayRecord {
    pub day: NaiveDate,
    pub campaign_key: String,
    pub metric_values: MetricTotals,
}

impl CanonicalDayRecord {
    pub fn key(&self) -> DedupKey {
        DedupKey::new(self.day, self.campaign_key.clone())
    }

    /// Renders the record back into the raw shape using `day` and `campaign`
    /// headers plus one column per metric.
    pub fn to_raw(&self) -> RawRecord {
        let mut raw = RawRecord::new()
            .with("day", self.day.format("%Y-%m-%d").to_string())
            .with("campaign", self.campaign_key.clone());
        for (name, value) in self.metric_values.iter() {
            raw.insert(name, value);
        }
        raw
    }
}

/// Per-day metric totals, summed across campaigns.
pub type DaySeries = BTreeMap<NaiveDate, MetricTotals>;

/// Parses CSV text into raw records. Semicolon-delimited exports are detected
/// from the header line. Malformed data rows are skipped.
pub fn records_from_csv(text: &str) -> Result<Vec<RawRecord>, CoreError> {
    let text = text.trim_start_matches('\u{feff}');
    let header_line = text.lines().next().unwrap_or_default();
    let delimiter = if header_line.matches(';').count() > header_line.matches(',').count() {
        b';'
    } else {
        b','
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let headers = reader.headers()?.clone();

    let mut rows = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                debug!(line = line + 2, error = %e, "skipping malformed csv row");
                continue;
            }
        };
        let row: RawRecord = headers
            .iter()
            .zip(record.iter())
            .map(|(header, value)| {
                let cell = if value.is_empty() {
                    CellValue::Null
                } else {
                    CellValue::Text(value.to_string())
                };
                (header.to_string(), cell)
            })
            .collect();
        if !row.is_empty() {
            rows.push(row);
        }
    }
    Ok(rows)
}
