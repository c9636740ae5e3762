use std::cell::Cell;
use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::amount::parse_amount;
use crate::columns::{apply_overrides, field, ColumnAliases, ColumnMap};
use crate::date::{to_canonical_day, DayBounds};
use crate::dedupe::{dedupe, MetricFn};
use crate::record::{metric, CanonicalDayRecord, CellValue, DedupKey, RawRecord, NO_CAMPAIGN};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    PaidSocial,
    PaidSearch,
    WebAnalytics,
    Crm,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::PaidSocial => "paid_social",
            SourceKind::PaidSearch => "paid_search",
            SourceKind::WebAnalytics => "web_analytics",
            SourceKind::Crm => "crm",
        }
    }

    /// Sources whose campaign names form the attribution universe.
    pub fn is_ad_platform(&self) -> bool {
        matches!(self, SourceKind::PaidSocial | SourceKind::PaidSearch)
    }
}

/// One metric read from a resolved column.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSpec {
    pub metric: String,
    pub field: String,
    /// Values above this are treated as corrupt and read as zero.
    pub ceiling: Option<f64>,
}

impl MetricSpec {
    fn new(metric: &str, field: &str) -> Self {
        Self {
            metric: metric.to_string(),
            field: field.to_string(),
            ceiling: None,
        }
    }

    fn with_ceiling(mut self, ceiling: f64) -> Self {
        self.ceiling = Some(ceiling);
        self
    }
}

/// Column aliases and metric mapping for one kind of upstream export.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceProfile {
    pub kind: SourceKind,
    pub columns: Vec<ColumnAliases>,
    pub metrics: Vec<MetricSpec>,
}

impl SourceProfile {
    pub fn builtin(kind: SourceKind) -> Self {
        match kind {
            SourceKind::PaidSocial => Self {
                kind,
                columns: vec![
                    ColumnAliases::new(
                        field::DATE,
                        &["date_iso", "date_start", "date", "data.date_start", "reporting_starts"],
                    ),
                    ColumnAliases::new(field::CAMPAIGN, &["campaign_name", "campaign", "data.campaign_name"]),
                    ColumnAliases::new("spend", &["spend", "amount_spent", "cost", "data.spend"]),
                    ColumnAliases::new("impressions", &["impressions", "impr"]),
                    ColumnAliases::new("clicks", &["clicks", "link_clicks"]),
                    ColumnAliases::new("lp_views", &["lp_views", "landing_page_views", "landing_page_view"]),
                    ColumnAliases::new("leads", &["leads", "fb_form_leads", "form_leads"]),
                ],
                metrics: vec![
                    MetricSpec::new(metric::SPEND, "spend").with_ceiling(500_000.0),
                    MetricSpec::new(metric::IMPRESSIONS, "impressions"),
                    MetricSpec::new(metric::CLICKS, "clicks"),
                    MetricSpec::new(metric::LP_VIEWS, "lp_views"),
                    MetricSpec::new(metric::PLATFORM_LEADS, "leads"),
                ],
            },
            SourceKind::PaidSearch => Self {
                kind,
                columns: vec![
                    ColumnAliases::new(field::DATE, &["date_iso", "date", "day", "date_start"]),
                    ColumnAliases::new(field::CAMPAIGN, &["campaign", "campaign_name"]),
                    ColumnAliases::new("spend", &["cost", "spend", "ga_cost"]),
                    ColumnAliases::new("clicks", &["clicks", "ga_clicks", "click"]),
                    ColumnAliases::new("impressions", &["impr", "impressions"]),
                    ColumnAliases::new("conversions", &["conv", "conversions"]),
                    ColumnAliases::new("conversion_value", &["value", "conv_value", "conversion_value"]),
                ],
                metrics: vec![
                    MetricSpec::new(metric::SPEND, "spend"),
                    MetricSpec::new(metric::CLICKS, "clicks"),
                    MetricSpec::new(metric::IMPRESSIONS, "impressions"),
                    MetricSpec::new(metric::CONVERSIONS, "conversions"),
                    MetricSpec::new(metric::CONVERSION_VALUE, "conversion_value"),
                ],
            },
            SourceKind::WebAnalytics => Self {
                kind,
                columns: vec![
                    ColumnAliases::new(field::DATE, &["date", "date_iso", "day"]),
                    ColumnAliases::new(field::CAMPAIGN, &["session_campaign", "campaign"]),
                    ColumnAliases::new("sessions", &["sessions"]),
                    ColumnAliases::new("views", &["landing_page_views", "views", "page_views"]),
                    ColumnAliases::new("conversions", &["conversions", "key_events"]),
                ],
                metrics: vec![
                    MetricSpec::new(metric::SESSIONS, "sessions"),
                    MetricSpec::new(metric::WEB_VIEWS, "views"),
                    MetricSpec::new(metric::WEB_CONVERSIONS, "conversions"),
                ],
            },
            SourceKind::Crm => Self {
                kind,
                columns: vec![
                    ColumnAliases::new(
                        field::RECORD_ID,
                        &["id", "hs_object_id", "contact_id", "deal_id", "lead_id", "results.id"],
                    ),
                    ColumnAliases::new(
                        field::DATE,
                        &[
                            "date_iso",
                            "created_iso",
                            "created_at",
                            "createdate",
                            "inquiry_date",
                            "results.properties.createdate",
                        ],
                    ),
                    ColumnAliases::new(
                        field::SOURCE_LABEL,
                        &["source_placement", "source_detail", "utm_campaign", "source"],
                    ),
                    ColumnAliases::new(
                        field::STAGE,
                        &[
                            "lifecyclestage",
                            "stage",
                            "dealstage",
                            "lead_status",
                            "hs_lead_status",
                            "results.properties.lifecyclestage",
                        ],
                    ),
                    ColumnAliases::new(field::SCORE, &["ai_score", "score"]),
                    ColumnAliases::new(
                        field::UTM_SOURCE,
                        &["utm_source", "results.properties.utm_source"],
                    ),
                    ColumnAliases::new(
                        field::UTM_MEDIUM,
                        &["utm_medium", "results.properties.utm_medium"],
                    ),
                    ColumnAliases::new(
                        field::AMOUNT,
                        &["amount_effective", "amount_home", "amount", "results.properties.amount"],
                    ),
                ],
                metrics: Vec::new(),
            },
        }
    }

    pub fn with_overrides(mut self, overrides: &BTreeMap<String, Vec<String>>) -> Self {
        apply_overrides(&mut self.columns, overrides);
        self
    }
}

/// One upstream export handed to the engine.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceBatch {
    pub kind: SourceKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub rows: Vec<RawRecord>,
    #[serde(default)]
    pub aliases: BTreeMap<String, Vec<String>>,
}

impl SourceBatch {
    pub fn new(kind: SourceKind, rows: Vec<RawRecord>) -> Self {
        Self {
            kind,
            name: None,
            rows,
            aliases: BTreeMap::new(),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn label(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.kind.as_str().to_string())
    }

    pub fn profile(&self) -> SourceProfile {
        SourceProfile::builtin(self.kind).with_overrides(&self.aliases)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceDiagnostics {
    pub name: String,
    pub kind: SourceKind,
    pub rows_in: usize,
    pub rows_rejected: usize,
    pub values_rejected: usize,
    pub records_out: usize,
    pub resolved_columns: BTreeMap<String, String>,
    pub missing_columns: Vec<String>,
    pub first_day: Option<NaiveDate>,
    pub last_day: Option<NaiveDate>,
}

impl SourceDiagnostics {
    pub(crate) fn new(batch: &SourceBatch, columns: &ColumnMap, profile: &SourceProfile) -> Self {
        Self {
            name: batch.label(),
            kind: batch.kind,
            rows_in: batch.rows.len(),
            rows_rejected: 0,
            values_rejected: 0,
            records_out: 0,
            resolved_columns: columns.resolved_headers(),
            missing_columns: columns.missing(&profile.columns),
            first_day: None,
            last_day: None,
        }
    }

    pub(crate) fn record_span(&mut self, records: &[CanonicalDayRecord]) {
        self.records_out = records.len();
        self.first_day = records.iter().map(|r| r.day).min();
        self.last_day = records.iter().map(|r| r.day).max();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceOutcome {
    pub kind: SourceKind,
    pub records: Vec<CanonicalDayRecord>,
    pub diagnostics: SourceDiagnostics,
}

/// Campaign key for a row: trimmed campaign cell, or the placeholder.
pub fn campaign_key(cell: Option<&CellValue>) -> String {
    cell.and_then(CellValue::trimmed_text)
        .unwrap_or_else(|| NO_CAMPAIGN.to_string())
}

/// Resolves columns, normalizes dates and amounts, and dedupes one ad or
/// web-analytics export into `(day, campaign)` records.
pub fn canonicalize_source(batch: &SourceBatch, bounds: &DayBounds) -> SourceOutcome {
    let profile = batch.profile();
    let columns = ColumnMap::resolve(&profile.columns, &batch.rows);
    let mut diagnostics = SourceDiagnostics::new(batch, &columns, &profile);

    if !batch.rows.is_empty() && !columns.has(field::DATE) {
        warn!(source = %diagnostics.name, "no date column resolved, every row will be rejected");
    }

    let rows_rejected = Cell::new(0usize);
    let values_rejected = Cell::new(0usize);

    let key_fn = |row: &RawRecord| {
        let day = columns
            .cell(row, field::DATE)
            .and_then(|cell| to_canonical_day(cell, bounds));
        match day {
            Some(day) => Some(DedupKey::new(day, campaign_key(columns.cell(row, field::CAMPAIGN)))),
            None => {
                rows_rejected.set(rows_rejected.get() + 1);
                None
            }
        }
    };

    let extractors: Vec<(&str, Box<dyn Fn(&RawRecord) -> f64 + '_>)> = profile
        .metrics
        .iter()
        .map(|spec| {
            let columns = &columns;
            let values_rejected = &values_rejected;
            let extract = move |row: &RawRecord| {
                let value = columns.cell(row, &spec.field).map(parse_amount).unwrap_or(0.0);
                match spec.ceiling {
                    Some(ceiling) if value > ceiling => {
                        values_rejected.set(values_rejected.get() + 1);
                        0.0
                    }
                    _ => value,
                }
            };
            (spec.metric.as_str(), Box::new(extract) as Box<dyn Fn(&RawRecord) -> f64 + '_>)
        })
        .collect();
    let metric_fns: Vec<MetricFn<'_>> = extractors
        .iter()
        .map(|(name, extract)| (*name, extract.as_ref() as &dyn Fn(&RawRecord) -> f64))
        .collect();

    let records = dedupe(&batch.rows, key_fn, &metric_fns);

    diagnostics.rows_rejected = rows_rejected.get();
    diagnostics.values_rejected = values_rejected.get();
    diagnostics.record_span(&records);
    if diagnostics.rows_rejected > 0 || diagnostics.values_rejected > 0 {
        debug!(
            source = %diagnostics.name,
            rows_rejected = diagnostics.rows_rejected,
            values_rejected = diagnostics.values_rejected,
            "source rows degraded during normalization"
        );
    }

    SourceOutcome {
        kind: batch.kind,
        records,
        diagnostics,
    }
}
