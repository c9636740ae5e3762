use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::debug;

use crate::amount::parse_amount;
use crate::attribution::{AttributionReport, CampaignAttributor};
use crate::columns::{field, ColumnMap};
use crate::config::EngineConfig;
use crate::date::{to_canonical_day, DayBounds};
use crate::dedupe::combine_sources;
use crate::record::{metric, CanonicalDayRecord, CellValue, MetricTotals, RawRecord, UNMATCHED};
use crate::source::{SourceBatch, SourceDiagnostics};

const DISQUALIFIED_STAGES: &[&str] = &["unqualified", "disqualified", "spam", "junk", "badfit"];
const QUALIFIED_STAGES: &[&str] = &[
    "salesqualifiedlead",
    "salesqualified",
    "sql",
    "qualified",
    "qualifiedtobuy",
];
const DEAL_STAGES: &[&str] = &[
    "opportunity",
    "customer",
    "deal",
    "appointmentscheduled",
    "presentationscheduled",
    "decisionmakerboughtin",
    "contractsent",
    "closedlost",
];

/// Lifecycle flags derived from one CRM row. Each flag implies the ones
/// before it, so funnel stages never invert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageFlags {
    pub lead: bool,
    pub qualified: bool,
    pub deal: bool,
    pub won: bool,
}

/// Lowercases and drops spaces, dashes and underscores: `Closed Won` becomes
/// `closedwon`.
fn compact_stage(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

pub fn classify_stage(stage: Option<&str>, score: Option<f64>, config: &EngineConfig) -> StageFlags {
    let stage = stage.map(compact_stage).unwrap_or_default();
    let won = stage.contains("won");
    let deal = won || DEAL_STAGES.contains(&stage.as_str());
    let scored = score.is_some_and(|s| s >= config.qualified_score_threshold);
    let qualified = deal || scored || QUALIFIED_STAGES.contains(&stage.as_str());
    let lead = qualified || !DISQUALIFIED_STAGES.contains(&stage.as_str());
    StageFlags {
        lead,
        qualified,
        deal,
        won,
    }
}

#[derive(Debug, Clone, PartialEq)]
struct CrmEntry {
    day: NaiveDate,
    label: Option<String>,
    metrics: MetricTotals,
}

impl CrmEntry {
    /// Order independent merge of two sightings of the same record.
    fn merge(&mut self, other: CrmEntry) {
        self.day = self.day.min(other.day);
        self.label = match (self.label.take(), other.label) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.metrics.max_all(&other.metrics);
        if self.metrics.get(metric::PAID_LEADS) > 0.0 {
            self.metrics.set(metric::ORGANIC_LEADS, 0.0);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CrmOutcome {
    pub records: Vec<CanonicalDayRecord>,
    pub attribution: AttributionReport,
    pub diagnostics: SourceDiagnostics,
}

fn record_identity(columns: &ColumnMap, row: &RawRecord) -> String {
    match columns.cell(row, field::RECORD_ID).and_then(CellValue::trimmed_text) {
        Some(id) => format!("id:{id}"),
        None => {
            let content = serde_json::to_string(row).unwrap_or_else(|_| format!("{row:?}"));
            format!("row:{content}")
        }
    }
}

/// Dedupes CRM rows by record identity, attributes their source labels and
/// folds them into `(day, campaign)` records with lead and deal counts.
pub fn canonicalize_crm(
    batch: &SourceBatch,
    bounds: &DayBounds,
    attributor: &CampaignAttributor<'_>,
    config: &EngineConfig,
) -> CrmOutcome {
    let profile = batch.profile();
    let columns = ColumnMap::resolve(&profile.columns, &batch.rows);
    let mut diagnostics = SourceDiagnostics::new(batch, &columns, &profile);

    // Without utm columns there is nothing to split on, so every lead is paid.
    let tracks_channel = columns.has(field::UTM_SOURCE) || columns.has(field::UTM_MEDIUM);

    let mut entries: BTreeMap<String, CrmEntry> = BTreeMap::new();
    for row in &batch.rows {
        let Some(day) = columns
            .cell(row, field::DATE)
            .and_then(|cell| to_canonical_day(cell, bounds))
        else {
            diagnostics.rows_rejected += 1;
            continue;
        };

        let stage = columns.cell(row, field::STAGE).and_then(CellValue::trimmed_text);
        let score = columns
            .cell(row, field::SCORE)
            .filter(|cell| cell.trimmed_text().is_some())
            .map(parse_amount);
        let flags = classify_stage(stage.as_deref(), score, config);
        let amount = columns.cell(row, field::AMOUNT).map(parse_amount).unwrap_or(0.0);
        let paid = !tracks_channel || {
            let utm = |name: &str| columns.cell(row, name).and_then(CellValue::trimmed_text);
            config
                .paid_channels
                .is_paid(utm(field::UTM_SOURCE).as_deref(), utm(field::UTM_MEDIUM).as_deref())
        };

        let mut metrics = MetricTotals::new();
        let as_count = |flag: bool| if flag { 1.0 } else { 0.0 };
        metrics.set(metric::LEADS, as_count(flags.lead));
        metrics.set(metric::PAID_LEADS, as_count(flags.lead && paid));
        metrics.set(metric::ORGANIC_LEADS, as_count(flags.lead && !paid));
        metrics.set(metric::QUALIFIED, as_count(flags.qualified));
        metrics.set(metric::DEALS, as_count(flags.deal));
        metrics.set(metric::WON_DEALS, as_count(flags.won));
        metrics.set(metric::REVENUE, if flags.won { amount.max(0.0) } else { 0.0 });

        let entry = CrmEntry {
            day,
            label: columns.cell(row, field::SOURCE_LABEL).and_then(CellValue::trimmed_text),
            metrics,
        };
        let identity = record_identity(&columns, row);
        match entries.get_mut(&identity) {
            Some(existing) => existing.merge(entry),
            None => {
                entries.insert(identity, entry);
            }
        }
    }

    let attribution = attributor.attribute(entries.values().map(|e| e.label.as_deref().unwrap_or("")));

    let per_record: Vec<CanonicalDayRecord> = entries
        .values()
        .map(|entry| CanonicalDayRecord {
            day: entry.day,
            campaign_key: entry
                .label
                .as_deref()
                .and_then(|label| attribution.campaign_for(label))
                .unwrap_or(UNMATCHED)
                .to_string(),
            metric_values: entry.metrics.clone(),
        })
        .collect();
    let records = combine_sources(per_record.iter());

    diagnostics.record_span(&records);
    debug!(
        source = %diagnostics.name,
        records = entries.len(),
        rows_rejected = diagnostics.rows_rejected,
        coverage = attribution.coverage,
        "crm source canonicalized"
    );

    CrmOutcome {
        records,
        attribution,
        diagnostics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::CampaignUniverse;
    use crate::rules::RuleSet;
    use crate::source::SourceKind;

    fn bounds() -> DayBounds {
        DayBounds::around(NaiveDate::from_ymd_opt(2025, 12, 10).expect("date"), 400)
    }

    fn lead(id: &str, day: &str, source: &str, stage: &str) -> RawRecord {
        RawRecord::new()
            .with("id", id)
            .with("createdate", day)
            .with("Source Detail", source)
            .with("lifecyclestage", stage)
    }

    fn run(rows: Vec<RawRecord>) -> CrmOutcome {
        let universe = CampaignUniverse::new(["Search | Croatia | EN", "Brand Protection"]);
        let rules = RuleSet::builtin();
        let attributor = CampaignAttributor::new(&universe, &rules);
        let batch = SourceBatch::new(SourceKind::Crm, rows);
        canonicalize_crm(&batch, &bounds(), &attributor, &EngineConfig::default())
    }

    #[test]
    fn stage_flags_nest() {
        let cfg = EngineConfig::default();
        let won = classify_stage(Some("Closed Won"), None, &cfg);
        assert_eq!(won, StageFlags { lead: true, qualified: true, deal: true, won: true });
        let sql = classify_stage(Some("salesqualifiedlead"), None, &cfg);
        assert!(sql.qualified && !sql.deal);
        let unknown = classify_stage(None, None, &cfg);
        assert!(unknown.lead && !unknown.qualified);
        let junk = classify_stage(Some("unqualified"), None, &cfg);
        assert!(!junk.lead);
        let scored = classify_stage(Some("lead"), Some(72.0), &cfg);
        assert!(scored.qualified);
        let low = classify_stage(Some("lead"), Some(49.0), &cfg);
        assert!(!low.qualified);
    }

    #[test]
    fn duplicate_records_count_once() {
        let outcome = run(vec![
            lead("1", "2025-12-01", "Google brand", "lead"),
            lead("1", "2025-12-01", "Google brand", "salesqualifiedlead"),
            lead("2", "2025-12-01", "sem croatia", "lead"),
        ]);
        let brand = outcome
            .records
            .iter()
            .find(|r| r.campaign_key == "Brand Protection")
            .expect("brand row");
        assert_eq!(brand.metric_values.get(metric::LEADS), 1.0);
        assert_eq!(brand.metric_values.get(metric::QUALIFIED), 1.0);
        assert_eq!(outcome.attribution.total_rows, 2);
    }

    #[test]
    fn unattributed_rows_go_to_unmatched_bucket() {
        let outcome = run(vec![
            lead("1", "2025-12-02", "newsletter", "lead"),
            lead("2", "2025-12-02", "", "lead"),
            lead("3", "2025-12-02", "Search", "lead"),
        ]);
        let unmatched = outcome
            .records
            .iter()
            .find(|r| r.campaign_key == UNMATCHED)
            .expect("unmatched row");
        assert_eq!(unmatched.metric_values.get(metric::LEADS), 2.0);
        assert_eq!(outcome.attribution.unmatched.len(), 2);
        assert!((outcome.attribution.coverage - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn won_deals_carry_revenue_and_bad_dates_are_rejected() {
        let rows = vec![
            lead("9", "2025-12-03", "brand", "closedwon").with("amount", "2.500,00"),
            lead("10", "2025-12-03", "brand", "closedlost").with("amount", "900"),
            lead("11", "not a date", "brand", "lead"),
        ];
        let outcome = run(rows);
        let brand = &outcome.records[0];
        assert_eq!(brand.metric_values.get(metric::REVENUE), 2500.0);
        assert_eq!(brand.metric_values.get(metric::DEALS), 2.0);
        assert_eq!(brand.metric_values.get(metric::WON_DEALS), 1.0);
        assert_eq!(outcome.diagnostics.rows_rejected, 1);
    }

    #[test]
    fn rows_without_id_dedupe_by_content() {
        let row = RawRecord::new()
            .with("createdate", "2025-12-04")
            .with("source", "brand");
        let outcome = run(vec![row.clone(), row]);
        assert_eq!(outcome.records[0].metric_values.get(metric::LEADS), 1.0);
    }

    #[test]
    fn row_order_does_not_change_output() {
        let rows = vec![
            lead("1", "2025-12-01", "Google brand", "lead"),
            lead("1", "2025-12-02", "", "customer"),
            lead("2", "2025-12-01", "newsletter", "lead"),
        ];
        let mut reversed = rows.clone();
        reversed.reverse();
        let a = run(rows);
        let b = run(reversed);
        assert_eq!(a.records, b.records);
        assert_eq!(a.attribution, b.attribution);
    }

    #[test]
    fn utm_columns_split_paid_and_organic_leads() {
        let outcome = run(vec![
            lead("1", "2025-12-05", "brand", "lead").with("utm_source", "google"),
            lead("2", "2025-12-05", "brand", "lead").with("utm_medium", "email"),
            lead("3", "2025-12-05", "brand", "lead").with("utm_source", "Facebook").with("utm_medium", "organic"),
            lead("4", "2025-12-05", "brand", "lead"),
            lead("5", "2025-12-05", "brand", "spam").with("utm_medium", "cpc"),
        ]);
        let brand = &outcome.records[0];
        assert_eq!(brand.metric_values.get(metric::LEADS), 4.0);
        assert_eq!(brand.metric_values.get(metric::PAID_LEADS), 2.0);
        assert_eq!(brand.metric_values.get(metric::ORGANIC_LEADS), 2.0);
    }

    #[test]
    fn leads_are_paid_when_no_utm_columns_exist() {
        let outcome = run(vec![
            lead("1", "2025-12-05", "brand", "lead"),
            lead("2", "2025-12-05", "brand", "lead"),
        ]);
        let brand = &outcome.records[0];
        assert_eq!(brand.metric_values.get(metric::PAID_LEADS), 2.0);
        assert_eq!(brand.metric_values.get(metric::ORGANIC_LEADS), 0.0);
    }

    #[test]
    fn a_paid_sighting_wins_over_an_organic_duplicate() {
        let outcome = run(vec![
            lead("1", "2025-12-05", "brand", "lead").with("utm_medium", "email"),
            lead("1", "2025-12-05", "brand", "lead").with("utm_medium", "cpc"),
        ]);
        let brand = &outcome.records[0];
        assert_eq!(brand.metric_values.get(metric::LEADS), 1.0);
        assert_eq!(brand.metric_values.get(metric::PAID_LEADS), 1.0);
        assert_eq!(brand.metric_values.get(metric::ORGANIC_LEADS), 0.0);
    }
}
