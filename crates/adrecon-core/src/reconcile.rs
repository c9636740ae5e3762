//! End to end reconciliation: per-source canonicalization, attribution of CRM
//! activity, then windowed aggregation over the combined record set.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info};

use crate::aggregate::{aggregate, CacMode};
use crate::attribution::{AttributionReport, CampaignAttributor};
use crate::campaigns::{campaign_table, CampaignRow};
use crate::config::EngineConfig;
use crate::crm::{canonicalize_crm, CrmOutcome};
use crate::date::DayBounds;
use crate::dedupe::{combine_sources, sum_by_day};
use crate::delta::MetricDelta;
use crate::funnel::FunnelReport;
use crate::matcher::CampaignUniverse;
use crate::record::{CanonicalDayRecord, MetricTotals, NO_CAMPAIGN};
use crate::rules::RuleSet;
use crate::series::{day_series, trend_series, SeriesPoint, TrendSeries};
use crate::source::{canonicalize_source, SourceBatch, SourceDiagnostics, SourceKind, SourceOutcome};
use crate::window::FunnelWindow;

#[derive(Debug, Clone)]
pub struct ReconcileRequest {
    pub window: FunnelWindow,
    pub cac_mode: CacMode,
    /// Explicit attribution universe. Derived from ad sources when absent.
    pub campaign_names: Option<Vec<String>>,
    pub sources: Vec<SourceBatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowSummary {
    #[serde(flatten)]
    pub window: FunnelWindow,
    pub days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciledView {
    pub window: WindowSummary,
    pub cac_mode: CacMode,
    pub totals: MetricTotals,
    pub previous_totals: Option<MetricTotals>,
    pub headline: BTreeMap<String, MetricDelta>,
    pub funnel: FunnelReport,
    pub day_series: Vec<SeriesPoint>,
    pub trend: TrendSeries,
    pub campaigns: Vec<CampaignRow>,
    pub attribution: Option<AttributionReport>,
    pub sources: Vec<SourceDiagnostics>,
}

/// Campaign universe for attribution: the caller's list in its order, or
/// every ad-platform campaign seen, sorted by name.
pub fn campaign_universe(explicit: Option<&[String]>, outcomes: &[SourceOutcome]) -> CampaignUniverse {
    if let Some(names) = explicit {
        return CampaignUniverse::new(names.iter().cloned());
    }
    let mut names: Vec<&str> = outcomes
        .iter()
        .filter(|o| o.kind.is_ad_platform())
        .flat_map(|o| o.records.iter().map(|r| r.campaign_key.as_str()))
        .filter(|name| *name != NO_CAMPAIGN)
        .collect();
    names.sort_unstable();
    names.dedup();
    CampaignUniverse::new(names)
}

fn by_source(a: &SourceDiagnostics, b: &SourceDiagnostics) -> Ordering {
    (a.kind, &a.name).cmp(&(b.kind, &b.name))
}

/// Joins canonicalized sources into the final view. Sources are taken in
/// `(kind, name)` order whatever order they arrive in.
pub fn assemble(
    window: &FunnelWindow,
    mut outcomes: Vec<SourceOutcome>,
    mut crm: Vec<CrmOutcome>,
    config: &EngineConfig,
    cac_mode: CacMode,
) -> ReconciledView {
    outcomes.sort_by(|a, b| by_source(&a.diagnostics, &b.diagnostics));
    crm.sort_by(|a, b| by_source(&a.diagnostics, &b.diagnostics));
    let mut diagnostics = Vec::with_capacity(outcomes.len() + crm.len());
    let mut attribution: Option<AttributionReport> = None;
    let mut all_records: Vec<CanonicalDayRecord> = Vec::new();

    for outcome in outcomes {
        all_records.extend(outcome.records);
        diagnostics.push(outcome.diagnostics);
    }
    for outcome in crm {
        all_records.extend(outcome.records);
        diagnostics.push(outcome.diagnostics);
        match attribution.as_mut() {
            Some(report) => report.absorb(outcome.attribution),
            None => attribution = Some(outcome.attribution),
        }
    }

    let records = combine_sources(all_records.iter());
    let series = sum_by_day(&records);
    let result = aggregate(&records, window, config, cac_mode);
    let campaigns = campaign_table(&records, window, config);

    info!(
        start = %window.start,
        end = %window.end,
        sources = diagnostics.len(),
        records = records.len(),
        campaigns = campaigns.len(),
        "reconciled window"
    );

    ReconciledView {
        window: WindowSummary {
            window: *window,
            days: window.days(),
        },
        cac_mode,
        totals: result.totals,
        previous_totals: result.previous_totals,
        headline: result.deltas,
        funnel: result.funnel,
        day_series: day_series(&series, window),
        trend: trend_series(&series, window, config),
        campaigns,
        attribution,
        sources: diagnostics,
    }
}

/// Runs `work` over every item, one scoped thread per item when there is
/// more than one. Output keeps input order.
fn fan_out<T, R, F>(items: &[T], work: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    if items.len() < 2 {
        return items.iter().map(&work).collect();
    }
    let work = &work;
    std::thread::scope(|scope| {
        let handles: Vec<_> = items.iter().map(|item| scope.spawn(move || work(item))).collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect()
    })
}

/// Canonicalizes ad and web analytics batches. CRM batches are skipped.
pub fn canonicalize_sources(batches: &[SourceBatch], bounds: &DayBounds) -> Vec<SourceOutcome> {
    let batches: Vec<&SourceBatch> = batches.iter().filter(|b| b.kind != SourceKind::Crm).collect();
    fan_out(&batches, |batch| canonicalize_source(batch, bounds))
}

/// Reconciles a whole request: ad and web sources first, then CRM sources
/// against the campaign universe the ad sources define.
pub fn reconcile(
    request: &ReconcileRequest,
    rules: &RuleSet,
    config: &EngineConfig,
    bounds: &DayBounds,
) -> ReconciledView {
    let outcomes = canonicalize_sources(&request.sources, bounds);
    let universe = campaign_universe(request.campaign_names.as_deref(), &outcomes);
    debug!(campaigns = universe.len(), "campaign universe resolved");

    let attributor = CampaignAttributor::new(&universe, rules);
    let crm_batches: Vec<&SourceBatch> = request
        .sources
        .iter()
        .filter(|batch| batch.kind == SourceKind::Crm)
        .collect();
    let crm: Vec<CrmOutcome> = fan_out(&crm_batches, |batch| canonicalize_crm(batch, bounds, &attributor, config));

    assemble(&request.window, outcomes, crm, config, request.cac_mode)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate};

    use super::*;
    use crate::delta::DeltaSignal;
    use crate::record::{metric, RawRecord, UNMATCHED};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).expect("date")
    }

    fn today() -> NaiveDate {
        d(2026, 3, 31)
    }

    fn bounds() -> DayBounds {
        DayBounds::around(today(), 400)
    }

    fn fb(day: NaiveDate, campaign: &str, spend: &str, lp: f64) -> RawRecord {
        RawRecord::new()
            .with("date_start", day.format("%-d. %-m. %Y").to_string())
            .with("campaign_name", campaign)
            .with("spend", spend)
            .with("landing_page_views", lp)
    }

    fn crm(id: &str, day: NaiveDate, source: &str, stage: &str) -> RawRecord {
        RawRecord::new()
            .with("id", id)
            .with("created_at", day.format("%Y-%m-%d").to_string())
            .with("source_detail", source)
            .with("lifecyclestage", stage)
    }

    #[test]
    fn overlapping_exports_do_not_inflate_spend() {
        let window = FunnelWindow::new(d(2026, 3, 1), d(2026, 3, 1)).expect("window");
        let request = ReconcileRequest {
            window,
            cac_mode: CacMode::Leads,
            campaign_names: None,
            sources: vec![SourceBatch::new(
                SourceKind::PaidSocial,
                vec![fb(d(2026, 3, 1), "Brand", "100", 1.0), fb(d(2026, 3, 1), "Brand", "150", 1.0)],
            )],
        };
        let view = reconcile(&request, &RuleSet::builtin(), &EngineConfig::default(), &bounds());
        assert_eq!(view.totals.get(metric::SPEND), 150.0);
        assert_eq!(view.day_series[0].metrics.get(metric::SPEND), 150.0);
    }

    #[test]
    fn flat_thirty_day_windows_report_no_change() {
        let window = FunnelWindow::trailing(today(), 30)
            .and_then(FunnelWindow::with_previous_period)
            .expect("window");
        let (prev_start, _) = window.previous().expect("previous");
        let mut social = Vec::new();
        let mut leads = Vec::new();
        for i in 0..60 {
            let day = prev_start + Duration::days(i);
            social.push(fb(day, "Brand Search", "1.000,00", 50.0));
            leads.push(crm(&format!("c{i}"), day, "brand", "customer"));
        }
        let request = ReconcileRequest {
            window,
            cac_mode: CacMode::Leads,
            campaign_names: None,
            sources: vec![
                SourceBatch::new(SourceKind::Crm, leads),
                SourceBatch::new(SourceKind::PaidSocial, social),
            ],
        };
        let view = reconcile(&request, &RuleSet::builtin(), &EngineConfig::default(), &bounds());

        assert_eq!(view.totals.get(metric::SPEND), 30_000.0);
        assert_eq!(view.totals.get(metric::LEADS), 30.0);
        for (name, delta) in &view.headline {
            if let Some(pct) = delta.delta_pct {
                assert!(pct.abs() < 1e-9, "{name}: {pct}");
            }
            assert_eq!(delta.signal, DeltaSignal::NoSignal, "{name}");
        }
        let attribution = view.attribution.expect("attribution");
        assert_eq!(attribution.coverage, 1.0);
        assert_eq!(view.campaigns.len(), 1);
        assert_eq!(view.day_series.len(), 30);
    }

    #[test]
    fn leakage_surfaces_as_unmatched_campaign() {
        let window = FunnelWindow::new(d(2026, 3, 1), d(2026, 3, 7)).expect("window");
        let request = ReconcileRequest {
            window,
            cac_mode: CacMode::Leads,
            campaign_names: Some(vec!["Search | Croatia | EN".to_string()]),
            sources: vec![SourceBatch::new(
                SourceKind::Crm,
                vec![
                    crm("1", d(2026, 3, 2), "croatia", "lead"),
                    crm("2", d(2026, 3, 2), "podcast", "lead"),
                ],
            )],
        };
        let view = reconcile(&request, &RuleSet::builtin(), &EngineConfig::default(), &bounds());
        let names: Vec<&str> = view.campaigns.iter().map(|c| c.campaign.as_str()).collect();
        assert!(names.contains(&UNMATCHED));
        assert!(names.contains(&"Search | Croatia | EN"));
        let attribution = view.attribution.expect("attribution");
        assert_eq!(attribution.unmatched[0].label, "podcast");
    }

    #[test]
    fn empty_request_yields_zero_view() {
        let window = FunnelWindow::new(d(2026, 3, 1), d(2026, 3, 7)).expect("window");
        let request = ReconcileRequest {
            window,
            cac_mode: CacMode::Deals,
            campaign_names: None,
            sources: Vec::new(),
        };
        let view = reconcile(&request, &RuleSet::builtin(), &EngineConfig::default(), &bounds());
        assert!(view.totals.is_zero());
        assert!(view.campaigns.is_empty());
        assert!(view.attribution.is_none());
        assert_eq!(view.day_series.len(), 7);
        assert_eq!(view.funnel.final_conversion_rate, 0.0);
        assert_eq!(view.trend.points.len(), 7);
    }

    #[test]
    fn universe_prefers_explicit_names() {
        let names = vec!["B".to_string(), "A".to_string()];
        let universe = campaign_universe(Some(names.as_slice()), &[]);
        assert_eq!(universe.names(), &["B".to_string(), "A".to_string()]);
    }

    fn mixed_sources() -> Vec<SourceBatch> {
        let day = d(2026, 3, 3);
        let search = RawRecord::new()
            .with("day", "2026-03-03")
            .with("campaign", "Generic | UK")
            .with("cost", "80,25")
            .with("clicks", 12.0);
        let web = |page: &str, sessions: f64| {
            RawRecord::new()
                .with("date", "20260303")
                .with("session_campaign", "Brand Search")
                .with("landing_page", page)
                .with("sessions", sessions)
        };
        vec![
            SourceBatch::new(
                SourceKind::PaidSocial,
                vec![fb(day, "Brand Search", "1.000,50", 40.0), fb(day, "Brand Search", "999", 40.0)],
            )
            .named("meta"),
            SourceBatch::new(SourceKind::PaidSearch, vec![search]).named("google"),
            SourceBatch::new(SourceKind::WebAnalytics, vec![web("/pricing", 30.0), web("/demo", 10.0)]).named("ga4"),
            SourceBatch::new(
                SourceKind::Crm,
                vec![crm("1", day, "brand", "customer"), crm("2", day, "generic uk", "lead")],
            )
            .named("hubspot"),
            SourceBatch::new(SourceKind::Crm, vec![crm("7", day, "podcast", "lead")]).named("pipedrive"),
        ]
    }

    #[test]
    fn permuted_sources_and_rows_give_identical_views() {
        let window = FunnelWindow::new(d(2026, 3, 1), d(2026, 3, 7))
            .and_then(FunnelWindow::with_previous_period)
            .expect("window");
        let request = |sources| ReconcileRequest {
            window,
            cac_mode: CacMode::Leads,
            campaign_names: None,
            sources,
        };
        let forward = mixed_sources();
        let mut backward = mixed_sources();
        backward.reverse();
        for batch in &mut backward {
            batch.rows.reverse();
        }
        let mut rotated = mixed_sources();
        rotated.rotate_left(2);

        let rules = RuleSet::builtin();
        let config = EngineConfig::default();
        let expected = reconcile(&request(forward), &rules, &config, &bounds());
        assert_eq!(reconcile(&request(backward), &rules, &config, &bounds()), expected);
        assert_eq!(reconcile(&request(rotated), &rules, &config, &bounds()), expected);
        assert_eq!(expected.totals.get(metric::SPEND), 1080.75);
        assert_eq!(expected.totals.get(metric::SESSIONS), 30.0);
    }

    #[test]
    fn landing_pages_stay_out_of_the_campaign_table() {
        let window = FunnelWindow::new(d(2026, 3, 1), d(2026, 3, 7)).expect("window");
        let request = ReconcileRequest {
            window,
            cac_mode: CacMode::Leads,
            campaign_names: None,
            sources: mixed_sources(),
        };
        let view = reconcile(&request, &RuleSet::builtin(), &EngineConfig::default(), &bounds());
        let names: Vec<&str> = view.campaigns.iter().map(|c| c.campaign.as_str()).collect();
        assert!(names.iter().all(|name| !name.starts_with('/')), "{names:?}");
        let brand = view
            .campaigns
            .iter()
            .find(|c| c.campaign == "Brand Search")
            .expect("brand row");
        assert_eq!(brand.spend, 1000.5);
        assert_eq!(brand.leads, 1.0);
    }
}
