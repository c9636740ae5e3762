use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::delta::{safe_ratio, MetricDelta};
use crate::funnel::{compute_funnel, FunnelRates, FunnelReport};
use crate::record::{metric, CanonicalDayRecord, MetricTotals};
use crate::window::FunnelWindow;

/// Denominator used for the cost-per-acquisition headline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacMode {
    #[default]
    Leads,
    Deals,
}

pub const HEADLINE_BASE: [&str; 11] = [
    metric::SPEND,
    metric::IMPRESSIONS,
    metric::CLICKS,
    metric::LP_VIEWS,
    metric::LEADS,
    metric::PAID_LEADS,
    metric::ORGANIC_LEADS,
    metric::QUALIFIED,
    metric::DEALS,
    metric::WON_DEALS,
    metric::REVENUE,
];

/// Sums every record whose day falls in `[start, end]`.
pub fn window_totals(records: &[CanonicalDayRecord], start: NaiveDate, end: NaiveDate) -> MetricTotals {
    let mut totals = MetricTotals::new();
    for record in records.iter().filter(|r| r.day >= start && r.day <= end) {
        totals.add_all(&record.metric_values);
    }
    totals
}

/// Base headline values plus the derived ratios.
pub fn headline_values(totals: &MetricTotals, cac_mode: CacMode) -> BTreeMap<String, f64> {
    let mut values: BTreeMap<String, f64> = HEADLINE_BASE
        .iter()
        .map(|name| (name.to_string(), totals.get(name)))
        .collect();

    let spend = totals.get(metric::SPEND);
    let cac_denominator = match cac_mode {
        CacMode::Leads => totals.get(metric::PAID_LEADS),
        CacMode::Deals => totals.get(metric::WON_DEALS),
    };
    values.insert(
        "ctr".to_string(),
        safe_ratio(totals.get(metric::CLICKS), totals.get(metric::IMPRESSIONS)),
    );
    values.insert("cpc".to_string(), safe_ratio(spend, totals.get(metric::CLICKS)));
    values.insert("cpl".to_string(), safe_ratio(spend, cac_denominator));
    values.insert("roas".to_string(), safe_ratio(totals.get(metric::REVENUE), spend));
    values.insert(
        "win_rate".to_string(),
        safe_ratio(totals.get(metric::WON_DEALS), totals.get(metric::DEALS)),
    );
    values.insert(
        "avg_deal_size".to_string(),
        safe_ratio(totals.get(metric::REVENUE), totals.get(metric::WON_DEALS)),
    );
    values
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateResult {
    pub totals: MetricTotals,
    pub previous_totals: Option<MetricTotals>,
    pub rates: FunnelRates,
    pub funnel: FunnelReport,
    pub deltas: BTreeMap<String, MetricDelta>,
}

/// Totals, funnel rates and headline deltas for one window.
pub fn aggregate(
    records: &[CanonicalDayRecord],
    window: &FunnelWindow,
    config: &EngineConfig,
    cac_mode: CacMode,
) -> AggregateResult {
    let totals = window_totals(records, window.start, window.end);
    let previous_totals = window
        .previous()
        .map(|(start, end)| window_totals(records, start, end));

    let current = headline_values(&totals, cac_mode);
    let previous = previous_totals.as_ref().map(|t| headline_values(t, cac_mode));
    let deltas = current
        .iter()
        .map(|(name, value)| {
            let prev = previous.as_ref().and_then(|p| p.get(name).copied());
            (
                name.clone(),
                MetricDelta::new(*value, prev, config.noise_threshold_pct),
            )
        })
        .collect();

    let funnel = compute_funnel(&totals);
    AggregateResult {
        rates: funnel.rates,
        funnel,
        totals,
        previous_totals,
        deltas,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::delta::DeltaSignal;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).expect("date")
    }

    fn flat_records(start: NaiveDate, days: i64) -> Vec<CanonicalDayRecord> {
        (0..days)
            .map(|i| CanonicalDayRecord {
                day: start + Duration::days(i),
                campaign_key: "Brand".to_string(),
                metric_values: [
                    ("spend", 100.0),
                    ("impressions", 5000.0),
                    ("clicks", 120.0),
                    ("lp_views", 80.0),
                    ("leads", 4.0),
                    ("paid_leads", 3.0),
                    ("organic_leads", 1.0),
                    ("qualified", 2.0),
                    ("deals", 1.0),
                    ("won_deals", 1.0),
                    ("revenue", 900.0),
                ]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            })
            .collect()
    }

    #[test]
    fn flat_metrics_across_windows_have_no_delta() {
        let window = FunnelWindow::trailing(d(2026, 3, 31), 30)
            .and_then(FunnelWindow::with_previous_period)
            .expect("window");
        let (prev_start, _) = window.previous().expect("previous");
        let records = flat_records(prev_start, 60);
        let result = aggregate(&records, &window, &EngineConfig::default(), CacMode::Leads);

        assert_eq!(result.deltas.len(), 17);
        for (name, delta) in &result.deltas {
            let pct = delta.delta_pct.expect("baseline present");
            assert!(pct.abs() < 1e-9, "{name}: {pct}");
            assert_eq!(delta.signal, DeltaSignal::NoSignal);
        }
        assert_eq!(result.totals.get("spend"), 3000.0);
    }

    #[test]
    fn zero_leads_produce_zero_rates_and_cpl() {
        let window = FunnelWindow::new(d(2026, 1, 1), d(2026, 1, 1)).expect("window");
        let records = vec![CanonicalDayRecord {
            day: d(2026, 1, 1),
            campaign_key: "A".to_string(),
            metric_values: [("spend".to_string(), 50.0)].into_iter().collect(),
        }];
        let result = aggregate(&records, &window, &EngineConfig::default(), CacMode::Leads);
        assert_eq!(result.rates.lead_to_qualified, 0.0);
        assert_eq!(result.deltas["cpl"].value, 0.0);
        assert_eq!(result.deltas["cpl"].delta_pct, None);
        assert!(result.previous_totals.is_none());
    }

    #[test]
    fn cac_mode_switches_denominator() {
        let mut totals = MetricTotals::new();
        totals.set("spend", 1000.0);
        totals.set("leads", 14.0);
        totals.set("paid_leads", 10.0);
        totals.set("organic_leads", 4.0);
        totals.set("won_deals", 2.0);
        assert_eq!(headline_values(&totals, CacMode::Leads)["cpl"], 100.0);
        assert_eq!(headline_values(&totals, CacMode::Deals)["cpl"], 500.0);
    }

    #[test]
    fn records_outside_window_are_ignored() {
        let window = FunnelWindow::new(d(2026, 1, 10), d(2026, 1, 12)).expect("window");
        let records = flat_records(d(2026, 1, 1), 20);
        let result = aggregate(&records, &window, &EngineConfig::default(), CacMode::Leads);
        assert_eq!(result.totals.get("spend"), 300.0);
    }
}
