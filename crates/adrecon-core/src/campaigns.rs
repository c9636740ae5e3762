use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::EngineConfig;
use crate::delta::{safe_ratio, MetricDelta};
use crate::record::{metric, CanonicalDayRecord, MetricTotals, UNMATCHED};
use crate::window::FunnelWindow;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CampaignRow {
    pub campaign: String,
    pub spend: f64,
    pub clicks: f64,
    pub lp_views: f64,
    pub leads: f64,
    pub paid_leads: f64,
    pub qualified: f64,
    pub deals: f64,
    pub revenue: f64,
    pub cpl: f64,
    pub roas: f64,
    pub revenue_delta: MetricDelta,
    pub leads_delta: MetricDelta,
    /// Set on the row collecting unattributed CRM activity.
    pub unmatched: bool,
}

impl CampaignRow {
    fn build(campaign: String, current: &MetricTotals, previous: Option<&MetricTotals>, config: &EngineConfig) -> Self {
        let spend = current.get(metric::SPEND);
        let leads = current.get(metric::LEADS);
        let paid_leads = current.get(metric::PAID_LEADS);
        let revenue = current.get(metric::REVENUE);
        let noise = config.noise_threshold_pct;
        Self {
            unmatched: campaign == UNMATCHED,
            campaign,
            spend,
            clicks: current.get(metric::CLICKS),
            lp_views: current.get(metric::LP_VIEWS),
            leads,
            paid_leads,
            qualified: current.get(metric::QUALIFIED),
            deals: current.get(metric::DEALS),
            revenue,
            cpl: safe_ratio(spend, paid_leads),
            roas: safe_ratio(revenue, spend),
            revenue_delta: MetricDelta::new(revenue, previous.map(|p| p.get(metric::REVENUE)), noise),
            leads_delta: MetricDelta::new(leads, previous.map(|p| p.get(metric::LEADS)), noise),
        }
    }

    /// Ranking key: revenue movement, else lead movement.
    fn movement(&self) -> f64 {
        match self.revenue_delta.delta_pct {
            Some(pct) => pct.abs(),
            None => self.leads_delta.magnitude(),
        }
    }
}

/// Per-campaign totals for the window, ordered by absolute movement against
/// the comparison window and then by name. Campaigns with no activity in
/// either window are left out.
pub fn campaign_table(
    records: &[CanonicalDayRecord],
    window: &FunnelWindow,
    config: &EngineConfig,
) -> Vec<CampaignRow> {
    let mut current: BTreeMap<&str, MetricTotals> = BTreeMap::new();
    let mut previous: BTreeMap<&str, MetricTotals> = BTreeMap::new();
    for record in records {
        let key = record.campaign_key.as_str();
        if window.contains(record.day) {
            current.entry(key).or_default().add_all(&record.metric_values);
        } else if window.previous_contains(record.day) {
            previous.entry(key).or_default().add_all(&record.metric_values);
        }
    }

    let has_comparison = window.previous().is_some();
    let empty = MetricTotals::new();
    let mut campaigns: Vec<&str> = current.keys().chain(previous.keys()).copied().collect();
    campaigns.sort_unstable();
    campaigns.dedup();

    let mut rows: Vec<CampaignRow> = campaigns
        .into_iter()
        .filter_map(|name| {
            let cur = current.get(name).unwrap_or(&empty);
            let prev = previous.get(name);
            let active = !cur.is_zero() || prev.is_some_and(|p| !p.is_zero());
            if !active {
                return None;
            }
            let baseline = if has_comparison { Some(prev.unwrap_or(&empty)) } else { None };
            Some(CampaignRow::build(name.to_string(), cur, baseline, config))
        })
        .collect();

    rows.sort_by(|a, b| {
        b.movement()
            .partial_cmp(&a.movement())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.campaign.cmp(&b.campaign))
    });
    rows
}
