use serde::{Deserialize, Serialize};

use crate::delta::safe_ratio;
use crate::record::{metric, MetricTotals};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunnelStage {
    Views,
    Leads,
    Qualified,
    Deals,
}

impl FunnelStage {
    pub const ORDER: [FunnelStage; 4] = [
        FunnelStage::Views,
        FunnelStage::Leads,
        FunnelStage::Qualified,
        FunnelStage::Deals,
    ];

    pub fn metric(&self) -> &'static str {
        match self {
            FunnelStage::Views => metric::LP_VIEWS,
            FunnelStage::Leads => metric::LEADS,
            FunnelStage::Qualified => metric::QUALIFIED,
            FunnelStage::Deals => metric::DEALS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FunnelCounts {
    pub views: f64,
    pub leads: f64,
    pub qualified: f64,
    pub deals: f64,
    pub revenue: f64,
}

impl FunnelCounts {
    pub fn from_totals(totals: &MetricTotals) -> Self {
        Self {
            views: totals.get(metric::LP_VIEWS),
            leads: totals.get(metric::LEADS),
            qualified: totals.get(metric::QUALIFIED),
            deals: totals.get(metric::DEALS),
            revenue: totals.get(metric::REVENUE),
        }
    }

    fn stage(&self, stage: FunnelStage) -> f64 {
        match stage {
            FunnelStage::Views => self.views,
            FunnelStage::Leads => self.leads,
            FunnelStage::Qualified => self.qualified,
            FunnelStage::Deals => self.deals,
        }
    }
}

/// Stage-over-stage rates as fractions. `deal_to_revenue` is revenue per
/// deal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FunnelRates {
    pub view_to_lead: f64,
    pub lead_to_qualified: f64,
    pub qualified_to_deal: f64,
    pub deal_to_revenue: f64,
}

impl FunnelRates {
    pub fn from_counts(counts: &FunnelCounts) -> Self {
        Self {
            view_to_lead: safe_ratio(counts.leads, counts.views),
            lead_to_qualified: safe_ratio(counts.qualified, counts.leads),
            qualified_to_deal: safe_ratio(counts.deals, counts.qualified),
            deal_to_revenue: safe_ratio(counts.revenue, counts.deals),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelStepResult {
    pub step_order: u32,
    pub stage: FunnelStage,
    pub reached: f64,
    pub drop_off_count: f64,
    pub drop_off_rate: f64,
    pub conversion_rate_from_start: f64,
    pub conversion_rate_from_previous: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelReport {
    pub counts: FunnelCounts,
    pub rates: FunnelRates,
    pub final_conversion_rate: f64,
    pub steps: Vec<FunnelStepResult>,
}

pub fn compute_funnel(totals: &MetricTotals) -> FunnelReport {
    let counts = FunnelCounts::from_totals(totals);
    let stage_counts: Vec<f64> = FunnelStage::ORDER.iter().map(|s| counts.stage(*s)).collect();
    let total_entered = stage_counts.first().copied().unwrap_or(0.0);

    let mut steps = Vec::with_capacity(stage_counts.len());
    for (idx, stage) in FunnelStage::ORDER.iter().enumerate() {
        let reached = stage_counts[idx];
        let next = stage_counts.get(idx + 1).copied();
        let drop_off_count = next.map_or(0.0, |n| (reached - n).max(0.0));
        let drop_off_rate = if next.is_some() {
            safe_ratio(drop_off_count, reached)
        } else {
            0.0
        };
        let conversion_rate_from_previous = if idx == 0 {
            if reached > 0.0 {
                1.0
            } else {
                0.0
            }
        } else {
            safe_ratio(reached, stage_counts[idx - 1])
        };

        steps.push(FunnelStepResult {
            step_order: idx as u32 + 1,
            stage: *stage,
            reached,
            drop_off_count,
            drop_off_rate,
            conversion_rate_from_start: safe_ratio(reached, total_entered),
            conversion_rate_from_previous,
        });
    }

    let final_conversion_rate = steps
        .last()
        .map(|s| s.conversion_rate_from_start)
        .unwrap_or(0.0);

    FunnelReport {
        rates: FunnelRates::from_counts(&counts),
        counts,
        final_conversion_rate,
        steps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn totals(pairs: &[(&str, f64)]) -> MetricTotals {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn stage_rates_and_dropoff() {
        let report = compute_funnel(&totals(&[
            ("lp_views", 1000.0),
            ("leads", 50.0),
            ("qualified", 20.0),
            ("deals", 5.0),
            ("revenue", 25000.0),
        ]));
        assert!((report.rates.view_to_lead - 0.05).abs() < 1e-12);
        assert!((report.rates.lead_to_qualified - 0.4).abs() < 1e-12);
        assert!((report.rates.qualified_to_deal - 0.25).abs() < 1e-12);
        assert!((report.rates.deal_to_revenue - 5000.0).abs() < 1e-9);
        assert_eq!(report.steps[0].drop_off_count, 950.0);
        assert_eq!(report.steps[0].conversion_rate_from_previous, 1.0);
        assert_eq!(report.steps[3].drop_off_count, 0.0);
        assert!((report.final_conversion_rate - 0.005).abs() < 1e-12);
    }

    #[test]
    fn zero_leads_yield_zero_rates() {
        let report = compute_funnel(&totals(&[("lp_views", 300.0), ("qualified", 4.0)]));
        assert_eq!(report.rates.view_to_lead, 0.0);
        assert_eq!(report.rates.lead_to_qualified, 0.0);
        assert_eq!(report.steps[2].conversion_rate_from_previous, 0.0);
        assert_eq!(report.rates.deal_to_revenue, 0.0);
    }

    #[test]
    fn empty_totals_are_all_zero() {
        let report = compute_funnel(&MetricTotals::new());
        assert_eq!(report.final_conversion_rate, 0.0);
        assert!(report.steps.iter().all(|s| s.reached == 0.0
            && s.drop_off_rate == 0.0
            && s.conversion_rate_from_previous == 0.0));
    }
}
