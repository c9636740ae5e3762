use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::record::{metric, CanonicalDayRecord};
use crate::window::FunnelWindow;

/// A spend target over an inclusive date range.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BudgetPlan {
    /// Exact campaign key. `None` paces spend across every campaign.
    #[serde(default)]
    pub campaign: Option<String>,
    pub total_budget: f64,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PacingStatus {
    OnTrack,
    SlightlyOff,
    ModeratelyOff,
    Critical,
}

impl PacingStatus {
    /// Buckets the absolute gap, in percentage points, between budget spent
    /// and time elapsed.
    pub fn from_deviation(deviation: f64) -> Self {
        let gap = deviation.abs();
        if gap <= 10.0 {
            Self::OnTrack
        } else if gap <= 20.0 {
            Self::SlightlyOff
        } else if gap <= 40.0 {
            Self::ModeratelyOff
        } else {
            Self::Critical
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetPacing {
    pub plan: BudgetPlan,
    pub total_spend: f64,
    pub remaining_budget: f64,
    pub total_days: i64,
    pub days_elapsed: i64,
    pub days_remaining: i64,
    pub percent_time_elapsed: f64,
    pub percent_budget_spent: f64,
    /// Budget spent minus time elapsed, in percentage points.
    pub deviation: f64,
    pub status: PacingStatus,
    pub target_daily_spend: f64,
    pub average_daily_spend: f64,
    pub projected_spend: f64,
    pub daily_budget_needed: f64,
    /// Days that spent at least twice the target daily spend.
    pub overspend_days: Vec<NaiveDate>,
}

fn pct(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        part / whole * 100.0
    } else {
        0.0
    }
}

/// Paces `plan` against canonical spend records as of `today`.
pub fn pace_budget(
    plan: &BudgetPlan,
    records: &[CanonicalDayRecord],
    today: NaiveDate,
) -> Result<BudgetPacing, CoreError> {
    if !plan.total_budget.is_finite() || plan.total_budget < 0.0 {
        return Err(CoreError::InvalidBudget(
            "total_budget must be a non-negative number".to_string(),
        ));
    }
    let period = FunnelWindow::new(plan.start, plan.end)?;
    let total_days = period.days();
    let days_elapsed = ((today - plan.start).num_days() + 1).clamp(0, total_days);
    let days_remaining = (plan.end - today).num_days().max(0);

    let mut daily: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for record in records {
        let in_scope = match plan.campaign.as_deref() {
            Some(campaign) => campaign == record.campaign_key,
            None => true,
        };
        if in_scope && period.contains(record.day) {
            *daily.entry(record.day).or_insert(0.0) += record.metric_values.get(metric::SPEND);
        }
    }
    let total_spend: f64 = daily.values().sum();

    let remaining_budget = (plan.total_budget - total_spend).max(0.0);
    let percent_time_elapsed = pct(days_elapsed as f64, total_days as f64);
    let percent_budget_spent = pct(total_spend, plan.total_budget);
    let deviation = percent_budget_spent - percent_time_elapsed;
    let target_daily_spend = plan.total_budget / total_days as f64;
    let average_daily_spend = if days_elapsed > 0 {
        total_spend / days_elapsed as f64
    } else {
        0.0
    };
    let daily_budget_needed = if days_remaining > 0 {
        remaining_budget / days_remaining as f64
    } else {
        0.0
    };
    let overspend_days = daily
        .iter()
        .filter(|(_, spend)| target_daily_spend > 0.0 && **spend >= target_daily_spend * 2.0)
        .map(|(day, _)| *day)
        .collect();

    Ok(BudgetPacing {
        plan: plan.clone(),
        total_spend,
        remaining_budget,
        total_days,
        days_elapsed,
        days_remaining,
        percent_time_elapsed,
        percent_budget_spent,
        deviation,
        status: PacingStatus::from_deviation(deviation),
        target_daily_spend,
        average_daily_spend,
        projected_spend: average_daily_spend * total_days as f64,
        daily_budget_needed,
        overspend_days,
    })
}
