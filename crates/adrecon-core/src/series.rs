use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::record::{DaySeries, MetricTotals};
use crate::window::FunnelWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Day,
    Week,
}

pub fn auto_granularity(window: &FunnelWindow, config: &EngineConfig) -> Granularity {
    if window.days() <= config.daily_bucket_max_days {
        Granularity::Day
    } else {
        Granularity::Week
    }
}

/// First day of the bucket containing `day`. Week buckets are anchored to
/// `week_start`, independent of the window start.
pub fn bucket_start(day: NaiveDate, granularity: Granularity, week_start: Weekday) -> NaiveDate {
    match granularity {
        Granularity::Day => day,
        Granularity::Week => {
            let offset = (day.weekday().num_days_from_monday() + 7
                - week_start.num_days_from_monday())
                % 7;
            day - Duration::days(i64::from(offset))
        }
    }
}

/// Every bucket start overlapping `[start, end]`, in order.
pub fn generate_buckets(
    start: NaiveDate,
    end: NaiveDate,
    granularity: Granularity,
    week_start: Weekday,
) -> Vec<NaiveDate> {
    let mut buckets = Vec::new();
    if end < start {
        return buckets;
    }
    let step = match granularity {
        Granularity::Day => Duration::days(1),
        Granularity::Week => Duration::days(7),
    };
    let mut current = bucket_start(start, granularity, week_start);
    while current <= end {
        buckets.push(current);
        current += step;
    }
    buckets
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub metrics: MetricTotals,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub bucket_start: NaiveDate,
    /// Number of window days that fall into this bucket.
    pub days: u32,
    pub metrics: MetricTotals,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendSeries {
    pub granularity: Granularity,
    pub points: Vec<TrendPoint>,
}

/// Day-by-day totals over the window, with empty days present as zero maps.
pub fn day_series(series: &DaySeries, window: &FunnelWindow) -> Vec<SeriesPoint> {
    generate_buckets(window.start, window.end, Granularity::Day, Weekday::Mon)
        .into_iter()
        .map(|date| SeriesPoint {
            date,
            metrics: series.get(&date).cloned().unwrap_or_default(),
        })
        .collect()
}

/// Window totals bucketed by day or anchored week. Only days inside the
/// window contribute, so edge buckets may be partial.
pub fn trend_series(series: &DaySeries, window: &FunnelWindow, config: &EngineConfig) -> TrendSeries {
    let granularity = auto_granularity(window, config);
    let mut points: Vec<TrendPoint> =
        generate_buckets(window.start, window.end, granularity, config.week_start)
            .into_iter()
            .map(|bucket_start| TrendPoint {
                bucket_start,
                days: 0,
                metrics: MetricTotals::new(),
            })
            .collect();

    let mut day = window.start;
    while day <= window.end {
        let start = bucket_start(day, granularity, config.week_start);
        if let Some(point) = points.iter_mut().find(|p| p.bucket_start == start) {
            point.days += 1;
            if let Some(totals) = series.get(&day) {
                point.metrics.add_all(totals);
            }
        }
        day += Duration::days(1);
    }

    TrendSeries {
        granularity,
        points,
    }
}
