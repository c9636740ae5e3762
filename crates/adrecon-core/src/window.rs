use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowPreset {
    #[serde(rename = "7d")]
    Last7Days,
    #[serde(rename = "30d")]
    Last30Days,
    #[serde(rename = "60d")]
    Last60Days,
    #[serde(rename = "90d")]
    Last90Days,
    #[serde(rename = "custom")]
    Custom,
}

impl WindowPreset {
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "7d" => Ok(Self::Last7Days),
            "30d" => Ok(Self::Last30Days),
            "60d" => Ok(Self::Last60Days),
            "90d" => Ok(Self::Last90Days),
            "custom" => Ok(Self::Custom),
            other => Err(CoreError::InvalidWindow(format!(
                "preset must be one of: 7d, 30d, 60d, 90d, custom (got {other})"
            ))),
        }
    }

    pub fn days(&self) -> Option<i64> {
        match self {
            Self::Last7Days => Some(7),
            Self::Last30Days => Some(30),
            Self::Last60Days => Some(60),
            Self::Last90Days => Some(90),
            Self::Custom => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompareMode {
    #[default]
    None,
    PreviousPeriod,
    Custom,
}

impl CompareMode {
    pub fn parse(raw: Option<&str>) -> Result<Self, CoreError> {
        match raw.map(str::trim) {
            None | Some("") | Some("none") => Ok(Self::None),
            Some("previous_period") => Ok(Self::PreviousPeriod),
            Some("custom") => Ok(Self::Custom),
            Some(_) => Err(CoreError::InvalidWindow(
                "compare must be one of: none, previous_period, custom".to_string(),
            )),
        }
    }
}

/// Longest reporting or comparison window accepted, in days. Series are
/// materialized one point per day, so this bounds response size.
pub const MAX_WINDOW_DAYS: i64 = 800;

fn shift(day: NaiveDate, days: i64) -> Result<NaiveDate, CoreError> {
    day.checked_add_signed(Duration::days(days))
        .ok_or_else(|| CoreError::InvalidWindow(format!("date out of range: {day} shifted by {days} days")))
}

fn span_days(start: NaiveDate, end: NaiveDate, what: &str) -> Result<i64, CoreError> {
    if end < start {
        return Err(CoreError::InvalidWindow(format!(
            "{what} end must be on or after start"
        )));
    }
    let days = (end - start).num_days() + 1;
    if days > MAX_WINDOW_DAYS {
        return Err(CoreError::InvalidWindow(format!(
            "{what} covers {days} days (max {MAX_WINDOW_DAYS})"
        )));
    }
    Ok(days)
}

/// Inclusive reporting window with an optional comparison window that ends
/// the day before `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FunnelWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub previous_start: Option<NaiveDate>,
    pub previous_end: Option<NaiveDate>,
}

impl FunnelWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, CoreError> {
        span_days(start, end, "window")?;
        Ok(Self {
            start,
            end,
            previous_start: None,
            previous_end: None,
        })
    }

    /// Last `days` days ending on `today`.
    pub fn trailing(today: NaiveDate, days: i64) -> Result<Self, CoreError> {
        if days < 1 {
            return Err(CoreError::InvalidWindow("window must cover at least one day".to_string()));
        }
        Self::new(shift(today, 1 - days)?, today)
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Same length, ending the day before `start`.
    pub fn with_previous_period(mut self) -> Result<Self, CoreError> {
        let end = shift(self.start, -1)?;
        self.previous_start = Some(shift(end, 1 - self.days())?);
        self.previous_end = Some(end);
        Ok(self)
    }

    /// Explicit comparison bounds. They must end the day before `start`.
    pub fn with_comparison(mut self, start: NaiveDate, end: NaiveDate) -> Result<Self, CoreError> {
        span_days(start, end, "comparison window")?;
        if self.start.pred_opt() != Some(end) {
            return Err(CoreError::InvalidWindow(
                "comparison window must end the day before start".to_string(),
            ));
        }
        self.previous_start = Some(start);
        self.previous_end = Some(end);
        Ok(self)
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        day >= self.start && day <= self.end
    }

    pub fn previous(&self) -> Option<(NaiveDate, NaiveDate)> {
        self.previous_start.zip(self.previous_end)
    }

    pub fn previous_contains(&self, day: NaiveDate) -> bool {
        self.previous()
            .is_some_and(|(start, end)| day >= start && day <= end)
    }
}

/// Window selection as supplied by a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WindowSpec {
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub start: Option<NaiveDate>,
    #[serde(default)]
    pub end: Option<NaiveDate>,
    #[serde(default)]
    pub compare: Option<String>,
    #[serde(default)]
    pub compare_start: Option<NaiveDate>,
    #[serde(default)]
    pub compare_end: Option<NaiveDate>,
}

impl WindowSpec {
    /// Resolves presets against `today` (already in the account timezone).
    /// Explicit `start`/`end` without a preset mean `custom`.
    pub fn resolve(&self, today: NaiveDate) -> Result<FunnelWindow, CoreError> {
        let preset = match self.preset.as_deref() {
            Some(raw) => WindowPreset::parse(raw)?,
            None if self.start.is_some() || self.end.is_some() => WindowPreset::Custom,
            None => WindowPreset::Last30Days,
        };

        let window = match preset.days() {
            Some(days) => FunnelWindow::trailing(today, days)?,
            None => {
                let start = self
                    .start
                    .ok_or_else(|| CoreError::InvalidWindow("start is required for custom windows".to_string()))?;
                let end = self
                    .end
                    .ok_or_else(|| CoreError::InvalidWindow("end is required for custom windows".to_string()))?;
                FunnelWindow::new(start, end)?
            }
        };

        match CompareMode::parse(self.compare.as_deref())? {
            CompareMode::None => Ok(window),
            CompareMode::PreviousPeriod => window.with_previous_period(),
            CompareMode::Custom => {
                let start = self.compare_start.ok_or_else(|| {
                    CoreError::InvalidWindow("compare_start is required for custom compare".to_string())
                })?;
                let end = self.compare_end.ok_or_else(|| {
                    CoreError::InvalidWindow("compare_end is required for custom compare".to_string())
                })?;
                window.with_comparison(start, end)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).expect("date")
    }

    #[test]
    fn previous_period_has_same_length_and_is_contiguous() {
        let window = FunnelWindow::new(d(2026, 1, 10), d(2026, 1, 16))
            .expect("window")
            .with_previous_period()
            .expect("previous period");
        assert_eq!(window.previous(), Some((d(2026, 1, 3), d(2026, 1, 9))));
        assert!(window.previous_contains(d(2026, 1, 9)));
        assert!(!window.previous_contains(d(2026, 1, 10)));
    }

    #[test]
    fn presets_end_today() {
        let spec = WindowSpec {
            preset: Some("30d".to_string()),
            compare: Some("previous_period".to_string()),
            ..WindowSpec::default()
        };
        let window = spec.resolve(d(2026, 3, 31)).expect("window");
        assert_eq!(window.start, d(2026, 3, 2));
        assert_eq!(window.end, d(2026, 3, 31));
        assert_eq!(window.days(), 30);
        assert_eq!(window.previous(), Some((d(2026, 1, 31), d(2026, 3, 1))));
    }

    #[test]
    fn explicit_bounds_imply_custom() {
        let spec = WindowSpec {
            start: Some(d(2026, 2, 1)),
            end: Some(d(2026, 2, 7)),
            ..WindowSpec::default()
        };
        let window = spec.resolve(d(2026, 3, 1)).expect("window");
        assert_eq!(window.days(), 7);
        assert_eq!(window.previous(), None);
    }

    #[test]
    fn rejects_inverted_and_unknown_windows() {
        assert!(matches!(
            FunnelWindow::new(d(2026, 1, 2), d(2026, 1, 1)),
            Err(CoreError::InvalidWindow(_))
        ));
        let spec = WindowSpec {
            preset: Some("14d".to_string()),
            ..WindowSpec::default()
        };
        assert!(spec.resolve(d(2026, 1, 1)).is_err());
        let custom_missing_end = WindowSpec {
            preset: Some("custom".to_string()),
            start: Some(d(2026, 1, 1)),
            ..WindowSpec::default()
        };
        assert!(custom_missing_end.resolve(d(2026, 2, 1)).is_err());
    }

    #[test]
    fn explicit_comparison_must_be_contiguous() {
        let window = FunnelWindow::new(d(2026, 1, 10), d(2026, 1, 16)).expect("window");
        assert!(window.with_comparison(d(2026, 1, 1), d(2026, 1, 8)).is_err());
        let longer = window
            .with_comparison(d(2025, 12, 1), d(2026, 1, 9))
            .expect("longer comparison");
        assert_eq!(longer.previous(), Some((d(2025, 12, 1), d(2026, 1, 9))));
        let ok = window
            .with_comparison(d(2026, 1, 6), d(2026, 1, 9))
            .expect("comparison");
        assert_eq!(ok.previous(), Some((d(2026, 1, 6), d(2026, 1, 9))));
    }

    #[test]
    fn compare_mode_parsing() {
        assert_eq!(CompareMode::parse(None).expect("mode"), CompareMode::None);
        assert_eq!(
            CompareMode::parse(Some("previous_period")).expect("mode"),
            CompareMode::PreviousPeriod
        );
        assert!(CompareMode::parse(Some("previous_year")).is_err());
    }

    #[test]
    fn extreme_bounds_are_rejected_without_panicking() {
        let spec: WindowSpec = serde_json::from_str(
            r#"{"start":"-262143-01-01","end":"-262143-01-03","compare":"previous_period"}"#,
        )
        .expect("spec");
        assert!(matches!(
            spec.resolve(d(2026, 1, 1)),
            Err(CoreError::InvalidWindow(_))
        ));
        let at_max = FunnelWindow::new(NaiveDate::MAX, NaiveDate::MAX).expect("window");
        assert!(at_max.with_comparison(NaiveDate::MAX, NaiveDate::MAX).is_err());
    }

    #[test]
    fn overlong_windows_are_rejected() {
        let spec: WindowSpec =
            serde_json::from_str(r#"{"start":"1000-01-01","end":"9999-12-31"}"#).expect("spec");
        assert!(matches!(
            spec.resolve(d(2026, 1, 1)),
            Err(CoreError::InvalidWindow(_))
        ));
        let start = d(2024, 1, 1);
        let longest = start + Duration::days(MAX_WINDOW_DAYS - 1);
        assert_eq!(
            FunnelWindow::new(start, longest).expect("window").days(),
            MAX_WINDOW_DAYS
        );
        assert!(FunnelWindow::new(start, longest + Duration::days(1)).is_err());
        let window = FunnelWindow::new(d(2026, 1, 10), d(2026, 1, 16)).expect("window");
        assert!(window
            .with_comparison(d(2020, 1, 1), d(2026, 1, 9))
            .is_err());
    }
}
