use chrono::{DateTime, Datelike, Duration, NaiveDate};

use crate::record::CellValue;

/// Values above this are read as epoch milliseconds.
const EPOCH_MS_FLOOR: f64 = 10_000_000_000.0;
/// Spreadsheet serial days live in `(1, 100_000)`.
const SERIAL_CEILING: f64 = 100_000.0;
const MIN_YEAR: i32 = 1990;
const MAX_YEAR: i32 = 2100;

const MONTH_NAME_FORMATS: &[&str] = &["%b %d, %Y", "%B %d, %Y", "%d %b %Y", "%d %B %Y"];

/// Inclusive range of plausible calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayBounds {
    pub earliest: NaiveDate,
    pub latest: NaiveDate,
}

impl DayBounds {
    /// `[today - window_days, today + window_days]`, saturating at the
    /// representable calendar range.
    pub fn around(today: NaiveDate, window_days: i64) -> Self {
        let span = Duration::try_days(window_days.max(0));
        Self {
            earliest: span
                .and_then(|span| today.checked_sub_signed(span))
                .unwrap_or(NaiveDate::MIN),
            latest: span
                .and_then(|span| today.checked_add_signed(span))
                .unwrap_or(NaiveDate::MAX),
        }
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        day >= self.earliest && day <= self.latest
    }
}

/// Normalizes a heterogeneous date cell into a calendar day, or `None` when
/// the value is unreadable or falls outside `bounds`.
pub fn to_canonical_day(raw: &CellValue, bounds: &DayBounds) -> Option<NaiveDate> {
    parse_day(raw).filter(|day| bounds.contains(*day))
}

/// Parses a date cell without the sanity window.
pub fn parse_day(raw: &CellValue) -> Option<NaiveDate> {
    match raw {
        CellValue::Number(n) => from_number(*n),
        CellValue::Text(s) => parse_day_str(s),
        CellValue::Null | CellValue::Bool(_) | CellValue::Other(_) => None,
    }
}

fn from_number(n: f64) -> Option<NaiveDate> {
    if !n.is_finite() {
        return None;
    }
    if n > EPOCH_MS_FLOOR {
        return DateTime::from_timestamp_millis(n as i64).map(|dt| dt.date_naive());
    }
    if n > 1.0 && n < SERIAL_CEILING {
        let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
        return epoch.checked_add_signed(Duration::days(n.floor() as i64));
    }
    None
}

pub fn parse_day_str(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    iso_prefix(s)
        .or_else(|| dotted(s))
        .or_else(|| slashed(s))
        .or_else(|| fallback(s))
        .filter(|day| (MIN_YEAR..=MAX_YEAR).contains(&day.year()))
}

/// `YYYY-MM-DD`, ignoring anything after the tenth character.
fn iso_prefix(s: &str) -> Option<NaiveDate> {
    let prefix = s.get(..10)?;
    let mut parts = prefix.split('-');
    let (y, m, d) = (parts.next()?, parts.next()?, parts.next()?);
    if y.len() != 4 || parts.next().is_some() {
        return None;
    }
    ymd(y, m, d)
}

/// `D. M. YYYY` with optional spaces around the dots.
fn dotted(s: &str) -> Option<NaiveDate> {
    let mut parts = s.splitn(3, '.');
    let day = parts.next()?.trim();
    let month = parts.next()?.trim();
    let year = leading_digits(parts.next()?.trim_start());
    if year.len() != 4 {
        return None;
    }
    ymd(year, month, day)
}

/// `M/D/YYYY`, or `D/M/YYYY` when the first component cannot be a month.
fn slashed(s: &str) -> Option<NaiveDate> {
    let mut parts = s.splitn(3, '/');
    let first = parts.next()?.trim();
    let second = parts.next()?.trim();
    let year = leading_digits(parts.next()?.trim_start());
    if year.len() != 4 {
        return None;
    }
    let first_num: u32 = first.parse().ok()?;
    if first_num > 12 {
        ymd(year, second, first)
    } else {
        ymd(year, first, second)
    }
}

fn fallback(s: &str) -> Option<NaiveDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.date_naive());
    }
    if s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit()) {
        return NaiveDate::parse_from_str(s, "%Y%m%d").ok();
    }
    if let Ok(day) = NaiveDate::parse_from_str(s, "%Y/%m/%d") {
        return Some(day);
    }
    MONTH_NAME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

fn leading_digits(s: &str) -> &str {
    let end = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map_or(s.len(), |(i, _)| i);
    &s[..end]
}

fn ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    let all_digits = |p: &str| !p.is_empty() && p.len() <= 4 && p.bytes().all(|b| b.is_ascii_digit());
    if !(all_digits(year) && all_digits(month) && all_digits(day)) {
        return None;
    }
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}
