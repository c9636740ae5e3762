//! Landing page report over web analytics exports.
//!
//! Page paths are not campaigns. They never enter the attribution universe
//! or the campaign table; this module reads the page-level export on its own
//! and ranks pages by sessions and conversion rate.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;

use crate::amount::parse_amount;
use crate::columns::{apply_overrides, field, ColumnAliases, ColumnMap};
use crate::date::{parse_day_str, to_canonical_day, DayBounds};
use crate::delta::safe_ratio;
use crate::record::{CellValue, RawRecord};
use crate::window::FunnelWindow;

/// Pages below this many sessions are too thin to rank.
pub const MIN_RANKED_SESSIONS: f64 = 100.0;
/// Conversion rate (percent) under which a busy page counts as leaking.
pub const LEAKY_RATE_PCT: f64 = 1.0;
/// `by_source` keeps this many buckets.
pub const SOURCE_BUCKETS: usize = 6;

const POST_CONVERSION_PATHS: &[&str] = &["/thank-you", "/thanks", "/confirmation", "/success"];
const KNOWN_SOURCES: &[&str] = &[
    "facebook", "google", "direct", "email", "instagram", "bing", "linkedin", "twitter", "tiktok", "youtube",
    "organic",
];
const SECONDS_PER_DAY: f64 = 86_400.0;

mod col {
    pub const PAGE: &str = "landing_page";
    pub const SOURCE_MEDIUM: &str = "source_medium";
    pub const DEVICE: &str = "device";
    pub const SESSIONS: &str = "sessions";
    pub const USERS: &str = "users";
    pub const BOUNCE_RATE: &str = "bounce_rate";
    pub const ENGAGEMENT: &str = "engagement";
    pub const CONVERSIONS: &str = "conversions";
}

fn landing_columns() -> Vec<ColumnAliases> {
    vec![
        ColumnAliases::new(field::DATE, &["date", "date_iso", "day"]),
        ColumnAliases::new(
            col::PAGE,
            &["landing_page", "landingpage", "landing_page_plus_query_string", "page_path"],
        ),
        ColumnAliases::new(
            col::SOURCE_MEDIUM,
            &["session_source_medium", "sessionsourcemedium", "source_medium", "sourcemedium"],
        ),
        ColumnAliases::new(col::DEVICE, &["device_category", "devicecategory", "device"]),
        ColumnAliases::new(col::SESSIONS, &["sessions"]),
        ColumnAliases::new(col::USERS, &["total_users", "totalusers", "users"]),
        ColumnAliases::new(col::BOUNCE_RATE, &["bounce_rate", "bouncerate"]),
        ColumnAliases::new(
            col::ENGAGEMENT,
            &["average_session_duration", "averagesessionduration", "avg_engagement_time"],
        ),
        ColumnAliases::new(col::CONVERSIONS, &["conversions", "key_events", "keyevents"]),
    ]
}

/// One row of the page-level export after normalization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LandingVisit {
    pub day: NaiveDate,
    pub landing_page: String,
    pub source_medium: String,
    pub device: String,
    pub sessions: f64,
    pub users: f64,
    /// Percent, `0..=100`.
    pub bounce_rate: f64,
    pub engagement_seconds: f64,
    pub conversions: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LandingDiagnostics {
    pub rows_in: usize,
    pub rows_rejected: usize,
    pub resolved_columns: BTreeMap<String, String>,
    pub missing_columns: Vec<String>,
}

/// Exports report bounce either as a fraction or as a percentage.
pub fn bounce_percent(raw: f64) -> f64 {
    if raw > 0.0 && raw <= 1.0 {
        raw * 100.0
    } else if raw > 100.0 {
        raw / 100.0
    } else {
        raw.max(0.0)
    }
}

/// Durations longer than a day are microseconds.
pub fn engagement_seconds(raw: f64) -> f64 {
    if raw > SECONDS_PER_DAY {
        raw / 1_000_000.0
    } else {
        raw.max(0.0)
    }
}

/// Home page, blanks and post-conversion pages say nothing about landing
/// quality.
pub fn is_relevant_page(page: &str) -> bool {
    if page.is_empty() || page == "/" || page == "(not set)" {
        return false;
    }
    let lowered = page.to_lowercase();
    !POST_CONVERSION_PATHS.iter().any(|p| lowered.contains(p))
}

/// Buckets a `source / medium` string into a handful of channel names.
pub fn source_bucket(source_medium: &str) -> &'static str {
    let source = source_medium
        .split(" / ")
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();
    if source.contains("facebook") || source.contains("fb") || source == "meta" {
        "facebook"
    } else if source.contains("google") {
        "google"
    } else if source == "(direct)" || source == "direct" {
        "direct"
    } else if source.contains("email") || source.contains("hubspot") {
        "email"
    } else if source.contains("instagram") || source == "ig" {
        "instagram"
    } else if source.contains("bing") {
        "bing"
    } else {
        KNOWN_SOURCES
            .iter()
            .find(|known| source.contains(*known))
            .copied()
            .unwrap_or("other")
    }
}

/// GA4 sends `20251205` as a bare number.
fn visit_day(cell: &CellValue, bounds: &DayBounds) -> Option<NaiveDate> {
    match cell {
        CellValue::Number(n) if n.fract() == 0.0 && (10_000_000.0..100_000_000.0).contains(n) => {
            parse_day_str(&format!("{n:.0}")).filter(|day| bounds.contains(*day))
        }
        other => to_canonical_day(other, bounds),
    }
}

/// Reads a page-level export. Rows without a readable day are rejected.
pub fn read_visits(
    rows: &[RawRecord],
    aliases: &BTreeMap<String, Vec<String>>,
    bounds: &DayBounds,
) -> (Vec<LandingVisit>, LandingDiagnostics) {
    let mut table = landing_columns();
    apply_overrides(&mut table, aliases);
    let columns = ColumnMap::resolve(&table, rows);
    let mut diagnostics = LandingDiagnostics {
        rows_in: rows.len(),
        rows_rejected: 0,
        resolved_columns: columns.resolved_headers(),
        missing_columns: columns.missing(&table),
    };

    let text = |row: &RawRecord, name: &str| {
        columns
            .cell(row, name)
            .and_then(CellValue::trimmed_text)
            .unwrap_or_default()
    };
    let number = |row: &RawRecord, name: &str| columns.cell(row, name).map(parse_amount).unwrap_or(0.0).max(0.0);

    let mut visits = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(day) = columns.cell(row, field::DATE).and_then(|cell| visit_day(cell, bounds)) else {
            diagnostics.rows_rejected += 1;
            continue;
        };
        visits.push(LandingVisit {
            day,
            landing_page: text(row, col::PAGE),
            source_medium: text(row, col::SOURCE_MEDIUM),
            device: text(row, col::DEVICE),
            sessions: number(row, col::SESSIONS),
            users: number(row, col::USERS),
            bounce_rate: bounce_percent(number(row, col::BOUNCE_RATE)),
            engagement_seconds: engagement_seconds(number(row, col::ENGAGEMENT)),
            conversions: number(row, col::CONVERSIONS),
        });
    }
    debug!(
        rows = diagnostics.rows_in,
        rejected = diagnostics.rows_rejected,
        "landing page export read"
    );
    (visits, diagnostics)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageStats {
    pub landing_page: String,
    pub sessions: f64,
    pub users: f64,
    pub conversions: f64,
    /// Percent of sessions that converted, capped at 100.
    pub conversion_rate: f64,
    /// Session weighted.
    pub bounce_rate: f64,
    /// Session weighted.
    pub engagement_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelStats {
    pub name: String,
    pub sessions: f64,
    pub conversions: f64,
    pub conversion_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LandingTotals {
    pub sessions: f64,
    pub users: f64,
    pub conversions: f64,
    pub conversion_rate: f64,
    pub bounce_rate: f64,
    pub engagement_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LandingReport {
    pub totals: LandingTotals,
    pub pages: Vec<PageStats>,
    pub top_performers: Vec<PageStats>,
    pub leaky_buckets: Vec<PageStats>,
    pub by_source: Vec<ChannelStats>,
    pub by_device: Vec<ChannelStats>,
}

fn percent(part: f64, whole: f64) -> f64 {
    (safe_ratio(part, whole) * 100.0).min(100.0)
}

#[derive(Default)]
struct Accumulator {
    sessions: f64,
    users: f64,
    conversions: f64,
    bounce_weighted: f64,
    engagement_weighted: f64,
}

impl Accumulator {
    fn add(&mut self, visit: &LandingVisit) {
        self.sessions += visit.sessions;
        self.users += visit.users;
        self.conversions += visit.conversions;
        self.bounce_weighted += visit.bounce_rate * visit.sessions;
        self.engagement_weighted += visit.engagement_seconds * visit.sessions;
    }

    fn into_page(self, landing_page: String) -> PageStats {
        PageStats {
            landing_page,
            sessions: self.sessions,
            users: self.users,
            conversions: self.conversions,
            conversion_rate: percent(self.conversions, self.sessions),
            bounce_rate: safe_ratio(self.bounce_weighted, self.sessions),
            engagement_seconds: safe_ratio(self.engagement_weighted, self.sessions),
        }
    }
}

fn by_sessions_then_name(a: (f64, &str), b: (f64, &str)) -> Ordering {
    b.0.partial_cmp(&a.0)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.1.cmp(b.1))
}

/// Sums visits per relevant page, busiest first.
pub fn aggregate_by_landing_page(visits: &[LandingVisit]) -> Vec<PageStats> {
    let mut pages: BTreeMap<&str, Accumulator> = BTreeMap::new();
    for visit in visits.iter().filter(|v| is_relevant_page(&v.landing_page)) {
        pages.entry(visit.landing_page.as_str()).or_default().add(visit);
    }
    let mut stats: Vec<PageStats> = pages
        .into_iter()
        .map(|(page, acc)| acc.into_page(page.to_string()))
        .collect();
    stats.sort_by(|a, b| by_sessions_then_name((a.sessions, &a.landing_page), (b.sessions, &b.landing_page)));
    stats
}

/// Best converting pages with enough traffic to trust the rate.
pub fn top_performers(pages: &[PageStats], limit: usize) -> Vec<PageStats> {
    let mut ranked: Vec<PageStats> = pages
        .iter()
        .filter(|p| p.sessions >= MIN_RANKED_SESSIONS)
        .cloned()
        .collect();
    ranked.sort_by(|a, b| {
        b.conversion_rate
            .partial_cmp(&a.conversion_rate)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.landing_page.cmp(&b.landing_page))
    });
    ranked.truncate(limit);
    ranked
}

/// Busy pages converting under [`LEAKY_RATE_PCT`], busiest first.
pub fn leaky_buckets(pages: &[PageStats], limit: usize) -> Vec<PageStats> {
    let mut leaky: Vec<PageStats> = pages
        .iter()
        .filter(|p| p.sessions >= MIN_RANKED_SESSIONS && p.conversion_rate < LEAKY_RATE_PCT)
        .cloned()
        .collect();
    leaky.sort_by(|a, b| by_sessions_then_name((a.sessions, &a.landing_page), (b.sessions, &b.landing_page)));
    leaky.truncate(limit);
    leaky
}

fn channel_stats<'a, F>(visits: &'a [LandingVisit], key: F) -> Vec<ChannelStats>
where
    F: Fn(&'a LandingVisit) -> &'a str,
{
    let mut groups: BTreeMap<&str, (f64, f64)> = BTreeMap::new();
    for visit in visits {
        let entry = groups.entry(key(visit)).or_default();
        entry.0 += visit.sessions;
        entry.1 += visit.conversions;
    }
    let mut stats: Vec<ChannelStats> = groups
        .into_iter()
        .map(|(name, (sessions, conversions))| ChannelStats {
            name: name.to_string(),
            sessions,
            conversions,
            conversion_rate: percent(conversions, sessions),
        })
        .collect();
    stats.sort_by(|a, b| by_sessions_then_name((a.sessions, &a.name), (b.sessions, &b.name)));
    stats
}

/// Sessions and conversions per source bucket, top [`SOURCE_BUCKETS`].
pub fn aggregate_by_source(visits: &[LandingVisit]) -> Vec<ChannelStats> {
    let mut stats = channel_stats(visits, |v| source_bucket(&v.source_medium));
    stats.truncate(SOURCE_BUCKETS);
    stats
}

pub fn aggregate_by_device(visits: &[LandingVisit]) -> Vec<ChannelStats> {
    channel_stats(visits, |v| if v.device.is_empty() { "unknown" } else { v.device.as_str() })
}

pub fn landing_totals(visits: &[LandingVisit]) -> LandingTotals {
    let mut acc = Accumulator::default();
    for visit in visits {
        acc.add(visit);
    }
    let page = acc.into_page(String::new());
    LandingTotals {
        sessions: page.sessions,
        users: page.users,
        conversions: page.conversions,
        conversion_rate: page.conversion_rate,
        bounce_rate: page.bounce_rate,
        engagement_seconds: page.engagement_seconds,
    }
}

/// Full report for the visits inside `window`.
pub fn landing_report(visits: &[LandingVisit], window: &FunnelWindow, limit: usize) -> LandingReport {
    let in_window: Vec<LandingVisit> = visits.iter().filter(|v| window.contains(v.day)).cloned().collect();
    let pages = aggregate_by_landing_page(&in_window);
    LandingReport {
        totals: landing_totals(&in_window),
        top_performers: top_performers(&pages, limit),
        leaky_buckets: leaky_buckets(&pages, limit),
        by_source: aggregate_by_source(&in_window),
        by_device: aggregate_by_device(&in_window),
        pages,
    }
}
