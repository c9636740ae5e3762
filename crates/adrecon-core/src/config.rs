use chrono::{NaiveDate, Utc, Weekday};
pub use chrono_tz::Tz;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub cors_origins: Vec<String>,
    /// Account timezone used to decide what "today" is for window presets.
    pub timezone: Tz,
    pub attribution_rules_path: Option<String>,
    pub max_source_rows: usize,
    pub engine: EngineConfig,
}

/// Tunables consumed by the reconciliation engine itself.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Parsed dates further than this many days from today are rejected.
    pub sanity_window_days: i64,
    /// Relative changes below this percentage are reported as no signal.
    pub noise_threshold_pct: f64,
    pub week_start: Weekday,
    /// Windows up to this many days trend by day, longer ones by week.
    pub daily_bucket_max_days: i64,
    pub qualified_score_threshold: f64,
    pub paid_channels: PaidChannels,
}

/// utm values that mark a CRM lead as paid. Matching is exact after
/// trimming and lowercasing.
#[derive(Debug, Clone, PartialEq)]
pub struct PaidChannels {
    pub sources: Vec<String>,
    pub mediums: Vec<String>,
}

impl Default for PaidChannels {
    fn default() -> Self {
        let owned = |values: &[&str]| -> Vec<String> { values.iter().map(|v| v.to_string()).collect() };
        Self {
            sources: owned(&["google", "facebook", "meta", "cpc", "paid", "adwords", "fb"]),
            mediums: owned(&["cpc", "paid", "social", "display"]),
        }
    }
}

impl PaidChannels {
    pub fn is_paid(&self, utm_source: Option<&str>, utm_medium: Option<&str>) -> bool {
        let hit = |value: Option<&str>, list: &[String]| {
            value
                .map(|v| v.trim().to_lowercase())
                .is_some_and(|v| !v.is_empty() && list.iter().any(|item| *item == v))
        };
        hit(utm_source, &self.sources) || hit(utm_medium, &self.mediums)
    }
}

/// Comma separated list, lowercased. Blank input keeps `fallback`.
pub fn parse_channel_list(raw: &str, fallback: &[String]) -> Vec<String> {
    let parsed: Vec<String> = raw
        .split(',')
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .collect();
    if parsed.is_empty() {
        fallback.to_vec()
    } else {
        parsed
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sanity_window_days: 400,
            noise_threshold_pct: 1.0,
            week_start: Weekday::Mon,
            daily_bucket_max_days: 7,
            qualified_score_threshold: 50.0,
            paid_channels: PaidChannels::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let defaults = EngineConfig::default();
        Ok(Self {
            port: std::env::var("ADRECON_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|e| format!("invalid port: {e}"))?,
            cors_origins: std::env::var("ADRECON_CORS_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            timezone: std::env::var("ADRECON_TIMEZONE")
                .unwrap_or_else(|_| "UTC".to_string())
                .parse()
                .map_err(|e| format!("invalid timezone: {e}"))?,
            attribution_rules_path: std::env::var("ADRECON_ATTRIBUTION_RULES")
                .ok()
                .filter(|p| !p.trim().is_empty()),
            max_source_rows: std::env::var("ADRECON_MAX_SOURCE_ROWS")
                .unwrap_or_else(|_| "200000".to_string())
                .parse()
                .unwrap_or(200_000),
            engine: EngineConfig {
                sanity_window_days: std::env::var("ADRECON_SANITY_WINDOW_DAYS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.sanity_window_days),
                noise_threshold_pct: std::env::var("ADRECON_NOISE_THRESHOLD_PCT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .filter(|v: &f64| v.is_finite() && *v >= 0.0)
                    .unwrap_or(defaults.noise_threshold_pct),
                week_start: match std::env::var("ADRECON_WEEK_START") {
                    Ok(raw) => parse_week_start(&raw)?,
                    Err(_) => defaults.week_start,
                },
                daily_bucket_max_days: std::env::var("ADRECON_DAILY_BUCKET_MAX_DAYS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.daily_bucket_max_days),
                qualified_score_threshold: defaults.qualified_score_threshold,
                paid_channels: PaidChannels {
                    sources: std::env::var("ADRECON_PAID_SOURCES")
                        .map(|v| parse_channel_list(&v, &defaults.paid_channels.sources))
                        .unwrap_or_else(|_| defaults.paid_channels.sources.clone()),
                    mediums: std::env::var("ADRECON_PAID_MEDIUMS")
                        .map(|v| parse_channel_list(&v, &defaults.paid_channels.mediums))
                        .unwrap_or_else(|_| defaults.paid_channels.mediums.clone()),
                },
            },
        })
    }

    /// Current calendar day in the account timezone.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.timezone).date_naive()
    }
}

pub fn parse_week_start(raw: &str) -> Result<Weekday, String> {
    raw.trim()
        .parse::<Weekday>()
        .map_err(|_| format!("invalid week start: {}", raw.trim()))
}
