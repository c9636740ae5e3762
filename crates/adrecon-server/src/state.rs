use std::sync::Arc;

use adrecon_core::config::Config;
use adrecon_core::date::DayBounds;
use adrecon_core::rules::RuleSet;

/// Shared application state injected into every Axum handler via
/// [`axum::extract::State`].
pub struct AppState {
    /// Parsed configuration, loaded once at startup from environment variables.
    pub config: Arc<Config>,

    /// Account attribution rules. Loaded from `ADRECON_ATTRIBUTION_RULES`
    /// when set, otherwise the built-in rules.
    pub rules: Arc<RuleSet>,
}

impl AppState {
    pub fn new(config: Config, rules: RuleSet) -> Self {
        Self {
            config: Arc::new(config),
            rules: Arc::new(rules),
        }
    }

    /// Plausible calendar range for parsed dates, centred on today in the
    /// account timezone.
    pub fn day_bounds(&self) -> DayBounds {
        DayBounds::around(self.config.today(), self.config.engine.sanity_window_days)
    }
}
