use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use axum::{extract::State, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use adrecon_core::landing::{landing_report, read_visits};
use adrecon_core::record::RawRecord;
use adrecon_core::window::WindowSpec;

use super::reconcile::payload_rows;
use crate::{error::AppError, state::AppState};

const DEFAULT_LIMIT: usize = 5;
const MAX_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct LandingBody {
    #[serde(default)]
    pub window: WindowSpec,
    #[serde(default)]
    pub rows: Vec<RawRecord>,
    #[serde(default)]
    pub csv: Option<String>,
    #[serde(default)]
    pub aliases: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// `POST /api/landing-pages`: page level report from a web analytics export.
pub async fn landing_pages(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LandingBody>,
) -> Result<impl IntoResponse, AppError> {
    let window = body.window.resolve(state.config.today())?;
    let limit = body.limit.unwrap_or(DEFAULT_LIMIT);
    if limit == 0 || limit > MAX_LIMIT {
        return Err(AppError::BadRequest(format!("limit must be between 1 and {MAX_LIMIT}")));
    }
    let rows = payload_rows("landing_pages", body.rows, body.csv, state.config.max_source_rows)?;
    let bounds = state.day_bounds();
    let aliases = body.aliases;

    let (report, diagnostics) = tokio::task::spawn_blocking(move || {
        let (visits, diagnostics) = read_visits(&rows, &aliases, &bounds);
        (landing_report(&visits, &window, limit), diagnostics)
    })
    .await
    .context("landing page task failed")?;

    Ok(Json(json!({
        "data": {
            "window": window,
            "report": report,
            "source": diagnostics,
        }
    })))
}
