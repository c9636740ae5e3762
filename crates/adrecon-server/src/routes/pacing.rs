use std::sync::Arc;

use anyhow::Context;
use axum::{extract::State, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use adrecon_core::dedupe::combine_sources;
use adrecon_core::pacing::{pace_budget, BudgetPlan};
use adrecon_core::reconcile::canonicalize_sources;

use super::reconcile::SourcePayload;
use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct PacingBody {
    pub budgets: Vec<BudgetPlan>,
    pub sources: Vec<SourcePayload>,
}

/// `POST /api/budget/pacing`: spend against budget plans as of today in the
/// account timezone. Only ad platform sources carry spend.
#[tracing::instrument(skip_all)]
pub async fn pacing(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PacingBody>,
) -> Result<impl IntoResponse, AppError> {
    if body.budgets.is_empty() {
        return Err(AppError::BadRequest("at least one budget is required".to_string()));
    }
    if let Some(other) = body.sources.iter().find(|s| !s.kind.is_ad_platform()) {
        return Err(AppError::BadRequest(format!(
            "budget pacing reads ad platform sources only (got {})",
            other.kind.as_str()
        )));
    }
    let max_rows = state.config.max_source_rows;
    let batches = body
        .sources
        .into_iter()
        .map(|payload| payload.into_batch(max_rows))
        .collect::<Result<Vec<_>, _>>()?;
    let bounds = state.day_bounds();
    let today = state.config.today();
    let budgets = body.budgets;

    let pacing = tokio::task::spawn_blocking(move || {
        let outcomes = canonicalize_sources(&batches, &bounds);
        let records = combine_sources(outcomes.iter().flat_map(|o| o.records.iter()));
        budgets
            .iter()
            .map(|plan| pace_budget(plan, &records, today))
            .collect::<Result<Vec<_>, _>>()
    })
    .await
    .context("budget pacing task failed")??;

    Ok(Json(json!({
        "data": {
            "today": today,
            "budgets": pacing,
        }
    })))
}
