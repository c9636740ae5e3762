use axum::{response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use adrecon_core::negative::{audit, suggest_negatives, NegativeTerm, SearchTermStats, SuggestionThresholds};

use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct EvaluateBody {
    pub negatives: Vec<NegativeTerm>,
    pub queries: Vec<String>,
}

/// `POST /api/negatives/evaluate`: which queries the negative list blocks.
pub async fn evaluate(Json(body): Json<EvaluateBody>) -> Result<impl IntoResponse, AppError> {
    let audits = audit(&body.negatives, &body.queries);
    let blocked = audits.iter().filter(|a| a.blocked).count();
    Ok(Json(json!({
        "data": {
            "queries": audits,
            "blocked": blocked,
            "total": body.queries.len(),
        }
    })))
}

#[derive(Debug, Deserialize)]
pub struct SuggestBody {
    pub terms: Vec<SearchTermStats>,
    #[serde(default)]
    pub negatives: Vec<NegativeTerm>,
    #[serde(default)]
    pub thresholds: Option<SuggestionThresholds>,
}

/// `POST /api/negatives/suggest`: wasteful search terms worth negating.
pub async fn suggest(Json(body): Json<SuggestBody>) -> Result<impl IntoResponse, AppError> {
    let thresholds = body.thresholds.unwrap_or_default();
    if thresholds.min_clicks < 0.0 || thresholds.min_cost < 0.0 || thresholds.max_conversions < 0.0 {
        return Err(AppError::BadRequest(
            "thresholds must be non-negative".to_string(),
        ));
    }
    let suggestions = suggest_negatives(&body.terms, &body.negatives, &thresholds);
    Ok(Json(json!({ "data": suggestions })))
}
