use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;

use adrecon_core::attribution::{CampaignAttributor, MatchMethod};
use adrecon_core::matcher::CampaignUniverse;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct MatchBody {
    pub labels: Vec<String>,
    pub campaign_names: Vec<String>,
}

#[derive(Debug, Serialize)]
struct LabelResult<'a> {
    label: &'a str,
    campaign: Option<&'a str>,
    method: Option<MatchMethod>,
}

/// `POST /api/attribution/match`: attribute free-text labels against a
/// campaign list using the generic matcher and the loaded account rules.
pub async fn match_labels(
    State(state): State<Arc<AppState>>,
    Json(body): Json<MatchBody>,
) -> Result<impl IntoResponse, AppError> {
    if body.campaign_names.iter().all(|name| name.trim().is_empty()) {
        return Err(AppError::BadRequest(
            "campaign_names must contain at least one campaign".to_string(),
        ));
    }
    let universe = CampaignUniverse::new(body.campaign_names.iter().map(String::as_str));
    let attributor = CampaignAttributor::new(&universe, &state.rules);

    let results: Vec<LabelResult<'_>> = body
        .labels
        .iter()
        .map(|label| match attributor.attribute_label(label) {
            Some((campaign, method)) => LabelResult {
                label: label.as_str(),
                campaign: Some(campaign),
                method: Some(method),
            },
            None => LabelResult {
                label: label.as_str(),
                campaign: None,
                method: None,
            },
        })
        .collect();
    let report = attributor.attribute(body.labels.iter().map(String::as_str));

    Ok(Json(json!({
        "data": {
            "results": results,
            "report": report,
        }
    })))
}

/// `GET /api/attribution/rules`: the fallback rules in priority order.
pub async fn list_rules(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "data": state.rules.rules() }))
}
