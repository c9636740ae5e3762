use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;

use adrecon_core::amount::parse_amount;
use adrecon_core::date::parse_day;
use adrecon_core::record::CellValue;

use crate::{error::AppError, state::AppState};

const MAX_VALUES: usize = 10_000;

#[derive(Debug, Deserialize)]
pub struct NormalizeBody {
    #[serde(default)]
    pub amounts: Vec<CellValue>,
    #[serde(default)]
    pub dates: Vec<CellValue>,
}

#[derive(Debug, Serialize)]
struct NormalizedAmount {
    input: CellValue,
    value: f64,
}

#[derive(Debug, Serialize)]
struct NormalizedDate {
    input: CellValue,
    day: Option<NaiveDate>,
    /// False when the value parsed but falls outside the plausible range.
    in_range: bool,
}

/// `POST /api/normalize`: preview how raw amount and date cells are read.
pub async fn normalize(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NormalizeBody>,
) -> Result<impl IntoResponse, AppError> {
    if body.amounts.len() + body.dates.len() > MAX_VALUES {
        return Err(AppError::BadRequest(format!(
            "at most {MAX_VALUES} values per request"
        )));
    }
    let bounds = state.day_bounds();
    let amounts: Vec<NormalizedAmount> = body
        .amounts
        .into_iter()
        .map(|input| NormalizedAmount {
            value: parse_amount(&input),
            input,
        })
        .collect();
    let dates: Vec<NormalizedDate> = body
        .dates
        .into_iter()
        .map(|input| {
            let day = parse_day(&input);
            NormalizedDate {
                in_range: day.is_some_and(|d| bounds.contains(d)),
                day,
                input,
            }
        })
        .collect();

    Ok(Json(json!({
        "data": {
            "amounts": amounts,
            "dates": dates,
        }
    })))
}
