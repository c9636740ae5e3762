use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use axum::{extract::State, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use adrecon_core::aggregate::CacMode;
use adrecon_core::reconcile::{reconcile as reconcile_request, ReconcileRequest};
use adrecon_core::record::{records_from_csv, RawRecord};
use adrecon_core::source::{SourceBatch, SourceKind};
use adrecon_core::window::WindowSpec;

use crate::{error::AppError, state::AppState};

/// One upstream export. Rows arrive either as JSON objects or as CSV text.
#[derive(Debug, Deserialize)]
pub struct SourcePayload {
    pub kind: SourceKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub rows: Vec<RawRecord>,
    #[serde(default)]
    pub csv: Option<String>,
    #[serde(default)]
    pub aliases: BTreeMap<String, Vec<String>>,
}

/// Rows from either JSON objects or CSV text, capped at `max_rows`.
pub(crate) fn payload_rows(
    label: &str,
    rows: Vec<RawRecord>,
    csv: Option<String>,
    max_rows: usize,
) -> Result<Vec<RawRecord>, AppError> {
    let rows = match csv {
        Some(_) if !rows.is_empty() => {
            return Err(AppError::BadRequest(format!(
                "source {label}: provide either rows or csv, not both"
            )))
        }
        Some(text) => records_from_csv(&text)?,
        None => rows,
    };
    if rows.len() > max_rows {
        return Err(AppError::PayloadTooLarge {
            source_name: label.to_string(),
            rows: rows.len(),
            max: max_rows,
        });
    }
    Ok(rows)
}

impl SourcePayload {
    pub(crate) fn into_batch(self, max_rows: usize) -> Result<SourceBatch, AppError> {
        let label = self
            .name
            .clone()
            .unwrap_or_else(|| self.kind.as_str().to_string());
        let rows = payload_rows(&label, self.rows, self.csv, max_rows)?;
        Ok(SourceBatch {
            kind: self.kind,
            name: self.name,
            rows,
            aliases: self.aliases,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ReconcileBody {
    #[serde(default)]
    pub window: WindowSpec,
    #[serde(default)]
    pub cac_mode: CacMode,
    #[serde(default)]
    pub campaign_names: Option<Vec<String>>,
    pub sources: Vec<SourcePayload>,
}

/// `POST /api/reconcile`: reconcile ad, web and CRM exports over a window.
///
/// The whole reconciliation runs on the blocking pool.
#[tracing::instrument(skip_all)]
pub async fn reconcile(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ReconcileBody>,
) -> Result<impl IntoResponse, AppError> {
    let window = body.window.resolve(state.config.today())?;
    let max_rows = state.config.max_source_rows;
    let sources = body
        .sources
        .into_iter()
        .map(|payload| payload.into_batch(max_rows))
        .collect::<Result<Vec<_>, _>>()?;
    info!(sources = sources.len(), days = window.days(), "reconcile requested");

    let request = ReconcileRequest {
        window,
        cac_mode: body.cac_mode,
        campaign_names: body.campaign_names,
        sources,
    };
    let bounds = state.day_bounds();
    let rules = Arc::clone(&state.rules);
    let engine = state.config.engine.clone();
    let view = tokio::task::spawn_blocking(move || reconcile_request(&request, &rules, &engine, &bounds))
        .await
        .context("reconcile task failed")?;
    Ok(Json(json!({ "data": view })))
}
