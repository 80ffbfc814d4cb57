/// Public survey read endpoints
use crate::{context::AppContext, error::{ApiError, ApiResult}, survey::Survey};
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/surveys/active", get(active_survey))
        .route("/api/surveys/:id", get(survey_by_id))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActiveQuery {
    /// Grouping tag echoed by the client into submissions and contacts;
    /// accepted here so the intake link can carry it, but not needed to
    /// resolve the survey.
    #[allow(dead_code)]
    event_slug: Option<String>,
}

async fn active_survey(
    State(ctx): State<AppContext>,
    Query(_query): Query<ActiveQuery>,
) -> ApiResult<Json<Survey>> {
    let survey = ctx
        .surveys
        .find_active()
        .await?
        .ok_or_else(|| ApiError::NotFound("No active survey".to_string()))?;

    Ok(Json(survey))
}

/// Fetch one survey tree. Inactive surveys are not visible publicly; admins
/// read them through the admin routes.
async fn survey_by_id(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<Survey>> {
    let survey = ctx
        .surveys
        .load_tree(&id)
        .await?
        .filter(|s| s.is_active)
        .ok_or_else(|| ApiError::NotFound("Survey not found".to_string()))?;

    Ok(Json(survey))
}
