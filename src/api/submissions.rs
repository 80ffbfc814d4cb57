/// Public submission endpoints: open, answer, complete
use crate::{
    context::AppContext,
    error::{ApiError, ApiResult},
    submission::{AnswerInput, Submission},
    survey::{branch_directive, NextStep},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/submissions", post(create_submission))
        .route("/api/submissions/:id/answers", post(submit_answers))
        .route("/api/submissions/:id/complete", post(complete_submission))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSubmissionRequest {
    survey_id: String,
    event_slug: String,
}

async fn create_submission(
    State(ctx): State<AppContext>,
    Json(body): Json<CreateSubmissionRequest>,
) -> ApiResult<(StatusCode, Json<Submission>)> {
    let submission = ctx
        .submissions
        .create(&body.survey_id, &body.event_slug)
        .await?;

    tracing::debug!(submission_id = %submission.id, survey_id = %body.survey_id, "submission opened");

    Ok((StatusCode::CREATED, Json(submission)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitAnswersRequest {
    answers: Vec<AnswerInput>,
    /// When set, the response includes the flow directive for this section,
    /// evaluated against everything answered so far.
    #[serde(default)]
    current_section_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitAnswersResponse {
    saved: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    next: Option<FlowStep>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "step")]
enum FlowStep {
    Advance,
    JumpToSection { section_id: String },
    End,
}

async fn submit_answers(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Json(body): Json<SubmitAnswersRequest>,
) -> ApiResult<Json<SubmitAnswersResponse>> {
    ctx.submissions.submit_answers(&id, &body.answers).await?;

    let next = match body.current_section_id {
        Some(section_id) => Some(evaluate_flow(&ctx, &id, &section_id).await?),
        None => None,
    };

    Ok(Json(SubmitAnswersResponse {
        saved: body.answers.len(),
        next,
    }))
}

/// Where the flow goes after the named section, given all stored answers
async fn evaluate_flow(
    ctx: &AppContext,
    submission_id: &str,
    section_id: &str,
) -> ApiResult<FlowStep> {
    let submission = ctx
        .submissions
        .find(submission_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Submission not found".to_string()))?;

    let survey = ctx
        .surveys
        .load_tree(&submission.survey_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Survey not found".to_string()))?;

    let current_index = survey
        .section_index(section_id)
        .ok_or_else(|| ApiError::Validation("Unknown section".to_string()))?;

    let answers: HashMap<String, AnswerInput> = ctx
        .submissions
        .answers_for_survey(&survey.id)
        .await?
        .into_iter()
        .filter(|a| a.submission_id == submission_id)
        .map(|a| {
            (
                a.question_id.clone(),
                AnswerInput {
                    question_id: a.question_id,
                    choice_values: a.choice_values,
                    text_value: a.text_value,
                    number_value: a.number_value,
                },
            )
        })
        .collect();

    Ok(match branch_directive(&survey, current_index, &answers) {
        NextStep::Advance => FlowStep::Advance,
        NextStep::JumpToSection(section_id) => FlowStep::JumpToSection { section_id },
        NextStep::End => FlowStep::End,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompleteResponse {
    next_route: String,
    submission: Submission,
}

async fn complete_submission(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<CompleteResponse>> {
    let submission = ctx.submissions.complete(&id).await?;

    tracing::debug!(submission_id = %submission.id, "submission completed");

    Ok(Json(CompleteResponse {
        next_route: "/thanks".to_string(),
        submission,
    }))
}
