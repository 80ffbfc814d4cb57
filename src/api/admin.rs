/// Admin endpoints: survey authoring, metrics, import/export, audit trail
///
/// Every route requires an authenticated admin; session-authenticated writes
/// additionally pass the CSRF guard applied in the router.
use crate::{
    auth::AuthContext,
    context::AppContext,
    error::{ApiError, ApiResult},
    submission::{MetricsOverview, QuestionMetrics},
    survey::{
        BranchPatch, NewOption, NewQuestion, NewSection, NewSurvey, Question, QuestionType,
        Section, Survey, SurveyPatch, SurveySummary,
    },
};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/admin/surveys", get(list_surveys).post(create_survey))
        .route(
            "/api/admin/surveys/:id",
            get(get_survey).patch(update_survey).delete(delete_survey),
        )
        .route("/api/admin/surveys/:id/sections", post(create_section))
        .route("/api/admin/sections/:id", delete(delete_section))
        .route("/api/admin/sections/:id/questions", post(create_question))
        .route("/api/admin/questions/:id", delete(delete_question))
        .route("/api/admin/options/:id/branch", patch(update_branch))
        .route("/api/admin/surveys/import", post(import_survey))
        .route("/api/admin/surveys/:id/submissions", get(list_submissions))
        .route("/api/admin/surveys/:id/metrics", get(survey_metrics))
        .route("/api/admin/questions/:id/metrics", get(question_metrics))
        .route(
            "/api/admin/surveys/:id/export/responses.csv",
            get(export_responses),
        )
        .route("/api/admin/contacts/export.csv", get(export_contacts))
        .route("/api/admin/audit", get(list_audit))
}

async fn list_surveys(
    State(ctx): State<AppContext>,
    _auth: AuthContext,
) -> ApiResult<Json<Vec<SurveySummary>>> {
    Ok(Json(ctx.surveys.list().await?))
}

async fn create_survey(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(body): Json<NewSurvey>,
) -> ApiResult<(StatusCode, Json<Survey>)> {
    let survey = ctx.surveys.create_survey(&body).await?;

    ctx.audit
        .record(
            &auth.principal.admin_id,
            "CREATE_SURVEY",
            Some("survey"),
            Some(&survey.id),
            Some(serde_json::json!({ "title": survey.title })),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(survey)))
}

async fn get_survey(
    State(ctx): State<AppContext>,
    _auth: AuthContext,
    Path(id): Path<String>,
) -> ApiResult<Json<Survey>> {
    let survey = ctx
        .surveys
        .load_tree(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Survey not found".to_string()))?;

    Ok(Json(survey))
}

async fn update_survey(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
    Json(body): Json<SurveyPatch>,
) -> ApiResult<Json<Survey>> {
    let survey = ctx.surveys.update_survey(&id, &body).await?;

    ctx.audit
        .record(
            &auth.principal.admin_id,
            "UPDATE_SURVEY",
            Some("survey"),
            Some(&id),
            None,
        )
        .await?;

    Ok(Json(survey))
}

async fn delete_survey(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    ctx.surveys.delete_survey(&id).await?;

    ctx.audit
        .record(
            &auth.principal.admin_id,
            "DELETE_SURVEY",
            Some("survey"),
            Some(&id),
            None,
        )
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn create_section(
    State(ctx): State<AppContext>,
    _auth: AuthContext,
    Path(survey_id): Path<String>,
    Json(body): Json<NewSection>,
) -> ApiResult<(StatusCode, Json<Section>)> {
    let section = ctx.surveys.create_section(&survey_id, &body).await?;
    Ok((StatusCode::CREATED, Json(section)))
}

async fn delete_section(
    State(ctx): State<AppContext>,
    _auth: AuthContext,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    ctx.surveys.delete_section(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_question(
    State(ctx): State<AppContext>,
    _auth: AuthContext,
    Path(section_id): Path<String>,
    Json(body): Json<NewQuestion>,
) -> ApiResult<(StatusCode, Json<Question>)> {
    let question = ctx.surveys.create_question(&section_id, &body).await?;
    Ok((StatusCode::CREATED, Json(question)))
}

async fn delete_question(
    State(ctx): State<AppContext>,
    _auth: AuthContext,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    ctx.surveys.delete_question(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_branch(
    State(ctx): State<AppContext>,
    _auth: AuthContext,
    Path(option_id): Path<String>,
    Json(body): Json<BranchPatch>,
) -> ApiResult<StatusCode> {
    ctx.surveys.update_branch(&option_id, &body).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_submissions(
    State(ctx): State<AppContext>,
    _auth: AuthContext,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<crate::submission::Submission>>> {
    Ok(Json(ctx.submissions.list_for_survey(&id).await?))
}

async fn survey_metrics(
    State(ctx): State<AppContext>,
    _auth: AuthContext,
    Path(id): Path<String>,
) -> ApiResult<Json<MetricsOverview>> {
    Ok(Json(ctx.submissions.metrics_overview(&id).await?))
}

async fn question_metrics(
    State(ctx): State<AppContext>,
    _auth: AuthContext,
    Path(id): Path<String>,
) -> ApiResult<Json<QuestionMetrics>> {
    Ok(Json(ctx.submissions.question_metrics(&id).await?))
}

/// Importable survey definition, the whole tree in one document
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportSurvey {
    title: String,
    #[serde(default)]
    description: Option<String>,
    sections: Vec<ImportSection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportSection {
    title: String,
    #[serde(default)]
    questions: Vec<ImportQuestion>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportQuestion {
    #[serde(rename = "type")]
    question_type: QuestionType,
    prompt: String,
    #[serde(default)]
    help_text: Option<String>,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    show_if: Option<serde_json::Value>,
    #[serde(default)]
    options: Vec<ImportOption>,
}

/// An option can be a bare label (value derived by slugifying) or an
/// explicit label/value pair.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ImportOption {
    Label(String),
    Full {
        label: String,
        value: String,
    },
}

/// Create a full survey from a JSON document. Orders are assigned from
/// document position and the survey lands inactive so it can be reviewed
/// before going live.
async fn import_survey(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(body): Json<ImportSurvey>,
) -> ApiResult<(StatusCode, Json<Survey>)> {
    let survey = ctx
        .surveys
        .create_survey(&NewSurvey {
            title: body.title.clone(),
            description: body.description.clone(),
            is_active: false,
        })
        .await?;

    for (section_idx, section) in body.sections.iter().enumerate() {
        let created = ctx
            .surveys
            .create_section(
                &survey.id,
                &NewSection {
                    title: section.title.clone(),
                    order: section_idx as i64 + 1,
                },
            )
            .await?;

        for (question_idx, question) in section.questions.iter().enumerate() {
            let options = question
                .options
                .iter()
                .enumerate()
                .map(|(opt_idx, opt)| {
                    let (label, value) = match opt {
                        ImportOption::Label(label) => (label.clone(), slugify(label)),
                        ImportOption::Full { label, value } => (label.clone(), value.clone()),
                    };
                    NewOption {
                        label,
                        value,
                        order: opt_idx as i64 + 1,
                        branch_action: None,
                        target_question_id: None,
                        target_section_id: None,
                        skip_to_end: false,
                    }
                })
                .collect();

            ctx.surveys
                .create_question(
                    &created.id,
                    &NewQuestion {
                        question_type: question.question_type,
                        prompt: question.prompt.clone(),
                        help_text: question.help_text.clone(),
                        required: question.required,
                        order: question_idx as i64 + 1,
                        show_if: question.show_if.clone(),
                        options,
                    },
                )
                .await?;
        }
    }

    ctx.audit
        .record(
            &auth.principal.admin_id,
            "IMPORT_SURVEY",
            Some("survey"),
            Some(&survey.id),
            Some(serde_json::json!({
                "title": body.title,
                "sections": body.sections.len(),
            })),
        )
        .await?;

    let tree = ctx
        .surveys
        .load_tree(&survey.id)
        .await?
        .ok_or_else(|| ApiError::Internal("Imported survey vanished".to_string()))?;

    Ok((StatusCode::CREATED, Json(tree)))
}

fn slugify(label: &str) -> String {
    let mut slug = String::with_capacity(label.len());
    let mut last_dash = true;
    for c in label.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

async fn export_responses(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let answers = ctx.submissions.answers_for_survey(&id).await?;

    let mut csv = String::from("submissionId,questionId,choiceValues,textValue,numberValue,updatedAt\n");
    for answer in &answers {
        let number = answer
            .number_value
            .map(|n| n.to_string())
            .unwrap_or_default();
        csv.push_str(&format!(
            "{},{},{},{},{},{}\n",
            csv_field(&answer.submission_id),
            csv_field(&answer.question_id),
            csv_field(&answer.choice_values.join(";")),
            csv_field(answer.text_value.as_deref().unwrap_or("")),
            csv_field(&number),
            csv_field(&answer.updated_at.to_rfc3339()),
        ));
    }

    ctx.audit
        .record(
            &auth.principal.admin_id,
            "EXPORT_RESPONSES",
            Some("survey"),
            Some(&id),
            Some(serde_json::json!({ "rows": answers.len() })),
        )
        .await?;

    Ok(csv_response(csv, "responses.csv"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContactExportQuery {
    event_slug: String,
}

async fn export_contacts(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Query(query): Query<ContactExportQuery>,
) -> ApiResult<Response> {
    let contacts = ctx.contacts.list_for_event(&query.event_slug).await?;

    let mut csv = String::from("id,eventSlug,name,email,company,role,consent,createdAt\n");
    for contact in &contacts {
        csv.push_str(&format!(
            "{},{},{},{},{},{},{},{}\n",
            csv_field(&contact.id),
            csv_field(&contact.event_slug),
            csv_field(contact.name.as_deref().unwrap_or("")),
            csv_field(contact.email.as_deref().unwrap_or("")),
            csv_field(contact.company.as_deref().unwrap_or("")),
            csv_field(contact.role.as_deref().unwrap_or("")),
            contact.consent,
            csv_field(&contact.created_at.to_rfc3339()),
        ));
    }

    ctx.audit
        .record(
            &auth.principal.admin_id,
            "EXPORT_CONTACTS",
            None,
            None,
            Some(serde_json::json!({
                "eventSlug": query.event_slug,
                "rows": contacts.len(),
            })),
        )
        .await?;

    Ok(csv_response(csv, "contacts.csv"))
}

/// Quote a CSV field when it contains a delimiter, quote, or newline
fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_response(body: String, filename: &str) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct AuditQuery {
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuditListResponse {
    entries: Vec<crate::audit::AuditEntry>,
}

async fn list_audit(
    State(ctx): State<AppContext>,
    _auth: AuthContext,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Json<AuditListResponse>> {
    let limit = query.limit.clamp(1, 500);
    let entries = ctx.audit.list(limit, query.offset.max(0)).await?;

    Ok(Json(AuditListResponse { entries }))
}
