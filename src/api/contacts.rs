/// Public contact capture endpoint
use crate::{
    contact::{Contact, NewContact},
    context::AppContext,
    error::ApiResult,
};
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};

pub fn routes() -> Router<AppContext> {
    Router::new().route("/api/contacts", post(create_contact))
}

/// The payload is taken as raw JSON so validation can reject unknown and
/// forbidden fields by name instead of silently dropping them.
async fn create_contact(
    State(ctx): State<AppContext>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<(StatusCode, Json<Contact>)> {
    let new = NewContact::from_value(body)?;
    let contact = ctx.contacts.create(new).await?;

    tracing::debug!(event_slug = %contact.event_slug, "contact stored");

    Ok((StatusCode::CREATED, Json(contact)))
}
