/// HTTP API surface
///
/// Public intake routes, authentication routes, and the admin surface. The
/// CSRF guard wraps the admin routes; public routes never carry credentials
/// and the auth routes manage them explicitly.
pub mod admin;
pub mod auth;
pub mod contacts;
pub mod middleware;
pub mod submissions;
pub mod surveys;

use crate::context::AppContext;
use axum::{middleware::from_fn_with_state, Router};

pub fn routes(ctx: &AppContext) -> Router<AppContext> {
    let admin = admin::routes().route_layer(from_fn_with_state(
        ctx.clone(),
        middleware::csrf_guard,
    ));

    Router::new()
        .merge(surveys::routes())
        .merge(submissions::routes())
        .merge(contacts::routes())
        .merge(auth::routes())
        .merge(admin)
}
