/// Authentication endpoints: login, logout, refresh, setup, identity
use crate::{
    api::middleware::client_meta_from_headers,
    auth::{
        AuthMode, LoginRequest, OptionalAuthContext, SessionResponse, REFRESH_COOKIE,
        SESSION_COOKIE,
    },
    context::AppContext,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Serialize;

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/setup", post(setup))
        .route("/api/auth/me", get(me))
        .route("/api/auth/setup-status", get(setup_status))
        .route("/api/auth/csrf-token", get(csrf_token))
}

/// Refresh cookie: httpOnly and path-scoped so scripts and unrelated routes
/// never see the raw token.
fn refresh_cookie(ctx: &AppContext, value: String) -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE, value))
        .path("/api/auth")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(ctx.config.service.production)
        .max_age(time::Duration::days(ctx.config.auth.refresh_token_ttl_days))
        .build()
}

fn session_cookie(ctx: &AppContext, value: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(ctx.config.service.production)
        .max_age(time::Duration::hours(ctx.config.auth.session_ttl_hours))
        .build()
}

fn removal_cookie(name: &'static str, path: &'static str) -> Cookie<'static> {
    Cookie::build((name, ""))
        .path(path)
        .http_only(true)
        .max_age(time::Duration::ZERO)
        .build()
}

/// Establish both credentials: a token pair for API clients and a
/// server-side session for the browser.
async fn establish(
    ctx: &AppContext,
    jar: CookieJar,
    admin: crate::auth::AdminSafe,
    headers: &HeaderMap,
) -> ApiResult<(CookieJar, Json<SessionResponse>)> {
    let meta = client_meta_from_headers(headers);

    ctx.auth.record_login(&admin.id, &meta).await?;
    let tokens = ctx.auth.issue_session(&admin.id, &admin.email, &meta).await?;
    let session = ctx.sessions.create(&admin.id).await?;

    let jar = jar
        .add(refresh_cookie(ctx, tokens.refresh_token))
        .add(session_cookie(ctx, session.id));

    Ok((
        jar,
        Json(SessionResponse {
            access_token: tokens.access_token,
            user: admin,
        }),
    ))
}

async fn login(
    State(ctx): State<AppContext>,
    jar: CookieJar,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> ApiResult<(CookieJar, Json<SessionResponse>)> {
    let admin = ctx
        .auth
        .authenticate(&body.email, &body.password)
        .await?
        .ok_or_else(|| ApiError::Authentication("Invalid credentials".to_string()))?;

    tracing::info!(admin_id = %admin.id, "admin logged in");

    establish(&ctx, jar, admin, &headers).await
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LogoutResponse {
    logged_out: bool,
}

/// Tear down whatever credentials the request carries. Succeeds even when
/// nothing is there to revoke, so a confused client can always reach a clean
/// state.
async fn logout(
    State(ctx): State<AppContext>,
    jar: CookieJar,
) -> ApiResult<(CookieJar, Json<LogoutResponse>)> {
    if let Some(cookie) = jar.get(REFRESH_COOKIE) {
        ctx.auth.revoke_refresh_token(cookie.value()).await?;
    }
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        ctx.sessions.destroy(cookie.value()).await?;
    }

    let jar = jar
        .add(removal_cookie(REFRESH_COOKIE, "/api/auth"))
        .add(removal_cookie(SESSION_COOKIE, "/"));

    Ok((jar, Json(LogoutResponse { logged_out: true })))
}

/// Rotate the refresh token from its cookie
///
/// Any failure clears the cookie and reads as a generic authentication
/// failure; the client's only recourse is a fresh login.
async fn refresh(
    State(ctx): State<AppContext>,
    jar: CookieJar,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let Some(cookie) = jar.get(REFRESH_COOKIE) else {
        return Err(ApiError::Authentication(
            "Missing refresh token".to_string(),
        ));
    };
    let raw = cookie.value().to_string();

    let meta = client_meta_from_headers(&headers);
    match ctx.auth.rotate_refresh_token(&raw, &meta).await? {
        Some(rotated) => {
            let jar = jar.add(refresh_cookie(&ctx, rotated.tokens.refresh_token));
            Ok((
                jar,
                Json(SessionResponse {
                    access_token: rotated.tokens.access_token,
                    user: rotated.admin,
                }),
            )
                .into_response())
        }
        None => {
            // Clearing the dead cookie alongside the 401 stops the client
            // from retrying a token that can never work again.
            let jar = jar.add(removal_cookie(REFRESH_COOKIE, "/api/auth"));
            let error =
                ApiError::Authentication("Refresh token is no longer valid".to_string());
            Ok((jar, error).into_response())
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MeResponse {
    authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<crate::auth::AdminSafe>,
}

async fn me(
    State(ctx): State<AppContext>,
    auth: OptionalAuthContext,
) -> ApiResult<Json<MeResponse>> {
    match auth.principal {
        Some(principal) => {
            let user = ctx.auth.get_admin(&principal.admin_id).await?;
            Ok(Json(MeResponse {
                authenticated: user.is_some(),
                user,
            }))
        }
        None => Ok(Json(MeResponse {
            authenticated: false,
            user: None,
        })),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SetupStatusResponse {
    needs_setup: bool,
}

async fn setup_status(State(ctx): State<AppContext>) -> ApiResult<Json<SetupStatusResponse>> {
    let count = ctx.auth.count_admin_users().await?;
    Ok(Json(SetupStatusResponse {
        needs_setup: count == 0,
    }))
}

/// First-run bootstrap: create the initial admin and log them in. Once any
/// admin exists this endpoint is permanently closed.
async fn setup(
    State(ctx): State<AppContext>,
    jar: CookieJar,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> ApiResult<(CookieJar, Json<SessionResponse>)> {
    if ctx.auth.count_admin_users().await? > 0 {
        return Err(ApiError::Conflict(
            "Setup has already been completed".to_string(),
        ));
    }

    let admin = ctx
        .auth
        .create_admin_account(&body.email, &body.password, "setup")
        .await?;

    tracing::info!(admin_id = %admin.id, "initial admin created");

    establish(&ctx, jar, admin, &headers).await
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CsrfTokenResponse {
    csrf_token: Option<String>,
    /// False for bearer-only clients, which the CSRF guard does not apply to
    applicable: bool,
}

async fn csrf_token(
    State(ctx): State<AppContext>,
    auth: crate::auth::AuthContext,
) -> ApiResult<Json<CsrfTokenResponse>> {
    match &auth.principal.mode {
        AuthMode::Session { session_id } => {
            let token = ctx.sessions.csrf_token(session_id).await?.ok_or_else(|| {
                ApiError::Authentication("Session expired".to_string())
            })?;
            Ok(Json(CsrfTokenResponse {
                csrf_token: Some(token),
                applicable: true,
            }))
        }
        AuthMode::Bearer => Ok(Json(CsrfTokenResponse {
            csrf_token: None,
            applicable: false,
        })),
    }
}
