/// Request middleware: CSRF protection for session-authenticated writes
use crate::{
    auth::{bearer_token, ClientMeta, CSRF_HEADER, SESSION_COOKIE},
    context::AppContext,
    error::ApiError,
};
use axum::{
    extract::{Request, State},
    http::{HeaderMap, Method},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;

/// Client metadata recorded with refresh tokens and audit entries
pub fn client_meta_from_headers(headers: &HeaderMap) -> ClientMeta {
    ClientMeta {
        user_agent: headers
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string()),
        ip: headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|s| s.trim().to_string()),
    }
}

/// CSRF guard for state-changing requests
///
/// Safe methods always pass. For the rest, a session-cookie request must
/// present the session's CSRF token in the x-csrf-token header; a session
/// that never fetched its token, a missing header, and a mismatched header
/// are each rejected. Bearer-token requests pass (the token cannot be sent
/// cross-site by a browser), and requests with neither credential are
/// rejected as unauthenticated.
pub async fn csrf_guard(
    State(ctx): State<AppContext>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let method = request.method();
    if method == Method::GET || method == Method::HEAD || method == Method::OPTIONS {
        return Ok(next.run(request).await);
    }

    let jar = CookieJar::from_headers(request.headers());
    let session = match jar.get(SESSION_COOKIE) {
        Some(cookie) => ctx.sessions.validate(cookie.value()).await?,
        None => None,
    };

    if let Some(session) = session {
        let Some(expected) = session.csrf_token else {
            tracing::warn!(session_id = %session.id, "write without a minted CSRF token");
            return Err(ApiError::Authorization(
                "CSRF token has not been issued for this session".to_string(),
            ));
        };

        let presented = request
            .headers()
            .get(CSRF_HEADER)
            .and_then(|v| v.to_str().ok());

        match presented {
            None => {
                return Err(ApiError::Authorization(
                    "Missing CSRF token header".to_string(),
                ))
            }
            Some(token) if token != expected => {
                tracing::warn!(session_id = %session.id, "CSRF token mismatch");
                return Err(ApiError::Authorization("CSRF token mismatch".to_string()));
            }
            Some(_) => return Ok(next.run(request).await),
        }
    }

    if bearer_token(request.headers()).is_some() {
        return Ok(next.run(request).await);
    }

    Err(ApiError::Authentication(
        "No valid credentials".to_string(),
    ))
}
