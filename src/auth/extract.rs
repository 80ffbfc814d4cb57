/// Request authentication extractors
///
/// Resolution order: session cookie first, then bearer token. A request
/// carrying both is treated as session-authenticated, so the CSRF guard
/// applies to it.
use crate::{
    auth::SESSION_COOKIE,
    context::AppContext,
    error::{ApiError, ApiResult},
};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use axum_extra::extract::cookie::CookieJar;

/// How the request proved its identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    /// Server-side session via cookie; CSRF guard applies
    Session { session_id: String },
    /// Stateless bearer access token
    Bearer,
}

/// Authenticated admin identity attached to a request
#[derive(Debug, Clone)]
pub struct Principal {
    pub admin_id: String,
    pub email: String,
    pub mode: AuthMode,
}

/// Resolve a request to a principal, or `None` when no usable credential is
/// present. Expired or invalid credentials resolve to `None` rather than an
/// error so optional-auth routes can degrade gracefully.
pub async fn resolve_principal(
    ctx: &AppContext,
    headers: &HeaderMap,
) -> ApiResult<Option<Principal>> {
    let jar = CookieJar::from_headers(headers);

    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if let Some(session) = ctx.sessions.validate(cookie.value()).await? {
            if let Some(admin) = ctx.auth.get_admin(&session.admin_id).await? {
                return Ok(Some(Principal {
                    admin_id: admin.id,
                    email: admin.email,
                    mode: AuthMode::Session {
                        session_id: session.id,
                    },
                }));
            }
        }
    }

    if let Some(token) = bearer_token(headers) {
        match ctx.auth.verify_access_token(token) {
            Ok(claims) => {
                return Ok(Some(Principal {
                    admin_id: claims.sub,
                    email: claims.email,
                    mode: AuthMode::Bearer,
                }));
            }
            Err(_) => {
                tracing::debug!("rejected invalid bearer token");
            }
        }
    }

    Ok(None)
}

/// Pull the token out of an `Authorization: Bearer ...` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Extractor requiring authentication; rejects with 401 when absent
pub struct AuthContext {
    pub principal: Principal,
}

#[async_trait]
impl FromRequestParts<AppContext> for AuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        ctx: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        match resolve_principal(ctx, &parts.headers).await? {
            Some(principal) => Ok(AuthContext { principal }),
            None => Err(ApiError::Authentication(
                "No valid credentials".to_string(),
            )),
        }
    }
}

/// Extractor for routes that behave differently when authenticated
pub struct OptionalAuthContext {
    pub principal: Option<Principal>,
}

#[async_trait]
impl FromRequestParts<AppContext> for OptionalAuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        ctx: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let principal = resolve_principal(ctx, &parts.headers).await?;
        Ok(OptionalAuthContext { principal })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc.def.ghi"),
        );
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Basic dXNlcjpwYXNz"),
        );
        assert_eq!(bearer_token(&headers), None);
    }
}
