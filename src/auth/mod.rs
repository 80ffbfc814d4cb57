/// Authentication subsystem
///
/// Dual-mode credentials: short-lived signed access tokens plus single-use
/// refresh tokens for the stateless path, and server-side sessions with
/// CSRF tokens for the cookie path.
mod extract;
mod manager;
mod session;

pub use extract::{bearer_token, AuthContext, AuthMode, OptionalAuthContext, Principal};
pub use manager::{AuthManager, RotatedSession, SessionTokens, TokenClaims};
pub use session::{SessionRecord, SessionStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cookie carrying the server-side session id
pub const SESSION_COOKIE: &str = "sid";
/// Cookie carrying the raw refresh token, path-scoped to the auth routes
pub const REFRESH_COOKIE: &str = "refresh_token";
/// Header carrying the CSRF token for session-authenticated unsafe requests
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Password-free projection of an admin account
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminSafe {
    pub id: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

/// Client metadata recorded alongside refresh tokens for audit
#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

/// Login request
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Login / refresh / setup response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub access_token: String,
    pub user: AdminSafe,
}
