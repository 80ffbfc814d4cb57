/// Server-side session store backing the cookie auth path
///
/// Sessions are random opaque ids with an absolute expiry. Each session may
/// lazily acquire a CSRF token; once minted, the token is stable for the
/// session's lifetime so concurrent tabs agree on it.
use crate::error::ApiResult;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sqlx::{Row, SqlitePool};

/// A validated server-side session
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: String,
    pub admin_id: String,
    pub csrf_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

pub struct SessionStore {
    db: SqlitePool,
    ttl_hours: i64,
}

impl SessionStore {
    pub fn new(db: SqlitePool, ttl_hours: i64) -> Self {
        Self { db, ttl_hours }
    }

    /// Create a session for an admin; returns the opaque session id
    pub async fn create(&self, admin_id: &str) -> ApiResult<SessionRecord> {
        let id = random_token();
        let now = Utc::now();
        let expires_at = now + Duration::hours(self.ttl_hours);

        sqlx::query(
            "INSERT INTO session (id, admin_id, csrf_token, expires_at, created_at)
             VALUES (?1, ?2, NULL, ?3, ?4)",
        )
        .bind(&id)
        .bind(admin_id)
        .bind(expires_at)
        .bind(now)
        .execute(&self.db)
        .await?;

        Ok(SessionRecord {
            id,
            admin_id: admin_id.to_string(),
            csrf_token: None,
            expires_at,
        })
    }

    /// Look up a session by id; expired sessions are deleted and treated as
    /// absent.
    pub async fn validate(&self, session_id: &str) -> ApiResult<Option<SessionRecord>> {
        let row = sqlx::query(
            "SELECT id, admin_id, csrf_token, expires_at FROM session WHERE id = ?1",
        )
        .bind(session_id)
        .fetch_optional(&self.db)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let expires_at: DateTime<Utc> = row.get("expires_at");
        if expires_at <= Utc::now() {
            sqlx::query("DELETE FROM session WHERE id = ?1")
                .bind(session_id)
                .execute(&self.db)
                .await?;
            return Ok(None);
        }

        Ok(Some(SessionRecord {
            id: row.get("id"),
            admin_id: row.get("admin_id"),
            csrf_token: row.get("csrf_token"),
            expires_at,
        }))
    }

    /// Delete a session. Destroying an absent session is not an error.
    pub async fn destroy(&self, session_id: &str) -> ApiResult<()> {
        sqlx::query("DELETE FROM session WHERE id = ?1")
            .bind(session_id)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    /// Return the session's CSRF token, minting one on first request
    ///
    /// The mint uses a guarded UPDATE so a concurrent first request cannot
    /// overwrite an already-minted token; the read-back after the update is
    /// authoritative either way.
    pub async fn csrf_token(&self, session_id: &str) -> ApiResult<Option<String>> {
        let Some(session) = self.validate(session_id).await? else {
            return Ok(None);
        };

        if let Some(token) = session.csrf_token {
            return Ok(Some(token));
        }

        let candidate = random_token();
        sqlx::query("UPDATE session SET csrf_token = ?1 WHERE id = ?2 AND csrf_token IS NULL")
            .bind(&candidate)
            .bind(session_id)
            .execute(&self.db)
            .await?;

        let token: Option<String> =
            sqlx::query_scalar("SELECT csrf_token FROM session WHERE id = ?1")
                .bind(session_id)
                .fetch_optional(&self.db)
                .await?
                .flatten();

        Ok(token)
    }

    /// Delete expired sessions; returns the number removed
    pub async fn cleanup_expired(&self) -> ApiResult<u64> {
        let result = sqlx::query("DELETE FROM session WHERE expires_at < ?1")
            .bind(Utc::now())
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }
}

/// 256-bit random hex token, used for session ids and CSRF tokens
fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
