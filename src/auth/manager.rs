/// Credential and token management using runtime queries
///
/// Passwords are hashed with Argon2id (PHC string format). Refresh tokens are
/// opaque 256-bit secrets; only their SHA-256 hash is stored, so a raw token is
/// recoverable exactly once, at issuance. Access tokens are stateless HS256
/// JWTs binding admin id + email.
use crate::{
    audit::AuditLog,
    auth::{AdminSafe, ClientMeta},
    config::ServerConfig,
    error::{ApiError, ApiResult},
};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

/// Hash verified when the email has no account, so that lookup misses and
/// wrong passwords are indistinguishable in timing.
const DUMMY_HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$gZiV/M1gPc22ElAH/Jh1Hw$CWOrkoo7oJBQ/iyh7uJ0c0kr6HkVOrLsIa6NSZaeSq0";

/// Access token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

/// Token pair handed to a freshly authenticated admin. The refresh token is
/// the raw secret; it is never recoverable from storage afterward.
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
}

/// Result of a successful refresh-token rotation
#[derive(Debug, Clone)]
pub struct RotatedSession {
    pub admin: AdminSafe,
    pub tokens: SessionTokens,
}

/// Credential store and token service
pub struct AuthManager {
    db: SqlitePool,
    config: Arc<ServerConfig>,
    audit: Arc<AuditLog>,
}

impl AuthManager {
    pub fn new(db: SqlitePool, config: Arc<ServerConfig>, audit: Arc<AuditLog>) -> Self {
        Self { db, config, audit }
    }

    /// Authenticate by email + password
    ///
    /// Returns `None` for both "no such user" and "wrong password"; the two
    /// cases are equalized by verifying against a dummy hash when the lookup
    /// misses.
    pub async fn authenticate(&self, email: &str, password: &str) -> ApiResult<Option<AdminSafe>> {
        let row = sqlx::query(
            "SELECT id, email, password_hash, created_at, last_login FROM admin_user WHERE email = ?1",
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;

        let Some(row) = row else {
            let _ = verify_password(password, DUMMY_HASH);
            return Ok(None);
        };

        let stored: String = row.get("password_hash");
        if !verify_password(password, &stored)? {
            return Ok(None);
        }

        Ok(Some(AdminSafe {
            id: row.get("id"),
            email: row.get("email"),
            created_at: row.get("created_at"),
            last_login: row.get("last_login"),
        }))
    }

    /// Update last-login and write a LOGIN audit entry
    pub async fn record_login(&self, admin_id: &str, meta: &ClientMeta) -> ApiResult<()> {
        sqlx::query("UPDATE admin_user SET last_login = ?1 WHERE id = ?2")
            .bind(Utc::now())
            .bind(admin_id)
            .execute(&self.db)
            .await?;

        self.audit
            .record(admin_id, "LOGIN", None, None, Some(meta_json(meta)))
            .await?;

        Ok(())
    }

    /// Issue an access/refresh pair for an authenticated admin
    ///
    /// Generates a 256-bit random refresh secret, stores only its SHA-256 hash
    /// with expiry and client metadata, and signs a short-lived access token.
    pub async fn issue_session(
        &self,
        admin_id: &str,
        email: &str,
        meta: &ClientMeta,
    ) -> ApiResult<SessionTokens> {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        let refresh_token = hex::encode(secret);
        let token_hash = hash_refresh_token(&refresh_token);

        let now = Utc::now();
        let refresh_expires_at = now + Duration::days(self.config.auth.refresh_token_ttl_days);

        sqlx::query(
            "INSERT INTO refresh_token (id, token_hash, admin_id, expires_at, user_agent, ip, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&token_hash)
        .bind(admin_id)
        .bind(refresh_expires_at)
        .bind(&meta.user_agent)
        .bind(&meta.ip)
        .bind(now)
        .execute(&self.db)
        .await?;

        let access_token = self.sign_access_token(admin_id, email)?;

        Ok(SessionTokens {
            access_token,
            refresh_token,
            refresh_expires_at,
        })
    }

    /// Rotate a refresh token: single-use, compare-and-delete
    ///
    /// Returns `None` for unknown, expired, or already-consumed tokens; the
    /// caller must force re-login. A stolen token that was rotated away stays
    /// permanently invalid, and the legitimate holder's next attempt failing
    /// is the accepted signal of compromise.
    pub async fn rotate_refresh_token(
        &self,
        raw_token: &str,
        meta: &ClientMeta,
    ) -> ApiResult<Option<RotatedSession>> {
        let token_hash = hash_refresh_token(raw_token);

        let row = sqlx::query("SELECT admin_id, expires_at FROM refresh_token WHERE token_hash = ?1")
            .bind(&token_hash)
            .fetch_optional(&self.db)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let admin_id: String = row.get("admin_id");
        let expires_at: DateTime<Utc> = row.get("expires_at");

        if expires_at <= Utc::now() {
            sqlx::query("DELETE FROM refresh_token WHERE token_hash = ?1")
                .bind(&token_hash)
                .execute(&self.db)
                .await?;
            return Ok(None);
        }

        // Compare-and-delete: if a concurrent rotation consumed the row first,
        // zero rows are affected and this attempt loses.
        let deleted = sqlx::query("DELETE FROM refresh_token WHERE token_hash = ?1")
            .bind(&token_hash)
            .execute(&self.db)
            .await?;
        if deleted.rows_affected() == 0 {
            tracing::warn!(admin_id, "refresh token raced or replayed");
            return Ok(None);
        }

        let Some(admin) = self.get_admin(&admin_id).await? else {
            return Ok(None);
        };

        let tokens = self.issue_session(&admin.id, &admin.email, meta).await?;

        Ok(Some(RotatedSession { admin, tokens }))
    }

    /// Delete the matching refresh token record, if any (logout path).
    /// Revoking a non-existent token is not an error.
    pub async fn revoke_refresh_token(&self, raw_token: &str) -> ApiResult<()> {
        sqlx::query("DELETE FROM refresh_token WHERE token_hash = ?1")
            .bind(hash_refresh_token(raw_token))
            .execute(&self.db)
            .await?;

        Ok(())
    }

    /// Create an admin account; fails with Conflict when the email is taken
    pub async fn create_admin_account(
        &self,
        email: &str,
        password: &str,
        created_by: &str,
    ) -> ApiResult<AdminSafe> {
        validate_email(email)?;
        validate_password(password)?;

        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM admin_user WHERE email = ?1")
            .bind(email)
            .fetch_one(&self.db)
            .await?;
        if existing > 0 {
            return Err(ApiError::Conflict("Email already registered".to_string()));
        }

        let password_hash = hash_password(password)?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO admin_user (id, email, password_hash, created_at, last_login)
             VALUES (?1, ?2, ?3, ?4, NULL)",
        )
        .bind(&id)
        .bind(email)
        .bind(&password_hash)
        .bind(now)
        .execute(&self.db)
        .await?;

        self.audit
            .record(
                &id,
                "CREATE_ADMIN",
                None,
                None,
                Some(serde_json::json!({ "createdBy": created_by })),
            )
            .await?;

        Ok(AdminSafe {
            id,
            email: email.to_string(),
            created_at: now,
            last_login: None,
        })
    }

    /// Number of admin accounts; zero means the system is in pre-setup state
    pub async fn count_admin_users(&self) -> ApiResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM admin_user")
            .fetch_one(&self.db)
            .await?;

        Ok(count)
    }

    /// Fetch a password-free admin projection by id
    pub async fn get_admin(&self, admin_id: &str) -> ApiResult<Option<AdminSafe>> {
        let row = sqlx::query(
            "SELECT id, email, created_at, last_login FROM admin_user WHERE id = ?1",
        )
        .bind(admin_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(|row| AdminSafe {
            id: row.get("id"),
            email: row.get("email"),
            created_at: row.get("created_at"),
            last_login: row.get("last_login"),
        }))
    }

    /// Verify an access token statelessly (signature + expiry)
    pub fn verify_access_token(&self, token: &str) -> ApiResult<TokenClaims> {
        use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

        let key = DecodingKey::from_secret(self.config.auth.jwt_secret.as_bytes());
        let validation = Validation::new(Algorithm::HS256);

        let data = decode::<TokenClaims>(token, &key, &validation)
            .map_err(|e| ApiError::Jwt(format!("Invalid token: {}", e)))?;

        Ok(data.claims)
    }

    /// Delete expired refresh tokens; returns the number removed
    pub async fn cleanup_expired_tokens(&self) -> ApiResult<u64> {
        let result = sqlx::query("DELETE FROM refresh_token WHERE expires_at < ?1")
            .bind(Utc::now())
            .execute(&self.db)
            .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            tracing::info!(removed, "cleaned up expired refresh tokens");
        }

        Ok(removed)
    }

    fn sign_access_token(&self, admin_id: &str, email: &str) -> ApiResult<String> {
        use jsonwebtoken::{encode, EncodingKey, Header};

        let now = Utc::now().timestamp();
        let claims = TokenClaims {
            sub: admin_id.to_string(),
            email: email.to_string(),
            iat: now,
            exp: now + self.config.auth.access_token_ttl_minutes * 60,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.auth.jwt_secret.as_bytes()),
        )
        .map_err(|e| ApiError::Jwt(format!("Failed to sign token: {}", e)))
    }
}

/// Hash a password with Argon2id and a random salt (PHC string format)
fn hash_password(password: &str) -> ApiResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| ApiError::Internal(format!("Password hashing failed: {}", e)))
}

/// Verify a password against a stored PHC hash
fn verify_password(password: &str, hash: &str) -> ApiResult<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| ApiError::Internal(format!("Stored hash is malformed: {}", e)))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(ApiError::Internal(format!(
            "Password verification failed: {}",
            e
        ))),
    }
}

/// Refresh tokens are stored only as SHA-256 hex digests
fn hash_refresh_token(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

fn validate_email(email: &str) -> ApiResult<()> {
    if !email.contains('@') || email.len() > 254 {
        return Err(ApiError::Validation(
            "Field 'email' is not a valid email address".to_string(),
        ));
    }
    Ok(())
}

fn validate_password(password: &str) -> ApiResult<()> {
    if password.len() < 8 {
        return Err(ApiError::Validation(
            "Field 'password' must be at least 8 characters".to_string(),
        ));
    }
    Ok(())
}

fn meta_json(meta: &ClientMeta) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    if let Some(ua) = &meta.user_agent {
        map.insert("userAgent".to_string(), serde_json::json!(ua));
    }
    if let Some(ip) = &meta.ip {
        map.insert("ip".to_string(), serde_json::json!(ip));
    }
    serde_json::Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::memory_pool;

    async fn test_manager() -> AuthManager {
        let pool = memory_pool().await;
        let config = Arc::new(crate::config::test_config());
        let audit = Arc::new(AuditLog::new(pool.clone()));
        AuthManager::new(pool, config, audit)
    }

    #[tokio::test]
    async fn test_authenticate_success_and_mutation_rejection() {
        let manager = test_manager().await;

        manager
            .create_admin_account("admin@example.com", "correct horse", "system")
            .await
            .unwrap();

        let ok = manager
            .authenticate("admin@example.com", "correct horse")
            .await
            .unwrap();
        assert!(ok.is_some());

        // Any single-character mutation must fail
        let bad = manager
            .authenticate("admin@example.com", "correct hors3")
            .await
            .unwrap();
        assert!(bad.is_none());

        // Unknown email is indistinguishable from wrong password
        let missing = manager
            .authenticate("nobody@example.com", "correct horse")
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_conflict() {
        let manager = test_manager().await;

        manager
            .create_admin_account("admin@example.com", "password123", "system")
            .await
            .unwrap();

        let result = manager
            .create_admin_account("admin@example.com", "password456", "system")
            .await;

        match result {
            Err(ApiError::Conflict(_)) => {}
            other => panic!("Expected Conflict, got {:?}", other.map(|a| a.email)),
        }
    }

    #[tokio::test]
    async fn test_rotation_rejects_replay() {
        let manager = test_manager().await;
        let meta = ClientMeta::default();

        let admin = manager
            .create_admin_account("admin@example.com", "password123", "system")
            .await
            .unwrap();

        let tokens = manager
            .issue_session(&admin.id, &admin.email, &meta)
            .await
            .unwrap();

        // First rotation succeeds and returns a new token
        let rotated = manager
            .rotate_refresh_token(&tokens.refresh_token, &meta)
            .await
            .unwrap()
            .expect("first rotation should succeed");
        assert_ne!(rotated.tokens.refresh_token, tokens.refresh_token);

        // Replaying the original token must fail
        let replay = manager
            .rotate_refresh_token(&tokens.refresh_token, &meta)
            .await
            .unwrap();
        assert!(replay.is_none());

        // The rotated token itself still works
        let second = manager
            .rotate_refresh_token(&rotated.tokens.refresh_token, &meta)
            .await
            .unwrap();
        assert!(second.is_some());
    }

    #[tokio::test]
    async fn test_expired_refresh_token_is_deleted() {
        let manager = test_manager().await;
        let meta = ClientMeta::default();

        let admin = manager
            .create_admin_account("admin@example.com", "password123", "system")
            .await
            .unwrap();
        let tokens = manager
            .issue_session(&admin.id, &admin.email, &meta)
            .await
            .unwrap();

        // Force expiry in the past
        sqlx::query("UPDATE refresh_token SET expires_at = ?1")
            .bind(Utc::now() - Duration::days(1))
            .execute(&manager.db)
            .await
            .unwrap();

        let rotated = manager
            .rotate_refresh_token(&tokens.refresh_token, &meta)
            .await
            .unwrap();
        assert!(rotated.is_none());

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM refresh_token")
            .fetch_one(&manager.db)
            .await
            .unwrap();
        assert_eq!(remaining, 0, "expired token should be deleted on detection");
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let manager = test_manager().await;

        // Revoking a token that never existed is not an error
        manager.revoke_refresh_token("no-such-token").await.unwrap();

        let admin = manager
            .create_admin_account("admin@example.com", "password123", "system")
            .await
            .unwrap();
        let tokens = manager
            .issue_session(&admin.id, &admin.email, &ClientMeta::default())
            .await
            .unwrap();

        manager
            .revoke_refresh_token(&tokens.refresh_token)
            .await
            .unwrap();

        let rotated = manager
            .rotate_refresh_token(&tokens.refresh_token, &ClientMeta::default())
            .await
            .unwrap();
        assert!(rotated.is_none());
    }

    #[tokio::test]
    async fn test_access_token_round_trip() {
        let manager = test_manager().await;

        let admin = manager
            .create_admin_account("admin@example.com", "password123", "system")
            .await
            .unwrap();
        let tokens = manager
            .issue_session(&admin.id, &admin.email, &ClientMeta::default())
            .await
            .unwrap();

        let claims = manager.verify_access_token(&tokens.access_token).unwrap();
        assert_eq!(claims.sub, admin.id);
        assert_eq!(claims.email, admin.email);

        assert!(manager.verify_access_token("not-a-token").is_err());
    }

    #[tokio::test]
    async fn test_count_gates_setup() {
        let manager = test_manager().await;
        assert_eq!(manager.count_admin_users().await.unwrap(), 0);

        manager
            .create_admin_account("admin@example.com", "password123", "system")
            .await
            .unwrap();
        assert_eq!(manager.count_admin_users().await.unwrap(), 1);
    }
}
