/// Shared application state handed to every handler
use crate::{
    audit::AuditLog,
    auth::{AuthManager, SessionStore},
    config::ServerConfig,
    contact::ContactStore,
    error::ApiResult,
    rate_limit::RateLimiter,
    submission::SubmissionService,
    survey::SurveyStore,
};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub auth: Arc<AuthManager>,
    pub sessions: Arc<SessionStore>,
    pub surveys: Arc<SurveyStore>,
    pub submissions: Arc<SubmissionService>,
    pub contacts: Arc<ContactStore>,
    pub audit: Arc<AuditLog>,
    pub rate_limiter: RateLimiter,
}

impl AppContext {
    /// Open the configured database, run migrations, and wire up services
    pub async fn new(config: ServerConfig) -> ApiResult<Self> {
        let pool = crate::db::create_pool(
            &config.storage.database,
            crate::db::DatabaseOptions::default(),
        )
        .await?;
        crate::db::run_migrations(&pool).await?;
        crate::db::test_connection(&pool).await?;

        Ok(Self::with_pool(config, pool))
    }

    /// Wire services around an existing pool (used by tests)
    pub fn with_pool(config: ServerConfig, pool: SqlitePool) -> Self {
        let config = Arc::new(config);
        let audit = Arc::new(AuditLog::new(pool.clone()));
        let auth = Arc::new(AuthManager::new(
            pool.clone(),
            config.clone(),
            audit.clone(),
        ));
        let sessions = Arc::new(SessionStore::new(
            pool.clone(),
            config.auth.session_ttl_hours,
        ));
        let rate_limiter = RateLimiter::new(&config.rate_limit);

        Self {
            surveys: Arc::new(SurveyStore::new(pool.clone())),
            submissions: Arc::new(SubmissionService::new(pool.clone())),
            contacts: Arc::new(ContactStore::new(pool.clone())),
            audit,
            auth,
            sessions,
            rate_limiter,
            db: pool,
            config,
        }
    }
}
