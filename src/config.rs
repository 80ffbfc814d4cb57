/// Configuration management for Canvass
use crate::error::{ApiError, ApiResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    /// Production deployments mark cookies Secure
    pub production: bool,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub database: PathBuf,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// Access token lifetime in minutes (short-lived by design)
    pub access_token_ttl_minutes: i64,
    /// Refresh token lifetime in days
    pub refresh_token_ttl_days: i64,
    /// Server-side session lifetime in hours
    pub session_ttl_hours: i64,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Login attempts per IP per 15-minute window
    pub login_per_window: u32,
    /// Submission creations per IP per hour
    pub submission_creates_per_hour: u32,
    /// Public read requests per IP per 15-minute window
    pub public_per_window: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> ApiResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("CANVASS_HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let port = env::var("CANVASS_PORT")
            .unwrap_or_else(|_| "4000".to_string())
            .parse()
            .map_err(|_| ApiError::Validation("Invalid port number".to_string()))?;
        let production = env::var("CANVASS_ENV")
            .map(|v| v == "production")
            .unwrap_or(false);

        let data_directory: PathBuf = env::var("CANVASS_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let database = env::var("CANVASS_DB_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("canvass.sqlite"));

        let jwt_secret = env::var("CANVASS_JWT_SECRET")
            .map_err(|_| ApiError::Validation("JWT secret required".to_string()))?;
        let access_token_ttl_minutes = env::var("CANVASS_ACCESS_TOKEN_TTL_MINUTES")
            .unwrap_or_else(|_| "15".to_string())
            .parse()
            .unwrap_or(15);
        let refresh_token_ttl_days = env::var("CANVASS_REFRESH_TOKEN_TTL_DAYS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);
        let session_ttl_hours = env::var("CANVASS_SESSION_TTL_HOURS")
            .unwrap_or_else(|_| "12".to_string())
            .parse()
            .unwrap_or(12);

        let rate_limit_enabled = env::var("CANVASS_RATE_LIMITS_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .unwrap_or(true);
        let login_per_window = env::var("CANVASS_RATE_LIMIT_LOGIN")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);
        let submission_creates_per_hour = env::var("CANVASS_RATE_LIMIT_SUBMISSIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);
        let public_per_window = env::var("CANVASS_RATE_LIMIT_PUBLIC")
            .unwrap_or_else(|_| "100".to_string())
            .parse()
            .unwrap_or(100);

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                production,
            },
            storage: StorageConfig {
                data_directory,
                database,
            },
            auth: AuthConfig {
                jwt_secret,
                access_token_ttl_minutes,
                refresh_token_ttl_days,
                session_ttl_hours,
            },
            rate_limit: RateLimitConfig {
                enabled: rate_limit_enabled,
                login_per_window,
                submission_creates_per_hour,
                public_per_window,
            },
            logging: LoggingConfig { level: log_level },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> ApiResult<()> {
        if self.service.hostname.is_empty() {
            return Err(ApiError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.auth.jwt_secret.len() < 32 {
            return Err(ApiError::Validation(
                "JWT secret must be at least 32 characters".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> ServerConfig {
    ServerConfig {
        service: ServiceConfig {
            hostname: "localhost".to_string(),
            port: 0,
            production: false,
        },
        storage: StorageConfig {
            data_directory: PathBuf::from("./data"),
            database: PathBuf::from(":memory:"),
        },
        auth: AuthConfig {
            jwt_secret: "test-secret-test-secret-test-secret!".to_string(),
            access_token_ttl_minutes: 15,
            refresh_token_ttl_days: 30,
            session_ttl_hours: 12,
        },
        rate_limit: RateLimitConfig {
            enabled: false,
            login_per_window: 10,
            submission_creates_per_hour: 10,
            public_per_window: 100,
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
        },
    }
}
