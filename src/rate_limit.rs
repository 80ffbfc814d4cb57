/// Per-IP rate limiting for the public surface
///
/// Three keyed limiters: login attempts, submission creation, and general
/// public reads. Authenticated admin traffic is not limited here.
use crate::{
    config::RateLimitConfig,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::Method,
    middleware::Next,
    response::Response,
};
use governor::{
    clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota,
    RateLimiter as GovernorLimiter,
};
use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};

type KeyedLimiter = GovernorLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

const WINDOW: Duration = Duration::from_secs(15 * 60);
const HOUR: Duration = Duration::from_secs(60 * 60);

/// Which bucket a request falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitClass {
    Login,
    SubmissionCreate,
    Public,
}

#[derive(Clone)]
pub struct RateLimiter {
    enabled: bool,
    login: Arc<KeyedLimiter>,
    submission: Arc<KeyedLimiter>,
    public: Arc<KeyedLimiter>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let login_quota = window_quota(WINDOW, config.login_per_window, 10);
        let submission_quota = window_quota(HOUR, config.submission_creates_per_hour, 10);
        let public_quota = window_quota(WINDOW, config.public_per_window, 100);

        Self {
            enabled: config.enabled,
            login: Arc::new(GovernorLimiter::keyed(login_quota)),
            submission: Arc::new(GovernorLimiter::keyed(submission_quota)),
            public: Arc::new(GovernorLimiter::keyed(public_quota)),
        }
    }

    pub fn check(&self, class: LimitClass, ip: IpAddr) -> ApiResult<()> {
        if !self.enabled {
            return Ok(());
        }

        let limiter = match class {
            LimitClass::Login => &self.login,
            LimitClass::SubmissionCreate => &self.submission,
            LimitClass::Public => &self.public,
        };

        match limiter.check_key(&ip) {
            Ok(_) => Ok(()),
            Err(_) => {
                tracing::warn!(%ip, ?class, "rate limit exceeded");
                Err(ApiError::RateLimited {
                    retry_after: match class {
                        LimitClass::SubmissionCreate => HOUR,
                        _ => WINDOW,
                    },
                })
            }
        }
    }
}

/// N requests per window, with the whole allowance available as a burst
fn window_quota(window: Duration, per_window: u32, fallback: u32) -> Quota {
    let n = NonZeroU32::new(per_window)
        .unwrap_or_else(|| NonZeroU32::new(fallback).unwrap());
    Quota::with_period(window / n.get())
        .unwrap_or_else(|| Quota::per_hour(n))
        .allow_burst(n)
}

/// Classify a request into a limit bucket; admin routes are exempt because
/// they sit behind authentication.
fn classify(method: &Method, path: &str) -> Option<LimitClass> {
    if path.starts_with("/api/admin") {
        return None;
    }
    if method == Method::POST && path == "/api/auth/login" {
        return Some(LimitClass::Login);
    }
    if path.starts_with("/api/auth") {
        return None;
    }
    if method == Method::POST && path == "/api/submissions" {
        return Some(LimitClass::SubmissionCreate);
    }
    Some(LimitClass::Public)
}

/// Client address: trust x-forwarded-for when present (reverse proxy),
/// otherwise the socket peer.
fn client_ip(request: &Request) -> Option<IpAddr> {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            if let Ok(ip) = first.trim().parse() {
                return Some(ip);
            }
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip())
}

pub async fn rate_limit_middleware(
    State(ctx): State<crate::context::AppContext>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let class = classify(request.method(), request.uri().path());

    if let Some(class) = class {
        // Requests with no resolvable address are not limited; in practice
        // every served connection carries ConnectInfo.
        if let Some(ip) = client_ip(&request) {
            ctx.rate_limiter.check(class, ip)?;
        }
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_limiter(login: u32, submissions: u32, public: u32) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            enabled: true,
            login_per_window: login,
            submission_creates_per_hour: submissions,
            public_per_window: public,
        })
    }

    #[test]
    fn test_login_bucket_exhausts() {
        let limiter = test_limiter(3, 10, 100);
        let ip: IpAddr = "203.0.113.5".parse().unwrap();

        for _ in 0..3 {
            assert!(limiter.check(LimitClass::Login, ip).is_ok());
        }
        assert!(matches!(
            limiter.check(LimitClass::Login, ip),
            Err(ApiError::RateLimited { .. })
        ));

        // Different address has its own allowance
        let other: IpAddr = "203.0.113.6".parse().unwrap();
        assert!(limiter.check(LimitClass::Login, other).is_ok());
    }

    #[test]
    fn test_buckets_are_independent() {
        let limiter = test_limiter(1, 10, 100);
        let ip: IpAddr = "203.0.113.5".parse().unwrap();

        assert!(limiter.check(LimitClass::Login, ip).is_ok());
        assert!(limiter.check(LimitClass::Login, ip).is_err());

        // Exhausted login bucket does not affect the others
        assert!(limiter.check(LimitClass::SubmissionCreate, ip).is_ok());
        assert!(limiter.check(LimitClass::Public, ip).is_ok());
    }

    #[test]
    fn test_disabled_limiter_always_passes() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            enabled: false,
            login_per_window: 1,
            submission_creates_per_hour: 1,
            public_per_window: 1,
        });
        let ip: IpAddr = "203.0.113.5".parse().unwrap();

        for _ in 0..10 {
            assert!(limiter.check(LimitClass::Login, ip).is_ok());
        }
    }

    #[test]
    fn test_classification() {
        assert_eq!(
            classify(&Method::POST, "/api/auth/login"),
            Some(LimitClass::Login)
        );
        assert_eq!(classify(&Method::POST, "/api/auth/refresh"), None);
        assert_eq!(
            classify(&Method::POST, "/api/submissions"),
            Some(LimitClass::SubmissionCreate)
        );
        assert_eq!(
            classify(&Method::POST, "/api/submissions/abc/answers"),
            Some(LimitClass::Public)
        );
        assert_eq!(
            classify(&Method::GET, "/api/surveys/active"),
            Some(LimitClass::Public)
        );
        assert_eq!(classify(&Method::GET, "/api/admin/surveys"), None);
    }
}
