//! Fixed-window rate limiting keyed by `(identifier, route class)`.
//!
//! Flow Overview:
//! 1) Classify the request path into a route class (or exempt it).
//! 2) Atomically increment the counter for `(identifier, route class)`.
//! 3) Compare the post-increment count against the class quota.
//!
//! Every call counts against the budget, including the call that is denied:
//! an attempt that was made counts even if the caller disconnects before the
//! response is sent.

pub mod middleware;
pub mod store;

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Requests admitted per window for the login route class.
const LOGIN_LIMIT: u32 = 5;
const LOGIN_WINDOW: Duration = Duration::from_secs(15 * 60);
/// Requests admitted per window for admin-prefixed API routes.
const ADMIN_LIMIT: u32 = 30;
const ADMIN_WINDOW: Duration = Duration::from_secs(60);
/// Requests admitted per window for the general API.
const API_LIMIT: u32 = 60;
const API_WINDOW: Duration = Duration::from_secs(60);

/// Route classes with independent budgets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RouteClass {
    Login,
    Admin,
    Api,
}

impl RouteClass {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Admin => "admin",
            Self::Api => "api",
        }
    }

    /// Classify a request path. `None` means the path is exempt and never
    /// counted (health checks, docs, static assets).
    #[must_use]
    pub fn classify(path: &str) -> Option<Self> {
        if path == "/"
            || path == "/health"
            || path.starts_with("/swagger-ui")
            || path.starts_with("/api-docs")
            || path.starts_with("/assets/")
            || path.starts_with("/static/")
        {
            return None;
        }
        if path.starts_with("/v1/auth/login") {
            Some(Self::Login)
        } else if path.starts_with("/v1/admin") {
            Some(Self::Admin)
        } else {
            Some(Self::Api)
        }
    }

    /// Quota for this route class.
    #[must_use]
    pub fn quota(self) -> Quota {
        match self {
            Self::Login => Quota {
                limit: LOGIN_LIMIT,
                window: LOGIN_WINDOW,
            },
            Self::Admin => Quota {
                limit: ADMIN_LIMIT,
                window: ADMIN_WINDOW,
            },
            Self::Api => Quota {
                limit: API_LIMIT,
                window: API_WINDOW,
            },
        }
    }
}

/// Per-class request budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Quota {
    pub limit: u32,
    pub window: Duration,
}

/// Counter state for one key after an increment.
#[derive(Clone, Copy, Debug)]
pub struct WindowCounter {
    /// Post-increment count for the current window.
    pub count: i64,
    pub reset_at: DateTime<Utc>,
}

/// Outcome of a rate-limit check for one request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    /// Map a post-increment counter onto the quota.
    #[must_use]
    pub fn from_counter(counter: &WindowCounter, quota: Quota) -> Self {
        let limit = i64::from(quota.limit);
        let allowed = counter.count <= limit;
        let remaining = if allowed {
            u32::try_from(limit - counter.count).unwrap_or(0)
        } else {
            0
        };
        Self {
            allowed,
            limit: quota.limit,
            remaining,
            reset_at: counter.reset_at,
        }
    }

    /// Seconds the caller should wait before retrying, rounded up, never
    /// negative.
    #[must_use]
    pub fn retry_after_seconds(&self, now: DateTime<Utc>) -> u64 {
        let millis = self.reset_at.signed_duration_since(now).num_milliseconds();
        if millis <= 0 {
            0
        } else {
            u64::try_from(millis).map_or(0, |m| m.div_ceil(1000))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn classify_routes() {
        assert_eq!(RouteClass::classify("/v1/auth/login"), Some(RouteClass::Login));
        assert_eq!(
            RouteClass::classify("/v1/auth/login/finish"),
            Some(RouteClass::Login)
        );
        assert_eq!(RouteClass::classify("/v1/admin/users"), Some(RouteClass::Admin));
        assert_eq!(RouteClass::classify("/v1/auth/2fa/verify"), Some(RouteClass::Api));
        assert_eq!(RouteClass::classify("/v1/catalog/titles"), Some(RouteClass::Api));
    }

    #[test]
    fn classify_exempts_health_and_assets() {
        assert_eq!(RouteClass::classify("/health"), None);
        assert_eq!(RouteClass::classify("/"), None);
        assert_eq!(RouteClass::classify("/static/player.js"), None);
        assert_eq!(RouteClass::classify("/assets/logo.svg"), None);
        assert_eq!(RouteClass::classify("/swagger-ui"), None);
    }

    #[test]
    fn quotas_match_policy() {
        assert_eq!(RouteClass::Login.quota().limit, 5);
        assert_eq!(RouteClass::Login.quota().window.as_secs(), 900);
        assert_eq!(RouteClass::Admin.quota().limit, 30);
        assert_eq!(RouteClass::Admin.quota().window.as_secs(), 60);
        assert_eq!(RouteClass::Api.quota().limit, 60);
        assert_eq!(RouteClass::Api.quota().window.as_secs(), 60);
    }

    #[test]
    fn decision_within_budget() {
        let now = Utc::now();
        let counter = WindowCounter {
            count: 1,
            reset_at: now + ChronoDuration::seconds(60),
        };
        let decision = RateLimitDecision::from_counter(&counter, RouteClass::Login.quota());
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
    }

    #[test]
    fn decision_at_and_over_budget() {
        let now = Utc::now();
        let reset_at = now + ChronoDuration::seconds(60);
        let at_limit = WindowCounter { count: 5, reset_at };
        let decision = RateLimitDecision::from_counter(&at_limit, RouteClass::Login.quota());
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);

        let over = WindowCounter { count: 6, reset_at };
        let decision = RateLimitDecision::from_counter(&over, RouteClass::Login.quota());
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn retry_after_rounds_up_and_floors_at_zero() {
        let now = Utc::now();
        let decision = RateLimitDecision {
            allowed: false,
            limit: 5,
            remaining: 0,
            reset_at: now + ChronoDuration::milliseconds(1500),
        };
        assert_eq!(decision.retry_after_seconds(now), 2);

        let expired = RateLimitDecision {
            reset_at: now - ChronoDuration::seconds(5),
            ..decision
        };
        assert_eq!(expired.retry_after_seconds(now), 0);
    }
}
