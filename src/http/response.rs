//! HTTP responses produced by the admission layer.

use std::time::Duration;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AdmissionError;
use crate::ratelimit::{Decision, LimitConfig};

/// Status string carried by every rejection body.
pub const REJECTION_STATUS: &str = "Request Failed";

/// JSON body of a 429 response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectionBody {
    /// Human-readable status
    pub status: String,
    /// The limit that was hit and how long to wait
    pub body: String,
    /// Always `true` for rate-limit rejections
    pub locked: bool,
    /// When the request was rejected
    pub timestamp: DateTime<Utc>,
}

/// A rate-limit rejection, ready to be turned into a 429 response.
#[derive(Debug, Clone)]
pub struct RateLimited {
    limit: LimitConfig,
    retry_after: Option<Duration>,
    at: DateTime<Utc>,
}

impl RateLimited {
    /// Rejection for a failed admission check.
    pub fn new(limit: &LimitConfig, decision: &Decision) -> Self {
        Self {
            limit: limit.clone(),
            retry_after: decision.retry_after,
            at: Utc::now(),
        }
    }

    /// The JSON body for this rejection.
    pub fn body(&self) -> RejectionBody {
        let wait = match self.retry_after {
            Some(wait) => format!("Please wait {} and try again.", describe_wait(wait)),
            None => "Please try again later.".to_string(),
        };

        RejectionBody {
            status: REJECTION_STATUS.to_string(),
            body: format!(
                "Rate limit of {} requests per second (burst {}) reached. {}",
                self.limit.refill_per_second, self.limit.capacity, wait
            ),
            locked: true,
            timestamp: self.at,
        }
    }

    /// Whole seconds for the `Retry-After` header, never less than one.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after.map(|wait| {
            let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
            secs.max(1)
        })
    }
}

impl IntoResponse for RateLimited {
    fn into_response(self) -> Response {
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(self.body())).into_response();
        if let Some(secs) = self.retry_after_secs() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// JSON body for admission failures other than rate limiting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error code
    pub error: String,
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        let code = match self {
            AdmissionError::IdentityUnavailable(_) => "identity_unavailable",
        };
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody {
                error: code.to_string(),
            }),
        )
            .into_response()
    }
}

fn describe_wait(wait: Duration) -> String {
    if wait < Duration::from_secs(1) {
        let millis = wait.as_micros().div_ceil(1000).max(1);
        format!("{} ms", millis)
    } else {
        let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
        format!("{} seconds", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    fn rejected(retry_after: Option<Duration>) -> Decision {
        Decision {
            allowed: false,
            remaining: 0,
            retry_after,
        }
    }

    #[test]
    fn test_rejection_body_fields() {
        let limit = LimitConfig::new(10, 100.0).unwrap();
        let rejection = RateLimited::new(&limit, &rejected(Some(Duration::from_millis(10))));
        let body = rejection.body();

        assert_eq!(body.status, "Request Failed");
        assert!(body.locked);
        assert_eq!(
            body.body,
            "Rate limit of 100 requests per second (burst 10) reached. Please wait 10 ms and try again."
        );
    }

    #[test]
    fn test_rejection_without_refill() {
        let limit = LimitConfig::new(1, 0.0).unwrap();
        let rejection = RateLimited::new(&limit, &rejected(None));

        assert!(rejection.body().body.ends_with("Please try again later."));
        assert_eq!(rejection.retry_after_secs(), None);
    }

    #[test]
    fn test_retry_after_rounds_up_to_whole_seconds() {
        let limit = LimitConfig::new(1, 0.5).unwrap();

        let short = RateLimited::new(&limit, &rejected(Some(Duration::from_micros(200))));
        assert_eq!(short.retry_after_secs(), Some(1));

        let long = RateLimited::new(&limit, &rejected(Some(Duration::from_millis(1500))));
        assert_eq!(long.retry_after_secs(), Some(2));
        assert!(long.body().body.contains("Please wait 2 seconds"));
    }

    #[test]
    fn test_describe_wait() {
        assert_eq!(describe_wait(Duration::from_micros(200)), "1 ms");
        assert_eq!(describe_wait(Duration::from_micros(3_300)), "4 ms");
        assert_eq!(describe_wait(Duration::from_secs(3)), "3 seconds");
    }

    #[tokio::test]
    async fn test_rate_limited_response() {
        let limit = LimitConfig::new(10, 100.0).unwrap();
        let response =
            RateLimited::new(&limit, &rejected(Some(Duration::from_millis(10)))).into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "1");

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "Request Failed");
        assert_eq!(json["locked"], true);
        assert!(json["body"].as_str().unwrap().contains("burst 10"));
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_identity_error_response() {
        let response =
            AdmissionError::IdentityUnavailable("no peer".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.error, "identity_unavailable");
    }
}
