//! Shared error taxonomy for the registry boundary
//!
//! Component-level error enums convert into `ApiError` via `#[from]`; this
//! is the single place that maps the behavioral taxonomy onto HTTP status
//! codes and the `{"error": "..."}` body shape.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("registration '{0}' not found")]
    NotFound(String),
    #[error("registration '{0}' already exists")]
    AlreadyExists(String),
    #[error("invalid registration: {0}")]
    Invalid(String),
    #[error("concurrent edit conflict on '{0}'")]
    Conflict(String),
    #[error("store temporarily unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("cluster '{0}' is not registered")]
    NotRegistered(String),
    #[error("cluster '{0}' is unhealthy (circuit open)")]
    Unhealthy {
        name: String,
        last_error: Option<String>,
        last_known_good_at: Option<chrono::DateTime<chrono::Utc>>,
    },
    #[error("internal pool error: {0}")]
    Internal(String),
}

#[derive(Error, Debug)]
pub enum HeartbeatError {
    #[error("missing or invalid heartbeat token")]
    Unauthorized,
    #[error("malformed heartbeat payload: {0}")]
    BadRequest(String),
    #[error("cluster '{0}' is not registered")]
    NotFound(String),
    #[error("heartbeat payload exceeds 64 KiB limit")]
    PayloadTooLarge,
}

/// The top-level behavioral taxonomy surfaced at the HTTP boundary.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    AlreadyExists(String),
    #[error("{0}")]
    Conflict(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("cluster unhealthy")]
    Unhealthy {
        last_error: Option<String>,
        last_known_good_at: Option<chrono::DateTime<chrono::Utc>>,
    },
    #[error("cluster unreachable")]
    Unreachable,
    #[error("request timed out")]
    Timeout,
    #[error("payload too large")]
    PayloadTooLarge,
    #[error("ambiguous cluster selector; available: {0:?}")]
    Ambiguous(Vec<String>),
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl From<super::router::RouteError> for ApiError {
    fn from(e: super::router::RouteError) -> Self {
        match e {
            super::router::RouteError::Ambiguous(names) => ApiError::Ambiguous(names),
            super::router::RouteError::NoClustersRegistered => {
                ApiError::Invalid("no clusters are registered".to_string())
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(n) => ApiError::NotFound(format!("registration '{}' not found", n)),
            StoreError::AlreadyExists(n) => {
                ApiError::AlreadyExists(format!("registration '{}' already exists", n))
            }
            StoreError::Invalid(msg) => ApiError::Invalid(msg),
            StoreError::Conflict(n) => ApiError::Conflict(format!("conflict updating '{}'", n)),
            StoreError::Unavailable(msg) => ApiError::Internal(anyhow::anyhow!(msg)),
        }
    }
}

impl From<PoolError> for ApiError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::NotRegistered(n) => {
                ApiError::NotFound(format!("cluster '{}' not registered", n))
            }
            PoolError::Unhealthy {
                last_error,
                last_known_good_at,
                ..
            } => ApiError::Unhealthy {
                last_error,
                last_known_good_at,
            },
            PoolError::Internal(msg) => ApiError::Internal(anyhow::anyhow!(msg)),
        }
    }
}

impl From<HeartbeatError> for ApiError {
    fn from(e: HeartbeatError) -> Self {
        match e {
            HeartbeatError::Unauthorized => ApiError::Unauthorized,
            HeartbeatError::BadRequest(msg) => ApiError::Invalid(msg),
            HeartbeatError::NotFound(n) => ApiError::NotFound(format!("cluster '{}' not found", n)),
            HeartbeatError::PayloadTooLarge => ApiError::PayloadTooLarge,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Serialize)]
struct AmbiguousErrorBody {
    error: String,
    #[serde(rename = "availableClusters")]
    available_clusters: Vec<String>,
}

#[derive(Serialize)]
struct UnhealthyErrorBody {
    error: String,
    #[serde(rename = "lastKnownGoodAt")]
    #[serde(skip_serializing_if = "Option::is_none")]
    last_known_good_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(rename = "lastError")]
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Ambiguous(available_clusters) = &self {
            return (
                StatusCode::BAD_REQUEST,
                Json(AmbiguousErrorBody {
                    error: self.to_string(),
                    available_clusters: available_clusters.clone(),
                }),
            )
                .into_response();
        }

        if let ApiError::Unhealthy {
            last_error,
            last_known_good_at,
        } = &self
        {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(UnhealthyErrorBody {
                    error: self.to_string(),
                    last_known_good_at: *last_known_good_at,
                    last_error: last_error.clone(),
                }),
            )
                .into_response();
        }

        let status = match &self {
            ApiError::Invalid(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::AlreadyExists(_) => StatusCode::CONFLICT,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Unhealthy { .. } => unreachable!("handled above"),
            ApiError::Unreachable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Ambiguous(_) => unreachable!("handled above"),
            ApiError::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = match &self {
            ApiError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_not_found_maps_to_api_not_found() {
        let err: ApiError = StoreError::NotFound("gpu-east".to_string()).into();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn test_pool_unhealthy_maps_to_api_unhealthy() {
        let err: ApiError = PoolError::Unhealthy {
            name: "gpu-east".to_string(),
            last_error: Some("timeout".to_string()),
            last_known_good_at: None,
        }
        .into();
        assert!(matches!(err, ApiError::Unhealthy { .. }));
    }

    #[test]
    fn test_heartbeat_unauthorized_maps_correctly() {
        let err: ApiError = HeartbeatError::Unauthorized.into();
        assert!(matches!(err, ApiError::Unauthorized));
    }

    #[test]
    fn test_route_ambiguous_carries_cluster_list() {
        let err: ApiError =
            super::super::router::RouteError::Ambiguous(vec!["a".to_string(), "b".to_string()]).into();
        match err {
            ApiError::Ambiguous(names) => assert_eq!(names, vec!["a".to_string(), "b".to_string()]),
            _ => panic!("expected Ambiguous"),
        }
    }

    #[tokio::test]
    async fn test_unhealthy_response_body_carries_last_known_good_and_error() {
        let now = chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let err = ApiError::Unhealthy {
            last_error: Some("dial tcp: connection refused".to_string()),
            last_known_good_at: Some(now),
        };

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(json["lastKnownGoodAt"], now.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true));
        assert_eq!(json["lastError"], "dial tcp: connection refused");
    }

    #[tokio::test]
    async fn test_unhealthy_response_body_omits_absent_fields() {
        let err = ApiError::Unhealthy {
            last_error: None,
            last_known_good_at: None,
        };

        let response = err.into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert!(json.get("lastKnownGoodAt").is_none());
        assert!(json.get("lastError").is_none());
    }
}
