//! HTTP rendering of auth and request errors.
//!
//! Every error body is `{"detail": "<message>"}`.

use axum::{
    Json,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{RETRY_AFTER, WWW_AUTHENTICATE},
    },
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};
use utoipa::ToSchema;

use crate::auth::AuthError;

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ErrorResponse {
    pub detail: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("Not authenticated")]
    MissingCredentials,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
}

/// Whole seconds a client should wait, rounded up and never below one.
#[must_use]
pub fn retry_after_seconds(retry_after: Duration) -> u64 {
    let seconds = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    seconds.max(1)
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Auth(err) => match err {
                AuthError::InvalidCredentials
                | AuthError::InvalidToken
                | AuthError::ExpiredToken
                | AuthError::RevokedToken
                | AuthError::UnknownSubject => StatusCode::UNAUTHORIZED,
                AuthError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
                AuthError::Conflict => StatusCode::CONFLICT,
                AuthError::DuplicateIdentity => StatusCode::BAD_REQUEST,
                AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::MissingCredentials => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut headers = HeaderMap::new();

        let detail = match &self {
            Self::Auth(AuthError::Internal(reason)) => {
                // Details stay in the logs.
                error!("Internal error: {reason}");
                "Internal server error".to_string()
            }
            Self::Auth(AuthError::RateLimited { retry_after }) => {
                headers.insert(RETRY_AFTER, HeaderValue::from(retry_after_seconds(*retry_after)));
                self.to_string()
            }
            Self::Auth(err) => {
                warn!(kind = err.kind(), "Request rejected");
                self.to_string()
            }
            _ => self.to_string(),
        };

        if status == StatusCode::UNAUTHORIZED {
            headers.insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }

        (status, headers, Json(ErrorResponse { detail })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_rounds_up() {
        assert_eq!(retry_after_seconds(Duration::from_secs(57)), 57);
        assert_eq!(retry_after_seconds(Duration::from_millis(56_100)), 57);
        assert_eq!(retry_after_seconds(Duration::from_millis(10)), 1);
        assert_eq!(retry_after_seconds(Duration::ZERO), 1);
    }

    #[test]
    fn auth_errors_map_to_status_codes() {
        let cases = [
            (AuthError::InvalidCredentials, StatusCode::UNAUTHORIZED),
            (AuthError::InvalidToken, StatusCode::UNAUTHORIZED),
            (AuthError::ExpiredToken, StatusCode::UNAUTHORIZED),
            (AuthError::RevokedToken, StatusCode::UNAUTHORIZED),
            (AuthError::UnknownSubject, StatusCode::UNAUTHORIZED),
            (
                AuthError::RateLimited {
                    retry_after: Duration::from_secs(3),
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (AuthError::Conflict, StatusCode::CONFLICT),
            (AuthError::DuplicateIdentity, StatusCode::BAD_REQUEST),
            (
                AuthError::Internal("boom".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn rate_limited_response_has_retry_after() {
        let response = ApiError::from(AuthError::RateLimited {
            retry_after: Duration::from_millis(2_500),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(RETRY_AFTER).and_then(|v| v.to_str().ok()),
            Some("3")
        );
    }

    #[test]
    fn unauthorized_response_has_bearer_challenge() {
        let response = ApiError::from(AuthError::RevokedToken).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(WWW_AUTHENTICATE).and_then(|v| v.to_str().ok()),
            Some("Bearer")
        );
    }
}
