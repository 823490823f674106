//! Signing error taxonomy and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Why a sign request did not produce an exchange.
#[derive(Debug, Error)]
pub enum SignError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("URL not permitted: {0}")]
    Forbidden(String),

    #[error("signing unavailable: certificate state is not fresh")]
    SigningUnavailable,

    #[error("origin fetch failed: {0}")]
    OriginFetchFailed(String),

    #[error("origin returned 404")]
    OriginNotFound,

    #[error("not eligible: {0}")]
    NotEligible(String),

    #[error("internal signing error: {0}")]
    InternalSigningError(String),
}

impl SignError {
    pub fn status(&self) -> StatusCode {
        match self {
            SignError::MalformedRequest(_) | SignError::Forbidden(_) => StatusCode::BAD_REQUEST,
            SignError::OriginNotFound => StatusCode::NOT_FOUND,
            SignError::NotEligible(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SignError::SigningUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            SignError::OriginFetchFailed(_) => StatusCode::BAD_GATEWAY,
            SignError::InternalSigningError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SignError::SigningUnavailable | SignError::OriginFetchFailed(_)
        )
    }

    /// Low-cardinality label for metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            SignError::MalformedRequest(_) => "malformed",
            SignError::Forbidden(_) => "forbidden",
            SignError::SigningUnavailable => "unavailable",
            SignError::OriginFetchFailed(_) => "origin_failed",
            SignError::OriginNotFound => "origin_not_found",
            SignError::NotEligible(_) => "not_eligible",
            SignError::InternalSigningError(_) => "internal",
        }
    }

    /// Body text safe to show a caller.
    pub fn public_message(&self) -> String {
        match self {
            SignError::MalformedRequest(detail) => format!("Malformed request: {}", detail),
            SignError::Forbidden(_) => "URL is not allowed to be signed".to_string(),
            SignError::SigningUnavailable => "Signing temporarily unavailable".to_string(),
            SignError::OriginFetchFailed(_) => "Error fetching origin content".to_string(),
            SignError::OriginNotFound => "Origin returned 404".to_string(),
            SignError::NotEligible(detail) => format!("Content not eligible for signing: {}", detail),
            SignError::InternalSigningError(_) => "Internal error".to_string(),
        }
    }
}

impl IntoResponse for SignError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = (status, self.public_message()).into_response();
        if self.is_transient() {
            response.headers_mut().insert(
                axum::http::header::RETRY_AFTER,
                axum::http::HeaderValue::from_static("60"),
            );
        }
        response
    }
}
