//! Error handling for the HTTP layer

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::pricing::responses::PricingErrorResponse;
use crate::pricing::QuoteError;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Quote(#[from] QuoteError),

    #[error("Malformed request body: {0}")]
    BadRequest(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            AppError::Quote(QuoteError::InvalidRequest(_)) => {
                (StatusCode::BAD_REQUEST, "invalid_request")
            }
            AppError::Quote(QuoteError::AddressUnresolvable(_)) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "address_unresolvable")
            }
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "malformed_body"),
        };

        let body = PricingErrorResponse {
            error_type: error_type.to_string(),
            message: self.to_string(),
            details: match &self {
                AppError::Quote(QuoteError::AddressUnresolvable(address)) => {
                    Some(serde_json::json!({ "address": address }))
                }
                _ => None,
            },
        };
        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
