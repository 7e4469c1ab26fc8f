//! HTTP status code mapping for error codes

use super::codes::ErrorCode;
use http::StatusCode;

impl ErrorCode {
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::ValidationFailed => StatusCode::BAD_REQUEST,

            Self::NotAuthenticated
            | Self::TokenExpired
            | Self::TokenInvalid
            | Self::SignatureInvalid => StatusCode::UNAUTHORIZED,

            Self::MerchantNotFound | Self::OrderNotFound | Self::ExceptionNotFound => {
                StatusCode::NOT_FOUND
            }

            Self::InvalidOrderState
            | Self::OrderCancelled
            | Self::OrderAlreadyExported
            | Self::ExceptionAlreadyResolved => StatusCode::CONFLICT,

            // upstream platform / fulfillment misbehaved
            Self::ExternalServiceError => StatusCode::BAD_GATEWAY,

            Self::DatabaseError | Self::ConfigError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
