//! Unified error codes for order-relay
//!
//! Error codes are organized by category:
//! - 0xxx: General errors
//! - 1xxx: Authentication errors
//! - 3xxx: Tenant / merchant errors
//! - 4xxx: Order errors
//! - 9xxx: System errors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error code enum
///
/// Serialized as the bare `u16` so API clients can switch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    // ==================== 0xxx: General ====================
    /// Request failed validation
    ValidationFailed = 2,

    // ==================== 1xxx: Auth ====================
    /// Caller is not authenticated
    NotAuthenticated = 1001,
    /// Token has expired
    TokenExpired = 1003,
    /// Token is invalid
    TokenInvalid = 1004,
    /// Webhook signature missing or invalid
    SignatureInvalid = 1010,

    // ==================== 3xxx: Tenant ====================
    /// Merchant not found or not owned by the tenant
    MerchantNotFound = 3101,

    // ==================== 4xxx: Order ====================
    OrderNotFound = 4001,
    /// Order state does not allow the requested transition
    InvalidOrderState = 4002,
    /// Order was cancelled on the storefront
    OrderCancelled = 4003,
    OrderAlreadyExported = 4004,
    ExceptionNotFound = 4101,
    ExceptionAlreadyResolved = 4102,

    // ==================== 9xxx: System ====================
    DatabaseError = 9002,
    ConfigError = 9005,
    /// Storefront platform or fulfillment call failed
    ExternalServiceError = 9006,
}

impl ErrorCode {
    /// Get the numeric code value
    #[inline]
    pub const fn code(&self) -> u16 {
        *self as u16
    }

    /// Get the default message for this error code
    pub const fn message(&self) -> &'static str {
        match self {
            ErrorCode::ValidationFailed => "Validation failed",

            ErrorCode::NotAuthenticated => "Authentication required",
            ErrorCode::TokenExpired => "Token has expired",
            ErrorCode::TokenInvalid => "Invalid token",
            ErrorCode::SignatureInvalid => "Signature missing or invalid",

            ErrorCode::MerchantNotFound => "Merchant not found",

            ErrorCode::OrderNotFound => "Order not found",
            ErrorCode::InvalidOrderState => "Order state does not allow this operation",
            ErrorCode::OrderCancelled => "Order has been cancelled",
            ErrorCode::OrderAlreadyExported => "Order has already been exported",
            ErrorCode::ExceptionNotFound => "Order exception not found",
            ErrorCode::ExceptionAlreadyResolved => "Order exception is already resolved",

            ErrorCode::DatabaseError => "Database error",
            ErrorCode::ConfigError => "Configuration error",
            ErrorCode::ExternalServiceError => "External service error",
        }
    }
}

impl From<ErrorCode> for u16 {
    #[inline]
    fn from(code: ErrorCode) -> Self {
        code as u16
    }
}

/// Error returned when converting an unknown u16 value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidErrorCode(pub u16);

impl fmt::Display for InvalidErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid error code: {}", self.0)
    }
}

impl std::error::Error for InvalidErrorCode {}

impl TryFrom<u16> for ErrorCode {
    type Error = InvalidErrorCode;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(ErrorCode::ValidationFailed),

            1001 => Ok(ErrorCode::NotAuthenticated),
            1003 => Ok(ErrorCode::TokenExpired),
            1004 => Ok(ErrorCode::TokenInvalid),
            1010 => Ok(ErrorCode::SignatureInvalid),

            3101 => Ok(ErrorCode::MerchantNotFound),

            4001 => Ok(ErrorCode::OrderNotFound),
            4002 => Ok(ErrorCode::InvalidOrderState),
            4003 => Ok(ErrorCode::OrderCancelled),
            4004 => Ok(ErrorCode::OrderAlreadyExported),
            4101 => Ok(ErrorCode::ExceptionNotFound),
            4102 => Ok(ErrorCode::ExceptionAlreadyResolved),

            9002 => Ok(ErrorCode::DatabaseError),
            9005 => Ok(ErrorCode::ConfigError),
            9006 => Ok(ErrorCode::ExternalServiceError),

            _ => Err(InvalidErrorCode(value)),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{:04}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_values() {
        assert_eq!(ErrorCode::ValidationFailed.code(), 2);
        assert_eq!(ErrorCode::SignatureInvalid.code(), 1010);
        assert_eq!(ErrorCode::MerchantNotFound.code(), 3101);
        assert_eq!(ErrorCode::OrderNotFound.code(), 4001);
        assert_eq!(ErrorCode::ExceptionAlreadyResolved.code(), 4102);
        assert_eq!(ErrorCode::ConfigError.code(), 9005);
    }

    #[test]
    fn test_try_from() {
        assert_eq!(ErrorCode::try_from(4002), Ok(ErrorCode::InvalidOrderState));
        assert_eq!(ErrorCode::try_from(9006), Ok(ErrorCode::ExternalServiceError));
        assert_eq!(ErrorCode::try_from(4999), Err(InvalidErrorCode(4999)));
    }

    #[test]
    fn test_serde_as_number() {
        let json = serde_json::to_string(&ErrorCode::OrderCancelled).unwrap();
        assert_eq!(json, "4003");
        let result: Result<ErrorCode, _> = serde_json::from_str("12345");
        assert!(result.is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", ErrorCode::ValidationFailed), "E0002");
        assert_eq!(format!("{}", ErrorCode::OrderNotFound), "E4001");
    }
}
