//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use token_ledger_core::LedgerError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - duplicate reference or invalid state transition.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Insufficient token balance for a debit.
    #[error("insufficient balance: balance={balance}, required={required}")]
    InsufficientBalance {
        /// Current balance.
        balance: i64,
        /// Tokens required.
        required: i64,
    },

    /// The wallet is suspended.
    #[error("wallet suspended: {0}")]
    WalletSuspended(String),

    /// The payment gateway declined the charge.
    #[error("payment declined: {0}")]
    PaymentDeclined(String),

    /// The payment gateway could not give a definitive answer.
    #[error("payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// The system is overloaded with conflicting writes; retry later.
    #[error("busy, retry later")]
    Busy,

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::InsufficientBalance { balance, required } => (
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_balance",
                self.to_string(),
                Some(serde_json::json!({
                    "balance": balance,
                    "required": required
                })),
            ),
            Self::WalletSuspended(msg) => (
                StatusCode::CONFLICT,
                "wallet_suspended",
                msg.clone(),
                None,
            ),
            Self::PaymentDeclined(msg) => (
                StatusCode::PAYMENT_REQUIRED,
                "payment_declined",
                msg.clone(),
                None,
            ),
            Self::GatewayUnavailable(msg) => (
                StatusCode::BAD_GATEWAY,
                "gateway_unavailable",
                msg.clone(),
                None,
            ),
            Self::Busy => (
                StatusCode::SERVICE_UNAVAILABLE,
                "busy",
                self.to_string(),
                None,
            ),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Validation(msg) => Self::BadRequest(msg),
            LedgerError::InvalidId(err) => Self::BadRequest(err.to_string()),
            LedgerError::NotFound { entity, id } => Self::NotFound(format!("{entity} not found: {id}")),
            LedgerError::InsufficientBalance { balance, required } => {
                Self::InsufficientBalance { balance, required }
            }
            LedgerError::WalletSuspended { organization_id } => {
                Self::WalletSuspended(format!("wallet suspended for organization {organization_id}"))
            }
            LedgerError::DuplicatePurchase { reference_id } => Self::Conflict(format!(
                "reference {reference_id} already used with different parameters"
            )),
            LedgerError::InvalidState(msg) => Self::Conflict(msg),
            LedgerError::SpendingLimitExceeded { .. } => Self::Conflict(err.to_string()),
            LedgerError::PaymentDeclined(msg) => Self::PaymentDeclined(msg),
            LedgerError::GatewayUnavailable(msg) => Self::GatewayUnavailable(msg),
            LedgerError::ConcurrencyConflict(_) | LedgerError::SystemBusy => Self::Busy,
            LedgerError::Storage(msg) | LedgerError::Serialization(msg) => Self::Internal(msg),
        }
    }
}

impl From<token_ledger_store::StoreError> for ApiError {
    fn from(err: token_ledger_store::StoreError) -> Self {
        Self::from(LedgerError::from(err))
    }
}
