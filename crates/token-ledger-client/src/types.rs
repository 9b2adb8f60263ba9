//! Request and response types for the token-ledger client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use token_ledger_core::Amount;

/// Token consumption event.
#[derive(Debug, Clone, Serialize)]
pub struct ConsumptionEvent {
    /// Unique event ID for idempotency.
    pub event_id: String,
    /// Organization being debited.
    pub organization_id: String,
    /// Tokens consumed.
    pub amount: i64,
}

/// Consumption response from the API.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumptionResponse {
    /// Whether the debit was applied.
    pub success: bool,
    /// Balance after the debit.
    pub balance: i64,
    /// Tokens deducted.
    pub consumed: i64,
}

/// Balance check request.
#[derive(Debug, Clone, Serialize)]
pub struct CheckBalanceRequest {
    /// Organization to check.
    pub organization_id: String,
    /// Tokens the caller is about to spend.
    pub required_tokens: i64,
}

/// Balance check response.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckBalanceResponse {
    /// Whether the wallet is active and covers the requirement.
    pub sufficient: bool,
    /// Current balance.
    pub balance: i64,
    /// Required tokens, echoed back.
    pub required_tokens: i64,
}

/// Wallet creation request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateWalletRequest {
    /// Organization ID; the server generates one when omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    /// Per-token price override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_per_token: Option<Amount>,
}

/// Wallet state returned by the API.
#[derive(Debug, Clone, Deserialize)]
pub struct WalletResponse {
    /// The owning organization.
    pub organization_id: String,
    /// Current token balance.
    pub balance: i64,
    /// Lifetime tokens credited.
    pub total_purchased: i64,
    /// Lifetime tokens debited.
    pub total_consumed: i64,
    /// Per-token price for this organization.
    pub price_per_token: Amount,
    /// ISO currency code.
    pub currency: String,
    /// Whether the wallet accepts debits.
    pub is_active: bool,
    /// When the wallet was created.
    pub created_at: DateTime<Utc>,
}

/// Purchase request.
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseRequest {
    /// The buying organization.
    pub organization_id: String,
    /// Idempotency reference; the server generates one when omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    /// Catalog package to buy. Exactly one of this and `custom_quantity`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_id: Option<String>,
    /// Custom token quantity to buy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_quantity: Option<i64>,
    /// Gateway payment-method token to charge.
    pub payment_method_id: String,
}

/// Purchase state returned by the API.
#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseResponse {
    /// Idempotency reference identifying the purchase.
    pub reference_id: String,
    /// The buying organization.
    pub organization_id: String,
    /// Lifecycle state: `pending`, `processing`, `completed`, `failed`,
    /// `cancelled`, or `refunded`.
    pub status: String,
    /// Tokens credited on success.
    pub token_quantity: i64,
    /// Total charge.
    pub total_amount: Amount,
    /// ISO currency code.
    pub currency: String,
    /// Gateway transaction ID, once the charge has succeeded.
    pub gateway_transaction_id: Option<String>,
}

/// Usage forecast returned by the API.
#[derive(Debug, Clone, Deserialize)]
pub struct ForecastResponse {
    /// The organization.
    pub organization_id: String,
    /// Balance the projection starts from.
    pub balance: i64,
    /// Trailing window the rate was averaged over.
    pub window_days: i64,
    /// Tokens consumed inside the window.
    pub consumed_in_window: i64,
    /// Average tokens consumed per day.
    pub average_daily_consumption: f64,
    /// Whole days until depletion, absent when consumption is zero.
    pub projected_days_remaining: Option<i64>,
    /// Projected depletion date, absent when consumption is zero.
    pub projected_depletion_date: Option<DateTime<Utc>>,
}

/// API error response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    /// Error details.
    pub error: ApiErrorBody,
}

/// API error body.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
    /// Additional details.
    pub details: Option<serde_json::Value>,
}
