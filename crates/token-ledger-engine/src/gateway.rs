//! Payment gateway abstraction.
//!
//! The gateway's internals are an external collaborator; the engines only
//! need to charge, refund, and look a charge back up by its idempotency key.
//! The error split matters more than the happy path: a definitive decline is
//! a terminal purchase failure, while a transport failure or timeout leaves
//! the charge outcome *unknown* and must be resolved by reconciliation.

use async_trait::async_trait;
use token_ledger_core::Amount;

/// A charge to attempt, keyed for gateway-side idempotency.
#[derive(Debug, Clone)]
pub struct ChargeRequest<'a> {
    /// Idempotency key; the purchase reference. Replaying the same key must
    /// not charge twice.
    pub idempotency_key: &'a str,

    /// Gateway payment-method token.
    pub payment_method_id: &'a str,

    /// Amount to charge.
    pub amount: Amount,

    /// ISO currency code.
    pub currency: &'a str,

    /// Statement description.
    pub description: &'a str,
}

/// Definitive outcome of a charge the gateway has answered for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeOutcome {
    /// Gateway transaction id.
    pub transaction_id: String,

    /// Whether the charge went through.
    pub status: ChargeStatus,

    /// Decline reason, when declined.
    pub decline_reason: Option<String>,
}

/// Terminal status of a gateway charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeStatus {
    /// The charge succeeded.
    Succeeded,

    /// The gateway definitively declined the charge.
    Declined,
}

/// A gateway interaction that produced no definitive answer.
///
/// Every variant means the same thing to a caller mid-charge: the outcome is
/// unknown. Do not mark the purchase failed; leave it `processing` for
/// reconciliation.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The gateway could not be reached.
    #[error("gateway transport error: {0}")]
    Transport(String),

    /// The request timed out with a charge possibly in flight.
    #[error("gateway timeout")]
    Timeout,

    /// The gateway answered with something we could not interpret.
    #[error("gateway protocol error: {0}")]
    Protocol(String),
}

/// Payment operations the engines need.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Attempt a charge.
    ///
    /// Returns `Ok` for any definitive answer, succeeded or declined.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] only when the outcome is unknown.
    async fn charge(&self, request: &ChargeRequest<'_>) -> Result<ChargeOutcome, GatewayError>;

    /// Refund money against a prior transaction.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the outcome is unknown.
    async fn refund(
        &self,
        transaction_id: &str,
        amount: Amount,
        currency: &str,
    ) -> Result<ChargeOutcome, GatewayError>;

    /// Look up a charge by its idempotency key.
    ///
    /// `Ok(None)` means the gateway has no record of the charge: it never
    /// went out, and the purchase can safely be failed.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the gateway cannot answer; the caller
    /// should leave the purchase for a later reconciliation pass.
    async fn lookup(&self, idempotency_key: &str) -> Result<Option<ChargeOutcome>, GatewayError>;
}
