//! Purchase records and their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Amount, ChangeType, OrganizationId, PurchaseId};

/// How a purchase was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseType {
    /// One-off purchase by an operator or API caller.
    OneTime,

    /// A subscription billing cycle.
    Subscription,

    /// An automatic top-up triggered by policy.
    AutoTopup,
}

impl From<PurchaseType> for ChangeType {
    /// The history change type a purchase of this kind credits under.
    fn from(purchase_type: PurchaseType) -> Self {
        match purchase_type {
            PurchaseType::OneTime => Self::Purchase,
            PurchaseType::Subscription => Self::SubscriptionGrant,
            PurchaseType::AutoTopup => Self::AutoTopup,
        }
    }
}

/// Lifecycle state of a purchase.
///
/// ```text
/// pending -> processing -> completed -> refunded
///         \             \-> failed
///          \-> cancelled
/// ```
///
/// The `pending -> processing` transition is the idempotency gate: exactly
/// one executor wins it, and only that executor calls the payment gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    /// Initialized, not yet claimed for execution.
    Pending,

    /// Claimed; a gateway charge may be in flight. Resolved exactly once,
    /// by the winning executor or by reconciliation.
    Processing,

    /// Charge succeeded and tokens were credited.
    Completed,

    /// Charge failed permanently; no ledger mutation occurred.
    Failed,

    /// Cancelled by the caller before the claim.
    Cancelled,

    /// Completed, then refunded.
    Refunded,
}

impl PurchaseStatus {
    /// Whether the purchase can still be claimed for execution.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Whether the status is terminal. Terminal purchases are immutable
    /// except for the completed -> refunded transition.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Refunded
        )
    }
}

/// One buy attempt, keyed by a caller-supplied idempotency reference.
///
/// Created by initialization; transitions only through the purchase
/// orchestrator and the store's compound operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Purchase {
    /// Internal id (ULID, time-ordered for per-organization listings).
    pub id: PurchaseId,

    /// Caller-supplied or generated idempotency reference. Unique; reusing
    /// a reference with different parameters is rejected.
    pub reference_id: String,

    /// The buying organization.
    pub organization_id: OrganizationId,

    /// How the purchase was initiated.
    pub purchase_type: PurchaseType,

    /// Tokens to credit on success.
    pub token_quantity: i64,

    /// Price per token at initialization time.
    pub price_per_token: Amount,

    /// `token_quantity * price_per_token`.
    pub total_amount: Amount,

    /// ISO currency code.
    pub currency: String,

    /// Package the purchase was priced from, if any.
    pub package_id: Option<String>,

    /// Current lifecycle state.
    pub status: PurchaseStatus,

    /// Gateway payment-method token to charge.
    pub payment_method_id: String,

    /// Gateway transaction id, once a charge has succeeded.
    pub gateway_transaction_id: Option<String>,

    /// When the purchase was initialized.
    pub created_at: DateTime<Utc>,

    /// When the purchase was claimed for execution.
    pub claimed_at: Option<DateTime<Utc>>,

    /// When tokens were credited to the wallet.
    pub tokens_allocated_at: Option<DateTime<Utc>>,

    /// When the purchase reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,

    /// Why the purchase failed, if it did.
    pub failure_reason: Option<String>,

    /// Tokens debited back by a refund.
    pub refunded_tokens: Option<i64>,

    /// Money refunded through the gateway.
    pub refunded_amount: Option<Amount>,

    /// When the refund was issued.
    pub refunded_at: Option<DateTime<Utc>>,
}

impl Purchase {
    /// Create a new pending purchase.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reference_id: impl Into<String>,
        organization_id: OrganizationId,
        purchase_type: PurchaseType,
        token_quantity: i64,
        price_per_token: Amount,
        total_amount: Amount,
        currency: impl Into<String>,
        package_id: Option<String>,
        payment_method_id: impl Into<String>,
    ) -> Self {
        Self {
            id: PurchaseId::generate(),
            reference_id: reference_id.into(),
            organization_id,
            purchase_type,
            token_quantity,
            price_per_token,
            total_amount,
            currency: currency.into(),
            package_id,
            status: PurchaseStatus::Pending,
            payment_method_id: payment_method_id.into(),
            gateway_transaction_id: None,
            created_at: Utc::now(),
            claimed_at: None,
            tokens_allocated_at: None,
            completed_at: None,
            failure_reason: None,
            refunded_tokens: None,
            refunded_amount: None,
            refunded_at: None,
        }
    }

    /// Whether an initialization request with these parameters describes the
    /// same purchase. Used to detect a reference reused with *different*
    /// parameters, which is a [`crate::LedgerError::DuplicatePurchase`].
    #[must_use]
    pub fn matches_request(
        &self,
        organization_id: OrganizationId,
        purchase_type: PurchaseType,
        token_quantity: i64,
        payment_method_id: &str,
    ) -> bool {
        self.organization_id == organization_id
            && self.purchase_type == purchase_type
            && self.token_quantity == token_quantity
            && self.payment_method_id == payment_method_id
    }
}
