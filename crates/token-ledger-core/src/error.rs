//! Error taxonomy for the ledger engine.

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors that can occur across the ledger engine.
///
/// Validation errors are rejected before any mutation. Concurrency conflicts
/// are internal and retried with bounded backoff; callers only ever see
/// [`LedgerError::SystemBusy`] when retries exhaust. Gateway errors carry the
/// transient/permanent distinction the purchase orchestrator needs: a timeout
/// is an *unknown* outcome and must be resolved by reconciliation, never
/// treated as a failure.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Malformed request, rejected before any mutation.
    #[error("validation error: {0}")]
    Validation(String),

    /// A debit would overdraw the wallet.
    #[error("insufficient balance: balance={balance}, required={required}")]
    InsufficientBalance {
        /// Current token balance.
        balance: i64,
        /// Tokens required by the debit.
        required: i64,
    },

    /// The wallet is suspended and cannot be debited.
    #[error("wallet suspended for organization {organization_id}")]
    WalletSuspended {
        /// The suspended organization.
        organization_id: String,
    },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The entity kind (wallet, purchase, subscription, ...).
        entity: &'static str,
        /// The identifier that was not found.
        id: String,
    },

    /// An idempotency reference was reused with different parameters.
    #[error("duplicate purchase reference: {reference_id}")]
    DuplicatePurchase {
        /// The reused reference.
        reference_id: String,
    },

    /// The operation is not valid in the entity's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// An auto-top-up would exceed the monthly spending limit.
    #[error("monthly spending limit exceeded: spent={spent}, proposed={proposed}, limit={limit}")]
    SpendingLimitExceeded {
        /// Spend so far this month.
        spent: crate::Amount,
        /// Cost of the proposed top-up.
        proposed: crate::Amount,
        /// Configured monthly limit.
        limit: crate::Amount,
    },

    /// The payment gateway rejected the charge (terminal).
    #[error("payment declined: {0}")]
    PaymentDeclined(String),

    /// The payment gateway could not be reached or answered ambiguously.
    ///
    /// The outcome of any in-flight charge is unknown; reconciliation owns
    /// resolving it.
    #[error("payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// Concurrent writers raced on the same record (internal, retried).
    #[error("concurrency conflict on {0}")]
    ConcurrencyConflict(String),

    /// Internal retries exhausted; the caller should back off and retry.
    #[error("system busy, retry later")]
    SystemBusy,

    /// Storage failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] crate::ids::IdError),
}

impl LedgerError {
    /// Whether the error is an internal conflict worth retrying.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict(_))
    }
}
