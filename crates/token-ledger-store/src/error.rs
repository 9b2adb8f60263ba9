//! Error types for the ledger store.

use token_ledger_core::LedgerError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind.
        entity: &'static str,
        /// Missing identifier.
        id: String,
    },

    /// A debit would overdraw the wallet.
    #[error("insufficient balance: balance={balance}, required={required}")]
    InsufficientBalance {
        /// Current token balance.
        balance: i64,
        /// Tokens required.
        required: i64,
    },

    /// The wallet does not accept debits.
    #[error("wallet suspended: {organization_id}")]
    WalletSuspended {
        /// The suspended organization.
        organization_id: String,
    },

    /// A purchase reference already exists.
    #[error("duplicate purchase reference: {reference_id}")]
    DuplicateReference {
        /// The reused reference.
        reference_id: String,
    },

    /// A compare-and-swap transition found the record in another state.
    #[error("invalid state for {entity} {id}: expected {expected}, found {actual}")]
    InvalidState {
        /// Entity kind.
        entity: &'static str,
        /// Record identifier.
        id: String,
        /// State the transition required.
        expected: &'static str,
        /// State actually found.
        actual: String,
    },

    /// Another worker holds the lease on this record.
    #[error("lease held on {entity} {id}")]
    LeaseHeld {
        /// Entity kind.
        entity: &'static str,
        /// Record identifier.
        id: String,
    },
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Database(msg) => Self::Storage(msg),
            StoreError::Serialization(msg) => Self::Serialization(msg),
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            StoreError::InsufficientBalance { balance, required } => {
                Self::InsufficientBalance { balance, required }
            }
            StoreError::WalletSuspended { organization_id } => {
                Self::WalletSuspended { organization_id }
            }
            StoreError::DuplicateReference { reference_id } => {
                Self::DuplicatePurchase { reference_id }
            }
            StoreError::InvalidState {
                entity,
                id,
                expected,
                actual,
            } => Self::InvalidState(format!(
                "{entity} {id}: expected {expected}, found {actual}"
            )),
            StoreError::LeaseHeld { entity, id } => {
                Self::ConcurrencyConflict(format!("{entity} {id}"))
            }
        }
    }
}
