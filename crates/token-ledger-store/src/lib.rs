//! `RocksDB` ledger store for the token wallet engine.
//!
//! Durable record of wallet state, purchases, subscriptions, auto-top-up
//! policies, and the append-only balance history, with the atomic compound
//! operations the engines are built on.
//!
//! # Architecture
//!
//! Storage uses `RocksDB` column families (see [`schema`]) with CBOR row
//! encoding. Compound mutations (a balance change plus its history entry,
//! a purchase completion plus its wallet credit) are written in a single
//! `WriteBatch`, so the ledger invariant and the history round-trip property
//! cannot be broken by a crash between writes.
//!
//! # Concurrency contract
//!
//! Debits and credits are linearizable per wallet: every wallet-mutating
//! operation runs under that organization's entry in a process-wide lock
//! table (a single-writer queue per organization). No two concurrent debits
//! can overdraw a wallet, and no update is lost under concurrent
//! credit+debit. Purchase claims and subscription leases use the same
//! serialization, which makes their read-check-write transitions effective
//! compare-and-swap gates.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;

use chrono::{DateTime, Duration, Utc};
use token_ledger_core::{
    Amount, AutoTopupPolicy, BalanceHistoryEntry, ChangeType, NotificationThreshold,
    OrganizationId, Purchase, ReferenceType, Subscription, SubscriptionId, ThresholdId, Wallet,
};

/// Provenance of a balance change, recorded in its history entry.
#[derive(Debug, Clone, Copy)]
pub struct ChangeRecord<'a> {
    /// What kind of change this is.
    pub change_type: ChangeType,

    /// Kind of the causing entity.
    pub reference_type: ReferenceType,

    /// Identifier of the causing entity.
    pub reference_id: &'a str,

    /// Who performed the change.
    pub performed_by: &'a str,
}

/// Filters for balance history listings.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    /// Maximum entries to return (0 = no limit).
    pub limit: usize,

    /// Entries to skip, for pagination.
    pub offset: usize,

    /// Only entries at or after this instant.
    pub since: Option<DateTime<Utc>>,

    /// Only entries of this change type.
    pub change_type: Option<ChangeType>,

    /// Return oldest first instead of the default newest first.
    pub oldest_first: bool,
}

/// The storage trait defining all ledger database operations.
///
/// Abstracts the backend so engines can be tested against any
/// implementation; [`RocksStore`] is the production one.
pub trait Store: Send + Sync {
    // =========================================================================
    // Wallets
    // =========================================================================

    /// Insert or replace a wallet record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_wallet(&self, wallet: &Wallet) -> Result<()>;

    /// Get a wallet by organization id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_wallet(&self, organization_id: &OrganizationId) -> Result<Option<Wallet>>;

    /// Debit tokens from a wallet and append the history entry atomically.
    ///
    /// Returns the updated wallet.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the wallet doesn't exist.
    /// - [`StoreError::WalletSuspended`] if the wallet is inactive.
    /// - [`StoreError::InsufficientBalance`] if `amount` exceeds the balance.
    fn debit(
        &self,
        organization_id: &OrganizationId,
        amount: i64,
        record: ChangeRecord<'_>,
    ) -> Result<Wallet>;

    /// Credit tokens to a wallet and append the history entry atomically.
    ///
    /// Credits are accepted even while the wallet is suspended, so that a
    /// suspended organization can be recovered with a top-up.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the wallet doesn't exist.
    fn credit(
        &self,
        organization_id: &OrganizationId,
        amount: i64,
        record: ChangeRecord<'_>,
    ) -> Result<Wallet>;

    /// Apply a signed manual adjustment.
    ///
    /// The only operation permitted to take a balance transiently negative,
    /// during refund reconciliation. Adjusts the lifetime counters so the
    /// balance invariant keeps holding.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the wallet doesn't exist.
    fn adjust(
        &self,
        organization_id: &OrganizationId,
        signed_amount: i64,
        reference_id: &str,
        performed_by: &str,
    ) -> Result<Wallet>;

    /// List balance history entries for an organization, newest first by
    /// default.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_history(
        &self,
        organization_id: &OrganizationId,
        filter: &HistoryFilter,
    ) -> Result<Vec<BalanceHistoryEntry>>;

    // =========================================================================
    // Purchases
    // =========================================================================

    /// Insert a new purchase, enforcing reference uniqueness.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateReference`] if the reference already
    /// exists.
    fn create_purchase(&self, purchase: &Purchase) -> Result<()>;

    /// Get a purchase by its idempotency reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_purchase(&self, reference_id: &str) -> Result<Option<Purchase>>;

    /// List an organization's purchases, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_purchases(
        &self,
        organization_id: &OrganizationId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Purchase>>;

    /// Atomically transition a purchase `pending -> processing`.
    ///
    /// This is the idempotency gate of purchase execution: exactly one
    /// caller wins the claim; everyone else observes the state the winner
    /// left behind.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the reference is unknown.
    /// - [`StoreError::InvalidState`] if the purchase is not `pending`
    ///   (the `actual` field carries the state found).
    fn claim_purchase(&self, reference_id: &str, now: DateTime<Utc>) -> Result<Purchase>;

    /// Cancel a purchase that has not been claimed yet
    /// (`pending -> cancelled`).
    ///
    /// # Errors
    ///
    /// Same as [`Store::claim_purchase`].
    fn cancel_purchase(&self, reference_id: &str, now: DateTime<Utc>) -> Result<Purchase>;

    /// Complete a claimed purchase: credit the wallet, append the history
    /// entry, and mark the purchase `completed` — in one atomic write.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the reference or wallet is unknown.
    /// - [`StoreError::InvalidState`] if the purchase is not `processing`.
    fn complete_purchase(
        &self,
        reference_id: &str,
        gateway_transaction_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(Purchase, Wallet)>;

    /// Mark a claimed purchase permanently failed. No ledger mutation.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the reference is unknown.
    /// - [`StoreError::InvalidState`] if the purchase is not `processing`.
    fn fail_purchase(
        &self,
        reference_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Purchase>;

    /// Refund a completed purchase: debit the refunded tokens, append the
    /// `refund` history entry, and mark the purchase `refunded` atomically.
    ///
    /// The consumption-aware refundability check belongs to the
    /// orchestrator; this operation still refuses to overdraw the wallet.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the reference or wallet is unknown.
    /// - [`StoreError::InvalidState`] if the purchase is not `completed`.
    /// - [`StoreError::InsufficientBalance`] if the wallet cannot cover the
    ///   token debit.
    fn refund_purchase(
        &self,
        reference_id: &str,
        refund_tokens: i64,
        refund_amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<(Purchase, Wallet)>;

    /// Purchases stuck in `processing` since before `claimed_before`,
    /// oldest first. Input to the reconciliation job.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_stale_processing(
        &self,
        claimed_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Purchase>>;

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Insert or replace a subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_subscription(&self, subscription: &Subscription) -> Result<()>;

    /// Get a subscription by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_subscription(&self, subscription_id: &SubscriptionId) -> Result<Option<Subscription>>;

    /// List an organization's subscriptions.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_subscriptions(&self, organization_id: &OrganizationId) -> Result<Vec<Subscription>>;

    /// Subscriptions due for billing at `now` and not currently leased.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn due_subscriptions(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Subscription>>;

    /// Atomically claim a subscription for billing by setting its
    /// `processing_until` lease. Stale (expired) leases are reclaimed.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the subscription is unknown.
    /// - [`StoreError::LeaseHeld`] if another worker holds a live lease.
    fn claim_subscription(
        &self,
        subscription_id: &SubscriptionId,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Subscription>;

    // =========================================================================
    // Auto-top-up policies
    // =========================================================================

    /// Insert or replace an organization's policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_policy(&self, policy: &AutoTopupPolicy) -> Result<()>;

    /// Get an organization's policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_policy(&self, organization_id: &OrganizationId) -> Result<Option<AutoTopupPolicy>>;

    /// All enabled policies, for the periodic scan.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_enabled_policies(&self) -> Result<Vec<AutoTopupPolicy>>;

    // =========================================================================
    // Notification thresholds
    // =========================================================================

    /// Insert or replace a threshold.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_threshold(&self, threshold: &NotificationThreshold) -> Result<()>;

    /// List an organization's thresholds.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_thresholds(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<Vec<NotificationThreshold>>;

    /// Delete a threshold.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if it doesn't exist.
    fn delete_threshold(
        &self,
        organization_id: &OrganizationId,
        threshold_id: &ThresholdId,
    ) -> Result<()>;
}
