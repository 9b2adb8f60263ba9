//! `RocksDB` storage implementation.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode, Options,
    WriteBatch,
};

use token_ledger_core::{
    Amount, AutoTopupPolicy, BalanceHistoryEntry, NotificationThreshold, OrganizationId, Purchase,
    PurchaseStatus, ReferenceType, Subscription, SubscriptionId, ThresholdId, Wallet,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{ChangeRecord, HistoryFilter, Store};

/// Lock-table namespaces. Wallet locks and purchase-reference locks are
/// distinct lock keys even when their bytes collide.
mod ns {
    pub const WALLET: u8 = b'w';
    pub const PURCHASE_REF: u8 = b'p';
    pub const SUBSCRIPTION: u8 = b's';
}

/// Process-wide lock table: one mutex per hot record.
///
/// This is the "single-writer queue per organization" of the concurrency
/// contract: every wallet mutation serializes on the wallet's entry, which
/// makes read-modify-write sequences linearizable per wallet and turns the
/// purchase/subscription status checks into effective compare-and-swap
/// gates.
#[derive(Default)]
struct LockTable {
    inner: Mutex<HashMap<Vec<u8>, Arc<Mutex<()>>>>,
}

impl LockTable {
    fn acquire(&self, namespace: u8, key: &[u8]) -> Arc<Mutex<()>> {
        let mut full = Vec::with_capacity(key.len() + 1);
        full.push(namespace);
        full.extend_from_slice(key);

        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(map.entry(full).or_default())
    }
}

fn hold(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

fn status_name(status: PurchaseStatus) -> String {
    format!("{status:?}").to_lowercase()
}

/// RocksDB-backed ledger store.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<rocksdb::MultiThreaded>>,
    locks: LockTable,
}

impl RocksStore {
    /// Open or create a database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            locks: LockTable::default(),
        })
    }

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn load_wallet(&self, organization_id: &OrganizationId) -> Result<Wallet> {
        self.get_wallet(organization_id)?
            .ok_or_else(|| StoreError::NotFound {
                entity: "wallet",
                id: organization_id.to_string(),
            })
    }

    fn load_purchase(&self, reference_id: &str) -> Result<Purchase> {
        self.get_purchase(reference_id)?
            .ok_or_else(|| StoreError::NotFound {
                entity: "purchase",
                id: reference_id.to_string(),
            })
    }

    /// Write a wallet and a history entry in one batch, optionally together
    /// with an updated purchase row.
    fn write_ledger_change(
        &self,
        wallet: &Wallet,
        entry: &BalanceHistoryEntry,
        purchase: Option<&Purchase>,
    ) -> Result<()> {
        let cf_wallets = self.cf(cf::WALLETS)?;
        let cf_history = self.cf(cf::HISTORY)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_wallets,
            keys::wallet_key(&wallet.organization_id),
            Self::serialize(wallet)?,
        );
        batch.put_cf(
            &cf_history,
            keys::history_key(&entry.organization_id, &entry.id),
            Self::serialize(entry)?,
        );

        if let Some(purchase) = purchase {
            let cf_purchases = self.cf(cf::PURCHASES)?;
            batch.put_cf(
                &cf_purchases,
                keys::purchase_key(&purchase.id),
                Self::serialize(purchase)?,
            );
        }

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn put_purchase_row(&self, purchase: &Purchase) -> Result<()> {
        let cf_purchases = self.cf(cf::PURCHASES)?;
        self.db
            .put_cf(
                &cf_purchases,
                keys::purchase_key(&purchase.id),
                Self::serialize(purchase)?,
            )
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Load a purchase and check it is in `expected` state, for the CAS
    /// transitions. Caller must hold the reference lock.
    fn load_purchase_in(
        &self,
        reference_id: &str,
        expected: PurchaseStatus,
        expected_name: &'static str,
    ) -> Result<Purchase> {
        let purchase = self.load_purchase(reference_id)?;
        if purchase.status != expected {
            return Err(StoreError::InvalidState {
                entity: "purchase",
                id: reference_id.to_string(),
                expected: expected_name,
                actual: status_name(purchase.status),
            });
        }
        Ok(purchase)
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Wallets
    // =========================================================================

    fn put_wallet(&self, wallet: &Wallet) -> Result<()> {
        let cf = self.cf(cf::WALLETS)?;
        self.db
            .put_cf(
                &cf,
                keys::wallet_key(&wallet.organization_id),
                Self::serialize(wallet)?,
            )
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get_wallet(&self, organization_id: &OrganizationId) -> Result<Option<Wallet>> {
        let cf = self.cf(cf::WALLETS)?;
        self.db
            .get_cf(&cf, keys::wallet_key(organization_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn debit(
        &self,
        organization_id: &OrganizationId,
        amount: i64,
        record: ChangeRecord<'_>,
    ) -> Result<Wallet> {
        let lock = self.locks.acquire(ns::WALLET, organization_id.as_bytes());
        let _guard = hold(&lock);

        let mut wallet = self.load_wallet(organization_id)?;

        if !wallet.is_active {
            return Err(StoreError::WalletSuspended {
                organization_id: organization_id.to_string(),
            });
        }
        if wallet.balance < amount {
            return Err(StoreError::InsufficientBalance {
                balance: wallet.balance,
                required: amount,
            });
        }

        let entry = BalanceHistoryEntry::debit(
            *organization_id,
            amount,
            wallet.balance,
            record.change_type,
            record.reference_type,
            record.reference_id,
            record.performed_by,
        );

        wallet.balance -= amount;
        wallet.total_consumed += amount;
        wallet.updated_at = entry.created_at;

        self.write_ledger_change(&wallet, &entry, None)?;

        tracing::debug!(
            organization_id = %organization_id,
            amount,
            balance = wallet.balance,
            "wallet debited"
        );

        Ok(wallet)
    }

    fn credit(
        &self,
        organization_id: &OrganizationId,
        amount: i64,
        record: ChangeRecord<'_>,
    ) -> Result<Wallet> {
        let lock = self.locks.acquire(ns::WALLET, organization_id.as_bytes());
        let _guard = hold(&lock);

        // No is_active check: credits are applied even while suspended so
        // that a recovery top-up can bring the organization back.
        let mut wallet = self.load_wallet(organization_id)?;

        let entry = BalanceHistoryEntry::credit(
            *organization_id,
            amount,
            wallet.balance,
            record.change_type,
            record.reference_type,
            record.reference_id,
            record.performed_by,
        );

        wallet.balance += amount;
        wallet.total_purchased += amount;
        wallet.updated_at = entry.created_at;

        self.write_ledger_change(&wallet, &entry, None)?;

        tracing::debug!(
            organization_id = %organization_id,
            amount,
            balance = wallet.balance,
            "wallet credited"
        );

        Ok(wallet)
    }

    fn adjust(
        &self,
        organization_id: &OrganizationId,
        signed_amount: i64,
        reference_id: &str,
        performed_by: &str,
    ) -> Result<Wallet> {
        let lock = self.locks.acquire(ns::WALLET, organization_id.as_bytes());
        let _guard = hold(&lock);

        let mut wallet = self.load_wallet(organization_id)?;

        let entry = BalanceHistoryEntry::adjustment(
            *organization_id,
            signed_amount,
            wallet.balance,
            reference_id,
            performed_by,
        );

        wallet.balance += signed_amount;
        if signed_amount >= 0 {
            wallet.total_purchased += signed_amount;
        } else {
            wallet.total_consumed += -signed_amount;
        }
        wallet.updated_at = entry.created_at;

        self.write_ledger_change(&wallet, &entry, None)?;

        tracing::info!(
            organization_id = %organization_id,
            signed_amount,
            performed_by,
            balance = wallet.balance,
            "manual adjustment applied"
        );

        Ok(wallet)
    }

    fn list_history(
        &self,
        organization_id: &OrganizationId,
        filter: &HistoryFilter,
    ) -> Result<Vec<BalanceHistoryEntry>> {
        let cf = self.cf(cf::HISTORY)?;
        let prefix = keys::org_prefix(organization_id);

        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward));

        // Keys are org || ULID, so the scan is already chronological.
        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            let entry: BalanceHistoryEntry = Self::deserialize(&value)?;
            if filter.since.is_some_and(|since| entry.created_at < since) {
                continue;
            }
            if filter
                .change_type
                .is_some_and(|ct| entry.change_type != ct)
            {
                continue;
            }
            entries.push(entry);
        }

        if !filter.oldest_first {
            entries.reverse();
        }

        let limit = if filter.limit == 0 {
            usize::MAX
        } else {
            filter.limit
        };
        Ok(entries.into_iter().skip(filter.offset).take(limit).collect())
    }

    // =========================================================================
    // Purchases
    // =========================================================================

    fn create_purchase(&self, purchase: &Purchase) -> Result<()> {
        let lock = self
            .locks
            .acquire(ns::PURCHASE_REF, purchase.reference_id.as_bytes());
        let _guard = hold(&lock);

        let cf_refs = self.cf(cf::PURCHASE_REFS)?;
        let ref_key = keys::purchase_ref_key(&purchase.reference_id);

        let exists = self
            .db
            .get_cf(&cf_refs, &ref_key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some();
        if exists {
            return Err(StoreError::DuplicateReference {
                reference_id: purchase.reference_id.clone(),
            });
        }

        let cf_purchases = self.cf(cf::PURCHASES)?;
        let cf_by_org = self.cf(cf::PURCHASES_BY_ORG)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_purchases,
            keys::purchase_key(&purchase.id),
            Self::serialize(purchase)?,
        );
        batch.put_cf(&cf_refs, &ref_key, purchase.id.to_bytes());
        batch.put_cf(
            &cf_by_org,
            keys::org_purchase_key(&purchase.organization_id, &purchase.id),
            [],
        );

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get_purchase(&self, reference_id: &str) -> Result<Option<Purchase>> {
        let cf_refs = self.cf(cf::PURCHASE_REFS)?;
        let Some(id_bytes) = self
            .db
            .get_cf(&cf_refs, keys::purchase_ref_key(reference_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
        else {
            return Ok(None);
        };

        let mut bytes = [0u8; 16];
        if id_bytes.len() != 16 {
            return Err(StoreError::Serialization(
                "malformed purchase reference index entry".into(),
            ));
        }
        bytes.copy_from_slice(&id_bytes);
        let purchase_id = token_ledger_core::PurchaseId::from_bytes(bytes);

        let cf_purchases = self.cf(cf::PURCHASES)?;
        self.db
            .get_cf(&cf_purchases, keys::purchase_key(&purchase_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn list_purchases(
        &self,
        organization_id: &OrganizationId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Purchase>> {
        let cf_by_org = self.cf(cf::PURCHASES_BY_ORG)?;
        let cf_purchases = self.cf(cf::PURCHASES)?;
        let prefix = keys::org_prefix(organization_id);

        let iter = self
            .db
            .iterator_cf(&cf_by_org, IteratorMode::From(&prefix, Direction::Forward));

        let mut all_keys: Vec<Vec<u8>> = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            all_keys.push(key.to_vec());
        }
        all_keys.reverse(); // newest first

        let mut purchases = Vec::new();
        for key in all_keys.into_iter().skip(offset).take(limit) {
            let purchase_id = keys::extract_purchase_id(&key);
            if let Some(data) = self
                .db
                .get_cf(&cf_purchases, keys::purchase_key(&purchase_id))
                .map_err(|e| StoreError::Database(e.to_string()))?
            {
                purchases.push(Self::deserialize(&data)?);
            }
        }

        Ok(purchases)
    }

    fn claim_purchase(&self, reference_id: &str, now: DateTime<Utc>) -> Result<Purchase> {
        let lock = self.locks.acquire(ns::PURCHASE_REF, reference_id.as_bytes());
        let _guard = hold(&lock);

        let mut purchase = self.load_purchase_in(reference_id, PurchaseStatus::Pending, "pending")?;
        purchase.status = PurchaseStatus::Processing;
        purchase.claimed_at = Some(now);
        self.put_purchase_row(&purchase)?;

        tracing::debug!(reference_id, "purchase claimed");
        Ok(purchase)
    }

    fn cancel_purchase(&self, reference_id: &str, now: DateTime<Utc>) -> Result<Purchase> {
        let lock = self.locks.acquire(ns::PURCHASE_REF, reference_id.as_bytes());
        let _guard = hold(&lock);

        let mut purchase = self.load_purchase_in(reference_id, PurchaseStatus::Pending, "pending")?;
        purchase.status = PurchaseStatus::Cancelled;
        purchase.completed_at = Some(now);
        self.put_purchase_row(&purchase)?;

        tracing::info!(reference_id, "purchase cancelled");
        Ok(purchase)
    }

    fn complete_purchase(
        &self,
        reference_id: &str,
        gateway_transaction_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(Purchase, Wallet)> {
        let ref_lock = self.locks.acquire(ns::PURCHASE_REF, reference_id.as_bytes());
        let _ref_guard = hold(&ref_lock);

        let mut purchase =
            self.load_purchase_in(reference_id, PurchaseStatus::Processing, "processing")?;

        // Lock order is always reference then wallet.
        let wallet_lock = self
            .locks
            .acquire(ns::WALLET, purchase.organization_id.as_bytes());
        let _wallet_guard = hold(&wallet_lock);

        let mut wallet = self.load_wallet(&purchase.organization_id)?;

        let entry = BalanceHistoryEntry::credit(
            purchase.organization_id,
            purchase.token_quantity,
            wallet.balance,
            purchase.purchase_type.into(),
            ReferenceType::Purchase,
            reference_id,
            "purchase-orchestrator",
        );

        wallet.balance += purchase.token_quantity;
        wallet.total_purchased += purchase.token_quantity;
        wallet.updated_at = entry.created_at;

        purchase.status = PurchaseStatus::Completed;
        purchase.gateway_transaction_id = Some(gateway_transaction_id.to_string());
        purchase.tokens_allocated_at = Some(now);
        purchase.completed_at = Some(now);

        self.write_ledger_change(&wallet, &entry, Some(&purchase))?;

        tracing::info!(
            reference_id,
            organization_id = %purchase.organization_id,
            tokens = purchase.token_quantity,
            balance = wallet.balance,
            "purchase completed, tokens credited"
        );

        Ok((purchase, wallet))
    }

    fn fail_purchase(
        &self,
        reference_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Purchase> {
        let lock = self.locks.acquire(ns::PURCHASE_REF, reference_id.as_bytes());
        let _guard = hold(&lock);

        let mut purchase =
            self.load_purchase_in(reference_id, PurchaseStatus::Processing, "processing")?;
        purchase.status = PurchaseStatus::Failed;
        purchase.failure_reason = Some(reason.to_string());
        purchase.completed_at = Some(now);
        self.put_purchase_row(&purchase)?;

        tracing::warn!(reference_id, reason, "purchase failed");
        Ok(purchase)
    }

    fn refund_purchase(
        &self,
        reference_id: &str,
        refund_tokens: i64,
        refund_amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<(Purchase, Wallet)> {
        let ref_lock = self.locks.acquire(ns::PURCHASE_REF, reference_id.as_bytes());
        let _ref_guard = hold(&ref_lock);

        let mut purchase =
            self.load_purchase_in(reference_id, PurchaseStatus::Completed, "completed")?;

        let wallet_lock = self
            .locks
            .acquire(ns::WALLET, purchase.organization_id.as_bytes());
        let _wallet_guard = hold(&wallet_lock);

        let mut wallet = self.load_wallet(&purchase.organization_id)?;
        if wallet.balance < refund_tokens {
            return Err(StoreError::InsufficientBalance {
                balance: wallet.balance,
                required: refund_tokens,
            });
        }

        let entry = BalanceHistoryEntry::debit(
            purchase.organization_id,
            refund_tokens,
            wallet.balance,
            token_ledger_core::ChangeType::Refund,
            ReferenceType::Purchase,
            reference_id,
            "purchase-orchestrator",
        );

        wallet.balance -= refund_tokens;
        wallet.total_consumed += refund_tokens;
        wallet.updated_at = entry.created_at;

        purchase.status = PurchaseStatus::Refunded;
        purchase.refunded_tokens = Some(refund_tokens);
        purchase.refunded_amount = Some(refund_amount);
        purchase.refunded_at = Some(now);

        self.write_ledger_change(&wallet, &entry, Some(&purchase))?;

        tracing::info!(
            reference_id,
            refund_tokens,
            refund_amount = %refund_amount,
            "purchase refunded"
        );

        Ok((purchase, wallet))
    }

    fn list_stale_processing(
        &self,
        claimed_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Purchase>> {
        let cf = self.cf(cf::PURCHASES)?;
        let mut stale = Vec::new();

        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let purchase: Purchase = Self::deserialize(&value)?;
            if purchase.status == PurchaseStatus::Processing
                && purchase
                    .claimed_at
                    .is_some_and(|claimed| claimed < claimed_before)
            {
                stale.push(purchase);
            }
        }

        stale.sort_by_key(|p| p.claimed_at);
        stale.truncate(limit);
        Ok(stale)
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    fn put_subscription(&self, subscription: &Subscription) -> Result<()> {
        let cf = self.cf(cf::SUBSCRIPTIONS)?;
        self.db
            .put_cf(
                &cf,
                keys::subscription_key(&subscription.id),
                Self::serialize(subscription)?,
            )
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get_subscription(&self, subscription_id: &SubscriptionId) -> Result<Option<Subscription>> {
        let cf = self.cf(cf::SUBSCRIPTIONS)?;
        self.db
            .get_cf(&cf, keys::subscription_key(subscription_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn list_subscriptions(&self, organization_id: &OrganizationId) -> Result<Vec<Subscription>> {
        // Subscription cardinality is small; a filtered scan is fine.
        let cf = self.cf(cf::SUBSCRIPTIONS)?;
        let mut subscriptions = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let subscription: Subscription = Self::deserialize(&value)?;
            if subscription.organization_id == *organization_id {
                subscriptions.push(subscription);
            }
        }
        subscriptions.sort_by_key(|s| s.created_at);
        Ok(subscriptions)
    }

    fn due_subscriptions(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Subscription>> {
        let cf = self.cf(cf::SUBSCRIPTIONS)?;
        let mut due = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let subscription: Subscription = Self::deserialize(&value)?;
            if subscription.is_due(now) && !subscription.is_leased(now) {
                due.push(subscription);
            }
        }
        due.sort_by_key(|s| s.next_billing_date);
        due.truncate(limit);
        Ok(due)
    }

    fn claim_subscription(
        &self,
        subscription_id: &SubscriptionId,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Subscription> {
        let lock = self
            .locks
            .acquire(ns::SUBSCRIPTION, subscription_id.as_bytes());
        let _guard = hold(&lock);

        let mut subscription =
            self.get_subscription(subscription_id)?
                .ok_or_else(|| StoreError::NotFound {
                    entity: "subscription",
                    id: subscription_id.to_string(),
                })?;

        if subscription.is_leased(now) {
            return Err(StoreError::LeaseHeld {
                entity: "subscription",
                id: subscription_id.to_string(),
            });
        }

        subscription.processing_until = Some(now + lease);
        subscription.updated_at = now;
        self.put_subscription(&subscription)?;

        tracing::debug!(subscription_id = %subscription_id, "subscription claimed for billing");
        Ok(subscription)
    }

    // =========================================================================
    // Auto-top-up policies
    // =========================================================================

    fn put_policy(&self, policy: &AutoTopupPolicy) -> Result<()> {
        let cf = self.cf(cf::TOPUP_POLICIES)?;
        self.db
            .put_cf(
                &cf,
                keys::policy_key(&policy.organization_id),
                Self::serialize(policy)?,
            )
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get_policy(&self, organization_id: &OrganizationId) -> Result<Option<AutoTopupPolicy>> {
        let cf = self.cf(cf::TOPUP_POLICIES)?;
        self.db
            .get_cf(&cf, keys::policy_key(organization_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn list_enabled_policies(&self) -> Result<Vec<AutoTopupPolicy>> {
        let cf = self.cf(cf::TOPUP_POLICIES)?;
        let mut policies = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let policy: AutoTopupPolicy = Self::deserialize(&value)?;
            if policy.is_enabled {
                policies.push(policy);
            }
        }
        Ok(policies)
    }

    // =========================================================================
    // Notification thresholds
    // =========================================================================

    fn put_threshold(&self, threshold: &NotificationThreshold) -> Result<()> {
        let cf = self.cf(cf::THRESHOLDS)?;
        self.db
            .put_cf(
                &cf,
                keys::threshold_key(&threshold.organization_id, &threshold.id),
                Self::serialize(threshold)?,
            )
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn list_thresholds(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<Vec<NotificationThreshold>> {
        let cf = self.cf(cf::THRESHOLDS)?;
        let prefix = keys::org_prefix(organization_id);

        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward));

        let mut thresholds = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            thresholds.push(Self::deserialize(&value)?);
        }
        Ok(thresholds)
    }

    fn delete_threshold(
        &self,
        organization_id: &OrganizationId,
        threshold_id: &ThresholdId,
    ) -> Result<()> {
        let cf = self.cf(cf::THRESHOLDS)?;
        let key = keys::threshold_key(organization_id, threshold_id);

        let exists = self
            .db
            .get_cf(&cf, &key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some();
        if !exists {
            return Err(StoreError::NotFound {
                entity: "threshold",
                id: threshold_id.to_string(),
            });
        }

        self.db
            .delete_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use tempfile::TempDir;
    use token_ledger_core::{
        BillingFrequency, ChangeType, PurchaseType, ThresholdKind, Wallet,
    };

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn funded_wallet(store: &RocksStore, balance: i64) -> OrganizationId {
        let org = OrganizationId::generate();
        let wallet = Wallet::new(org, Amount::from_minor(1));
        store.put_wallet(&wallet).unwrap();
        if balance > 0 {
            store
                .credit(
                    &org,
                    balance,
                    ChangeRecord {
                        change_type: ChangeType::Purchase,
                        reference_type: ReferenceType::Purchase,
                        reference_id: "seed",
                        performed_by: "test",
                    },
                )
                .unwrap();
        }
        org
    }

    fn consumption(reference_id: &str) -> ChangeRecord<'_> {
        ChangeRecord {
            change_type: ChangeType::Consumption,
            reference_type: ReferenceType::Consumption,
            reference_id,
            performed_by: "metering",
        }
    }

    fn pending_purchase(org: OrganizationId, reference: &str, tokens: i64) -> Purchase {
        Purchase::new(
            reference,
            org,
            PurchaseType::OneTime,
            tokens,
            Amount::from_minor(1),
            Amount::from_minor(tokens),
            "USD",
            None,
            "pm_test",
        )
    }

    #[test]
    fn debit_credit_maintain_invariant_and_history() {
        let (store, _dir) = create_test_store();
        let org = funded_wallet(&store, 1000);

        let wallet = store.debit(&org, 850, consumption("evt-1")).unwrap();
        assert_eq!(wallet.balance, 150);
        assert_eq!(wallet.total_purchased, 1000);
        assert_eq!(wallet.total_consumed, 850);
        assert!(wallet.invariant_holds());

        let history = store.list_history(&org, &HistoryFilter::default()).unwrap();
        assert_eq!(history.len(), 2); // seed credit + debit, newest first
        assert_eq!(history[0].change_amount, -850);
        assert_eq!(history[0].balance_after, 150);
        assert_eq!(history[1].change_amount, 1000);

        // Round-trip: the history sums to the balance.
        let sum: i64 = history.iter().map(|e| e.change_amount).sum();
        assert_eq!(sum, wallet.balance);
    }

    #[test]
    fn debit_rejects_overdraw() {
        let (store, _dir) = create_test_store();
        let org = funded_wallet(&store, 100);

        let err = store.debit(&org, 101, consumption("evt-1")).unwrap_err();
        assert!(matches!(
            err,
            StoreError::InsufficientBalance {
                balance: 100,
                required: 101
            }
        ));

        // No mutation, no history entry.
        let wallet = store.get_wallet(&org).unwrap().unwrap();
        assert_eq!(wallet.balance, 100);
        let history = store.list_history(&org, &HistoryFilter::default()).unwrap();
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn suspended_wallet_rejects_debits_but_accepts_credits() {
        let (store, _dir) = create_test_store();
        let org = funded_wallet(&store, 100);

        let mut wallet = store.get_wallet(&org).unwrap().unwrap();
        wallet.suspend("dispute", Utc::now());
        store.put_wallet(&wallet).unwrap();

        let err = store.debit(&org, 10, consumption("evt-1")).unwrap_err();
        assert!(matches!(err, StoreError::WalletSuspended { .. }));

        // Recovery top-up goes through.
        let wallet = store
            .credit(
                &org,
                50,
                ChangeRecord {
                    change_type: ChangeType::Purchase,
                    reference_type: ReferenceType::Purchase,
                    reference_id: "recovery",
                    performed_by: "test",
                },
            )
            .unwrap();
        assert_eq!(wallet.balance, 150);
    }

    #[test]
    fn adjust_may_go_negative_and_keeps_invariant() {
        let (store, _dir) = create_test_store();
        let org = funded_wallet(&store, 50);

        let wallet = store.adjust(&org, -80, "refund-recon", "ops").unwrap();
        assert_eq!(wallet.balance, -30);
        assert!(wallet.invariant_holds());
    }

    #[test]
    fn concurrent_debits_never_overdraw() {
        let (store, _dir) = create_test_store();
        let org = funded_wallet(&store, 150);
        let store = StdArc::new(store);

        let mut handles = Vec::new();
        for i in 0..2 {
            let store = StdArc::clone(&store);
            handles.push(std::thread::spawn(move || {
                let reference = format!("evt-{i}");
                store.debit(&org, 100, consumption(&reference))
            }));
        }

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(StoreError::InsufficientBalance { .. })
        )));

        let wallet = store.get_wallet(&org).unwrap().unwrap();
        assert_eq!(wallet.balance, 50);
    }

    #[test]
    fn invariant_holds_after_ten_thousand_random_operations() {
        let (store, _dir) = create_test_store();
        let org = funded_wallet(&store, 5_000);
        let store = StdArc::new(store);

        // Four writers, 2,500 mixed credits and debits each. A deterministic
        // xorshift keeps a failing run reproducible.
        let mut handles = Vec::new();
        for worker in 0..4u64 {
            let store = StdArc::clone(&store);
            handles.push(std::thread::spawn(move || {
                let mut state = 0x9e37_79b9_7f4a_7c15_u64 ^ (worker + 1);
                for i in 0..2_500u64 {
                    state ^= state << 13;
                    state ^= state >> 7;
                    state ^= state << 17;
                    let amount = (state % 50) as i64 + 1;
                    let reference = format!("op-{worker}-{i}");
                    if state % 3 == 0 {
                        store
                            .credit(
                                &org,
                                amount,
                                ChangeRecord {
                                    change_type: ChangeType::Purchase,
                                    reference_type: ReferenceType::Purchase,
                                    reference_id: &reference,
                                    performed_by: "test",
                                },
                            )
                            .unwrap();
                    } else {
                        match store.debit(&org, amount, consumption(&reference)) {
                            Ok(_) | Err(StoreError::InsufficientBalance { .. }) => {}
                            Err(err) => panic!("unexpected debit failure: {err}"),
                        }
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let wallet = store.get_wallet(&org).unwrap().unwrap();
        assert!(wallet.invariant_holds());
        assert!(wallet.balance >= 0);

        // Replaying the full history reproduces the balance.
        let history = store.list_history(&org, &HistoryFilter::default()).unwrap();
        let sum: i64 = history.iter().map(|e| e.change_amount).sum();
        assert_eq!(sum, wallet.balance);
    }

    #[test]
    fn duplicate_reference_rejected() {
        let (store, _dir) = create_test_store();
        let org = funded_wallet(&store, 0);

        store
            .create_purchase(&pending_purchase(org, "ref-1", 500))
            .unwrap();
        let err = store
            .create_purchase(&pending_purchase(org, "ref-1", 600))
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateReference { .. }));
    }

    #[test]
    fn claim_is_a_single_winner_gate() {
        let (store, _dir) = create_test_store();
        let org = funded_wallet(&store, 0);
        store
            .create_purchase(&pending_purchase(org, "ref-1", 500))
            .unwrap();

        let claimed = store.claim_purchase("ref-1", Utc::now()).unwrap();
        assert_eq!(claimed.status, PurchaseStatus::Processing);
        assert!(claimed.claimed_at.is_some());

        let err = store.claim_purchase("ref-1", Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidState {
                actual, ..
            } if actual == "processing"
        ));
    }

    #[test]
    fn complete_purchase_credits_atomically() {
        let (store, _dir) = create_test_store();
        let org = funded_wallet(&store, 0);
        store
            .create_purchase(&pending_purchase(org, "ref-1", 500))
            .unwrap();
        store.claim_purchase("ref-1", Utc::now()).unwrap();

        let (purchase, wallet) = store
            .complete_purchase("ref-1", "txn_123", Utc::now())
            .unwrap();
        assert_eq!(purchase.status, PurchaseStatus::Completed);
        assert_eq!(purchase.gateway_transaction_id.as_deref(), Some("txn_123"));
        assert!(purchase.tokens_allocated_at.is_some());
        assert_eq!(wallet.balance, 500);
        assert!(wallet.invariant_holds());

        let history = store.list_history(&org, &HistoryFilter::default()).unwrap();
        assert_eq!(history[0].change_type, ChangeType::Purchase);
        assert_eq!(history[0].reference_id, "ref-1");

        // Completing twice is rejected by the state gate.
        let err = store
            .complete_purchase("ref-1", "txn_123", Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidState { .. }));
    }

    #[test]
    fn fail_purchase_leaves_wallet_untouched() {
        let (store, _dir) = create_test_store();
        let org = funded_wallet(&store, 0);
        store
            .create_purchase(&pending_purchase(org, "ref-1", 500))
            .unwrap();
        store.claim_purchase("ref-1", Utc::now()).unwrap();

        let purchase = store
            .fail_purchase("ref-1", "card declined", Utc::now())
            .unwrap();
        assert_eq!(purchase.status, PurchaseStatus::Failed);
        assert_eq!(purchase.failure_reason.as_deref(), Some("card declined"));

        let wallet = store.get_wallet(&org).unwrap().unwrap();
        assert_eq!(wallet.balance, 0);
        let history = store.list_history(&org, &HistoryFilter::default()).unwrap();
        assert!(history.is_empty());
    }

    #[test]
    fn refund_debits_tokens_and_marks_refunded() {
        let (store, _dir) = create_test_store();
        let org = funded_wallet(&store, 0);
        store
            .create_purchase(&pending_purchase(org, "ref-1", 500))
            .unwrap();
        store.claim_purchase("ref-1", Utc::now()).unwrap();
        store
            .complete_purchase("ref-1", "txn_123", Utc::now())
            .unwrap();

        let (purchase, wallet) = store
            .refund_purchase("ref-1", 500, Amount::from_minor(500), Utc::now())
            .unwrap();
        assert_eq!(purchase.status, PurchaseStatus::Refunded);
        assert_eq!(purchase.refunded_tokens, Some(500));
        assert_eq!(wallet.balance, 0);
        assert!(wallet.invariant_holds());

        let history = store.list_history(&org, &HistoryFilter::default()).unwrap();
        assert_eq!(history[0].change_type, ChangeType::Refund);
        assert_eq!(history[0].change_amount, -500);
    }

    #[test]
    fn stale_processing_scan() {
        let (store, _dir) = create_test_store();
        let org = funded_wallet(&store, 0);
        store
            .create_purchase(&pending_purchase(org, "stuck", 500))
            .unwrap();
        store
            .create_purchase(&pending_purchase(org, "fresh", 500))
            .unwrap();

        let long_ago = Utc::now() - Duration::hours(1);
        store.claim_purchase("stuck", long_ago).unwrap();
        store.claim_purchase("fresh", Utc::now()).unwrap();

        let cutoff = Utc::now() - Duration::minutes(15);
        let stale = store.list_stale_processing(cutoff, 10).unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].reference_id, "stuck");
    }

    #[test]
    fn subscription_lease_claim_and_reclaim() {
        let (store, _dir) = create_test_store();
        let org = funded_wallet(&store, 0);
        let now = Utc::now();
        let sub = Subscription::new(
            org,
            None,
            1000,
            Amount::from_minor(1),
            BillingFrequency::Monthly,
            "pm_test",
            now - Duration::hours(1),
        );
        store.put_subscription(&sub).unwrap();

        let claimed = store
            .claim_subscription(&sub.id, now, Duration::minutes(10))
            .unwrap();
        assert!(claimed.is_leased(now));

        // A second worker cannot claim while the lease is live.
        let err = store
            .claim_subscription(&sub.id, now, Duration::minutes(10))
            .unwrap_err();
        assert!(matches!(err, StoreError::LeaseHeld { .. }));

        // After expiry the lease is reclaimable (crashed-worker tolerance).
        let later = now + Duration::minutes(11);
        store
            .claim_subscription(&sub.id, later, Duration::minutes(10))
            .unwrap();
    }

    #[test]
    fn due_subscriptions_skip_leased_and_undue() {
        let (store, _dir) = create_test_store();
        let org = funded_wallet(&store, 0);
        let now = Utc::now();

        let due = Subscription::new(
            org,
            None,
            1000,
            Amount::from_minor(1),
            BillingFrequency::Monthly,
            "pm_test",
            now - Duration::hours(1),
        );
        store.put_subscription(&due).unwrap();

        let mut not_due = due.clone();
        not_due.id = SubscriptionId::generate();
        not_due.next_billing_date = now + Duration::days(10);
        store.put_subscription(&not_due).unwrap();

        let mut leased = due.clone();
        leased.id = SubscriptionId::generate();
        leased.processing_until = Some(now + Duration::minutes(5));
        store.put_subscription(&leased).unwrap();

        let found = store.due_subscriptions(now, 10).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, due.id);
    }

    #[test]
    fn threshold_crud() {
        let (store, _dir) = create_test_store();
        let org = OrganizationId::generate();

        let threshold = NotificationThreshold::new(org, ThresholdKind::Percentage, 20);
        store.put_threshold(&threshold).unwrap();

        let listed = store.list_thresholds(&org).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].value, 20);

        store.delete_threshold(&org, &threshold.id).unwrap();
        assert!(store.list_thresholds(&org).unwrap().is_empty());

        let err = store.delete_threshold(&org, &threshold.id).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn history_filters() {
        let (store, _dir) = create_test_store();
        let org = funded_wallet(&store, 1000);
        store.debit(&org, 10, consumption("evt-1")).unwrap();
        store.debit(&org, 20, consumption("evt-2")).unwrap();

        let debits_only = store
            .list_history(
                &org,
                &HistoryFilter {
                    change_type: Some(ChangeType::Consumption),
                    ..HistoryFilter::default()
                },
            )
            .unwrap();
        assert_eq!(debits_only.len(), 2);
        assert!(debits_only.iter().all(|e| e.change_amount < 0));

        let paged = store
            .list_history(
                &org,
                &HistoryFilter {
                    limit: 1,
                    offset: 1,
                    ..HistoryFilter::default()
                },
            )
            .unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].reference_id, "evt-1");

        let oldest_first = store
            .list_history(
                &org,
                &HistoryFilter {
                    oldest_first: true,
                    ..HistoryFilter::default()
                },
            )
            .unwrap();
        assert_eq!(oldest_first[0].reference_id, "seed");
    }

    #[test]
    fn policy_roundtrip_and_enabled_scan() {
        let (store, _dir) = create_test_store();
        let org = OrganizationId::generate();

        let policy = AutoTopupPolicy::threshold(
            org,
            20,
            500,
            "pm_test",
            Amount::from_minor(10_000),
        );
        store.put_policy(&policy).unwrap();

        let loaded = store.get_policy(&org).unwrap().unwrap();
        assert_eq!(loaded.threshold_percentage, Some(20));

        let mut disabled = loaded;
        disabled.is_enabled = false;
        store.put_policy(&disabled).unwrap();
        assert!(store.list_enabled_policies().unwrap().is_empty());
    }
}
