//! Wallet state, the append-only balance history, and low-balance alerts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Amount, EntryId, OrganizationId, ThresholdId, DEFAULT_CURRENCY};

/// A per-organization token wallet.
///
/// The invariant `balance == total_purchased - total_consumed` holds at every
/// observable instant; both lifetime counters only ever grow, except through
/// explicit signed adjustments which are recorded against both the balance
/// and the history log. Wallets are created at organization onboarding and
/// mutated only by the store's atomic operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    /// The owning organization.
    pub organization_id: OrganizationId,

    /// Current token balance.
    pub balance: i64,

    /// Lifetime tokens credited.
    pub total_purchased: i64,

    /// Lifetime tokens debited.
    pub total_consumed: i64,

    /// Default per-token price for this organization.
    pub price_per_token: Amount,

    /// ISO currency code for all monetary fields of this wallet.
    pub currency: String,

    /// Whether credited tokens expire.
    pub expiration_enabled: bool,

    /// Days until credited tokens expire, when expiration is enabled.
    pub expiration_days: Option<u32>,

    /// Whether the wallet accepts debits.
    pub is_active: bool,

    /// When the wallet was suspended, if it is.
    pub suspended_at: Option<DateTime<Utc>>,

    /// Why the wallet was suspended.
    pub suspension_reason: Option<String>,

    /// When the wallet was created.
    pub created_at: DateTime<Utc>,

    /// When the wallet was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Create a new active wallet with zero balance.
    #[must_use]
    pub fn new(organization_id: OrganizationId, price_per_token: Amount) -> Self {
        let now = Utc::now();
        Self {
            organization_id,
            balance: 0,
            total_purchased: 0,
            total_consumed: 0,
            price_per_token,
            currency: DEFAULT_CURRENCY.to_string(),
            expiration_enabled: false,
            expiration_days: None,
            is_active: true,
            suspended_at: None,
            suspension_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check the balance invariant.
    #[must_use]
    pub const fn invariant_holds(&self) -> bool {
        self.balance == self.total_purchased - self.total_consumed
    }

    /// Whether the wallet can cover a debit of `amount` tokens.
    #[must_use]
    pub const fn has_sufficient_balance(&self, amount: i64) -> bool {
        self.balance >= amount
    }

    /// Remaining balance as an integer percentage of lifetime purchases.
    ///
    /// `None` when nothing has ever been purchased, in which case percentage
    /// triggers do not apply.
    #[must_use]
    pub fn remaining_percent(&self) -> Option<i64> {
        if self.total_purchased <= 0 {
            return None;
        }
        Some(self.balance.saturating_mul(100) / self.total_purchased)
    }

    /// Mark the wallet suspended.
    pub fn suspend(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.is_active = false;
        self.suspended_at = Some(now);
        self.suspension_reason = Some(reason.into());
        self.updated_at = now;
    }

    /// Reactivate a suspended wallet.
    pub fn reactivate(&mut self, now: DateTime<Utc>) {
        self.is_active = true;
        self.suspended_at = None;
        self.suspension_reason = None;
        self.updated_at = now;
    }
}

/// What caused a balance change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Tokens credited by a one-time purchase.
    Purchase,

    /// Tokens debited by consumption.
    Consumption,

    /// Tokens credited by a subscription billing cycle.
    SubscriptionGrant,

    /// Tokens credited by an automatic top-up.
    AutoTopup,

    /// Tokens debited back out for a refund.
    Refund,

    /// Manual signed adjustment by an operator.
    Adjustment,
}

impl ChangeType {
    /// Whether entries of this type subtract from the balance.
    #[must_use]
    pub const fn is_debit(&self) -> bool {
        matches!(self, Self::Consumption | Self::Refund)
    }
}

/// The entity a history entry refers back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    /// A purchase record (`reference_id` is the purchase reference).
    Purchase,

    /// An external consumption/metering event.
    Consumption,

    /// A subscription billing cycle.
    Subscription,

    /// A manual adjustment (`performed_by` names the operator).
    Adjustment,
}

/// An immutable audit row recording one balance change.
///
/// Appended by every ledger mutation, never updated or deleted. The history
/// log is the sole input to forecasting and the reconciliation mechanism for
/// disputes: summing `change_amount` over all entries reproduces the current
/// balance exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceHistoryEntry {
    /// Entry id (ULID, time-ordered).
    pub id: EntryId,

    /// The organization whose wallet changed.
    pub organization_id: OrganizationId,

    /// Signed token delta. Positive = credit, negative = debit.
    pub change_amount: i64,

    /// Balance before the change.
    pub balance_before: i64,

    /// Balance after the change.
    pub balance_after: i64,

    /// What kind of change this was.
    pub change_type: ChangeType,

    /// Kind of the causing entity.
    pub reference_type: ReferenceType,

    /// Identifier of the causing entity (purchase reference, event id, ...).
    pub reference_id: String,

    /// Who performed the change (system component or operator identity).
    pub performed_by: String,

    /// When the change happened.
    pub created_at: DateTime<Utc>,
}

impl BalanceHistoryEntry {
    /// Build an entry for a credit of `amount` tokens.
    #[must_use]
    pub fn credit(
        organization_id: OrganizationId,
        amount: i64,
        balance_before: i64,
        change_type: ChangeType,
        reference_type: ReferenceType,
        reference_id: impl Into<String>,
        performed_by: impl Into<String>,
    ) -> Self {
        Self {
            id: EntryId::generate(),
            organization_id,
            change_amount: amount.abs(),
            balance_before,
            balance_after: balance_before + amount.abs(),
            change_type,
            reference_type,
            reference_id: reference_id.into(),
            performed_by: performed_by.into(),
            created_at: Utc::now(),
        }
    }

    /// Build an entry for a debit of `amount` tokens.
    #[must_use]
    pub fn debit(
        organization_id: OrganizationId,
        amount: i64,
        balance_before: i64,
        change_type: ChangeType,
        reference_type: ReferenceType,
        reference_id: impl Into<String>,
        performed_by: impl Into<String>,
    ) -> Self {
        Self {
            id: EntryId::generate(),
            organization_id,
            change_amount: -amount.abs(),
            balance_before,
            balance_after: balance_before - amount.abs(),
            change_type,
            reference_type,
            reference_id: reference_id.into(),
            performed_by: performed_by.into(),
            created_at: Utc::now(),
        }
    }

    /// Build an entry for a signed manual adjustment.
    ///
    /// The only entry kind permitted to take a balance transiently negative,
    /// during refund reconciliation.
    #[must_use]
    pub fn adjustment(
        organization_id: OrganizationId,
        signed_amount: i64,
        balance_before: i64,
        reference_id: impl Into<String>,
        performed_by: impl Into<String>,
    ) -> Self {
        Self {
            id: EntryId::generate(),
            organization_id,
            change_amount: signed_amount,
            balance_before,
            balance_after: balance_before + signed_amount,
            change_type: ChangeType::Adjustment,
            reference_type: ReferenceType::Adjustment,
            reference_id: reference_id.into(),
            performed_by: performed_by.into(),
            created_at: Utc::now(),
        }
    }
}

/// How a low-balance threshold is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdKind {
    /// Percentage of lifetime purchased tokens remaining.
    Percentage,

    /// Absolute token balance.
    Absolute,
}

/// Per-organization low-balance alert configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationThreshold {
    /// Threshold id.
    pub id: ThresholdId,

    /// The organization being watched.
    pub organization_id: OrganizationId,

    /// Percentage or absolute.
    pub kind: ThresholdKind,

    /// The trigger value (percent 0-100, or a token count).
    pub value: i64,

    /// When this threshold last fired. Used to suppress alert storms: a
    /// threshold does not fire twice on the same calendar day.
    pub last_triggered_at: Option<DateTime<Utc>>,

    /// How many notifications this threshold has produced.
    pub notifications_sent: u64,

    /// When the threshold was created.
    pub created_at: DateTime<Utc>,
}

impl NotificationThreshold {
    /// Create a new threshold.
    #[must_use]
    pub fn new(organization_id: OrganizationId, kind: ThresholdKind, value: i64) -> Self {
        Self {
            id: ThresholdId::generate(),
            organization_id,
            kind,
            value,
            last_triggered_at: None,
            notifications_sent: 0,
            created_at: Utc::now(),
        }
    }

    /// Whether the wallet is at or below this threshold.
    #[must_use]
    pub fn is_breached(&self, wallet: &Wallet) -> bool {
        match self.kind {
            ThresholdKind::Percentage => wallet
                .remaining_percent()
                .is_some_and(|pct| pct <= self.value),
            ThresholdKind::Absolute => wallet.balance <= self.value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet_with(balance: i64, purchased: i64) -> Wallet {
        let mut wallet = Wallet::new(OrganizationId::generate(), Amount::from_minor(1));
        wallet.balance = balance;
        wallet.total_purchased = purchased;
        wallet.total_consumed = purchased - balance;
        wallet
    }

    #[test]
    fn new_wallet_is_empty_and_active() {
        let wallet = Wallet::new(OrganizationId::generate(), Amount::from_minor(1));
        assert_eq!(wallet.balance, 0);
        assert!(wallet.is_active);
        assert!(wallet.invariant_holds());
    }

    #[test]
    fn remaining_percent_basis_is_lifetime_purchases() {
        let wallet = wallet_with(150, 1000);
        assert_eq!(wallet.remaining_percent(), Some(15));

        let fresh = Wallet::new(OrganizationId::generate(), Amount::from_minor(1));
        assert_eq!(fresh.remaining_percent(), None);
    }

    #[test]
    fn suspend_and_reactivate() {
        let mut wallet = wallet_with(10, 10);
        let now = Utc::now();
        wallet.suspend("payment dispute", now);
        assert!(!wallet.is_active);
        assert_eq!(wallet.suspended_at, Some(now));

        wallet.reactivate(now);
        assert!(wallet.is_active);
        assert!(wallet.suspension_reason.is_none());
    }

    #[test]
    fn history_entries_carry_signed_amounts() {
        let org = OrganizationId::generate();
        let credit = BalanceHistoryEntry::credit(
            org,
            500,
            100,
            ChangeType::Purchase,
            ReferenceType::Purchase,
            "ref-1",
            "purchase-orchestrator",
        );
        assert_eq!(credit.change_amount, 500);
        assert_eq!(credit.balance_after, 600);

        let debit = BalanceHistoryEntry::debit(
            org,
            50,
            600,
            ChangeType::Consumption,
            ReferenceType::Consumption,
            "evt-1",
            "metering",
        );
        assert_eq!(debit.change_amount, -50);
        assert_eq!(debit.balance_after, 550);
    }

    #[test]
    fn adjustment_may_go_negative() {
        let entry = BalanceHistoryEntry::adjustment(
            OrganizationId::generate(),
            -120,
            100,
            "refund-recon-7",
            "ops@example.com",
        );
        assert_eq!(entry.balance_after, -20);
        assert_eq!(entry.change_type, ChangeType::Adjustment);
    }

    #[test]
    fn threshold_breach_percentage_and_absolute() {
        let wallet = wallet_with(150, 1000); // 15 percent left

        let pct = NotificationThreshold::new(
            wallet.organization_id,
            ThresholdKind::Percentage,
            20,
        );
        assert!(pct.is_breached(&wallet));

        let abs =
            NotificationThreshold::new(wallet.organization_id, ThresholdKind::Absolute, 100);
        assert!(!abs.is_breached(&wallet));
    }
}
