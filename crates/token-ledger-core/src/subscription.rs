//! Recurring purchase contracts.

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::{Amount, OrganizationId, SubscriptionId};

/// How often a subscription bills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingFrequency {
    /// Every month.
    Monthly,

    /// Every three months.
    Quarterly,

    /// Every twelve months.
    Annual,
}

impl BillingFrequency {
    /// Advance a billing date by one cycle.
    ///
    /// Calendar-aware: Jan 31 monthly advances to Feb 28/29.
    #[must_use]
    pub fn advance(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        let months = match self {
            Self::Monthly => 1,
            Self::Quarterly => 3,
            Self::Annual => 12,
        };
        from.checked_add_months(Months::new(months)).unwrap_or(from)
    }
}

/// Lifecycle state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Billing normally.
    Active,

    /// Paused by the user; skipped by the scheduler until resumed.
    Paused,

    /// Last billing attempt failed; retried within the grace window.
    PaymentFailed,

    /// Terminal: cancelled by the user or by repeated payment failure.
    Cancelled,

    /// Terminal: reached its natural end.
    Expired,
}

impl SubscriptionStatus {
    /// Whether the subscription can never bill again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Expired)
    }
}

/// A recurring token purchase contract.
///
/// Mutated by the subscription scheduler (billing outcomes) and by user
/// pause/resume/cancel actions; the two never conflict because billing runs
/// only under a claimed lease.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Subscription id.
    pub id: SubscriptionId,

    /// The subscribing organization.
    pub organization_id: OrganizationId,

    /// Package the subscription was created from, if any.
    pub package_id: Option<String>,

    /// Tokens granted per billing cycle.
    pub token_quantity: i64,

    /// Per-token price locked at subscription time.
    pub price_per_token: Amount,

    /// Billing cadence.
    pub frequency: BillingFrequency,

    /// Current lifecycle state.
    pub status: SubscriptionStatus,

    /// Gateway payment-method token charged each cycle.
    pub payment_method_id: String,

    /// Next date the scheduler should bill.
    pub next_billing_date: DateTime<Utc>,

    /// When the subscription last billed successfully.
    pub last_billing_date: Option<DateTime<Utc>>,

    /// Consecutive failed billing attempts in the current cycle.
    pub failed_payment_count: u32,

    /// End of the grace window opened by the first failure in a cycle.
    pub grace_period_ends: Option<DateTime<Utc>>,

    /// Worker lease. While set and in the future, exactly one scheduler
    /// instance owns billing for this subscription; stale leases are
    /// reclaimed after expiry.
    pub processing_until: Option<DateTime<Utc>>,

    /// When the subscription was cancelled.
    pub cancelled_at: Option<DateTime<Utc>>,

    /// Why the subscription was cancelled.
    pub cancellation_reason: Option<String>,

    /// When the subscription was created.
    pub created_at: DateTime<Utc>,

    /// When the subscription was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Create a new active subscription billing from `first_billing_date`.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        organization_id: OrganizationId,
        package_id: Option<String>,
        token_quantity: i64,
        price_per_token: Amount,
        frequency: BillingFrequency,
        payment_method_id: impl Into<String>,
        first_billing_date: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: SubscriptionId::generate(),
            organization_id,
            package_id,
            token_quantity,
            price_per_token,
            frequency,
            status: SubscriptionStatus::Active,
            payment_method_id: payment_method_id.into(),
            next_billing_date: first_billing_date,
            last_billing_date: None,
            failed_payment_count: 0,
            grace_period_ends: None,
            processing_until: None,
            cancelled_at: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the scheduler should consider this subscription at `now`.
    ///
    /// Active subscriptions bill when due. `payment_failed` subscriptions
    /// always need attention: a retry inside the grace window, cancellation
    /// after it (see [`Subscription::grace_expired`]).
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            SubscriptionStatus::Active => self.next_billing_date <= now,
            SubscriptionStatus::PaymentFailed => true,
            _ => false,
        }
    }

    /// Whether the grace window opened by the first payment failure has
    /// closed without a successful retry.
    #[must_use]
    pub fn grace_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::PaymentFailed
            && self.grace_period_ends.is_some_and(|ends| now > ends)
    }

    /// Whether the lease is held by some worker at `now`.
    #[must_use]
    pub fn is_leased(&self, now: DateTime<Utc>) -> bool {
        self.processing_until.is_some_and(|until| until > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn frequency_advance_is_calendar_aware() {
        let jan31 = Utc.with_ymd_and_hms(2025, 1, 31, 12, 0, 0).unwrap();
        let next = BillingFrequency::Monthly.advance(jan31);
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 2, 28, 12, 0, 0).unwrap());

        let q = BillingFrequency::Quarterly.advance(jan31);
        assert_eq!(q, Utc.with_ymd_and_hms(2025, 4, 30, 12, 0, 0).unwrap());

        let y = BillingFrequency::Annual.advance(jan31);
        assert_eq!(y, Utc.with_ymd_and_hms(2026, 1, 31, 12, 0, 0).unwrap());
    }

    #[test]
    fn due_when_billing_date_passed() {
        let now = Utc::now();
        let sub = Subscription::new(
            OrganizationId::generate(),
            None,
            1000,
            Amount::from_minor(1),
            BillingFrequency::Monthly,
            "pm_test",
            now - chrono::Duration::hours(1),
        );
        assert!(sub.is_due(now));

        let mut future = sub.clone();
        future.next_billing_date = now + chrono::Duration::hours(1);
        assert!(!future.is_due(now));
    }

    #[test]
    fn paused_is_never_due() {
        let now = Utc::now();
        let mut sub = Subscription::new(
            OrganizationId::generate(),
            None,
            1000,
            Amount::from_minor(1),
            BillingFrequency::Monthly,
            "pm_test",
            now - chrono::Duration::hours(1),
        );
        sub.status = SubscriptionStatus::Paused;
        assert!(!sub.is_due(now));
    }

    #[test]
    fn payment_failed_is_due_and_grace_expiry_is_separate() {
        let now = Utc::now();
        let mut sub = Subscription::new(
            OrganizationId::generate(),
            None,
            1000,
            Amount::from_minor(1),
            BillingFrequency::Monthly,
            "pm_test",
            now,
        );
        sub.status = SubscriptionStatus::PaymentFailed;
        sub.grace_period_ends = Some(now + chrono::Duration::days(3));
        assert!(sub.is_due(now));
        assert!(!sub.grace_expired(now));

        // Still due after the window, but only so the scheduler can cancel.
        sub.grace_period_ends = Some(now - chrono::Duration::hours(1));
        assert!(sub.is_due(now));
        assert!(sub.grace_expired(now));
    }

    #[test]
    fn lease_expiry() {
        let now = Utc::now();
        let mut sub = Subscription::new(
            OrganizationId::generate(),
            None,
            1000,
            Amount::from_minor(1),
            BillingFrequency::Monthly,
            "pm_test",
            now,
        );
        assert!(!sub.is_leased(now));

        sub.processing_until = Some(now + chrono::Duration::minutes(10));
        assert!(sub.is_leased(now));

        sub.processing_until = Some(now - chrono::Duration::minutes(1));
        assert!(!sub.is_leased(now));
    }
}
