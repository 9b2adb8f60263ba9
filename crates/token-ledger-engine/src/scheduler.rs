//! Recurring subscription billing.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use token_ledger_core::{
    BillingFrequency, LedgerError, OrganizationId, PricingConfig, Purchase, PurchaseStatus,
    PurchaseType, Result, Subscription, SubscriptionId, SubscriptionStatus,
};
use token_ledger_store::{Store, StoreError};

use crate::notify::{Notification, NotificationDispatcher};
use crate::purchase::PurchaseOrchestrator;

/// Scheduler tuning.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Days a `payment_failed` subscription may retry before cancellation.
    pub grace_period_days: i64,

    /// Consecutive failures that cancel the subscription.
    pub max_failed_payments: u32,

    /// Worker lease length for one billing attempt.
    pub lease_minutes: i64,

    /// Due subscriptions processed per run.
    pub batch_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            grace_period_days: 7,
            max_failed_payments: 3,
            lease_minutes: 10,
            batch_size: 50,
        }
    }
}

/// A request to create a subscription.
#[derive(Debug, Clone)]
pub struct SubscribeRequest {
    /// The subscribing organization.
    pub organization_id: OrganizationId,

    /// Catalog package. Exactly one of this and `custom_quantity`.
    pub package_id: Option<String>,

    /// Custom token quantity per cycle.
    pub custom_quantity: Option<i64>,

    /// Billing cadence.
    pub frequency: BillingFrequency,

    /// Gateway payment-method token.
    pub payment_method_id: String,

    /// First billing date; defaults to now (bill immediately).
    pub first_billing_date: Option<DateTime<Utc>>,
}

/// Outcome of one scheduler pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct BillingRunReport {
    /// Due subscriptions examined.
    pub examined: usize,

    /// Billed successfully.
    pub billed: usize,

    /// Billing attempts that failed (subscription still alive).
    pub failed: usize,

    /// Subscriptions cancelled this pass.
    pub cancelled: usize,

    /// Skipped: leased elsewhere, or charge outcome unknown.
    pub skipped: usize,
}

/// Bills due subscriptions and owns their lifecycle transitions.
///
/// Billing runs only under a claimed lease, so concurrent scheduler
/// instances never double-bill; a worker that dies mid-attempt leaves a
/// lease that expires and a purchase that reconciliation resolves. The
/// billing purchase reference encodes the cycle date and the retry ordinal,
/// which makes every attempt idempotent end to end.
pub struct SubscriptionScheduler {
    store: Arc<dyn Store>,
    orchestrator: Arc<PurchaseOrchestrator>,
    pricing: PricingConfig,
    notifier: Arc<dyn NotificationDispatcher>,
    config: SchedulerConfig,
}

impl SubscriptionScheduler {
    /// Create a scheduler.
    pub fn new(
        store: Arc<dyn Store>,
        orchestrator: Arc<PurchaseOrchestrator>,
        pricing: PricingConfig,
        notifier: Arc<dyn NotificationDispatcher>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            orchestrator,
            pricing,
            notifier,
            config,
        }
    }

    /// Create a subscription. Prices are locked at subscribe time.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] if the wallet or package doesn't exist.
    /// - [`LedgerError::Validation`] for a bad selector or quantity.
    pub fn subscribe(&self, request: &SubscribeRequest) -> Result<Subscription> {
        if request.payment_method_id.is_empty() {
            return Err(LedgerError::Validation(
                "payment_method_id is required".into(),
            ));
        }
        self.store
            .get_wallet(&request.organization_id)?
            .ok_or_else(|| LedgerError::NotFound {
                entity: "wallet",
                id: request.organization_id.to_string(),
            })?;

        let quote = self.pricing.quote(
            request.organization_id,
            request.package_id.as_deref(),
            request.custom_quantity,
        )?;

        let subscription = Subscription::new(
            request.organization_id,
            quote.package_id,
            quote.token_quantity,
            quote.price_per_token,
            request.frequency,
            request.payment_method_id.clone(),
            request.first_billing_date.unwrap_or_else(Utc::now),
        );
        self.store.put_subscription(&subscription)?;

        tracing::info!(
            subscription_id = %subscription.id,
            organization_id = %request.organization_id,
            tokens = subscription.token_quantity,
            ?request.frequency,
            "subscription created"
        );
        Ok(subscription)
    }

    /// Get a subscription by id.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] for an unknown id.
    pub fn load(&self, subscription_id: &SubscriptionId) -> Result<Subscription> {
        self.store
            .get_subscription(subscription_id)?
            .ok_or_else(|| LedgerError::NotFound {
                entity: "subscription",
                id: subscription_id.to_string(),
            })
    }

    /// List an organization's subscriptions.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub fn list(&self, organization_id: &OrganizationId) -> Result<Vec<Subscription>> {
        Ok(self.store.list_subscriptions(organization_id)?)
    }

    /// Pause an active subscription.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidState`] unless it is `active`.
    pub fn pause(&self, subscription_id: &SubscriptionId) -> Result<Subscription> {
        let mut subscription = self.load(subscription_id)?;
        if subscription.status != SubscriptionStatus::Active {
            return Err(LedgerError::InvalidState(format!(
                "subscription {subscription_id} is not active"
            )));
        }
        subscription.status = SubscriptionStatus::Paused;
        subscription.updated_at = Utc::now();
        self.store.put_subscription(&subscription)?;
        Ok(subscription)
    }

    /// Resume a paused subscription. A billing date that passed while paused
    /// bills on the next scheduler run.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidState`] unless it is `paused`.
    pub fn resume(&self, subscription_id: &SubscriptionId) -> Result<Subscription> {
        let mut subscription = self.load(subscription_id)?;
        if subscription.status != SubscriptionStatus::Paused {
            return Err(LedgerError::InvalidState(format!(
                "subscription {subscription_id} is not paused"
            )));
        }
        subscription.status = SubscriptionStatus::Active;
        subscription.updated_at = Utc::now();
        self.store.put_subscription(&subscription)?;
        Ok(subscription)
    }

    /// Cancel a subscription at the user's request.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidState`] if it is already terminal.
    pub fn cancel(&self, subscription_id: &SubscriptionId) -> Result<Subscription> {
        let mut subscription = self.load(subscription_id)?;
        if subscription.status.is_terminal() {
            return Err(LedgerError::InvalidState(format!(
                "subscription {subscription_id} is already terminal"
            )));
        }
        let now = Utc::now();
        subscription.status = SubscriptionStatus::Cancelled;
        subscription.cancelled_at = Some(now);
        subscription.cancellation_reason = Some("cancelled by user".into());
        subscription.processing_until = None;
        subscription.updated_at = now;
        self.store.put_subscription(&subscription)?;

        tracing::info!(subscription_id = %subscription_id, "subscription cancelled by user");
        Ok(subscription)
    }

    /// One scheduler pass: claim and bill every due subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails; per-subscription billing trouble
    /// is absorbed into the report.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<BillingRunReport> {
        let due = self.store.due_subscriptions(now, self.config.batch_size)?;
        let mut report = BillingRunReport {
            examined: due.len(),
            ..BillingRunReport::default()
        };

        for subscription in due {
            let lease = Duration::minutes(self.config.lease_minutes);
            let claimed = match self.store.claim_subscription(&subscription.id, now, lease) {
                Ok(claimed) => claimed,
                Err(StoreError::LeaseHeld { .. }) => {
                    report.skipped += 1;
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            if claimed.grace_expired(now) {
                self.cancel_failed(claimed, "grace period expired without payment", now)?;
                report.cancelled += 1;
                continue;
            }

            match self.bill(claimed, now).await? {
                BillOutcome::Billed => report.billed += 1,
                BillOutcome::Failed => report.failed += 1,
                BillOutcome::Cancelled => report.cancelled += 1,
                BillOutcome::Unknown => report.skipped += 1,
            }
        }

        tracing::info!(
            examined = report.examined,
            billed = report.billed,
            failed = report.failed,
            cancelled = report.cancelled,
            skipped = report.skipped,
            "subscription billing pass finished"
        );
        Ok(report)
    }

    /// Bill one claimed subscription.
    async fn bill(&self, mut subscription: Subscription, now: DateTime<Utc>) -> Result<BillOutcome> {
        let wallet = self
            .store
            .get_wallet(&subscription.organization_id)?
            .ok_or_else(|| LedgerError::NotFound {
                entity: "wallet",
                id: subscription.organization_id.to_string(),
            })?;

        // Cycle date plus retry ordinal: unique per attempt, stable on
        // replay, so a re-run after a crash converges on the same purchase.
        let reference_id = format!(
            "sub-{}-{}-{}",
            subscription.id,
            subscription.next_billing_date.format("%Y%m%d"),
            subscription.failed_payment_count,
        );

        let total_amount = subscription
            .price_per_token
            .checked_mul(subscription.token_quantity)
            .ok_or_else(|| LedgerError::Validation("billing total overflows".into()))?;

        let purchase = Purchase::new(
            reference_id.clone(),
            subscription.organization_id,
            PurchaseType::Subscription,
            subscription.token_quantity,
            subscription.price_per_token,
            total_amount,
            wallet.currency.clone(),
            subscription.package_id.clone(),
            subscription.payment_method_id.clone(),
        );
        match self.store.create_purchase(&purchase) {
            // Replay of an interrupted attempt; execute converges on it.
            Ok(()) | Err(StoreError::DuplicateReference { .. }) => {}
            Err(err) => return Err(err.into()),
        }

        match self.orchestrator.execute(&reference_id).await {
            Ok(purchase) if purchase.status == PurchaseStatus::Completed => {
                subscription.status = SubscriptionStatus::Active;
                subscription.last_billing_date = Some(now);
                subscription.failed_payment_count = 0;
                subscription.grace_period_ends = None;
                // Advance from the scheduled date, catching up if billing
                // was down for more than a cycle. Missed cycles are forgiven,
                // not back-charged.
                let mut next = subscription.frequency.advance(subscription.next_billing_date);
                while next <= now {
                    next = subscription.frequency.advance(next);
                }
                subscription.next_billing_date = next;
                subscription.processing_until = None;
                subscription.updated_at = now;
                self.store.put_subscription(&subscription)?;

                tracing::info!(
                    subscription_id = %subscription.id,
                    reference_id = %reference_id,
                    next_billing_date = %subscription.next_billing_date,
                    "subscription billed"
                );
                Ok(BillOutcome::Billed)
            }
            Ok(purchase) => {
                // Idempotent observation of an attempt that already failed.
                let reason = purchase
                    .failure_reason
                    .unwrap_or_else(|| "payment failed".to_string());
                self.record_failure(subscription, &reason, now)
            }
            Err(LedgerError::PaymentDeclined(reason)) => {
                self.record_failure(subscription, &reason, now)
            }
            Err(LedgerError::GatewayUnavailable(_)) => {
                // Outcome unknown. Keep the lease so nothing re-bills until
                // it expires; by then reconciliation has resolved the
                // purchase and the replayed reference converges.
                tracing::warn!(
                    subscription_id = %subscription.id,
                    reference_id = %reference_id,
                    "billing outcome unknown; holding lease for reconciliation"
                );
                Ok(BillOutcome::Unknown)
            }
            Err(err) => Err(err),
        }
    }

    fn record_failure(
        &self,
        mut subscription: Subscription,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<BillOutcome> {
        subscription.failed_payment_count += 1;

        if subscription.failed_payment_count >= self.config.max_failed_payments {
            let reason = format!(
                "{} consecutive payment failures (last: {reason})",
                subscription.failed_payment_count
            );
            self.cancel_failed(subscription, &reason, now)?;
            return Ok(BillOutcome::Cancelled);
        }

        subscription.status = SubscriptionStatus::PaymentFailed;
        // The grace window opens at the first failure and never moves.
        if subscription.grace_period_ends.is_none() {
            subscription.grace_period_ends =
                Some(now + Duration::days(self.config.grace_period_days));
        }
        subscription.processing_until = None;
        subscription.updated_at = now;
        self.store.put_subscription(&subscription)?;

        tracing::warn!(
            subscription_id = %subscription.id,
            failed_payment_count = subscription.failed_payment_count,
            reason,
            "subscription billing failed"
        );
        Ok(BillOutcome::Failed)
    }

    fn cancel_failed(
        &self,
        mut subscription: Subscription,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        subscription.status = SubscriptionStatus::Cancelled;
        subscription.cancelled_at = Some(now);
        subscription.cancellation_reason = Some(reason.to_string());
        subscription.processing_until = None;
        subscription.updated_at = now;
        self.store.put_subscription(&subscription)?;

        self.notifier.dispatch(&Notification::SubscriptionCancelled {
            organization_id: subscription.organization_id,
            reason: reason.to_string(),
        });
        Ok(())
    }
}

enum BillOutcome {
    Billed,
    Failed,
    Cancelled,
    Unknown,
}
