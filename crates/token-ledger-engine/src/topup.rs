//! Automatic wallet replenishment.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use token_ledger_core::{
    AutoTopupPolicy, LedgerError, OrganizationId, PricingConfig, Purchase, PurchaseId,
    PurchaseType, Result,
};
use token_ledger_store::Store;

use crate::notify::{Notification, NotificationDispatcher};
use crate::purchase::{PurchaseOrchestrator, PurchaseRequest};

/// Consecutive failures after which a policy auto-pauses.
const MAX_TOPUP_FAILURES: u32 = 3;

/// Outcome of one top-up scan.
#[derive(Debug, Default, Clone, Copy)]
pub struct TopupRunReport {
    /// Enabled policies examined.
    pub examined: usize,

    /// Top-ups purchased.
    pub topped_up: usize,

    /// Policies with no trigger condition met (includes spending-cap skips).
    pub quiet: usize,

    /// Top-up purchases declined.
    pub failed: usize,

    /// Charges whose outcome is unknown, left for reconciliation.
    pub unknown: usize,
}

/// Evaluates auto-top-up policies and buys tokens when they fire.
///
/// A top-up is an ordinary purchase (`purchase_type = auto_topup`) executed
/// through the orchestrator, so it inherits idempotent execution and
/// reconciliation. The engine owns the policy bookkeeping around it:
/// calendar-day trigger dedup, the monthly spending window, and pausing the
/// policy after repeated declines.
pub struct AutoTopupEngine {
    store: Arc<dyn Store>,
    orchestrator: Arc<PurchaseOrchestrator>,
    pricing: PricingConfig,
    notifier: Arc<dyn NotificationDispatcher>,
}

impl AutoTopupEngine {
    /// Create an engine.
    pub fn new(
        store: Arc<dyn Store>,
        orchestrator: Arc<PurchaseOrchestrator>,
        pricing: PricingConfig,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            store,
            orchestrator,
            pricing,
            notifier,
        }
    }

    /// Insert or replace an organization's policy after validation.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Validation`] for inconsistent trigger configuration.
    /// - [`LedgerError::NotFound`] if the wallet doesn't exist.
    pub fn configure(&self, policy: &AutoTopupPolicy) -> Result<()> {
        self.store
            .get_wallet(&policy.organization_id)?
            .ok_or_else(|| LedgerError::NotFound {
                entity: "wallet",
                id: policy.organization_id.to_string(),
            })?;
        validate_policy(policy)?;
        self.store.put_policy(policy)?;

        tracing::info!(
            organization_id = %policy.organization_id,
            ?policy.trigger_type,
            tokens = policy.topup_token_quantity,
            "auto-top-up policy configured"
        );
        Ok(())
    }

    /// Get an organization's policy.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] when none is configured.
    pub fn load(&self, organization_id: &OrganizationId) -> Result<AutoTopupPolicy> {
        self.store
            .get_policy(organization_id)?
            .ok_or_else(|| LedgerError::NotFound {
                entity: "auto-top-up policy",
                id: organization_id.to_string(),
            })
    }

    /// Flip the master switch. Re-enabling also clears an auto-pause and the
    /// failure count.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] when no policy is configured.
    pub fn set_enabled(&self, organization_id: &OrganizationId, enabled: bool) -> Result<AutoTopupPolicy> {
        let mut policy = self.load(organization_id)?;
        policy.is_enabled = enabled;
        if enabled {
            policy.paused_at = None;
            policy.pause_reason = None;
            policy.failure_count = 0;
        }
        policy.updated_at = Utc::now();
        self.store.put_policy(&policy)?;
        Ok(policy)
    }

    /// Evaluate one organization's policy at `now` and top up if a trigger
    /// fires.
    ///
    /// Returns the purchase when a top-up completed, `None` when nothing
    /// fired (no policy, not operational, no trigger, or skipped by the
    /// spending cap).
    ///
    /// # Errors
    ///
    /// - [`LedgerError::PaymentDeclined`] when the top-up charge is
    ///   declined; the failure is counted against the policy.
    /// - [`LedgerError::GatewayUnavailable`] when the outcome is unknown;
    ///   not counted as a failure.
    pub async fn evaluate(
        &self,
        organization_id: &OrganizationId,
        now: DateTime<Utc>,
    ) -> Result<Option<Purchase>> {
        let Some(mut policy) = self.store.get_policy(organization_id)? else {
            return Ok(None);
        };
        if !policy.is_operational() {
            return Ok(None);
        }

        if policy.roll_spending_window(now) {
            self.store.put_policy(&policy)?;
        }

        let wallet = self
            .store
            .get_wallet(organization_id)?
            .ok_or_else(|| LedgerError::NotFound {
                entity: "wallet",
                id: organization_id.to_string(),
            })?;

        let threshold_fired = policy.threshold_due(&wallet, now);
        let schedule_fired = policy.schedule_due(now);
        if !threshold_fired && !schedule_fired {
            return Ok(None);
        }

        let custom_quantity = if policy.topup_package_id.is_none() {
            Some(policy.topup_token_quantity)
        } else {
            None
        };
        let quote = self.pricing.quote(
            *organization_id,
            policy.topup_package_id.as_deref(),
            custom_quantity,
        )?;

        // Cap check: a skip is bookkept like a trigger so it doesn't storm,
        // but it is never a failure.
        if policy.would_exceed_limit(quote.total_amount) {
            self.notifier.dispatch(&Notification::SpendingLimitReached {
                organization_id: *organization_id,
                spent: policy.current_month_spending,
                proposed: quote.total_amount,
                limit: policy.max_monthly_spending,
            });
            self.mark_triggered(&mut policy, schedule_fired, now);
            self.store.put_policy(&policy)?;
            return Ok(None);
        }

        let reference_id = format!("topup-{}", PurchaseId::generate());
        self.orchestrator.initialize(&PurchaseRequest {
            organization_id: *organization_id,
            reference_id: Some(reference_id.clone()),
            purchase_type: PurchaseType::AutoTopup,
            package_id: policy.topup_package_id.clone(),
            custom_quantity,
            payment_method_id: policy.payment_method_id.clone(),
        })?;

        match self.orchestrator.execute(&reference_id).await {
            Ok(purchase) => {
                policy.current_month_spending = policy
                    .current_month_spending
                    .checked_add(quote.total_amount)
                    .ok_or_else(|| {
                        LedgerError::Validation("monthly spending overflows".into())
                    })?;
                policy.failure_count = 0;
                policy.last_purchase_reference = Some(reference_id.clone());
                self.mark_triggered(&mut policy, schedule_fired, now);
                self.store.put_policy(&policy)?;

                tracing::info!(
                    organization_id = %organization_id,
                    reference_id = %reference_id,
                    tokens = purchase.token_quantity,
                    trigger = if threshold_fired { "threshold" } else { "scheduled" },
                    "auto-top-up completed"
                );
                Ok(Some(purchase))
            }
            Err(LedgerError::PaymentDeclined(reason)) => {
                policy.failure_count += 1;
                policy.last_purchase_reference = Some(reference_id);
                self.mark_triggered(&mut policy, schedule_fired, now);

                if policy.failure_count >= MAX_TOPUP_FAILURES {
                    let pause_reason = format!(
                        "{} consecutive top-up failures (last: {reason})",
                        policy.failure_count
                    );
                    policy.pause(pause_reason.clone(), now);
                    self.notifier.dispatch(&Notification::AutoTopupPaused {
                        organization_id: *organization_id,
                        reason: pause_reason,
                    });
                }
                self.store.put_policy(&policy)?;
                Err(LedgerError::PaymentDeclined(reason))
            }
            Err(err @ LedgerError::GatewayUnavailable(_)) => {
                // Unknown outcome: dedup the day, count nothing, let
                // reconciliation resolve the purchase.
                policy.last_purchase_reference = Some(reference_id);
                self.mark_triggered(&mut policy, schedule_fired, now);
                self.store.put_policy(&policy)?;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// One scan over every enabled policy.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails; per-policy payment trouble is
    /// absorbed into the report.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<TopupRunReport> {
        let policies = self.store.list_enabled_policies()?;
        let mut report = TopupRunReport {
            examined: policies.len(),
            ..TopupRunReport::default()
        };

        for policy in policies {
            match self.evaluate(&policy.organization_id, now).await {
                Ok(Some(_)) => report.topped_up += 1,
                Ok(None) => report.quiet += 1,
                Err(LedgerError::PaymentDeclined(_)) => report.failed += 1,
                Err(LedgerError::GatewayUnavailable(_)) => report.unknown += 1,
                Err(err) => return Err(err),
            }
        }

        tracing::info!(
            examined = report.examined,
            topped_up = report.topped_up,
            failed = report.failed,
            unknown = report.unknown,
            "auto-top-up pass finished"
        );
        Ok(report)
    }

    /// Record that a trigger fired and advance the schedule when it was the
    /// schedule that fired.
    fn mark_triggered(
        &self,
        policy: &mut AutoTopupPolicy,
        schedule_fired: bool,
        now: DateTime<Utc>,
    ) {
        policy.last_triggered_at = Some(now);
        if schedule_fired {
            if let Some(frequency) = policy.schedule_frequency {
                policy.next_scheduled_run = Some(frequency.next_run(now));
            }
        }
        policy.updated_at = now;
    }
}

fn validate_policy(policy: &AutoTopupPolicy) -> Result<()> {
    if policy.trigger_type.includes_threshold() {
        match policy.threshold_percentage {
            Some(pct) if (1..=99).contains(&pct) => {}
            _ => {
                return Err(LedgerError::Validation(
                    "threshold trigger requires threshold_percentage in 1..=99".into(),
                ))
            }
        }
    }
    if policy.trigger_type.includes_schedule() && policy.schedule_frequency.is_none() {
        return Err(LedgerError::Validation(
            "scheduled trigger requires schedule_frequency".into(),
        ));
    }
    if policy.topup_package_id.is_none() && policy.topup_token_quantity <= 0 {
        return Err(LedgerError::Validation(
            "top-up token quantity must be positive".into(),
        ));
    }
    if !policy.max_monthly_spending.is_positive() {
        return Err(LedgerError::Validation(
            "max monthly spending must be positive".into(),
        ));
    }
    Ok(())
}
