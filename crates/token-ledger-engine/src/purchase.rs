//! Purchase lifecycle orchestration.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use token_ledger_core::{
    ChangeType, LedgerError, OrganizationId, PricingConfig, Purchase, PurchaseId, PurchaseStatus,
    PurchaseType, Result, Wallet,
};
use token_ledger_store::{HistoryFilter, Store, StoreError};

use crate::gateway::{ChargeRequest, ChargeStatus, PaymentGateway};
use crate::notify::{Notification, NotificationDispatcher};

/// A request to initialize a purchase.
#[derive(Debug, Clone)]
pub struct PurchaseRequest {
    /// The buying organization.
    pub organization_id: OrganizationId,

    /// Caller-supplied idempotency reference; generated when absent.
    pub reference_id: Option<String>,

    /// How the purchase is initiated.
    pub purchase_type: PurchaseType,

    /// Catalog package to buy. Exactly one of this and `custom_quantity`.
    pub package_id: Option<String>,

    /// Custom token quantity, priced at the organization's rate.
    pub custom_quantity: Option<i64>,

    /// Gateway payment-method token to charge.
    pub payment_method_id: String,
}

/// Outcome of a reconciliation pass over stuck purchases.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReconcileReport {
    /// Stale purchases examined.
    pub examined: usize,

    /// Resolved as completed (gateway had a successful charge).
    pub completed: usize,

    /// Resolved as failed (declined, or no gateway record).
    pub failed: usize,

    /// Left for the next pass because the gateway could not answer.
    pub skipped: usize,
}

/// Drives purchases through `pending -> processing -> terminal`.
///
/// Execution is idempotent end to end: the store's claim is the single-winner
/// gate, the purchase reference doubles as the gateway idempotency key, and
/// completion credits the wallet in the same atomic write that flips the
/// status. A purchase whose charge outcome is unknown stays `processing`
/// until [`PurchaseOrchestrator::reconcile`] resolves it, exactly once.
pub struct PurchaseOrchestrator {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    pricing: PricingConfig,
    notifier: Arc<dyn NotificationDispatcher>,
}

impl PurchaseOrchestrator {
    /// Create an orchestrator.
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        pricing: PricingConfig,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            store,
            gateway,
            pricing,
            notifier,
        }
    }

    /// Initialize a purchase: validate, price, and record it `pending`.
    ///
    /// Re-initializing with the same reference and the same parameters
    /// returns the existing purchase; the same reference with *different*
    /// parameters is rejected.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Validation`] for a bad request.
    /// - [`LedgerError::NotFound`] if the wallet or package doesn't exist.
    /// - [`LedgerError::DuplicatePurchase`] on a reference reused with
    ///   different parameters.
    pub fn initialize(&self, request: &PurchaseRequest) -> Result<Purchase> {
        if request.payment_method_id.is_empty() {
            return Err(LedgerError::Validation(
                "payment_method_id is required".into(),
            ));
        }

        // The wallet must exist before anything is recorded against it.
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

        let reference_id = request
            .reference_id
            .clone()
            .unwrap_or_else(|| format!("pur-{}", PurchaseId::generate()));

        let purchase = Purchase::new(
            reference_id.clone(),
            request.organization_id,
            request.purchase_type,
            quote.token_quantity,
            quote.price_per_token,
            quote.total_amount,
            quote.currency,
            quote.package_id,
            request.payment_method_id.clone(),
        );

        match self.store.create_purchase(&purchase) {
            Ok(()) => {
                tracing::info!(
                    reference_id = %reference_id,
                    organization_id = %request.organization_id,
                    tokens = purchase.token_quantity,
                    total = %purchase.total_amount,
                    "purchase initialized"
                );
                Ok(purchase)
            }
            Err(StoreError::DuplicateReference { .. }) => {
                let existing = self.load(&reference_id)?;
                if existing.matches_request(
                    request.organization_id,
                    request.purchase_type,
                    purchase.token_quantity,
                    &request.payment_method_id,
                ) {
                    Ok(existing)
                } else {
                    Err(LedgerError::DuplicatePurchase { reference_id })
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Execute a purchase: claim it, charge the gateway, credit the wallet.
    ///
    /// Safe to call concurrently and to replay: exactly one caller wins the
    /// claim; every other caller observes the state the winner left behind.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] for an unknown reference.
    /// - [`LedgerError::PaymentDeclined`] when the gateway declines; the
    ///   purchase is `failed` and the wallet untouched.
    /// - [`LedgerError::GatewayUnavailable`] when the charge outcome is
    ///   unknown; the purchase stays `processing` for reconciliation.
    /// - [`LedgerError::InvalidState`] when the purchase is already failed,
    ///   cancelled, or refunded.
    pub async fn execute(&self, reference_id: &str) -> Result<Purchase> {
        let purchase = match self.store.claim_purchase(reference_id, Utc::now()) {
            Ok(claimed) => claimed,
            Err(StoreError::InvalidState { .. }) => {
                // Someone already moved it past pending. A replayed success
                // and an in-flight claim both read back as what the winner
                // did; a terminal failure is not replayable.
                let existing = self.load(reference_id)?;
                return match existing.status {
                    PurchaseStatus::Completed | PurchaseStatus::Processing => Ok(existing),
                    status => {
                        let name = format!("{status:?}").to_lowercase();
                        Err(LedgerError::InvalidState(format!(
                            "purchase {reference_id} is {name} and cannot be executed"
                        )))
                    }
                };
            }
            Err(err) => return Err(err.into()),
        };

        let description = format!("{} tokens", purchase.token_quantity);
        let charge = ChargeRequest {
            idempotency_key: reference_id,
            payment_method_id: &purchase.payment_method_id,
            amount: purchase.total_amount,
            currency: &purchase.currency,
            description: &description,
        };

        match self.gateway.charge(&charge).await {
            Ok(outcome) if outcome.status == ChargeStatus::Succeeded => {
                let (purchase, _wallet) = self.store.complete_purchase(
                    reference_id,
                    &outcome.transaction_id,
                    Utc::now(),
                )?;
                Ok(purchase)
            }
            Ok(outcome) => {
                let reason = outcome
                    .decline_reason
                    .unwrap_or_else(|| "declined".to_string());
                self.store
                    .fail_purchase(reference_id, &reason, Utc::now())?;
                self.notifier.dispatch(&Notification::PaymentFailed {
                    organization_id: purchase.organization_id,
                    reference_id: reference_id.to_string(),
                    reason: reason.clone(),
                });
                Err(LedgerError::PaymentDeclined(reason))
            }
            Err(err) => {
                // Outcome unknown; the purchase stays processing on purpose.
                tracing::warn!(
                    reference_id,
                    %err,
                    "gateway gave no definitive answer; leaving purchase for reconciliation"
                );
                Err(LedgerError::GatewayUnavailable(err.to_string()))
            }
        }
    }

    /// Get a purchase by reference.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] for an unknown reference.
    pub fn load(&self, reference_id: &str) -> Result<Purchase> {
        self.store
            .get_purchase(reference_id)?
            .ok_or_else(|| LedgerError::NotFound {
                entity: "purchase",
                id: reference_id.to_string(),
            })
    }

    /// List an organization's purchases, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub fn list(
        &self,
        organization_id: &OrganizationId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Purchase>> {
        Ok(self.store.list_purchases(organization_id, limit, offset)?)
    }

    /// Cancel a purchase that has not been claimed yet.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidState`] unless the purchase is
    /// `pending`.
    pub fn cancel(&self, reference_id: &str) -> Result<Purchase> {
        Ok(self.store.cancel_purchase(reference_id, Utc::now())?)
    }

    /// Refund a completed purchase.
    ///
    /// Conservative rule: tokens consumed since the credit shrink the
    /// refundable portion; once the whole grant is consumed there is nothing
    /// to refund. The money refunded is the refundable tokens at the
    /// purchase's per-token price.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidState`] unless the purchase is `completed`,
    ///   or when nothing remains refundable.
    /// - [`LedgerError::GatewayUnavailable`] / [`LedgerError::PaymentDeclined`]
    ///   from the gateway refund; the ledger is untouched in both cases.
    pub async fn refund(&self, reference_id: &str) -> Result<(Purchase, Wallet)> {
        let purchase = self.load(reference_id)?;
        if purchase.status != PurchaseStatus::Completed {
            return Err(LedgerError::InvalidState(format!(
                "purchase {reference_id} is not completed"
            )));
        }
        let allocated_at = purchase.tokens_allocated_at.ok_or_else(|| {
            LedgerError::InvalidState(format!(
                "purchase {reference_id} has no allocation timestamp"
            ))
        })?;
        let transaction_id = purchase.gateway_transaction_id.clone().ok_or_else(|| {
            LedgerError::InvalidState(format!(
                "purchase {reference_id} has no gateway transaction"
            ))
        })?;

        let consumed_since = self.consumed_since(&purchase.organization_id, allocated_at)?;
        let refundable = purchase.token_quantity - consumed_since;
        if refundable <= 0 {
            return Err(LedgerError::InvalidState(format!(
                "purchase {reference_id} is fully consumed; nothing refundable"
            )));
        }

        let refund_amount = purchase
            .price_per_token
            .checked_mul(refundable)
            .ok_or_else(|| LedgerError::Validation("refund amount overflows".into()))?;

        let outcome = self
            .gateway
            .refund(&transaction_id, refund_amount, &purchase.currency)
            .await
            .map_err(|err| LedgerError::GatewayUnavailable(err.to_string()))?;

        if outcome.status != ChargeStatus::Succeeded {
            return Err(LedgerError::PaymentDeclined(
                outcome
                    .decline_reason
                    .unwrap_or_else(|| "refund declined".to_string()),
            ));
        }

        Ok(self
            .store
            .refund_purchase(reference_id, refundable, refund_amount, Utc::now())?)
    }

    /// Resolve purchases stuck in `processing` by asking the gateway what
    /// actually happened to the charge.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails; gateway silence only skips the
    /// affected purchase.
    pub async fn reconcile(
        &self,
        now: DateTime<Utc>,
        stale_after: Duration,
        limit: usize,
    ) -> Result<ReconcileReport> {
        let stale = self.store.list_stale_processing(now - stale_after, limit)?;
        let mut report = ReconcileReport {
            examined: stale.len(),
            ..ReconcileReport::default()
        };

        for purchase in stale {
            let reference_id = purchase.reference_id.as_str();
            match self.gateway.lookup(reference_id).await {
                Ok(Some(outcome)) if outcome.status == ChargeStatus::Succeeded => {
                    self.store
                        .complete_purchase(reference_id, &outcome.transaction_id, now)?;
                    tracing::info!(reference_id, "reconciliation completed stuck purchase");
                    report.completed += 1;
                }
                Ok(Some(outcome)) => {
                    let reason = outcome
                        .decline_reason
                        .unwrap_or_else(|| "declined".to_string());
                    self.store.fail_purchase(reference_id, &reason, now)?;
                    report.failed += 1;
                }
                Ok(None) => {
                    // The charge never reached the gateway; safe to fail.
                    self.store.fail_purchase(
                        reference_id,
                        "no gateway record of charge",
                        now,
                    )?;
                    report.failed += 1;
                }
                Err(err) => {
                    tracing::warn!(reference_id, %err, "gateway lookup failed; skipping");
                    report.skipped += 1;
                }
            }
        }

        Ok(report)
    }

    /// Tokens consumed by the organization since `since`.
    fn consumed_since(
        &self,
        organization_id: &OrganizationId,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let entries = self.store.list_history(
            organization_id,
            &HistoryFilter {
                since: Some(since),
                change_type: Some(ChangeType::Consumption),
                ..HistoryFilter::default()
            },
        )?;
        Ok(entries.iter().map(|e| e.change_amount.abs()).sum())
    }
}
