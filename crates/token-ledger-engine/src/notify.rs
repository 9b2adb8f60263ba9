//! Outbound notifications.
//!
//! Delivery (email, webhooks, in-app) belongs to an external collaborator;
//! the engines only emit structured events through a dispatcher seam.

use token_ledger_core::{Amount, OrganizationId, ThresholdId, ThresholdKind};

/// An event an organization should hear about.
#[derive(Debug, Clone)]
pub enum Notification {
    /// The wallet crossed a low-balance threshold.
    LowBalance {
        /// The organization.
        organization_id: OrganizationId,
        /// The threshold that fired.
        threshold_id: ThresholdId,
        /// Percentage or absolute.
        kind: ThresholdKind,
        /// The configured trigger value.
        value: i64,
        /// Balance at the time of the alert.
        balance: i64,
    },

    /// A payment was declined.
    PaymentFailed {
        /// The organization.
        organization_id: OrganizationId,
        /// The purchase reference that failed.
        reference_id: String,
        /// The gateway's decline reason.
        reason: String,
    },

    /// A subscription was cancelled after repeated failures or grace expiry.
    SubscriptionCancelled {
        /// The organization.
        organization_id: OrganizationId,
        /// Why it was cancelled.
        reason: String,
    },

    /// The auto-top-up policy was paused after repeated failures.
    AutoTopupPaused {
        /// The organization.
        organization_id: OrganizationId,
        /// Why it was paused.
        reason: String,
    },

    /// An automatic top-up was skipped by the monthly spending cap.
    SpendingLimitReached {
        /// The organization.
        organization_id: OrganizationId,
        /// Spend so far this month.
        spent: Amount,
        /// Cost of the top-up that was skipped.
        proposed: Amount,
        /// The configured cap.
        limit: Amount,
    },
}

/// Delivery seam for [`Notification`]s.
pub trait NotificationDispatcher: Send + Sync {
    /// Dispatch one notification. Best-effort; must not fail the operation
    /// that produced it.
    fn dispatch(&self, notification: &Notification);
}

/// Default dispatcher: structured log lines only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDispatcher;

impl NotificationDispatcher for LogDispatcher {
    fn dispatch(&self, notification: &Notification) {
        match notification {
            Notification::LowBalance {
                organization_id,
                threshold_id,
                kind,
                value,
                balance,
            } => tracing::warn!(
                organization_id = %organization_id,
                threshold_id = %threshold_id,
                ?kind,
                value,
                balance,
                "low balance threshold crossed"
            ),
            Notification::PaymentFailed {
                organization_id,
                reference_id,
                reason,
            } => tracing::warn!(
                organization_id = %organization_id,
                reference_id = %reference_id,
                reason,
                "payment failed"
            ),
            Notification::SubscriptionCancelled {
                organization_id,
                reason,
            } => tracing::warn!(
                organization_id = %organization_id,
                reason,
                "subscription cancelled"
            ),
            Notification::AutoTopupPaused {
                organization_id,
                reason,
            } => tracing::warn!(
                organization_id = %organization_id,
                reason,
                "auto-top-up paused"
            ),
            Notification::SpendingLimitReached {
                organization_id,
                spent,
                proposed,
                limit,
            } => tracing::warn!(
                organization_id = %organization_id,
                spent = %spent,
                proposed = %proposed,
                limit = %limit,
                "auto-top-up skipped by monthly spending limit"
            ),
        }
    }
}
