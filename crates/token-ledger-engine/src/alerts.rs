//! Low-balance threshold monitoring.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use token_ledger_core::{
    LedgerError, NotificationThreshold, OrganizationId, Result, ThresholdId, ThresholdKind, Wallet,
};
use token_ledger_store::Store;

use crate::notify::{Notification, NotificationDispatcher};

/// Watches wallets against their configured thresholds and fires low-balance
/// alerts, at most once per threshold per calendar day.
pub struct ThresholdMonitor {
    store: Arc<dyn Store>,
    notifier: Arc<dyn NotificationDispatcher>,
}

impl ThresholdMonitor {
    /// Create a monitor.
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn NotificationDispatcher>) -> Self {
        Self { store, notifier }
    }

    /// Add a threshold for an organization.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Validation`] for an out-of-range value.
    /// - [`LedgerError::NotFound`] if the wallet doesn't exist.
    pub fn add(
        &self,
        organization_id: &OrganizationId,
        kind: ThresholdKind,
        value: i64,
    ) -> Result<NotificationThreshold> {
        match kind {
            ThresholdKind::Percentage if !(1..=99).contains(&value) => {
                return Err(LedgerError::Validation(
                    "percentage threshold must be in 1..=99".into(),
                ))
            }
            ThresholdKind::Absolute if value < 0 => {
                return Err(LedgerError::Validation(
                    "absolute threshold must not be negative".into(),
                ))
            }
            _ => {}
        }
        self.store
            .get_wallet(organization_id)?
            .ok_or_else(|| LedgerError::NotFound {
                entity: "wallet",
                id: organization_id.to_string(),
            })?;

        let threshold = NotificationThreshold::new(*organization_id, kind, value);
        self.store.put_threshold(&threshold)?;
        Ok(threshold)
    }

    /// List an organization's thresholds.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub fn list(&self, organization_id: &OrganizationId) -> Result<Vec<NotificationThreshold>> {
        Ok(self.store.list_thresholds(organization_id)?)
    }

    /// Remove a threshold.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] for an unknown threshold.
    pub fn remove(
        &self,
        organization_id: &OrganizationId,
        threshold_id: &ThresholdId,
    ) -> Result<()> {
        Ok(self.store.delete_threshold(organization_id, threshold_id)?)
    }

    /// Check `wallet` against its thresholds and alert on fresh breaches.
    ///
    /// Called with the wallet a debit just returned, so the check sees the
    /// balance that crossed the line. Returns the number of alerts fired.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub fn check(&self, wallet: &Wallet, now: DateTime<Utc>) -> Result<usize> {
        let thresholds = self.store.list_thresholds(&wallet.organization_id)?;
        let mut fired = 0;

        for mut threshold in thresholds {
            if !threshold.is_breached(wallet) || fired_today(&threshold, now) {
                continue;
            }

            self.notifier.dispatch(&Notification::LowBalance {
                organization_id: wallet.organization_id,
                threshold_id: threshold.id,
                kind: threshold.kind,
                value: threshold.value,
                balance: wallet.balance,
            });

            threshold.last_triggered_at = Some(now);
            threshold.notifications_sent += 1;
            self.store.put_threshold(&threshold)?;
            fired += 1;
        }

        Ok(fired)
    }
}

/// Alert-storm dedup: one alert per threshold per calendar day.
fn fired_today(threshold: &NotificationThreshold, now: DateTime<Utc>) -> bool {
    threshold
        .last_triggered_at
        .is_some_and(|at| at.date_naive() == now.date_naive())
}
