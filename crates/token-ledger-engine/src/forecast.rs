//! Consumption forecasting from the balance history.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use token_ledger_core::{ChangeType, LedgerError, OrganizationId, Result};
use token_ledger_store::{HistoryFilter, Store};

/// Default trailing window.
pub const DEFAULT_WINDOW_DAYS: i64 = 30;

/// A consumption projection for one organization.
#[derive(Debug, Clone, Serialize)]
pub struct UsageForecast {
    /// The organization.
    pub organization_id: OrganizationId,

    /// Balance the projection starts from.
    pub balance: i64,

    /// Trailing window the rate was averaged over.
    pub window_days: i64,

    /// Tokens consumed inside the window.
    pub consumed_in_window: i64,

    /// Average tokens consumed per day.
    pub average_daily_consumption: f64,

    /// Whole days until depletion at the current rate, rounded down.
    /// `None` when the rate is zero: no projection rather than infinity.
    pub projected_days_remaining: Option<i64>,

    /// Projected depletion date at the current rate.
    pub projected_depletion_date: Option<DateTime<Utc>>,

    /// When the forecast was computed.
    pub generated_at: DateTime<Utc>,
}

/// Computes usage forecasts from the append-only history.
pub struct ForecastCalculator {
    store: Arc<dyn Store>,
    window_days: i64,
}

impl ForecastCalculator {
    /// Create a calculator with the default 30-day window.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            window_days: DEFAULT_WINDOW_DAYS,
        }
    }

    /// Create a calculator with a custom trailing window.
    #[must_use]
    pub fn with_window(mut self, window_days: i64) -> Self {
        self.window_days = window_days.max(1);
        self
    }

    /// Forecast an organization's usage at `now`.
    ///
    /// Wallets younger than the window average over their actual age, with a
    /// floor of one day so a burst on day one doesn't divide by zero.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] if the wallet doesn't exist.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn forecast(
        &self,
        organization_id: &OrganizationId,
        now: DateTime<Utc>,
    ) -> Result<UsageForecast> {
        let wallet = self
            .store
            .get_wallet(organization_id)?
            .ok_or_else(|| LedgerError::NotFound {
                entity: "wallet",
                id: organization_id.to_string(),
            })?;

        let window_start = now - Duration::days(self.window_days);
        let entries = self.store.list_history(
            organization_id,
            &HistoryFilter {
                since: Some(window_start),
                change_type: Some(ChangeType::Consumption),
                ..HistoryFilter::default()
            },
        )?;
        let consumed_in_window: i64 = entries.iter().map(|e| e.change_amount.abs()).sum();

        let wallet_age_days = (now - wallet.created_at).num_seconds() as f64 / 86_400.0;
        let elapsed_days = wallet_age_days.clamp(1.0, self.window_days as f64);
        let average_daily_consumption = consumed_in_window as f64 / elapsed_days;

        let (projected_days_remaining, projected_depletion_date) =
            if average_daily_consumption > 0.0 && wallet.balance > 0 {
                let days = (wallet.balance as f64 / average_daily_consumption).floor() as i64;
                (Some(days), Some(now + Duration::days(days)))
            } else if average_daily_consumption > 0.0 {
                // Already at or below zero.
                (Some(0), Some(now))
            } else {
                (None, None)
            };

        Ok(UsageForecast {
            organization_id: *organization_id,
            balance: wallet.balance,
            window_days: self.window_days,
            consumed_in_window,
            average_daily_consumption,
            projected_days_remaining,
            projected_depletion_date,
            generated_at: now,
        })
    }
}
