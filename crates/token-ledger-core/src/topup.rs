//! Auto-top-up policy configuration.

use chrono::{DateTime, Days, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::{Amount, OrganizationId, Wallet};

/// What condition initiates an automatic top-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopupTrigger {
    /// Top up when the balance falls to or below the threshold.
    Threshold,

    /// Top up on a fixed schedule regardless of balance.
    Scheduled,

    /// Both of the above.
    Both,
}

impl TopupTrigger {
    /// Whether the threshold condition applies.
    #[must_use]
    pub const fn includes_threshold(&self) -> bool {
        matches!(self, Self::Threshold | Self::Both)
    }

    /// Whether the schedule condition applies.
    #[must_use]
    pub const fn includes_schedule(&self) -> bool {
        matches!(self, Self::Scheduled | Self::Both)
    }
}

/// Cadence of scheduled top-ups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleFrequency {
    /// Every day.
    Daily,

    /// Every seven days.
    Weekly,

    /// Every calendar month.
    Monthly,
}

impl ScheduleFrequency {
    /// The run after `from`.
    #[must_use]
    pub fn next_run(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Daily => from.checked_add_days(Days::new(1)).unwrap_or(from),
            Self::Weekly => from.checked_add_days(Days::new(7)).unwrap_or(from),
            Self::Monthly => from.checked_add_months(Months::new(1)).unwrap_or(from),
        }
    }
}

/// Per-organization automatic replenishment policy.
///
/// At most one policy exists per organization. Mutated by the auto-top-up
/// engine (trigger bookkeeping, failure pausing, spending window) and by
/// user configuration actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoTopupPolicy {
    /// The organization this policy replenishes.
    pub organization_id: OrganizationId,

    /// Master switch.
    pub is_enabled: bool,

    /// Which conditions initiate a top-up.
    pub trigger_type: TopupTrigger,

    /// Threshold as percent of lifetime purchased tokens remaining.
    pub threshold_percentage: Option<i64>,

    /// Cadence for scheduled top-ups.
    pub schedule_frequency: Option<ScheduleFrequency>,

    /// Next scheduled run, when a schedule applies.
    pub next_scheduled_run: Option<DateTime<Utc>>,

    /// Package to buy when topping up, if priced from the catalog.
    pub topup_package_id: Option<String>,

    /// Tokens to buy when topping up.
    pub topup_token_quantity: i64,

    /// Gateway payment-method token to charge.
    pub payment_method_id: String,

    /// Hard cap on top-up spending per calendar month.
    pub max_monthly_spending: Amount,

    /// Top-up spending so far in the current window.
    pub current_month_spending: Amount,

    /// When the spending window resets. Advanced by one month at each
    /// rollover, independently of trigger activity.
    pub spending_reset_date: DateTime<Utc>,

    /// Consecutive top-up purchase failures.
    pub failure_count: u32,

    /// When a trigger last fired (any kind). Threshold triggers are
    /// deduplicated per calendar day on this field.
    pub last_triggered_at: Option<DateTime<Utc>>,

    /// Reference of the last top-up purchase.
    pub last_purchase_reference: Option<String>,

    /// Set when the engine auto-pauses the policy after repeated failures.
    pub paused_at: Option<DateTime<Utc>>,

    /// Why the policy was paused.
    pub pause_reason: Option<String>,

    /// When the policy was created.
    pub created_at: DateTime<Utc>,

    /// When the policy was last updated.
    pub updated_at: DateTime<Utc>,
}

impl AutoTopupPolicy {
    /// Create an enabled threshold policy.
    #[must_use]
    pub fn threshold(
        organization_id: OrganizationId,
        threshold_percentage: i64,
        topup_token_quantity: i64,
        payment_method_id: impl Into<String>,
        max_monthly_spending: Amount,
    ) -> Self {
        let now = Utc::now();
        Self {
            organization_id,
            is_enabled: true,
            trigger_type: TopupTrigger::Threshold,
            threshold_percentage: Some(threshold_percentage),
            schedule_frequency: None,
            next_scheduled_run: None,
            topup_package_id: None,
            topup_token_quantity,
            payment_method_id: payment_method_id.into(),
            max_monthly_spending,
            current_month_spending: Amount::ZERO,
            spending_reset_date: ScheduleFrequency::Monthly.next_run(now),
            failure_count: 0,
            last_triggered_at: None,
            last_purchase_reference: None,
            paused_at: None,
            pause_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the policy is enabled and not paused.
    #[must_use]
    pub const fn is_operational(&self) -> bool {
        self.is_enabled && self.paused_at.is_none()
    }

    /// Whether the threshold condition fires for `wallet` at `now`.
    ///
    /// Deduplicated per calendar day: once any trigger has fired today the
    /// threshold stays quiet until tomorrow.
    #[must_use]
    pub fn threshold_due(&self, wallet: &Wallet, now: DateTime<Utc>) -> bool {
        if !self.trigger_type.includes_threshold() {
            return false;
        }
        let Some(threshold) = self.threshold_percentage else {
            return false;
        };
        let breached = wallet
            .remaining_percent()
            .is_some_and(|pct| pct <= threshold);
        breached && !self.triggered_today(now)
    }

    /// Whether the schedule condition fires at `now`, independent of balance.
    #[must_use]
    pub fn schedule_due(&self, now: DateTime<Utc>) -> bool {
        self.trigger_type.includes_schedule()
            && self
                .next_scheduled_run
                .is_some_and(|next| next <= now)
    }

    /// Whether any trigger already fired on `now`'s calendar day.
    #[must_use]
    pub fn triggered_today(&self, now: DateTime<Utc>) -> bool {
        self.last_triggered_at
            .is_some_and(|at| at.date_naive() == now.date_naive())
    }

    /// Roll the monthly spending window forward if `now` has passed the
    /// reset date. Returns true if a reset happened.
    pub fn roll_spending_window(&mut self, now: DateTime<Utc>) -> bool {
        if now < self.spending_reset_date {
            return false;
        }
        self.current_month_spending = Amount::ZERO;
        // Catch up across multiple idle months.
        while self.spending_reset_date <= now {
            self.spending_reset_date = ScheduleFrequency::Monthly.next_run(self.spending_reset_date);
        }
        self.updated_at = now;
        true
    }

    /// Whether spending `proposed` would exceed the monthly cap.
    #[must_use]
    pub fn would_exceed_limit(&self, proposed: Amount) -> bool {
        self.current_month_spending
            .checked_add(proposed)
            .map_or(true, |total| total > self.max_monthly_spending)
    }

    /// Pause the policy after repeated failures.
    pub fn pause(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.paused_at = Some(now);
        self.pause_reason = Some(reason.into());
        self.updated_at = now;
    }
}
