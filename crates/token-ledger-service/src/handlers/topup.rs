//! Auto-top-up policy handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use token_ledger_core::{Amount, AutoTopupPolicy, ScheduleFrequency, TopupTrigger};
use token_ledger_store::Store;

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::handlers::parse_org;
use crate::state::AppState;

/// Policy configuration request.
#[derive(Debug, Deserialize)]
pub struct ConfigurePolicyRequest {
    /// Which conditions initiate a top-up.
    pub trigger_type: TopupTrigger,
    /// Threshold as percent of lifetime purchased tokens remaining
    /// (required for threshold triggers).
    pub threshold_percentage: Option<i64>,
    /// Cadence for scheduled top-ups (required for scheduled triggers).
    pub schedule_frequency: Option<ScheduleFrequency>,
    /// Package to buy when topping up.
    pub package_id: Option<String>,
    /// Tokens to buy when topping up (required when no package).
    pub token_quantity: Option<i64>,
    /// Gateway payment-method token to charge.
    pub payment_method_id: String,
    /// Hard cap on top-up spending per calendar month.
    pub max_monthly_spending: Amount,
}

/// Create or replace an organization's auto-top-up policy.
///
/// Reconfiguring preserves the spending window, failure count, and pause
/// state; use the enable endpoint to clear a pause.
pub async fn configure_policy(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(organization_id): Path<String>,
    Json(body): Json<ConfigurePolicyRequest>,
) -> Result<Json<AutoTopupPolicy>, ApiError> {
    let organization_id = parse_org(&organization_id)?;
    let now = Utc::now();

    let mut policy = state
        .store
        .get_policy(&organization_id)?
        .unwrap_or_else(|| {
            AutoTopupPolicy::threshold(organization_id, 20, 0, "", Amount::ZERO)
        });

    policy.trigger_type = body.trigger_type;
    policy.threshold_percentage = body.threshold_percentage;
    policy.schedule_frequency = body.schedule_frequency;
    policy.topup_package_id = body.package_id;
    policy.topup_token_quantity = body.token_quantity.unwrap_or(0);
    policy.payment_method_id = body.payment_method_id;
    policy.max_monthly_spending = body.max_monthly_spending;
    if policy.trigger_type.includes_schedule() {
        if let Some(frequency) = policy.schedule_frequency {
            if policy.next_scheduled_run.is_none() {
                policy.next_scheduled_run = Some(frequency.next_run(now));
            }
        }
    } else {
        policy.next_scheduled_run = None;
    }
    policy.updated_at = now;

    state.topup.configure(&policy)?;

    tracing::info!(
        organization_id = %organization_id,
        trigger = ?policy.trigger_type,
        "Auto-top-up policy configured"
    );

    Ok(Json(policy))
}

/// Get an organization's auto-top-up policy.
pub async fn get_policy(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(organization_id): Path<String>,
) -> Result<Json<AutoTopupPolicy>, ApiError> {
    let organization_id = parse_org(&organization_id)?;
    let policy = state.topup.load(&organization_id)?;
    Ok(Json(policy))
}

/// Enable an organization's policy, clearing any failure pause.
pub async fn enable_policy(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(organization_id): Path<String>,
) -> Result<Json<AutoTopupPolicy>, ApiError> {
    let organization_id = parse_org(&organization_id)?;
    let policy = state.topup.set_enabled(&organization_id, true)?;
    Ok(Json(policy))
}

/// Disable an organization's policy.
pub async fn disable_policy(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(organization_id): Path<String>,
) -> Result<Json<AutoTopupPolicy>, ApiError> {
    let organization_id = parse_org(&organization_id)?;
    let policy = state.topup.set_enabled(&organization_id, false)?;
    Ok(Json(policy))
}
