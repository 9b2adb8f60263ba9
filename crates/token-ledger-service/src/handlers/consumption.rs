//! Consumption reporting handlers for metering services.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use token_ledger_core::{ChangeType, ReferenceType};
use token_ledger_store::{ChangeRecord, Store};

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::handlers::parse_org;
use crate::state::AppState;

/// Consumption event from a metering service.
#[derive(Debug, Deserialize)]
pub struct ConsumptionRequest {
    /// Unique event ID, recorded in the history entry.
    pub event_id: String,
    /// Organization being debited.
    pub organization_id: String,
    /// Tokens consumed.
    pub amount: i64,
}

/// Consumption response.
#[derive(Debug, Serialize)]
pub struct ConsumptionResponse {
    /// Whether the debit was applied.
    pub success: bool,
    /// Balance after the debit.
    pub balance: i64,
    /// Tokens deducted.
    pub consumed: i64,
}

/// Report a consumption event: debit the wallet and run the low-balance
/// reactions.
pub async fn report_consumption(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<ConsumptionRequest>,
) -> Result<Json<ConsumptionResponse>, ApiError> {
    tracing::debug!(
        service = %auth.service_name,
        event_id = %body.event_id,
        organization_id = %body.organization_id,
        "Processing consumption event"
    );

    let organization_id = parse_org(&body.organization_id)?;
    if body.event_id.is_empty() {
        return Err(ApiError::BadRequest("event_id is required".into()));
    }
    if body.amount <= 0 {
        return Err(ApiError::BadRequest("amount must be positive".into()));
    }

    let wallet = state.store.debit(
        &organization_id,
        body.amount,
        ChangeRecord {
            change_type: ChangeType::Consumption,
            reference_type: ReferenceType::Consumption,
            reference_id: &body.event_id,
            performed_by: &auth.service_name,
        },
    )?;

    tracing::info!(
        service = %auth.service_name,
        event_id = %body.event_id,
        organization_id = %organization_id,
        consumed = body.amount,
        balance = wallet.balance,
        "Consumption processed"
    );

    // Post-debit reactions are best effort: the debit already committed,
    // and both jobs run periodically anyway.
    let now = Utc::now();
    if let Err(err) = state.monitor.check(&wallet, now) {
        tracing::warn!(organization_id = %organization_id, error = %err, "Threshold check failed");
    }
    if let Err(err) = state.topup.evaluate(&organization_id, now).await {
        tracing::warn!(organization_id = %organization_id, error = %err, "Auto-top-up evaluation failed");
    }

    Ok(Json(ConsumptionResponse {
        success: true,
        balance: wallet.balance,
        consumed: body.amount,
    }))
}

/// Balance check request.
#[derive(Debug, Deserialize)]
pub struct CheckBalanceRequest {
    /// Organization to check.
    pub organization_id: String,
    /// Tokens required.
    pub required_tokens: i64,
}

/// Balance check response.
#[derive(Debug, Serialize)]
pub struct CheckBalanceResponse {
    /// Whether the wallet can cover the required tokens.
    pub sufficient: bool,
    /// Current balance.
    pub balance: i64,
    /// Tokens required.
    pub required_tokens: i64,
}

/// Check whether an organization can cover a prospective debit.
pub async fn check_balance(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Json(body): Json<CheckBalanceRequest>,
) -> Result<Json<CheckBalanceResponse>, ApiError> {
    let organization_id = parse_org(&body.organization_id)?;
    let wallet = state
        .store
        .get_wallet(&organization_id)?
        .ok_or_else(|| ApiError::NotFound(format!("wallet not found: {organization_id}")))?;

    Ok(Json(CheckBalanceResponse {
        sufficient: wallet.is_active && wallet.has_sufficient_balance(body.required_tokens),
        balance: wallet.balance,
        required_tokens: body.required_tokens,
    }))
}
