//! Wallet, balance history, forecast, and threshold handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use token_ledger_core::{
    Amount, BalanceHistoryEntry, ChangeType, NotificationThreshold, OrganizationId, ThresholdKind,
    Wallet,
};
use token_ledger_engine::{ForecastCalculator, UsageForecast};
use token_ledger_store::{HistoryFilter, Store};

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::handlers::{parse_org, parse_threshold_id};
use crate::state::AppState;

/// Wallet creation request.
#[derive(Debug, Deserialize)]
pub struct CreateWalletRequest {
    /// Organization to open a wallet for; generated when absent.
    pub organization_id: Option<String>,
    /// Per-token price override; the pricing default applies when absent.
    pub price_per_token: Option<Amount>,
}

/// Create a wallet for an organization.
pub async fn create_wallet(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Json(body): Json<CreateWalletRequest>,
) -> Result<Json<Wallet>, ApiError> {
    let organization_id = match &body.organization_id {
        Some(raw) => parse_org(raw)?,
        None => OrganizationId::generate(),
    };

    if state.store.get_wallet(&organization_id)?.is_some() {
        return Err(ApiError::Conflict(format!(
            "wallet already exists for organization {organization_id}"
        )));
    }

    let price = body
        .price_per_token
        .unwrap_or_else(|| state.config.pricing.rate_for(organization_id));
    if !price.is_positive() {
        return Err(ApiError::BadRequest(
            "price_per_token must be positive".into(),
        ));
    }

    let wallet = Wallet::new(organization_id, price);
    state.store.put_wallet(&wallet)?;

    tracing::info!(
        organization_id = %organization_id,
        price_per_token = %price,
        "Wallet created"
    );

    Ok(Json(wallet))
}

/// Get a wallet by organization id.
pub async fn get_wallet(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(organization_id): Path<String>,
) -> Result<Json<Wallet>, ApiError> {
    let organization_id = parse_org(&organization_id)?;
    let wallet = state
        .store
        .get_wallet(&organization_id)?
        .ok_or_else(|| ApiError::NotFound(format!("wallet not found: {organization_id}")))?;
    Ok(Json(wallet))
}

/// History list query parameters.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Maximum number of entries to return (default: 50, max: 500).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination.
    #[serde(default)]
    pub offset: usize,
    /// Only entries at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Only entries of this change type.
    pub change_type: Option<ChangeType>,
    /// Oldest first instead of the default newest first.
    #[serde(default)]
    pub oldest_first: bool,
}

fn default_limit() -> usize {
    50
}

/// History list response.
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    /// History entries.
    pub entries: Vec<BalanceHistoryEntry>,
    /// Whether there are more entries.
    pub has_more: bool,
}

/// List balance history for an organization.
pub async fn list_history(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(organization_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let organization_id = parse_org(&organization_id)?;

    // Fetch one more than requested to determine has_more
    let limit = query.limit.min(500);
    let entries = state.store.list_history(
        &organization_id,
        &HistoryFilter {
            limit: limit + 1,
            offset: query.offset,
            since: query.since,
            change_type: query.change_type,
            oldest_first: query.oldest_first,
        },
    )?;

    let has_more = entries.len() > limit;
    let entries = entries.into_iter().take(limit).collect();

    Ok(Json(HistoryResponse { entries, has_more }))
}

/// Forecast query parameters.
#[derive(Debug, Deserialize)]
pub struct ForecastQuery {
    /// Trailing window in days (default: 30).
    pub window_days: Option<i64>,
}

/// Project wallet depletion from trailing consumption.
pub async fn get_forecast(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(organization_id): Path<String>,
    Query(query): Query<ForecastQuery>,
) -> Result<Json<UsageForecast>, ApiError> {
    let organization_id = parse_org(&organization_id)?;
    let now = Utc::now();

    let forecast = match query.window_days {
        Some(window) => {
            let store: Arc<dyn Store> = state.store.clone();
            ForecastCalculator::new(store)
                .with_window(window)
                .forecast(&organization_id, now)?
        }
        None => state.forecast.forecast(&organization_id, now)?,
    };

    Ok(Json(forecast))
}

/// Manual adjustment request.
#[derive(Debug, Deserialize)]
pub struct AdjustRequest {
    /// Signed token delta to apply.
    pub amount: i64,
    /// What the adjustment reconciles (ticket id, dispute reference).
    pub reference_id: String,
    /// Operator identity; defaults to the calling service.
    pub performed_by: Option<String>,
}

/// Apply a signed manual adjustment to a wallet.
pub async fn adjust_wallet(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Path(organization_id): Path<String>,
    Json(body): Json<AdjustRequest>,
) -> Result<Json<Wallet>, ApiError> {
    let organization_id = parse_org(&organization_id)?;
    if body.amount == 0 {
        return Err(ApiError::BadRequest("adjustment amount must be non-zero".into()));
    }
    if body.reference_id.is_empty() {
        return Err(ApiError::BadRequest("reference_id is required".into()));
    }

    let performed_by = body.performed_by.as_deref().unwrap_or(&auth.service_name);
    let wallet = state
        .store
        .adjust(&organization_id, body.amount, &body.reference_id, performed_by)?;

    tracing::info!(
        organization_id = %organization_id,
        amount = body.amount,
        reference_id = %body.reference_id,
        performed_by = %performed_by,
        "Manual adjustment applied"
    );

    Ok(Json(wallet))
}

/// Suspension request.
#[derive(Debug, Deserialize)]
pub struct SuspendRequest {
    /// Why the wallet is being suspended.
    pub reason: String,
}

/// Suspend a wallet; debits are refused until reactivation.
pub async fn suspend_wallet(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(organization_id): Path<String>,
    Json(body): Json<SuspendRequest>,
) -> Result<Json<Wallet>, ApiError> {
    let organization_id = parse_org(&organization_id)?;
    let mut wallet = state
        .store
        .get_wallet(&organization_id)?
        .ok_or_else(|| ApiError::NotFound(format!("wallet not found: {organization_id}")))?;

    if !wallet.is_active {
        return Err(ApiError::Conflict(format!(
            "wallet already suspended for organization {organization_id}"
        )));
    }

    wallet.suspend(body.reason, Utc::now());
    state.store.put_wallet(&wallet)?;

    tracing::warn!(organization_id = %organization_id, "Wallet suspended");
    Ok(Json(wallet))
}

/// Reactivate a suspended wallet.
pub async fn reactivate_wallet(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(organization_id): Path<String>,
) -> Result<Json<Wallet>, ApiError> {
    let organization_id = parse_org(&organization_id)?;
    let mut wallet = state
        .store
        .get_wallet(&organization_id)?
        .ok_or_else(|| ApiError::NotFound(format!("wallet not found: {organization_id}")))?;

    if wallet.is_active {
        return Err(ApiError::Conflict(format!(
            "wallet is not suspended for organization {organization_id}"
        )));
    }

    wallet.reactivate(Utc::now());
    state.store.put_wallet(&wallet)?;

    tracing::info!(organization_id = %organization_id, "Wallet reactivated");
    Ok(Json(wallet))
}

/// Threshold creation request.
#[derive(Debug, Deserialize)]
pub struct CreateThresholdRequest {
    /// Percentage or absolute.
    pub kind: ThresholdKind,
    /// Trigger value (percent 1-99, or a token count).
    pub value: i64,
}

/// Add a low-balance notification threshold.
pub async fn add_threshold(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(organization_id): Path<String>,
    Json(body): Json<CreateThresholdRequest>,
) -> Result<Json<NotificationThreshold>, ApiError> {
    let organization_id = parse_org(&organization_id)?;
    let threshold = state.monitor.add(&organization_id, body.kind, body.value)?;
    Ok(Json(threshold))
}

/// Threshold list response.
#[derive(Debug, Serialize)]
pub struct ThresholdListResponse {
    /// Configured thresholds.
    pub thresholds: Vec<NotificationThreshold>,
}

/// List an organization's notification thresholds.
pub async fn list_thresholds(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(organization_id): Path<String>,
) -> Result<Json<ThresholdListResponse>, ApiError> {
    let organization_id = parse_org(&organization_id)?;
    let thresholds = state.monitor.list(&organization_id)?;
    Ok(Json(ThresholdListResponse { thresholds }))
}

/// Remove a notification threshold.
pub async fn remove_threshold(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path((organization_id, threshold_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let organization_id = parse_org(&organization_id)?;
    let threshold_id = parse_threshold_id(&threshold_id)?;
    state.monitor.remove(&organization_id, &threshold_id)?;
    Ok(Json(serde_json::json!({ "removed": true })))
}
