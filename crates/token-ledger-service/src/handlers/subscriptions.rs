//! Subscription lifecycle handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use token_ledger_core::{BillingFrequency, Subscription};
use token_ledger_engine::SubscribeRequest;

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::handlers::{parse_org, parse_subscription_id};
use crate::state::AppState;

/// Subscription creation request.
#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    /// The subscribing organization.
    pub organization_id: String,
    /// Catalog package billed each cycle. Exactly one of this and
    /// `custom_quantity`.
    pub package_id: Option<String>,
    /// Custom token quantity billed each cycle.
    pub custom_quantity: Option<i64>,
    /// Billing cadence.
    pub frequency: BillingFrequency,
    /// Gateway payment-method token to charge each cycle.
    pub payment_method_id: String,
    /// First billing date; defaults to now (billed on the next run).
    pub first_billing_date: Option<DateTime<Utc>>,
}

/// Create a subscription. The price is locked at subscription time.
pub async fn create_subscription(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Json(body): Json<CreateSubscriptionRequest>,
) -> Result<Json<Subscription>, ApiError> {
    let organization_id = parse_org(&body.organization_id)?;
    let request = SubscribeRequest {
        organization_id,
        package_id: body.package_id,
        custom_quantity: body.custom_quantity,
        frequency: body.frequency,
        payment_method_id: body.payment_method_id,
        first_billing_date: body.first_billing_date,
    };

    let subscription = state.scheduler.subscribe(&request)?;

    tracing::info!(
        subscription_id = %subscription.id,
        organization_id = %organization_id,
        tokens = subscription.token_quantity,
        frequency = ?subscription.frequency,
        "Subscription created"
    );

    Ok(Json(subscription))
}

/// Get a subscription by id.
pub async fn get_subscription(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(subscription_id): Path<String>,
) -> Result<Json<Subscription>, ApiError> {
    let subscription_id = parse_subscription_id(&subscription_id)?;
    let subscription = state.scheduler.load(&subscription_id)?;
    Ok(Json(subscription))
}

/// Subscription list response.
#[derive(Debug, Serialize)]
pub struct SubscriptionListResponse {
    /// The organization's subscriptions.
    pub subscriptions: Vec<Subscription>,
}

/// List an organization's subscriptions.
pub async fn list_subscriptions(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(organization_id): Path<String>,
) -> Result<Json<SubscriptionListResponse>, ApiError> {
    let organization_id = parse_org(&organization_id)?;
    let subscriptions = state.scheduler.list(&organization_id)?;
    Ok(Json(SubscriptionListResponse { subscriptions }))
}

/// Pause an active subscription.
pub async fn pause_subscription(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(subscription_id): Path<String>,
) -> Result<Json<Subscription>, ApiError> {
    let subscription_id = parse_subscription_id(&subscription_id)?;
    let subscription = state.scheduler.pause(&subscription_id)?;
    Ok(Json(subscription))
}

/// Resume a paused subscription.
pub async fn resume_subscription(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(subscription_id): Path<String>,
) -> Result<Json<Subscription>, ApiError> {
    let subscription_id = parse_subscription_id(&subscription_id)?;
    let subscription = state.scheduler.resume(&subscription_id)?;
    Ok(Json(subscription))
}

/// Cancel a subscription.
pub async fn cancel_subscription(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(subscription_id): Path<String>,
) -> Result<Json<Subscription>, ApiError> {
    let subscription_id = parse_subscription_id(&subscription_id)?;
    let subscription = state.scheduler.cancel(&subscription_id)?;
    Ok(Json(subscription))
}
