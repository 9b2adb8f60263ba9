//! Package catalog, quoting, and purchase lifecycle handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use token_ledger_core::{PriceQuote, Purchase, PurchaseType, TokenPackage, Wallet};
use token_ledger_engine::PurchaseRequest;

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::handlers::parse_org;
use crate::state::AppState;

/// Package catalog response.
#[derive(Debug, Serialize)]
pub struct PackageListResponse {
    /// Purchasable packages.
    pub packages: Vec<TokenPackage>,
}

/// List the active package catalog.
pub async fn list_packages(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
) -> Json<PackageListResponse> {
    let packages = state
        .config
        .pricing
        .active_packages()
        .into_iter()
        .cloned()
        .collect();
    Json(PackageListResponse { packages })
}

/// Quote request.
#[derive(Debug, Deserialize)]
pub struct QuoteRequest {
    /// The organization the quote is for.
    pub organization_id: String,
    /// Catalog package to price. Exactly one of this and `custom_quantity`.
    pub package_id: Option<String>,
    /// Custom token quantity, priced at the organization's rate.
    pub custom_quantity: Option<i64>,
}

/// Price a prospective purchase without recording anything.
pub async fn quote(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Json(body): Json<QuoteRequest>,
) -> Result<Json<PriceQuote>, ApiError> {
    let organization_id = parse_org(&body.organization_id)?;
    let quote = state.config.pricing.quote(
        organization_id,
        body.package_id.as_deref(),
        body.custom_quantity,
    )?;
    Ok(Json(quote))
}

/// Purchase initialization request.
#[derive(Debug, Deserialize)]
pub struct InitializePurchaseRequest {
    /// The buying organization.
    pub organization_id: String,
    /// Caller-supplied idempotency reference; generated when absent.
    pub reference_id: Option<String>,
    /// How the purchase is initiated (default: one-time).
    pub purchase_type: Option<PurchaseType>,
    /// Catalog package to buy.
    pub package_id: Option<String>,
    /// Custom token quantity.
    pub custom_quantity: Option<i64>,
    /// Gateway payment-method token to charge.
    pub payment_method_id: String,
}

/// Initialize a purchase: validate, price, and record it pending.
pub async fn initialize_purchase(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Json(body): Json<InitializePurchaseRequest>,
) -> Result<Json<Purchase>, ApiError> {
    let organization_id = parse_org(&body.organization_id)?;
    let request = PurchaseRequest {
        organization_id,
        reference_id: body.reference_id,
        purchase_type: body.purchase_type.unwrap_or(PurchaseType::OneTime),
        package_id: body.package_id,
        custom_quantity: body.custom_quantity,
        payment_method_id: body.payment_method_id,
    };

    let purchase = state.orchestrator.initialize(&request)?;
    Ok(Json(purchase))
}

/// Execute a purchase: charge the gateway and credit the wallet.
pub async fn execute_purchase(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(reference_id): Path<String>,
) -> Result<Json<Purchase>, ApiError> {
    let purchase = state.orchestrator.execute(&reference_id).await?;
    Ok(Json(purchase))
}

/// Get a purchase by its idempotency reference.
pub async fn get_purchase(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(reference_id): Path<String>,
) -> Result<Json<Purchase>, ApiError> {
    let purchase = state.orchestrator.load(&reference_id)?;
    Ok(Json(purchase))
}

/// Purchase list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListPurchasesQuery {
    /// Maximum number of purchases to return (default: 50, max: 100).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination.
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

/// Purchase list response.
#[derive(Debug, Serialize)]
pub struct ListPurchasesResponse {
    /// Purchases (newest first).
    pub purchases: Vec<Purchase>,
    /// Whether there are more purchases.
    pub has_more: bool,
}

/// List an organization's purchases, newest first.
pub async fn list_purchases(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(organization_id): Path<String>,
    Query(query): Query<ListPurchasesQuery>,
) -> Result<Json<ListPurchasesResponse>, ApiError> {
    let organization_id = parse_org(&organization_id)?;

    // Fetch one more than requested to determine has_more
    let limit = query.limit.min(100);
    let purchases = state
        .orchestrator
        .list(&organization_id, limit + 1, query.offset)?;

    let has_more = purchases.len() > limit;
    let purchases = purchases.into_iter().take(limit).collect();

    Ok(Json(ListPurchasesResponse {
        purchases,
        has_more,
    }))
}

/// Cancel a purchase that has not been executed yet.
pub async fn cancel_purchase(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(reference_id): Path<String>,
) -> Result<Json<Purchase>, ApiError> {
    let purchase = state.orchestrator.cancel(&reference_id)?;
    Ok(Json(purchase))
}

/// Refund response: the refunded purchase and the wallet it debited.
#[derive(Debug, Serialize)]
pub struct RefundResponse {
    /// The refunded purchase.
    pub purchase: Purchase,
    /// The wallet after the refund debit.
    pub wallet: Wallet,
}

/// Refund the unconsumed remainder of a completed purchase.
pub async fn refund_purchase(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(reference_id): Path<String>,
) -> Result<Json<RefundResponse>, ApiError> {
    let (purchase, wallet) = state.orchestrator.refund(&reference_id).await?;

    tracing::info!(
        reference_id = %reference_id,
        refunded_tokens = ?purchase.refunded_tokens,
        "Purchase refunded"
    );

    Ok(Json(RefundResponse { purchase, wallet }))
}
