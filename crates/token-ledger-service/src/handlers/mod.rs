//! API handlers.

pub mod consumption;
pub mod health;
pub mod purchases;
pub mod subscriptions;
pub mod topup;
pub mod wallets;

use token_ledger_core::{OrganizationId, SubscriptionId, ThresholdId};

use crate::error::ApiError;

/// Parse an organization id from a path or body string.
pub(crate) fn parse_org(s: &str) -> Result<OrganizationId, ApiError> {
    s.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid organization id: {s}")))
}

/// Parse a subscription id.
pub(crate) fn parse_subscription_id(s: &str) -> Result<SubscriptionId, ApiError> {
    s.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid subscription id: {s}")))
}

/// Parse a threshold id.
pub(crate) fn parse_threshold_id(s: &str) -> Result<ThresholdId, ApiError> {
    s.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid threshold id: {s}")))
}
