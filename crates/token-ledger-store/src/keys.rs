//! Key encodings for the column families.

use token_ledger_core::{EntryId, OrganizationId, PurchaseId, SubscriptionId, ThresholdId};

/// Wallet key: the organization UUID bytes.
#[must_use]
pub fn wallet_key(organization_id: &OrganizationId) -> Vec<u8> {
    organization_id.as_bytes().to_vec()
}

/// Purchase key: the purchase ULID bytes.
#[must_use]
pub fn purchase_key(purchase_id: &PurchaseId) -> Vec<u8> {
    purchase_id.to_bytes().to_vec()
}

/// Idempotency index key: the raw reference string.
#[must_use]
pub fn purchase_ref_key(reference_id: &str) -> Vec<u8> {
    reference_id.as_bytes().to_vec()
}

/// Organization purchase index key: `organization_id (16) || purchase_id (16)`.
///
/// ULIDs are time-ordered, so an organization's purchases scan back in
/// chronological order.
#[must_use]
pub fn org_purchase_key(organization_id: &OrganizationId, purchase_id: &PurchaseId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(organization_id.as_bytes());
    key.extend_from_slice(&purchase_id.to_bytes());
    key
}

/// Prefix for iterating an organization's purchases.
#[must_use]
pub fn org_prefix(organization_id: &OrganizationId) -> Vec<u8> {
    organization_id.as_bytes().to_vec()
}

/// Extract the purchase id from an organization purchase index key.
///
/// # Panics
///
/// Panics if the key is not at least 32 bytes.
#[must_use]
pub fn extract_purchase_id(key: &[u8]) -> PurchaseId {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&key[16..32]);
    PurchaseId::from_bytes(bytes)
}

/// Subscription key: the subscription UUID bytes.
#[must_use]
pub fn subscription_key(subscription_id: &SubscriptionId) -> Vec<u8> {
    subscription_id.as_bytes().to_vec()
}

/// Auto-top-up policy key: the organization UUID bytes.
#[must_use]
pub fn policy_key(organization_id: &OrganizationId) -> Vec<u8> {
    organization_id.as_bytes().to_vec()
}

/// History key: `organization_id (16) || entry_id (16)`.
#[must_use]
pub fn history_key(organization_id: &OrganizationId, entry_id: &EntryId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(organization_id.as_bytes());
    key.extend_from_slice(&entry_id.to_bytes());
    key
}

/// Threshold key: `organization_id (16) || threshold_id (16)`.
#[must_use]
pub fn threshold_key(organization_id: &OrganizationId, threshold_id: &ThresholdId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(organization_id.as_bytes());
    key.extend_from_slice(threshold_id.as_bytes());
    key
}
