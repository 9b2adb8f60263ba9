//! Column family layout.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Wallet records, keyed by organization id.
    pub const WALLETS: &str = "wallets";

    /// Purchase records, keyed by purchase id (ULID).
    pub const PURCHASES: &str = "purchases";

    /// Idempotency index: purchase reference id -> purchase id.
    pub const PURCHASE_REFS: &str = "purchase_refs";

    /// Index: purchases by organization, keyed by
    /// `organization_id || purchase_id`. Value is empty (index only).
    pub const PURCHASES_BY_ORG: &str = "purchases_by_org";

    /// Subscription records, keyed by subscription id.
    pub const SUBSCRIPTIONS: &str = "subscriptions";

    /// Auto-top-up policies, keyed by organization id (at most one each).
    pub const TOPUP_POLICIES: &str = "topup_policies";

    /// Append-only balance history, keyed by
    /// `organization_id || entry_id`. ULID entry ids make the key range
    /// per organization chronological.
    pub const HISTORY: &str = "history";

    /// Low-balance notification thresholds, keyed by
    /// `organization_id || threshold_id`.
    pub const THRESHOLDS: &str = "thresholds";
}

/// All column family names, for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::WALLETS,
        cf::PURCHASES,
        cf::PURCHASE_REFS,
        cf::PURCHASES_BY_ORG,
        cf::SUBSCRIPTIONS,
        cf::TOPUP_POLICIES,
        cf::HISTORY,
        cf::THRESHOLDS,
    ]
}
