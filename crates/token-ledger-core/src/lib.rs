//! Core types and validation for the token wallet & billing ledger engine.
//!
//! This crate provides the foundational types used throughout the platform:
//!
//! - **Identifiers**: `OrganizationId`, `PurchaseId`, `EntryId`, `SubscriptionId`
//! - **Money**: `Amount`, an exact fixed-point type serialized as a decimal string
//! - **Wallets**: `Wallet`, `BalanceHistoryEntry`, `NotificationThreshold`
//! - **Purchases**: `Purchase`, `PurchaseType`, `PurchaseStatus`
//! - **Subscriptions**: `Subscription`, `BillingFrequency`
//! - **Auto top-up**: `AutoTopupPolicy`, `TopupTrigger`
//! - **Pricing**: `PricingConfig`, `TokenPackage`, `PriceQuote`
//!
//! # Tokens and money
//!
//! A **token** is the prepaid unit of consumption. Token quantities are whole
//! `i64` values. Monetary amounts are [`Amount`]: `i64` minor units (cents),
//! never floating point, transmitted over the wire as decimal strings such as
//! `"5.00"` so that no rounding drift can accumulate.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;
pub mod money;
pub mod pricing;
pub mod purchase;
pub mod subscription;
pub mod topup;
pub mod wallet;

pub use error::{LedgerError, Result};
pub use ids::{EntryId, IdError, OrganizationId, PurchaseId, SubscriptionId, ThresholdId};
pub use money::{Amount, AmountParseError, DEFAULT_CURRENCY};
pub use pricing::{PriceQuote, PricingConfig, TokenPackage};
pub use purchase::{Purchase, PurchaseStatus, PurchaseType};
pub use subscription::{BillingFrequency, Subscription, SubscriptionStatus};
pub use topup::{AutoTopupPolicy, ScheduleFrequency, TopupTrigger};
pub use wallet::{
    BalanceHistoryEntry, ChangeType, NotificationThreshold, ReferenceType, ThresholdKind, Wallet,
};
