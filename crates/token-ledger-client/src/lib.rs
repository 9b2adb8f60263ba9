//! Token Ledger Client SDK.
//!
//! This crate provides a client library for services to interact with the
//! token-ledger API.
//!
//! # Example
//!
//! ```no_run
//! use token_ledger_client::{ConsumptionEvent, TokenLedgerClient};
//!
//! # async fn example() -> Result<(), token_ledger_client::ClientError> {
//! let client = TokenLedgerClient::new(
//!     "http://token-ledger.billing-system.svc:8080",
//!     "your-service-api-key",
//! );
//!
//! // Report token consumption
//! let response = client.report_consumption(ConsumptionEvent {
//!     event_id: "evt_123".to_string(),
//!     organization_id: "org-uuid".to_string(),
//!     amount: 250,
//! }).await?;
//!
//! println!("New balance: {} tokens", response.balance);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod error;
mod types;

pub use client::{ClientOptions, TokenLedgerClient};
pub use error::ClientError;
pub use types::*;
