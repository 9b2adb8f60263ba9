//! Token-ledger HTTP client implementation.

use reqwest::Client;
use std::time::Duration;

use crate::error::ClientError;
use crate::types::{
    ApiErrorResponse, CheckBalanceRequest, CheckBalanceResponse, ConsumptionEvent,
    ConsumptionResponse, CreateWalletRequest, ForecastResponse, PurchaseRequest, PurchaseResponse,
    WalletResponse,
};

/// Token-ledger API client.
///
/// Provides methods for reporting consumption, checking balances, and buying
/// tokens on behalf of an organization.
#[derive(Debug, Clone)]
pub struct TokenLedgerClient {
    client: Client,
    base_url: String,
    api_key: String,
    service_name: String,
}

impl TokenLedgerClient {
    /// Create a new token-ledger client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the token-ledger service (e.g., `"http://token-ledger:8080"`)
    /// * `api_key` - Service API key for authentication
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_options(base_url, api_key, ClientOptions::default())
    }

    /// Create a new token-ledger client with custom options.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be built (should not happen with default settings).
    #[must_use]
    pub fn with_options(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        options: ClientOptions,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            service_name: options.service_name,
        }
    }

    /// Report token consumption.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InsufficientBalance`] when the wallet cannot
    /// cover the event, [`ClientError::WalletSuspended`] when it refuses
    /// debits, or another error if the request fails.
    pub async fn report_consumption(
        &self,
        event: ConsumptionEvent,
    ) -> Result<ConsumptionResponse, ClientError> {
        let url = format!("{}/v1/consumption", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
            .json(&event)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Check whether an organization can cover a planned spend.
    ///
    /// Never debits; callers gate work on the answer and report the actual
    /// consumption afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn check_balance(
        &self,
        organization_id: impl Into<String>,
        required_tokens: i64,
    ) -> Result<CheckBalanceResponse, ClientError> {
        let url = format!("{}/v1/consumption/check", self.base_url);
        let request = CheckBalanceRequest {
            organization_id: organization_id.into(),
            required_tokens,
        };

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
            .json(&request)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Create a wallet.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn create_wallet(
        &self,
        request: CreateWalletRequest,
    ) -> Result<WalletResponse, ClientError> {
        let url = format!("{}/v1/wallets", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
            .json(&request)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Get an organization's wallet.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotFound`] for an unknown organization, or
    /// another error if the request fails.
    pub async fn get_wallet(
        &self,
        organization_id: &str,
    ) -> Result<WalletResponse, ClientError> {
        let url = format!("{}/v1/wallets/{organization_id}", self.base_url);

        let response = self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Initialize a purchase without charging it.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn initialize_purchase(
        &self,
        request: PurchaseRequest,
    ) -> Result<PurchaseResponse, ClientError> {
        let url = format!("{}/v1/purchases", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
            .json(&request)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Execute an initialized purchase: charge the gateway and credit the
    /// wallet.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::PaymentDeclined`] when the gateway refuses the
    /// charge, or another error if the request fails.
    pub async fn execute_purchase(
        &self,
        reference_id: &str,
    ) -> Result<PurchaseResponse, ClientError> {
        let url = format!("{}/v1/purchases/{reference_id}/execute", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Buy tokens in one call: initialize a purchase, then execute it.
    ///
    /// # Errors
    ///
    /// Returns an error if either step fails; a failed execution leaves the
    /// purchase queryable under its reference for retry or cancellation.
    pub async fn purchase_tokens(
        &self,
        request: PurchaseRequest,
    ) -> Result<PurchaseResponse, ClientError> {
        let purchase = self.initialize_purchase(request).await?;
        self.execute_purchase(&purchase.reference_id).await
    }

    /// Get an organization's consumption forecast.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn get_forecast(
        &self,
        organization_id: &str,
    ) -> Result<ForecastResponse, ClientError> {
        let url = format!("{}/v1/wallets/{organization_id}/forecast", self.base_url);

        let response = self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        // Try to parse error response
        let error_body: Result<ApiErrorResponse, _> = response.json().await;

        match error_body {
            Ok(api_error) => {
                let code = api_error.error.code.as_str();
                let message = api_error.error.message;
                tracing::debug!(code, status = status.as_u16(), "API error response");

                // Map specific error codes to typed errors
                match code {
                    "insufficient_balance" => {
                        let balance = api_error
                            .error
                            .details
                            .as_ref()
                            .and_then(|d| d.get("balance"))
                            .and_then(serde_json::Value::as_i64)
                            .unwrap_or(0);
                        let required = api_error
                            .error
                            .details
                            .as_ref()
                            .and_then(|d| d.get("required"))
                            .and_then(serde_json::Value::as_i64)
                            .unwrap_or(0);

                        Err(ClientError::InsufficientBalance { balance, required })
                    }
                    "wallet_suspended" => Err(ClientError::WalletSuspended(message)),
                    "payment_declined" => Err(ClientError::PaymentDeclined(message)),
                    "not_found" => Err(ClientError::NotFound(message)),
                    _ => Err(ClientError::Api {
                        code: code.to_string(),
                        message,
                        status: status.as_u16(),
                    }),
                }
            }
            Err(_) => Err(ClientError::Api {
                code: "unknown".to_string(),
                message: format!("HTTP {status}"),
                status: status.as_u16(),
            }),
        }
    }
}

/// Client options for customization.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request timeout in seconds (default: 30).
    pub timeout_seconds: u64,
    /// Service name to include in requests.
    pub service_name: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            service_name: "unknown".to_string(),
        }
    }
}

impl ClientOptions {
    /// Create options with a service name.
    #[must_use]
    pub fn with_service_name(name: impl Into<String>) -> Self {
        Self {
            service_name: name.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_creation() {
        let client = TokenLedgerClient::new("http://localhost:8080", "test-api-key");
        assert_eq!(client.base_url, "http://localhost:8080");
    }

    #[test]
    fn client_trims_trailing_slash() {
        let client = TokenLedgerClient::new("http://localhost:8080/", "test-api-key");
        assert_eq!(client.base_url, "http://localhost:8080");
    }

    #[test]
    fn client_options() {
        let options = ClientOptions::with_service_name("metering");
        let client = TokenLedgerClient::with_options("http://localhost:8080", "key", options);
        assert_eq!(client.service_name, "metering");
    }
}
