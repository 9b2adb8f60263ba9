//! HTTP payment gateway client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use token_ledger_core::Amount;

use crate::gateway::{ChargeOutcome, ChargeRequest, ChargeStatus, GatewayError, PaymentGateway};

/// Bearer-authenticated JSON client for the payment gateway.
///
/// The gateway answers declines as `200` with a `declined` status body, so a
/// non-success HTTP status is never a decline: 5xx is transport trouble and
/// anything else unexpected is a protocol error, both of which leave the
/// charge outcome unknown.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct ChargeBody<'a> {
    idempotency_key: &'a str,
    payment_method_id: &'a str,
    amount: Amount,
    currency: &'a str,
    description: &'a str,
}

#[derive(Debug, Serialize)]
struct RefundBody<'a> {
    amount: Amount,
    currency: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChargeResponse {
    transaction_id: String,
    status: String,
    decline_reason: Option<String>,
}

impl TryFrom<ChargeResponse> for ChargeOutcome {
    type Error = GatewayError;

    fn try_from(response: ChargeResponse) -> Result<Self, GatewayError> {
        let status = match response.status.as_str() {
            "succeeded" => ChargeStatus::Succeeded,
            "declined" => ChargeStatus::Declined,
            other => {
                return Err(GatewayError::Protocol(format!(
                    "unexpected charge status: {other}"
                )))
            }
        };
        Ok(Self {
            transaction_id: response.transaction_id,
            status,
            decline_reason: response.decline_reason,
        })
    }
}

impl HttpGateway {
    /// Create a gateway client.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Transport`] if the HTTP client cannot be
    /// built.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn map_send_error(err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout
        } else {
            GatewayError::Transport(err.to_string())
        }
    }

    async fn handle_response(
        response: reqwest::Response,
    ) -> Result<ChargeOutcome, GatewayError> {
        let status = response.status();
        if status.is_success() {
            let body: ChargeResponse = response
                .json()
                .await
                .map_err(|e| GatewayError::Protocol(e.to_string()))?;
            return body.try_into();
        }
        if status.is_server_error() {
            return Err(GatewayError::Transport(format!("HTTP {status}")));
        }
        Err(GatewayError::Protocol(format!("HTTP {status}")))
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn charge(&self, request: &ChargeRequest<'_>) -> Result<ChargeOutcome, GatewayError> {
        let body = ChargeBody {
            idempotency_key: request.idempotency_key,
            payment_method_id: request.payment_method_id,
            amount: request.amount,
            currency: request.currency,
            description: request.description,
        };

        tracing::debug!(
            idempotency_key = %request.idempotency_key,
            amount = %request.amount,
            "sending gateway charge"
        );

        let response = self
            .client
            .post(format!("{}/charges", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        Self::handle_response(response).await
    }

    async fn refund(
        &self,
        transaction_id: &str,
        amount: Amount,
        currency: &str,
    ) -> Result<ChargeOutcome, GatewayError> {
        let response = self
            .client
            .post(format!(
                "{}/charges/{transaction_id}/refunds",
                self.base_url
            ))
            .bearer_auth(&self.api_key)
            .json(&RefundBody { amount, currency })
            .send()
            .await
            .map_err(Self::map_send_error)?;

        Self::handle_response(response).await
    }

    async fn lookup(&self, idempotency_key: &str) -> Result<Option<ChargeOutcome>, GatewayError> {
        let response = self
            .client
            .get(format!("{}/charges/{idempotency_key}", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        Self::handle_response(response).await.map(Some)
    }
}
