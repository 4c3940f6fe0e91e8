use async_trait::async_trait;
use common::ids::PaymentId;
use serde::Deserialize;
use std::str::FromStr;
use txn_core::context::Context;
use txn_core::contracts::payment_provider::{
    InitiatePaymentRequest, InitiatePaymentResult, InitiatePayoutRequest, InitiatePayoutResult,
    PaymentProvider, PaymentStatus,
};
use txn_core::error::CoreError;
use uuid::Uuid;

/// Talks to a Stripe-shaped HTTP payment processor.
pub struct HttpPaymentProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpPaymentProvider {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }
}

#[derive(Deserialize)]
struct PaymentIntentResponse {
    id: String,
    status: String,
}

#[derive(Deserialize)]
struct PayoutResponse {
    id: String,
    status: String,
    fee_minor: Option<i64>,
    fee_currency: Option<String>,
    estimated_arrival_date: Option<chrono::DateTime<chrono::Utc>>,
}

fn parse_status(status: &str) -> PaymentStatus {
    match status {
        "succeeded" | "paid" => PaymentStatus::Succeeded,
        "failed" | "canceled" => PaymentStatus::Failed,
        _ => PaymentStatus::Pending,
    }
}

fn parse_payment_id(id: &str) -> PaymentId {
    Uuid::from_str(id.trim_start_matches("pi_").trim_start_matches("po_"))
        .map(PaymentId::from_uuid)
        .unwrap_or_else(|_| PaymentId::new())
}

#[async_trait]
impl PaymentProvider for HttpPaymentProvider {
    async fn initiate_payment(
        &self,
        _ctx: &Context,
        request: InitiatePaymentRequest,
    ) -> Result<InitiatePaymentResult, CoreError> {
        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "amount": request.amount.amount(),
                "currency": request.amount.currency(),
                "metadata": {
                    "user_id": request.user_id.to_string(),
                    "account_id": request.account_id.to_string(),
                    "transaction_id": request.transaction_id.to_string(),
                },
            }))
            .send()
            .await
            .map_err(|e| CoreError::Transient(format!("payment provider request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CoreError::Transient(format!(
                "payment provider returned {}",
                response.status()
            )));
        }

        let body: PaymentIntentResponse = response
            .json()
            .await
            .map_err(|e| CoreError::Transient(format!("malformed payment provider response: {e}")))?;

        Ok(InitiatePaymentResult {
            payment_id: parse_payment_id(&body.id),
            status: parse_status(&body.status),
        })
    }

    async fn initiate_payout(
        &self,
        _ctx: &Context,
        request: InitiatePayoutRequest,
    ) -> Result<InitiatePayoutResult, CoreError> {
        let response = self
            .client
            .post(format!("{}/v1/payouts", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "amount": request.amount.amount(),
                "currency": request.amount.currency(),
                "destination": {
                    "account_number": request.destination.account_number,
                    "routing_number": request.destination.routing_number,
                },
                "description": request.description,
                "metadata": request.metadata,
                "stripe_account": request.provider_connect_account_id,
            }))
            .send()
            .await
            .map_err(|e| CoreError::Transient(format!("payment provider request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CoreError::Transient(format!(
                "payment provider returned {}",
                response.status()
            )));
        }

        let body: PayoutResponse = response
            .json()
            .await
            .map_err(|e| CoreError::Transient(format!("malformed payment provider response: {e}")))?;

        let fee_amount = match (body.fee_minor, body.fee_currency) {
            (Some(minor), Some(currency)) => Some(common::money::Money::from_minor(minor, &currency)?),
            _ => None,
        };

        Ok(InitiatePayoutResult {
            payout_id: parse_payment_id(&body.id),
            payment_provider_id: body.id,
            status: parse_status(&body.status),
            fee_amount,
            estimated_arrival_date: body.estimated_arrival_date,
        })
    }

    async fn get_payment_status(
        &self,
        _ctx: &Context,
        payment_id: PaymentId,
    ) -> Result<PaymentStatus, CoreError> {
        let response = self
            .client
            .get(format!(
                "{}/v1/payment_intents/{}",
                self.base_url,
                payment_id.as_uuid()
            ))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| CoreError::Transient(format!("payment provider request failed: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CoreError::NotFound(format!("payment {payment_id} not found")));
        }
        if !response.status().is_success() {
            return Err(CoreError::Transient(format!(
                "payment provider returned {}",
                response.status()
            )));
        }

        let body: PaymentIntentResponse = response
            .json()
            .await
            .map_err(|e| CoreError::Transient(format!("malformed payment provider response: {e}")))?;

        Ok(parse_status(&body.status))
    }
}
