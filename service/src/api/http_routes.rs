use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use common::ids::{AccountId, PaymentId, TransactionId, UserId};
use common::money::Money;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use std::sync::Arc;
use txn_core::bus::EventBus;
use txn_core::context::Context;
use txn_core::events::{
    DepositRequested, DomainEvent, Envelope, FlowType, PaymentCompleted, PaymentFailed,
    PaymentProcessed, TransferRequested, WithdrawRequested,
};
use txn_core::uow::UnitOfWork;
use uuid::Uuid;

use super::error::ApiError;
use super::response::ApiResponse;

pub struct AppState {
    pub bus: EventBus,
    pub uow: Arc<dyn UnitOfWork>,
}

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/deposits", post(create_deposit))
        .route("/withdrawals", post(create_withdrawal))
        .route("/transfers", post(create_transfer))
        .route("/webhooks/payment/processed", post(payment_processed_webhook))
        .route("/webhooks/payment/completed", post(payment_completed_webhook))
        .route("/webhooks/payment/failed", post(payment_failed_webhook))
        .route("/transactions/{id}", get(get_transaction))
        .route("/accounts/{account_id}/transactions", get(list_account_transactions))
        .route("/users/{user_id}/transactions", get(list_user_transactions))
        .with_state(state)
}

#[derive(Serialize)]
struct AcceptedResponse {
    correlation_id: Uuid,
}

fn accepted(envelope: &Envelope) -> Json<ApiResponse<AcceptedResponse>> {
    Json(ApiResponse::success(AcceptedResponse {
        correlation_id: envelope.correlation_id.as_uuid(),
    }))
}

#[derive(Deserialize, ToSchema)]
pub struct DepositRequest {
    pub user_id: Uuid,
    pub account_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
}

/// Accepts a deposit request and drives it through the flow synchronously,
/// up to whatever point the flow naturally suspends (a currency conversion
/// round trip, or the payment provider's async callback). The transaction
/// itself is read back via `GET /transactions/{id}` once settled.
pub async fn create_deposit(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DepositRequest>,
) -> Result<Json<ApiResponse<AcceptedResponse>>, ApiError> {
    let amount = Money::from_minor(payload.amount_minor, &payload.currency)?;
    let envelope = Envelope::root(
        FlowType::Deposit,
        UserId::from_uuid(payload.user_id),
        AccountId::from_uuid(payload.account_id),
    );
    let response = accepted(&envelope);
    state
        .bus
        .emit(
            &Context::new(),
            DomainEvent::DepositRequested(DepositRequested { envelope, amount }),
        )
        .await?;
    Ok(response)
}

#[derive(Deserialize, ToSchema)]
pub struct WithdrawalRequest {
    pub user_id: Uuid,
    pub account_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
    pub bank_account_number: String,
    pub routing_number: String,
    pub description: String,
}

pub async fn create_withdrawal(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<WithdrawalRequest>,
) -> Result<Json<ApiResponse<AcceptedResponse>>, ApiError> {
    let amount = Money::from_minor(payload.amount_minor, &payload.currency)?;
    let envelope = Envelope::root(
        FlowType::Withdraw,
        UserId::from_uuid(payload.user_id),
        AccountId::from_uuid(payload.account_id),
    );
    let response = accepted(&envelope);
    state
        .bus
        .emit(
            &Context::new(),
            DomainEvent::WithdrawRequested(WithdrawRequested {
                envelope,
                amount,
                bank_account_number: payload.bank_account_number,
                routing_number: payload.routing_number,
                description: payload.description,
            }),
        )
        .await?;
    Ok(response)
}

#[derive(Deserialize, ToSchema)]
pub struct TransferRequest {
    pub user_id: Uuid,
    pub from_account_id: Uuid,
    pub to_account_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
}

pub async fn create_transfer(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<TransferRequest>,
) -> Result<Json<ApiResponse<AcceptedResponse>>, ApiError> {
    let amount = Money::from_minor(payload.amount_minor, &payload.currency)?;
    let from_account_id = AccountId::from_uuid(payload.from_account_id);
    let envelope = Envelope::root(FlowType::Transfer, UserId::from_uuid(payload.user_id), from_account_id);
    let response = accepted(&envelope);
    state
        .bus
        .emit(
            &Context::new(),
            DomainEvent::TransferRequested(TransferRequested {
                envelope,
                from_account_id,
                to_account_id: AccountId::from_uuid(payload.to_account_id),
                amount,
            }),
        )
        .await?;
    Ok(response)
}

/// Webhook payloads identify the transaction the callback resolves and the
/// flow it belongs to; the envelope's user/account ids are recovered from
/// the transaction row rather than trusted from the request body.
#[derive(Deserialize, ToSchema)]
pub struct PaymentWebhook {
    pub transaction_id: Uuid,
    pub payment_id: Option<Uuid>,
    pub flow: String,
    pub amount_minor: Option<i64>,
    pub currency: Option<String>,
    pub fee_minor: Option<i64>,
    pub fee_currency: Option<String>,
    pub reason: Option<String>,
}

fn parse_flow(flow: &str) -> Result<FlowType, ApiError> {
    match flow {
        "deposit" => Ok(FlowType::Deposit),
        "withdraw" => Ok(FlowType::Withdraw),
        "transfer" => Ok(FlowType::Transfer),
        other => Err(txn_core::error::CoreError::InvalidRequest(format!("unknown flow {other}")).into()),
    }
}

async fn webhook_envelope(
    state: &AppState,
    transaction_id: TransactionId,
    flow: FlowType,
) -> Result<Envelope, ApiError> {
    let outcome = std::sync::Arc::new(std::sync::Mutex::new(None));
    let outcome_inner = outcome.clone();
    state
        .uow
        .do_in_scope(Box::new(move |scope| {
            Box::pin(async move {
                let tx = scope
                    .transactions()
                    .get(transaction_id)
                    .await?
                    .ok_or_else(|| txn_core::error::CoreError::NotFound(format!("transaction {transaction_id}")))?;
                *outcome_inner.lock().unwrap() = Some((tx.user_id, tx.account_id));
                Ok(())
            })
        }))
        .await?;

    let (user_id, account_id) = outcome.lock().unwrap().take().expect("set on Ok above");
    Ok(Envelope::root(flow, user_id, account_id).with_transaction_id(transaction_id))
}

pub async fn payment_processed_webhook(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PaymentWebhook>,
) -> Result<Json<ApiResponse<&'static str>>, ApiError> {
    let transaction_id = TransactionId::from_uuid(payload.transaction_id);
    let flow = parse_flow(&payload.flow)?;
    let envelope = webhook_envelope(&state, transaction_id, flow).await?;
    let payment_id = payload.payment_id.map(PaymentId::from_uuid);
    let amount = match (payload.amount_minor, payload.currency) {
        (Some(minor), Some(currency)) => Some(Money::from_minor(minor, &currency)?),
        _ => None,
    };

    state
        .bus
        .emit(
            &Context::new(),
            DomainEvent::PaymentProcessed(PaymentProcessed {
                envelope,
                payment_id,
                amount,
            }),
        )
        .await?;
    Ok(Json(ApiResponse::success("accepted")))
}

pub async fn payment_completed_webhook(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PaymentWebhook>,
) -> Result<Json<ApiResponse<&'static str>>, ApiError> {
    let transaction_id = TransactionId::from_uuid(payload.transaction_id);
    let flow = parse_flow(&payload.flow)?;
    let envelope = webhook_envelope(&state, transaction_id, flow).await?;
    let payment_id = payload.payment_id.map(PaymentId::from_uuid);
    let amount_minor = payload
        .amount_minor
        .ok_or_else(|| txn_core::error::CoreError::InvalidRequest("amount_minor required".to_string()))?;
    let currency = payload
        .currency
        .ok_or_else(|| txn_core::error::CoreError::InvalidRequest("currency required".to_string()))?;
    let amount = Money::from_minor(amount_minor, &currency)?;
    let fee = match (payload.fee_minor, payload.fee_currency) {
        (Some(minor), Some(currency)) => Some(Money::from_minor(minor, &currency)?),
        _ => None,
    };

    state
        .bus
        .emit(
            &Context::new(),
            DomainEvent::PaymentCompleted(PaymentCompleted {
                envelope,
                payment_id,
                amount,
                fee,
            }),
        )
        .await?;
    Ok(Json(ApiResponse::success("accepted")))
}

pub async fn payment_failed_webhook(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PaymentWebhook>,
) -> Result<Json<ApiResponse<&'static str>>, ApiError> {
    let transaction_id = TransactionId::from_uuid(payload.transaction_id);
    let flow = parse_flow(&payload.flow)?;
    let envelope = webhook_envelope(&state, transaction_id, flow).await?;
    let payment_id = payload.payment_id.map(PaymentId::from_uuid);
    let reason = payload.reason.unwrap_or_else(|| "payment provider reported failure".to_string());

    state
        .bus
        .emit(
            &Context::new(),
            DomainEvent::PaymentFailed(PaymentFailed {
                envelope,
                payment_id,
                reason,
            }),
        )
        .await?;
    Ok(Json(ApiResponse::success("accepted")))
}

pub async fn get_transaction(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<txn_core::entities::Transaction>>, ApiError> {
    let transaction_id = TransactionId::from_uuid(id);
    let outcome = std::sync::Arc::new(std::sync::Mutex::new(None));
    let outcome_inner = outcome.clone();
    state
        .uow
        .do_in_scope(Box::new(move |scope| {
            Box::pin(async move {
                let tx = scope
                    .transactions()
                    .get(transaction_id)
                    .await?
                    .ok_or_else(|| txn_core::error::CoreError::NotFound(format!("transaction {transaction_id}")))?;
                *outcome_inner.lock().unwrap() = Some(tx);
                Ok(())
            })
        }))
        .await?;
    let tx = outcome.lock().unwrap().take().expect("set on Ok above");
    Ok(Json(ApiResponse::success(tx)))
}

pub async fn list_account_transactions(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<txn_core::entities::Transaction>>>, ApiError> {
    let account_id = AccountId::from_uuid(account_id);
    let outcome = std::sync::Arc::new(std::sync::Mutex::new(None));
    let outcome_inner = outcome.clone();
    state
        .uow
        .do_in_scope(Box::new(move |scope| {
            Box::pin(async move {
                let txs = scope.transactions().list_by_account(account_id).await?;
                *outcome_inner.lock().unwrap() = Some(txs);
                Ok(())
            })
        }))
        .await?;
    let txs = outcome.lock().unwrap().take().expect("set on Ok above");
    Ok(Json(ApiResponse::success(txs)))
}

pub async fn list_user_transactions(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<txn_core::entities::Transaction>>>, ApiError> {
    let user_id = UserId::from_uuid(user_id);
    let outcome = std::sync::Arc::new(std::sync::Mutex::new(None));
    let outcome_inner = outcome.clone();
    state
        .uow
        .do_in_scope(Box::new(move |scope| {
            Box::pin(async move {
                let txs = scope.transactions().list_by_user(user_id).await?;
                *outcome_inner.lock().unwrap() = Some(txs);
                Ok(())
            })
        }))
        .await?;
    let txs = outcome.lock().unwrap().take().expect("set on Ok above");
    Ok(Json(ApiResponse::success(txs)))
}
