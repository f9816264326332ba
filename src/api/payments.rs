//! Payment endpoints.

use crate::api::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::error::{created_response, success_response};
use crate::services::payment_orchestrator::CreateOrderInput;
use axum::{
    extract::{Path, State},
    response::Response,
    Json,
};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub application_id: String,
    pub amount: Option<String>,
    pub currency: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CapturePaymentRequest {
    pub order_id: String,
    pub application_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub payment_id: Uuid,
    pub amount: Option<String>,
    pub reason: Option<String>,
}

fn parse_amount(value: Option<&str>) -> AppResult<Option<BigDecimal>> {
    value
        .map(|v| {
            BigDecimal::from_str(v.trim())
                .map_err(|_| AppError::validation("amount", format!("invalid amount '{}'", v)))
        })
        .transpose()
}

/// POST /api/payments/paypal/create
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreatePaymentRequest>,
) -> AppResult<Response> {
    let amount = parse_amount(request.amount.as_deref())?;
    let created = state
        .orchestrator
        .create_order(CreateOrderInput {
            application_id: request.application_id,
            amount,
            currency: request.currency,
            description: request.description,
        })
        .await?;
    Ok(created_response(created))
}

/// POST /api/payments/paypal/capture
pub async fn capture_order(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CapturePaymentRequest>,
) -> AppResult<Response> {
    let outcome = state
        .orchestrator
        .capture_order(&request.order_id, &request.application_id)
        .await?;
    Ok(success_response(outcome))
}

/// POST /api/payments/refund
pub async fn refund(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RefundRequest>,
) -> AppResult<Response> {
    let amount = parse_amount(request.amount.as_deref())?;
    let outcome = state
        .orchestrator
        .refund(request.payment_id, amount, request.reason)
        .await?;
    Ok(success_response(outcome))
}

/// GET /api/payments/:payment_id
pub async fn payment_status(
    State(state): State<Arc<AppState>>,
    Path(payment_id): Path<Uuid>,
) -> AppResult<Response> {
    let view = state.orchestrator.status(payment_id).await?;
    Ok(success_response(view))
}

/// GET /api/payments/stats
pub async fn payment_stats(State(state): State<Arc<AppState>>) -> AppResult<Response> {
    let stats = state.orchestrator.stats().await?;
    Ok(success_response(stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_parsing_accepts_decimals_and_rejects_garbage() {
        assert_eq!(
            parse_amount(Some("252.00")).expect("valid amount"),
            Some(BigDecimal::from(252))
        );
        assert_eq!(parse_amount(None).expect("absent amount"), None);
        assert!(parse_amount(Some("two hundred")).is_err());
    }
}
