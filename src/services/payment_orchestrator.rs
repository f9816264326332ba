//! Payment Orchestrator Service
//!
//! Owns the payment lifecycle against the gateway: order creation with
//! reuse of pending records under client retry, capture with authoritative
//! gateway reconciliation, refunds, status queries and statistics. The
//! gateway stays the source of truth for money movement; this service
//! reconciles local records against it and settles through the store's
//! conditional-update primitives so concurrent webhook- and client-driven
//! settlement cannot double-apply.

use crate::error::{AppError, AppErrorKind, AppResult, DomainError, ExternalError};
use crate::gateway::error::GatewayError;
use crate::gateway::types::{
    CaptureDetails, CreateOrderRequest, GatewayOrderStatus, Money, PayerIdentity,
};
use crate::gateway::PaymentGateway;
use crate::services::notification::{NotificationKind, NotificationService};
use crate::store::{
    ApplicationStore, CaptureUpdate, Payment, PaymentStatus, PaymentStatusStats, PaymentStore,
    RefundUpdate,
};
use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Input for order creation
#[derive(Debug, Clone)]
pub struct CreateOrderInput {
    pub application_id: String,
    /// Optional client-supplied amount; must match the computed total
    pub amount: Option<BigDecimal>,
    pub currency: Option<String>,
    pub description: Option<String>,
}

/// Result of order creation
#[derive(Debug, Clone, Serialize)]
pub struct CreatedPaymentOrder {
    pub payment_id: Uuid,
    pub order_id: String,
    pub status: PaymentStatus,
    pub approve_url: Option<String>,
    pub amount: String,
    pub currency: String,
    /// True when an existing pending payment was handed back instead of a
    /// fresh gateway order
    pub reused: bool,
}

/// Result of a capture call
#[derive(Debug, Clone, Serialize)]
pub struct CaptureOutcome {
    pub payment_id: Uuid,
    pub application_id: String,
    pub order_id: String,
    pub capture_id: Option<String>,
    pub status: PaymentStatus,
    pub amount: String,
    pub currency: String,
    pub payer: Option<PayerIdentity>,
    /// True when the gateway had already settled the order and no capture
    /// call was issued
    pub already_captured: bool,
}

/// Result of a refund call
#[derive(Debug, Clone, Serialize)]
pub struct RefundOutcome {
    pub payment_id: Uuid,
    pub refund_id: String,
    pub amount: String,
    pub status: PaymentStatus,
}

/// Persisted payment status, optionally enriched with the gateway's live
/// view
#[derive(Debug, Clone, Serialize)]
pub struct PaymentStatusView {
    pub payment_id: Uuid,
    pub application_id: String,
    pub order_id: String,
    pub capture_id: Option<String>,
    pub status: PaymentStatus,
    pub amount: String,
    pub currency: String,
    pub last_error: Option<String>,
    pub refund_amount: Option<String>,
    pub gateway_status: Option<GatewayOrderStatus>,
}

pub struct PaymentOrchestrator {
    gateway: Arc<dyn PaymentGateway>,
    payments: Arc<dyn PaymentStore>,
    applications: Arc<dyn ApplicationStore>,
    notifications: Arc<NotificationService>,
}

impl PaymentOrchestrator {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        payments: Arc<dyn PaymentStore>,
        applications: Arc<dyn ApplicationStore>,
        notifications: Arc<NotificationService>,
    ) -> Self {
        Self {
            gateway,
            payments,
            applications,
            notifications,
        }
    }

    // =========================================================================
    // Order creation
    // =========================================================================

    /// Create a gateway order for a submitted application.
    ///
    /// A pending payment flagged reusable is handed back with a freshly
    /// fetched approval link instead of creating a duplicate order; this
    /// tolerates client retries after a timed-out creation call. Any other
    /// open payment is a conflict.
    pub async fn create_order(&self, input: CreateOrderInput) -> AppResult<CreatedPaymentOrder> {
        let application = self
            .applications
            .find_application(&input.application_id)
            .await?
            .ok_or_else(|| AppError::application_not_found(&input.application_id))?;

        if !application.status.is_payable() {
            return Err(AppError::invalid_state(
                "application",
                application.status.as_str(),
                "create payment order",
            ));
        }

        let total = application.total_fee.clone().ok_or_else(|| {
            AppError::invalid_state("application", application.status.as_str(), "create payment order")
        })?;

        if let Some(amount) = &input.amount {
            if amount != &total {
                return Err(AppError::validation(
                    "amount",
                    format!("amount must equal the computed total fee {}", total),
                ));
            }
        }
        if let Some(currency) = &input.currency {
            if !currency.eq_ignore_ascii_case(&application.currency) {
                return Err(AppError::validation(
                    "currency",
                    format!("currency must be {}", application.currency),
                ));
            }
        }

        if let Some(existing) = self.payments.find_open_payment(&application.application_id).await? {
            if existing.reusable {
                info!(
                    payment_id = %existing.payment_id,
                    order_id = %existing.order_id,
                    "reusing pending payment for retried order creation"
                );
                let order = self.gateway.get_order(&existing.order_id).await.map_err(AppError::from)?;
                return Ok(CreatedPaymentOrder {
                    payment_id: existing.payment_id,
                    order_id: existing.order_id,
                    status: existing.status,
                    approve_url: order.approve_url,
                    amount: money_string(&existing.amount),
                    currency: existing.currency,
                    reused: true,
                });
            }
            return Err(AppError::new(AppErrorKind::Domain(
                DomainError::OpenPaymentExists {
                    application_id: application.application_id.clone(),
                },
            )));
        }

        let amount = Money::new(money_string(&total), application.currency.clone());
        let created = self
            .gateway
            .create_order(CreateOrderRequest {
                amount,
                description: input.description.clone(),
                reference: application.application_id.clone(),
            })
            .await
            .map_err(AppError::from)?;

        let now = Utc::now();
        let payment = Payment {
            payment_id: Uuid::new_v4(),
            application_id: application.application_id.clone(),
            order_id: created.order_id.clone(),
            capture_id: None,
            status: PaymentStatus::Created,
            amount: total,
            currency: application.currency.clone(),
            payer: None,
            webhook_events: Vec::new(),
            metadata: serde_json::json!({
                "order_response": created.raw,
                "order_created_at": now.to_rfc3339(),
            }),
            reusable: true,
            idempotency_key: created.request_id.clone(),
            last_error: None,
            refund_amount: None,
            refund_reason: None,
            refunded_at: None,
            created_at: now,
            updated_at: now,
        };
        let stored = self.payments.insert_payment(&payment).await?;

        info!(
            payment_id = %stored.payment_id,
            order_id = %stored.order_id,
            application_id = %stored.application_id,
            amount = %stored.amount,
            "payment order created"
        );

        Ok(CreatedPaymentOrder {
            payment_id: stored.payment_id,
            order_id: stored.order_id,
            status: stored.status,
            approve_url: created.approve_url,
            amount: money_string(&stored.amount),
            currency: stored.currency,
            reused: false,
        })
    }

    // =========================================================================
    // Capture
    // =========================================================================

    /// Capture an order after out-of-band approval.
    ///
    /// The local record is not trusted alone: the gateway's live order
    /// status decides the path, because only the gateway knows whether a
    /// capture already happened out-of-band.
    pub async fn capture_order(
        &self,
        order_id: &str,
        application_id: &str,
    ) -> AppResult<CaptureOutcome> {
        let payment = self
            .payments
            .find_payment_by_gateway_ref(order_id)
            .await?
            .filter(|p| p.application_id == application_id)
            .ok_or_else(|| AppError::payment_not_found(order_id))?;

        let result = self.capture_inner(&payment, order_id).await;
        match result {
            Err(err) => {
                // The record must never silently stay open after a known
                // gateway failure. State-gate rejections mutate nothing.
                if let AppErrorKind::External(ExternalError::Gateway { message, .. }) = &err.kind {
                    error!(
                        payment_id = %payment.payment_id,
                        order_id = %order_id,
                        error = %message,
                        "capture failed, persisting failed status"
                    );
                    if let Err(persist_err) =
                        self.payments.fail_if_open(payment.payment_id, message).await
                    {
                        error!(
                            payment_id = %payment.payment_id,
                            error = %persist_err,
                            "could not persist failed status after capture error"
                        );
                    }
                }
                Err(err)
            }
            ok => ok,
        }
    }

    async fn capture_inner(&self, payment: &Payment, order_id: &str) -> AppResult<CaptureOutcome> {
        let live = self
            .gateway
            .get_order(order_id)
            .await
            .map_err(AppError::from)?;

        match live.status {
            GatewayOrderStatus::Completed => {
                // Settled out-of-band (webhook or concurrent capture).
                // Idempotent success from the caller's perspective.
                self.settle_completed(
                    payment,
                    live.capture_id.clone(),
                    None,
                    None,
                    live.raw.clone(),
                )
                .await?;
                self.finish_outcome(payment, live.capture_id, None, true).await
            }
            GatewayOrderStatus::Approved => match self.gateway.capture_order(order_id).await {
                Ok(details) => {
                    self.settle_from_capture(payment, &details).await?;
                    self.finish_outcome(
                        payment,
                        Some(details.capture_id.clone()),
                        details.payer.clone(),
                        false,
                    )
                    .await
                }
                Err(GatewayError::OrderAlreadyCaptured { .. }) => {
                    // Race with a webhook or a duplicate client request;
                    // treat identically to the already-completed branch.
                    warn!(order_id = %order_id, "order captured concurrently, reconciling");
                    let refreshed = self
                        .gateway
                        .get_order(order_id)
                        .await
                        .map_err(AppError::from)?;
                    self.settle_completed(
                        payment,
                        refreshed.capture_id.clone(),
                        None,
                        None,
                        refreshed.raw.clone(),
                    )
                    .await?;
                    self.finish_outcome(payment, refreshed.capture_id, None, true).await
                }
                Err(other) => Err(other.into()),
            },
            GatewayOrderStatus::Created | GatewayOrderStatus::PayerActionRequired => {
                Err(AppError::invalid_state(
                    "payment",
                    live.status.as_str(),
                    "capture before the payer completed approval",
                ))
            }
            other => Err(AppError::invalid_state("payment", other.as_str(), "capture")),
        }
    }

    async fn settle_from_capture(
        &self,
        payment: &Payment,
        details: &CaptureDetails,
    ) -> AppResult<()> {
        self.settle_completed(
            payment,
            Some(details.capture_id.clone()),
            details.payer.clone(),
            details
                .gateway_fee
                .as_ref()
                .and_then(|fee| fee.as_decimal()),
            details.raw.clone(),
        )
        .await
    }

    /// Apply a completed settlement through the conditional primitive and
    /// synchronize the application. A `None` from the store means another
    /// writer settled first; that is success, not an error.
    async fn settle_completed(
        &self,
        payment: &Payment,
        capture_id: Option<String>,
        payer: Option<PayerIdentity>,
        gateway_fee: Option<BigDecimal>,
        raw_response: JsonValue,
    ) -> AppResult<()> {
        let update = CaptureUpdate {
            capture_id: capture_id.unwrap_or_else(|| payment.order_id.clone()),
            payer,
            gateway_fee,
            raw_response,
        };

        match self.payments.complete_if_open(payment.payment_id, &update).await? {
            Some(settled) => {
                info!(
                    payment_id = %settled.payment_id,
                    capture_id = ?settled.capture_id,
                    "payment completed"
                );
            }
            None => {
                info!(
                    payment_id = %payment.payment_id,
                    "payment already settled, conditional update was a no-op"
                );
            }
        }

        self.sync_application_paid(&payment.application_id).await;
        Ok(())
    }

    /// Move the application to `paid` if it is still `submitted`, then fire
    /// the receipt notification. Both are isolated from the settlement's
    /// error path.
    async fn sync_application_paid(&self, application_id: &str) {
        match self.applications.mark_paid_if_submitted(application_id).await {
            Ok(Some(application)) => {
                info!(application_id = %application_id, "application marked paid");
                self.notifications.dispatch(
                    NotificationKind::PaymentReceived,
                    application.application_id.clone(),
                    application.email.clone(),
                );
            }
            Ok(None) => {}
            Err(err) => {
                error!(
                    application_id = %application_id,
                    error = %err,
                    "failed to synchronize application status after settlement"
                );
            }
        }
    }

    async fn finish_outcome(
        &self,
        payment: &Payment,
        capture_id: Option<String>,
        payer: Option<PayerIdentity>,
        already_captured: bool,
    ) -> AppResult<CaptureOutcome> {
        // Re-read so the outcome reflects whatever settlement won.
        let current = self
            .payments
            .find_payment(payment.payment_id)
            .await?
            .ok_or_else(|| AppError::payment_not_found(payment.payment_id.to_string()))?;

        Ok(CaptureOutcome {
            payment_id: current.payment_id,
            application_id: current.application_id.clone(),
            order_id: current.order_id.clone(),
            capture_id: current.capture_id.clone().or(capture_id),
            status: current.status,
            amount: money_string(&current.amount),
            currency: current.currency.clone(),
            payer: current.payer.clone().or(payer),
            already_captured,
        })
    }

    // =========================================================================
    // Refund
    // =========================================================================

    /// Refund a completed payment, fully when no amount is given.
    pub async fn refund(
        &self,
        payment_id: Uuid,
        amount: Option<BigDecimal>,
        reason: Option<String>,
    ) -> AppResult<RefundOutcome> {
        let payment = self
            .payments
            .find_payment(payment_id)
            .await?
            .ok_or_else(|| AppError::payment_not_found(payment_id.to_string()))?;

        if payment.status != PaymentStatus::Completed || payment.refunded_at.is_some() {
            return Err(AppError::invalid_state(
                "payment",
                payment.status.as_str(),
                "refund",
            ));
        }

        let capture_id = payment.capture_id.clone().ok_or_else(|| {
            AppError::invalid_state("payment", payment.status.as_str(), "refund without capture")
        })?;

        let amount = amount.unwrap_or_else(|| payment.amount.clone());
        if amount <= BigDecimal::from(0) || amount > payment.amount {
            return Err(AppError::validation(
                "amount",
                "refund amount must be positive and at most the captured amount",
            ));
        }

        let money = Money::new(money_string(&amount), payment.currency.clone());
        let details = self
            .gateway
            .refund_capture(&capture_id, Some(&money), reason.as_deref())
            .await
            .map_err(AppError::from)?;

        let update = RefundUpdate {
            refund_id: details.refund_id.clone(),
            amount: amount.clone(),
            reason: reason.clone(),
            refunded_at: Utc::now(),
            raw_response: details.raw.clone(),
        };
        let refunded = self
            .payments
            .refund_if_completed(payment.payment_id, &update)
            .await?
            .ok_or_else(|| {
                AppError::invalid_state("payment", "refunded", "refund a second time")
            })?;

        info!(
            payment_id = %refunded.payment_id,
            refund_id = %details.refund_id,
            amount = %amount,
            "payment refunded"
        );

        if let Ok(Some(application)) = self
            .applications
            .find_application(&payment.application_id)
            .await
        {
            self.notifications.dispatch(
                NotificationKind::PaymentRefunded,
                application.application_id.clone(),
                application.email.clone(),
            );
        }

        Ok(RefundOutcome {
            payment_id: refunded.payment_id,
            refund_id: details.refund_id,
            amount: money_string(&amount),
            status: refunded.status,
        })
    }

    // =========================================================================
    // Status & statistics
    // =========================================================================

    /// Persisted payment state, enriched best-effort with the gateway's
    /// live order status while the payment is still awaiting settlement.
    pub async fn status(&self, payment_id: Uuid) -> AppResult<PaymentStatusView> {
        let payment = self
            .payments
            .find_payment(payment_id)
            .await?
            .ok_or_else(|| AppError::payment_not_found(payment_id.to_string()))?;

        let gateway_status = if matches!(
            payment.status,
            PaymentStatus::Created | PaymentStatus::Approved
        ) {
            match self.gateway.get_order(&payment.order_id).await {
                Ok(order) => Some(order.status),
                Err(err) => {
                    warn!(
                        payment_id = %payment_id,
                        error = %err,
                        "gateway enrichment failed, returning persisted state only"
                    );
                    None
                }
            }
        } else {
            None
        };

        Ok(PaymentStatusView {
            payment_id: payment.payment_id,
            application_id: payment.application_id,
            order_id: payment.order_id,
            capture_id: payment.capture_id,
            status: payment.status,
            amount: money_string(&payment.amount),
            currency: payment.currency,
            last_error: payment.last_error,
            refund_amount: payment.refund_amount.as_ref().map(money_string),
            gateway_status,
        })
    }

    /// Aggregate counts and total amounts grouped by payment status.
    pub async fn stats(&self) -> AppResult<Vec<PaymentStatusStats>> {
        Ok(self.payments.payment_stats().await?)
    }

    // =========================================================================
    // Webhook-driven transitions
    // =========================================================================

    /// Apply a gateway-confirmed completion. No-op if the payment already
    /// settled through the synchronous path, so richer capture data is
    /// never clobbered.
    pub async fn handle_payment_completed(
        &self,
        payment: &Payment,
        capture_id: Option<String>,
        raw: JsonValue,
    ) -> AppResult<()> {
        self.settle_completed(payment, capture_id, None, None, raw).await
    }

    /// Apply a gateway denial: the payment fails with the reason recorded.
    pub async fn handle_payment_denied(
        &self,
        payment: &Payment,
        reason: Option<String>,
    ) -> AppResult<()> {
        let message = reason.unwrap_or_else(|| "payment denied by gateway".to_string());
        match self.payments.fail_if_open(payment.payment_id, &message).await? {
            Some(failed) => {
                info!(
                    payment_id = %failed.payment_id,
                    reason = %message,
                    "payment denied"
                );
            }
            None => {
                warn!(
                    payment_id = %payment.payment_id,
                    "denial ignored, payment already settled"
                );
            }
        }
        Ok(())
    }

    /// Apply a gateway-initiated refund notification.
    pub async fn handle_payment_refunded(
        &self,
        payment: &Payment,
        amount: Option<BigDecimal>,
        raw: JsonValue,
    ) -> AppResult<()> {
        let update = RefundUpdate {
            refund_id: raw
                .get("resource")
                .and_then(|r| r.get("id"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string(),
            amount: amount.unwrap_or_else(|| payment.amount.clone()),
            reason: Some("refund reported by gateway".to_string()),
            refunded_at: Utc::now(),
            raw_response: raw,
        };
        match self
            .payments
            .refund_if_completed(payment.payment_id, &update)
            .await?
        {
            Some(refunded) => {
                info!(payment_id = %refunded.payment_id, "payment refunded via webhook");
            }
            None => {
                warn!(
                    payment_id = %payment.payment_id,
                    "refund event ignored, payment not in a refundable state"
                );
            }
        }
        Ok(())
    }

    pub fn payments(&self) -> &Arc<dyn PaymentStore> {
        &self.payments
    }
}

/// Fixed two-decimal string for gateway amounts
pub fn money_string(amount: &BigDecimal) -> String {
    amount.with_scale(2).to_string()
}
