//! Webhook event processor.
//!
//! Verifies gateway notifications, normalizes them, deduplicates on the
//! gateway's event id, and feeds the resulting transitions into the payment
//! orchestrator. The HTTP endpoint acknowledges with success even when
//! processing fails internally, so the gateway's retry policy does not
//! hammer the endpoint; only a signature failure is rejected.

use crate::gateway::types::{GatewayEventKind, WebhookHeaders};
use crate::gateway::PaymentGateway;
use crate::services::payment_orchestrator::PaymentOrchestrator;
use crate::store::WebhookEventRecord;
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum WebhookProcessorError {
    #[error("Webhook verification failed: {0}")]
    VerificationFailed(String),
    #[error("Webhook processing failed: {0}")]
    Processing(String),
}

/// What happened to a delivery that was acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookDisposition {
    /// Event applied and a transition (possibly a no-op) executed
    Processed,
    /// Event id already present in the payment's log
    Duplicate,
    /// No matching payment, or an event kind this system does not react to
    Ignored,
}

pub struct WebhookProcessor {
    gateway: Arc<dyn PaymentGateway>,
    orchestrator: Arc<PaymentOrchestrator>,
}

impl WebhookProcessor {
    pub fn new(gateway: Arc<dyn PaymentGateway>, orchestrator: Arc<PaymentOrchestrator>) -> Self {
        Self {
            gateway,
            orchestrator,
        }
    }

    pub async fn process(
        &self,
        headers: &WebhookHeaders,
        body: &[u8],
    ) -> Result<WebhookDisposition, WebhookProcessorError> {
        let payload: JsonValue = serde_json::from_slice(body)
            .map_err(|e| WebhookProcessorError::VerificationFailed(format!("invalid JSON: {}", e)))?;

        // Verification failure performs no state mutation.
        self.gateway
            .verify_webhook(headers, &payload)
            .await
            .map_err(|e| WebhookProcessorError::VerificationFailed(e.to_string()))?;

        let event = self
            .gateway
            .parse_webhook_event(body)
            .map_err(|e| WebhookProcessorError::Processing(e.to_string()))?;

        let reference = event
            .order_id
            .as_deref()
            .or(event.capture_id.as_deref());
        let reference = match reference {
            Some(reference) => reference,
            None => {
                warn!(event_id = %event.event_id, "webhook carried no order or capture reference");
                return Ok(WebhookDisposition::Ignored);
            }
        };

        let payment = self
            .orchestrator
            .payments()
            .find_payment_by_gateway_ref(reference)
            .await
            .map_err(|e| WebhookProcessorError::Processing(e.to_string()))?;
        let payment = match payment {
            Some(payment) => payment,
            None => {
                // The gateway may reference an order this system never
                // created; acknowledge without applying.
                info!(
                    event_id = %event.event_id,
                    reference = %reference,
                    "webhook references an unknown payment, ignoring"
                );
                return Ok(WebhookDisposition::Ignored);
            }
        };

        let record = WebhookEventRecord {
            event_id: event.event_id.clone(),
            event_type: event
                .raw
                .get("event_type")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string(),
            received_at: Utc::now(),
        };
        let first_seen = self
            .orchestrator
            .payments()
            .append_webhook_event(payment.payment_id, &record)
            .await
            .map_err(|e| WebhookProcessorError::Processing(e.to_string()))?;
        if !first_seen {
            info!(
                event_id = %event.event_id,
                payment_id = %payment.payment_id,
                "duplicate webhook delivery, no transition applied"
            );
            return Ok(WebhookDisposition::Duplicate);
        }

        match event.kind {
            GatewayEventKind::PaymentCompleted => {
                info!(
                    event_id = %event.event_id,
                    payment_id = %payment.payment_id,
                    "processing payment completed webhook"
                );
                self.orchestrator
                    .handle_payment_completed(&payment, event.capture_id.clone(), event.raw.clone())
                    .await
                    .map_err(|e| WebhookProcessorError::Processing(e.to_string()))?;
                Ok(WebhookDisposition::Processed)
            }
            GatewayEventKind::PaymentDenied => {
                info!(
                    event_id = %event.event_id,
                    payment_id = %payment.payment_id,
                    "processing payment denied webhook"
                );
                self.orchestrator
                    .handle_payment_denied(&payment, event.reason.clone())
                    .await
                    .map_err(|e| WebhookProcessorError::Processing(e.to_string()))?;
                Ok(WebhookDisposition::Processed)
            }
            GatewayEventKind::PaymentRefunded => {
                info!(
                    event_id = %event.event_id,
                    payment_id = %payment.payment_id,
                    "processing payment refunded webhook"
                );
                let amount = event.amount.as_ref().and_then(|m| m.as_decimal());
                self.orchestrator
                    .handle_payment_refunded(&payment, amount, event.raw.clone())
                    .await
                    .map_err(|e| WebhookProcessorError::Processing(e.to_string()))?;
                Ok(WebhookDisposition::Processed)
            }
            GatewayEventKind::Unknown => {
                warn!(
                    event_id = %event.event_id,
                    "unknown webhook event kind, acknowledged without transition"
                );
                Ok(WebhookDisposition::Ignored)
            }
        }
    }
}
