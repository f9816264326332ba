//! Payment gateway adapter
//!
//! All communication with the external payment gateway lives behind the
//! [`PaymentGateway`] trait: token acquisition, order creation/retrieval,
//! capture, refund, and webhook verification. The rest of the system never
//! sees the gateway's wire shapes, only the domain-shaped types in
//! [`types`].

pub mod error;
pub mod http;
pub mod paypal;
pub mod types;

use crate::gateway::error::GatewayResult;
use crate::gateway::types::{
    CaptureDetails, CreateOrderRequest, CreatedOrder, GatewayEvent, GatewayOrder, RefundDetails,
    WebhookHeaders, WebhookVerification,
};
use async_trait::async_trait;
use serde_json::Value as JsonValue;

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create an order for the given amount; the adapter generates and
    /// attaches a fresh idempotency key, returned in the result.
    async fn create_order(&self, request: CreateOrderRequest) -> GatewayResult<CreatedOrder>;

    /// Fetch an order's live state. The gateway is authoritative; callers
    /// reconcile against this before mutating local records.
    async fn get_order(&self, order_id: &str) -> GatewayResult<GatewayOrder>;

    /// Capture an approved order into a completed transaction.
    async fn capture_order(&self, order_id: &str) -> GatewayResult<CaptureDetails>;

    /// Refund a captured transaction, fully when `amount` is `None`.
    async fn refund_capture(
        &self,
        capture_id: &str,
        amount: Option<&types::Money>,
        note: Option<&str>,
    ) -> GatewayResult<RefundDetails>;

    /// Verify a webhook delivery's signature against gateway credentials.
    async fn verify_webhook(
        &self,
        headers: &WebhookHeaders,
        payload: &JsonValue,
    ) -> GatewayResult<WebhookVerification>;

    /// Normalize a raw webhook payload into a typed event.
    fn parse_webhook_event(&self, payload: &[u8]) -> GatewayResult<GatewayEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::types::{GatewayEventKind, GatewayOrderStatus, Money};

    struct MockGateway;

    #[async_trait]
    impl PaymentGateway for MockGateway {
        async fn create_order(&self, request: CreateOrderRequest) -> GatewayResult<CreatedOrder> {
            Ok(CreatedOrder {
                order_id: "ORDER-1".to_string(),
                status: GatewayOrderStatus::Created,
                approve_url: Some("https://example.com/approve/ORDER-1".to_string()),
                request_id: "req-1".to_string(),
                raw: serde_json::json!({"amount": request.amount}),
            })
        }

        async fn get_order(&self, order_id: &str) -> GatewayResult<GatewayOrder> {
            Ok(GatewayOrder {
                order_id: order_id.to_string(),
                status: GatewayOrderStatus::Approved,
                approve_url: None,
                capture_id: None,
                raw: serde_json::json!({}),
            })
        }

        async fn capture_order(&self, order_id: &str) -> GatewayResult<CaptureDetails> {
            Ok(CaptureDetails {
                order_id: order_id.to_string(),
                capture_id: "CAP-1".to_string(),
                amount: Money {
                    amount: "84.00".to_string(),
                    currency: "USD".to_string(),
                },
                gateway_fee: None,
                payer: None,
                raw: serde_json::json!({}),
            })
        }

        async fn refund_capture(
            &self,
            capture_id: &str,
            amount: Option<&Money>,
            _note: Option<&str>,
        ) -> GatewayResult<RefundDetails> {
            Ok(RefundDetails {
                refund_id: format!("RF-{}", capture_id),
                amount: amount.cloned(),
                raw: serde_json::json!({}),
            })
        }

        async fn verify_webhook(
            &self,
            _headers: &WebhookHeaders,
            _payload: &JsonValue,
        ) -> GatewayResult<WebhookVerification> {
            Ok(WebhookVerification::Verified)
        }

        fn parse_webhook_event(&self, payload: &[u8]) -> GatewayResult<GatewayEvent> {
            let raw: JsonValue = serde_json::from_slice(payload).unwrap_or_default();
            Ok(GatewayEvent {
                event_id: "WH-1".to_string(),
                kind: GatewayEventKind::PaymentCompleted,
                order_id: None,
                capture_id: None,
                amount: None,
                reason: None,
                raw,
            })
        }
    }

    #[tokio::test]
    async fn trait_can_be_implemented_by_mock_gateway() {
        let gateway: Box<dyn PaymentGateway> = Box::new(MockGateway);
        let created = gateway
            .create_order(CreateOrderRequest {
                amount: Money {
                    amount: "84.00".to_string(),
                    currency: "USD".to_string(),
                },
                description: Some("visa application".to_string()),
                reference: "app-1".to_string(),
            })
            .await
            .expect("order creation should succeed");
        assert_eq!(created.status, GatewayOrderStatus::Created);
        assert!(created.approve_url.is_some());

        let order = gateway
            .get_order(&created.order_id)
            .await
            .expect("order fetch should succeed");
        assert_eq!(order.status, GatewayOrderStatus::Approved);
    }
}
