//! PayPal REST adapter
//!
//! Thin typed wrappers over the orders/payments surface plus OAuth token
//! caching. The cached token is the only process-wide mutable state; refresh
//! is idempotent, so concurrent callers may race it safely.

use crate::config::PayPalConfig;
use crate::gateway::error::{GatewayError, GatewayResult};
use crate::gateway::http::{GatewayHttpClient, RequestAuth, RequestBody};
use crate::gateway::types::{
    CaptureDetails, CreateOrderRequest, CreatedOrder, GatewayEvent, GatewayEventKind,
    GatewayOrder, GatewayOrderStatus, Money, PayerIdentity, RefundDetails, WebhookHeaders,
    WebhookVerification,
};
use crate::gateway::PaymentGateway;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Access token with its refresh deadline
#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

pub struct PayPalGateway {
    config: PayPalConfig,
    http: GatewayHttpClient,
    token: RwLock<Option<CachedToken>>,
}

impl PayPalGateway {
    pub fn new(config: PayPalConfig) -> GatewayResult<Self> {
        let http =
            GatewayHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self {
            config,
            http,
            token: RwLock::new(None),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Return a valid bearer token, re-acquiring when the cache is empty or
    /// past its deadline. The deadline is the gateway-reported lifetime minus
    /// the configured safety margin.
    async fn access_token(&self) -> GatewayResult<String> {
        if self.config.client_id.is_empty() || self.config.client_secret.is_empty() {
            return Err(GatewayError::CredentialsMissing);
        }

        {
            let cached = self.token.read().await;
            if let Some(token) = cached.as_ref() {
                if Instant::now() < token.expires_at {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let response: TokenResponse = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v1/oauth2/token"),
                RequestAuth::Basic {
                    username: &self.config.client_id,
                    password: &self.config.client_secret,
                },
                RequestBody::Form(&[("grant_type", "client_credentials")]),
                &[],
            )
            .await?;

        let lifetime = response
            .expires_in
            .saturating_sub(self.config.token_safety_margin_secs);
        let token = CachedToken {
            access_token: response.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(lifetime.max(1)),
        };

        let mut cached = self.token.write().await;
        *cached = Some(token);
        info!(expires_in = response.expires_in, "gateway access token refreshed");

        Ok(response.access_token)
    }

    fn approve_link(links: &[LinkDescription]) -> Option<String> {
        links
            .iter()
            .find(|l| l.rel == "approve" || l.rel == "payer-action")
            .map(|l| l.href.clone())
    }

    fn first_capture(order: &OrderResponse) -> Option<&CaptureResponse> {
        order
            .purchase_units
            .first()
            .and_then(|unit| unit.payments.as_ref())
            .and_then(|payments| payments.captures.first())
    }
}

#[async_trait]
impl PaymentGateway for PayPalGateway {
    async fn create_order(&self, request: CreateOrderRequest) -> GatewayResult<CreatedOrder> {
        request.amount.validate_positive("amount")?;
        let token = self.access_token().await?;
        let request_id = fresh_request_id();

        let payload = serde_json::json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": request.reference,
                "description": request.description,
                "amount": {
                    "currency_code": request.amount.currency,
                    "value": request.amount.amount,
                },
            }],
        });

        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v2/checkout/orders"),
                RequestAuth::Bearer(&token),
                RequestBody::Json(&payload),
                &[
                    ("Content-Type", "application/json"),
                    ("PayPal-Request-Id", request_id.as_str()),
                    ("Prefer", "return=representation"),
                ],
            )
            .await?;

        let order: OrderResponse =
            serde_json::from_value(raw.clone()).map_err(|e| GatewayError::UnexpectedResponse {
                message: format!("order creation response: {}", e),
            })?;

        info!(order_id = %order.id, "gateway order created");

        Ok(CreatedOrder {
            order_id: order.id.clone(),
            status: GatewayOrderStatus::from_wire(&order.status),
            approve_url: Self::approve_link(&order.links),
            request_id,
            raw,
        })
    }

    async fn get_order(&self, order_id: &str) -> GatewayResult<GatewayOrder> {
        let token = self.access_token().await?;

        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/v2/checkout/orders/{}", order_id)),
                RequestAuth::Bearer(&token),
                RequestBody::Empty,
                &[],
            )
            .await?;

        let order: OrderResponse =
            serde_json::from_value(raw.clone()).map_err(|e| GatewayError::UnexpectedResponse {
                message: format!("order lookup response: {}", e),
            })?;

        Ok(GatewayOrder {
            order_id: order.id.clone(),
            status: GatewayOrderStatus::from_wire(&order.status),
            approve_url: Self::approve_link(&order.links),
            capture_id: Self::first_capture(&order).map(|c| c.id.clone()),
            raw,
        })
    }

    async fn capture_order(&self, order_id: &str) -> GatewayResult<CaptureDetails> {
        let token = self.access_token().await?;

        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(&format!("/v2/checkout/orders/{}/capture", order_id)),
                RequestAuth::Bearer(&token),
                RequestBody::Empty,
                &[
                    ("Content-Type", "application/json"),
                    ("Prefer", "return=representation"),
                ],
            )
            .await?;

        let order: OrderResponse =
            serde_json::from_value(raw.clone()).map_err(|e| GatewayError::UnexpectedResponse {
                message: format!("capture response: {}", e),
            })?;

        let capture = Self::first_capture(&order).ok_or(GatewayError::UnexpectedResponse {
            message: "capture response carried no capture".to_string(),
        })?;

        info!(order_id = %order.id, capture_id = %capture.id, "gateway order captured");

        Ok(CaptureDetails {
            order_id: order.id.clone(),
            capture_id: capture.id.clone(),
            amount: Money {
                amount: capture.amount.value.clone(),
                currency: capture.amount.currency_code.clone(),
            },
            gateway_fee: capture
                .seller_receivable_breakdown
                .as_ref()
                .and_then(|b| b.paypal_fee.as_ref())
                .map(|fee| Money {
                    amount: fee.value.clone(),
                    currency: fee.currency_code.clone(),
                }),
            payer: order.payer.as_ref().map(|p| PayerIdentity {
                email: p.email_address.clone(),
                payer_id: p.payer_id.clone(),
                given_name: p.name.as_ref().and_then(|n| n.given_name.clone()),
                surname: p.name.as_ref().and_then(|n| n.surname.clone()),
            }),
            raw,
        })
    }

    async fn refund_capture(
        &self,
        capture_id: &str,
        amount: Option<&Money>,
        note: Option<&str>,
    ) -> GatewayResult<RefundDetails> {
        let token = self.access_token().await?;

        let mut payload = serde_json::Map::new();
        if let Some(amount) = amount {
            amount.validate_positive("amount")?;
            payload.insert(
                "amount".to_string(),
                serde_json::json!({
                    "value": amount.amount,
                    "currency_code": amount.currency,
                }),
            );
        }
        if let Some(note) = note {
            payload.insert(
                "note_to_payer".to_string(),
                serde_json::Value::String(note.to_string()),
            );
        }
        let payload = JsonValue::Object(payload);

        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(&format!("/v2/payments/captures/{}/refund", capture_id)),
                RequestAuth::Bearer(&token),
                RequestBody::Json(&payload),
                &[("Content-Type", "application/json")],
            )
            .await?;

        let refund: RefundResponse =
            serde_json::from_value(raw.clone()).map_err(|e| GatewayError::UnexpectedResponse {
                message: format!("refund response: {}", e),
            })?;

        info!(capture_id = %capture_id, refund_id = %refund.id, "gateway capture refunded");

        Ok(RefundDetails {
            refund_id: refund.id,
            amount: refund.amount.map(|a| Money {
                amount: a.value,
                currency: a.currency_code,
            }),
            raw,
        })
    }

    async fn verify_webhook(
        &self,
        headers: &WebhookHeaders,
        payload: &JsonValue,
    ) -> GatewayResult<WebhookVerification> {
        let webhook_id = match self.config.webhook_id.as_deref() {
            Some(id) => id,
            None => {
                warn!("no webhook id configured, skipping signature verification");
                return Ok(WebhookVerification::SkippedUnconfigured);
            }
        };

        let (transmission_id, transmission_time, transmission_sig, cert_url, auth_algo) = match (
            headers.transmission_id.as_deref(),
            headers.transmission_time.as_deref(),
            headers.transmission_sig.as_deref(),
            headers.cert_url.as_deref(),
            headers.auth_algo.as_deref(),
        ) {
            (Some(a), Some(b), Some(c), Some(d), Some(e)) => (a, b, c, d, e),
            _ => {
                return Err(GatewayError::WebhookVerificationError {
                    message: "missing transmission headers".to_string(),
                })
            }
        };

        let token = self.access_token().await?;
        let body = serde_json::json!({
            "transmission_id": transmission_id,
            "transmission_time": transmission_time,
            "transmission_sig": transmission_sig,
            "cert_url": cert_url,
            "auth_algo": auth_algo,
            "webhook_id": webhook_id,
            "webhook_event": payload,
        });

        let response: VerifyWebhookResponse = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v1/notification/verify-webhook-signature"),
                RequestAuth::Bearer(&token),
                RequestBody::Json(&body),
                &[("Content-Type", "application/json")],
            )
            .await?;

        if response.verification_status == "SUCCESS" {
            Ok(WebhookVerification::Verified)
        } else {
            Err(GatewayError::WebhookVerificationError {
                message: format!(
                    "gateway reported verification status '{}'",
                    response.verification_status
                ),
            })
        }
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> GatewayResult<GatewayEvent> {
        let parsed: JsonValue = serde_json::from_slice(payload).map_err(|e| {
            GatewayError::WebhookVerificationError {
                message: format!("invalid webhook JSON payload: {}", e),
            }
        })?;

        Ok(normalize_event(parsed))
    }
}

/// Fresh random idempotency token, one per creation attempt
pub fn fresh_request_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let mut hasher = Sha256::new();
    hasher.update(Uuid::new_v4().as_bytes());
    hasher.update(nanos.to_be_bytes());
    format!("{:x}", hasher.finalize())
}

/// Normalize the gateway's webhook shape into the small tagged union the
/// processor consumes; the full payload rides along for audit.
pub fn normalize_event(parsed: JsonValue) -> GatewayEvent {
    let event_id = parsed
        .get("id")
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let event_type = parsed
        .get("event_type")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");
    let resource = parsed.get("resource");

    let kind = match event_type {
        "PAYMENT.CAPTURE.COMPLETED" => GatewayEventKind::PaymentCompleted,
        "PAYMENT.CAPTURE.DENIED" | "PAYMENT.CAPTURE.DECLINED" => GatewayEventKind::PaymentDenied,
        "PAYMENT.CAPTURE.REFUNDED" | "PAYMENT.CAPTURE.REVERSED" => {
            GatewayEventKind::PaymentRefunded
        }
        _ => GatewayEventKind::Unknown,
    };

    let is_order_event = event_type.starts_with("CHECKOUT.ORDER.");
    let order_id = resource
        .and_then(|r| {
            if is_order_event {
                r.get("id")
            } else {
                r.get("supplementary_data")
                    .and_then(|s| s.get("related_ids"))
                    .and_then(|ids| ids.get("order_id"))
            }
        })
        .and_then(|v| v.as_str())
        .map(|v| v.to_string());
    let capture_id = if is_order_event {
        None
    } else {
        resource
            .and_then(|r| r.get("id"))
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
    };

    let amount = resource
        .and_then(|r| r.get("amount"))
        .and_then(|a| {
            let value = a.get("value").and_then(|v| v.as_str())?;
            let currency = a.get("currency_code").and_then(|v| v.as_str())?;
            Some(Money::new(value, currency))
        });

    let reason = resource
        .and_then(|r| r.get("status_details"))
        .and_then(|d| d.get("reason"))
        .and_then(|v| v.as_str())
        .map(|v| v.to_string());

    GatewayEvent {
        event_id,
        kind,
        order_id,
        capture_id,
        amount,
        reason,
        raw: parsed,
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct LinkDescription {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    status: String,
    #[serde(default)]
    links: Vec<LinkDescription>,
    #[serde(default)]
    purchase_units: Vec<PurchaseUnitResponse>,
    #[serde(default)]
    payer: Option<PayerResponse>,
}

#[derive(Debug, Deserialize)]
struct PurchaseUnitResponse {
    #[serde(default)]
    payments: Option<PaymentsResponse>,
}

#[derive(Debug, Deserialize)]
struct PaymentsResponse {
    #[serde(default)]
    captures: Vec<CaptureResponse>,
}

#[derive(Debug, Deserialize)]
struct CaptureResponse {
    id: String,
    amount: AmountResponse,
    #[serde(default)]
    seller_receivable_breakdown: Option<BreakdownResponse>,
}

#[derive(Debug, Deserialize)]
struct BreakdownResponse {
    #[serde(default)]
    paypal_fee: Option<AmountResponse>,
}

#[derive(Debug, Deserialize)]
struct AmountResponse {
    currency_code: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct PayerResponse {
    #[serde(default)]
    email_address: Option<String>,
    #[serde(default)]
    payer_id: Option<String>,
    #[serde(default)]
    name: Option<PayerNameResponse>,
}

#[derive(Debug, Deserialize)]
struct PayerNameResponse {
    #[serde(default)]
    given_name: Option<String>,
    #[serde(default)]
    surname: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    id: String,
    #[serde(default)]
    amount: Option<AmountResponse>,
}

#[derive(Debug, Deserialize)]
struct VerifyWebhookResponse {
    verification_status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_request_ids_are_unique_and_hex() {
        let a = fresh_request_id();
        let b = fresh_request_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn capture_completed_event_normalizes() {
        let payload = serde_json::json!({
            "id": "WH-58D329510W468432D-8HN650336L201105X",
            "event_type": "PAYMENT.CAPTURE.COMPLETED",
            "resource": {
                "id": "3C679366HH908993F",
                "amount": {"currency_code": "USD", "value": "84.00"},
                "supplementary_data": {
                    "related_ids": {"order_id": "5O190127TN364715T"}
                }
            }
        });

        let event = normalize_event(payload);
        assert_eq!(event.kind, GatewayEventKind::PaymentCompleted);
        assert_eq!(event.order_id.as_deref(), Some("5O190127TN364715T"));
        assert_eq!(event.capture_id.as_deref(), Some("3C679366HH908993F"));
        assert_eq!(
            event.amount,
            Some(Money::new("84.00", "USD"))
        );
    }

    #[test]
    fn capture_denied_event_carries_reason() {
        let payload = serde_json::json!({
            "id": "WH-2",
            "event_type": "PAYMENT.CAPTURE.DENIED",
            "resource": {
                "id": "7NW873794T343360M",
                "status_details": {"reason": "DECLINED_BY_RISK_FRAUD_FILTERS"}
            }
        });

        let event = normalize_event(payload);
        assert_eq!(event.kind, GatewayEventKind::PaymentDenied);
        assert_eq!(
            event.reason.as_deref(),
            Some("DECLINED_BY_RISK_FRAUD_FILTERS")
        );
    }

    #[test]
    fn order_events_take_order_id_from_resource() {
        let payload = serde_json::json!({
            "id": "WH-3",
            "event_type": "CHECKOUT.ORDER.APPROVED",
            "resource": {"id": "5O190127TN364715T"}
        });

        let event = normalize_event(payload);
        assert_eq!(event.kind, GatewayEventKind::Unknown);
        assert_eq!(event.order_id.as_deref(), Some("5O190127TN364715T"));
        assert!(event.capture_id.is_none());
    }

    #[test]
    fn unknown_event_types_normalize_to_unknown() {
        let payload = serde_json::json!({
            "id": "WH-4",
            "event_type": "BILLING.SUBSCRIPTION.CREATED",
            "resource": {}
        });

        let event = normalize_event(payload);
        assert_eq!(event.kind, GatewayEventKind::Unknown);
    }
}
