use crate::gateway::error::GatewayError;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Money {
    pub amount: String,
    pub currency: String,
}

impl Money {
    pub fn new(amount: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            amount: amount.into(),
            currency: currency.into(),
        }
    }

    pub fn validate_positive(&self, field: &str) -> Result<(), GatewayError> {
        let parsed =
            BigDecimal::from_str(&self.amount).map_err(|_| GatewayError::ValidationError {
                message: format!("invalid decimal amount: {}", self.amount),
                field: Some(field.to_string()),
            })?;
        if parsed <= BigDecimal::from(0) {
            return Err(GatewayError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some(field.to_string()),
            });
        }
        if self.currency.trim().is_empty() {
            return Err(GatewayError::ValidationError {
                message: "currency is required".to_string(),
                field: Some("currency".to_string()),
            });
        }
        Ok(())
    }

    pub fn as_decimal(&self) -> Option<BigDecimal> {
        BigDecimal::from_str(&self.amount).ok()
    }
}

/// Order status as reported by the gateway
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayOrderStatus {
    Created,
    Saved,
    PayerActionRequired,
    Approved,
    Completed,
    Voided,
    Unknown,
}

impl GatewayOrderStatus {
    pub fn from_wire(value: &str) -> Self {
        match value {
            "CREATED" => GatewayOrderStatus::Created,
            "SAVED" => GatewayOrderStatus::Saved,
            "PAYER_ACTION_REQUIRED" => GatewayOrderStatus::PayerActionRequired,
            "APPROVED" => GatewayOrderStatus::Approved,
            "COMPLETED" => GatewayOrderStatus::Completed,
            "VOIDED" => GatewayOrderStatus::Voided,
            _ => GatewayOrderStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayOrderStatus::Created => "CREATED",
            GatewayOrderStatus::Saved => "SAVED",
            GatewayOrderStatus::PayerActionRequired => "PAYER_ACTION_REQUIRED",
            GatewayOrderStatus::Approved => "APPROVED",
            GatewayOrderStatus::Completed => "COMPLETED",
            GatewayOrderStatus::Voided => "VOIDED",
            GatewayOrderStatus::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for GatewayOrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CreateOrderRequest {
    pub amount: Money,
    pub description: Option<String>,
    /// Caller-side reference attached to the purchase unit (application id)
    pub reference: String,
}

#[derive(Debug, Clone)]
pub struct CreatedOrder {
    pub order_id: String,
    pub status: GatewayOrderStatus,
    pub approve_url: Option<String>,
    /// Idempotency key the adapter attached to the creation call
    pub request_id: String,
    pub raw: JsonValue,
}

#[derive(Debug, Clone)]
pub struct GatewayOrder {
    pub order_id: String,
    pub status: GatewayOrderStatus,
    pub approve_url: Option<String>,
    /// Capture id, present once the gateway has settled the order
    pub capture_id: Option<String>,
    pub raw: JsonValue,
}

/// Payer identity, known only after capture
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PayerIdentity {
    pub email: Option<String>,
    pub payer_id: Option<String>,
    pub given_name: Option<String>,
    pub surname: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CaptureDetails {
    pub order_id: String,
    pub capture_id: String,
    pub amount: Money,
    pub gateway_fee: Option<Money>,
    pub payer: Option<PayerIdentity>,
    pub raw: JsonValue,
}

#[derive(Debug, Clone)]
pub struct RefundDetails {
    pub refund_id: String,
    pub amount: Option<Money>,
    pub raw: JsonValue,
}

/// Signature material from a webhook delivery's headers
#[derive(Debug, Clone, Default)]
pub struct WebhookHeaders {
    pub transmission_id: Option<String>,
    pub transmission_time: Option<String>,
    pub transmission_sig: Option<String>,
    pub cert_url: Option<String>,
    pub auth_algo: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookVerification {
    Verified,
    /// No webhook id configured; verification intentionally skipped
    SkippedUnconfigured,
}

/// Normalized webhook event kinds this system reacts to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GatewayEventKind {
    PaymentCompleted,
    PaymentDenied,
    PaymentRefunded,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct GatewayEvent {
    /// Gateway-assigned event identifier, the deduplication key
    pub event_id: String,
    pub kind: GatewayEventKind,
    pub order_id: Option<String>,
    pub capture_id: Option<String>,
    pub amount: Option<Money>,
    pub reason: Option<String>,
    pub raw: JsonValue,
}
