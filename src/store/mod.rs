//! Storage layer
//!
//! Persistence sits behind the [`ApplicationStore`] and [`PaymentStore`]
//! traits with a Postgres backend for production and an in-memory backend
//! for tests. Settlement transitions go through conditional-update
//! primitives (`complete_if_open`, `fail_if_open`, `refund_if_completed`,
//! `mark_paid_if_submitted`) so that concurrent writers race safely:
//! whichever lands first wins and the other observes `None`.

pub mod memory;
pub mod postgres;

use crate::applications::types::Application;
use crate::gateway::types::PayerIdentity;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

/// Payment lifecycle status.
///
/// `Pending` covers the window between local record creation and the
/// gateway's acknowledgement; `Failed` and `Cancelled` are reachable from
/// any open state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Created,
    Approved,
    Completed,
    Refunded,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    /// Open payments block creation of another order for the same
    /// application.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Pending | PaymentStatus::Created | PaymentStatus::Approved
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Created => "created",
            PaymentStatus::Approved => "approved",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_db_status(status: &str) -> Option<Self> {
        match status {
            "pending" => Some(PaymentStatus::Pending),
            "created" => Some(PaymentStatus::Created),
            "approved" => Some(PaymentStatus::Approved),
            "completed" => Some(PaymentStatus::Completed),
            "refunded" => Some(PaymentStatus::Refunded),
            "failed" => Some(PaymentStatus::Failed),
            "cancelled" => Some(PaymentStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One received webhook event, keyed by the gateway's event identifier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookEventRecord {
    pub event_id: String,
    pub event_type: String,
    pub received_at: DateTime<Utc>,
}

/// Payment entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: Uuid,
    pub application_id: String,
    /// The gateway's own order identifier, distinct from `payment_id`
    pub order_id: String,
    pub capture_id: Option<String>,
    pub status: PaymentStatus,
    pub amount: BigDecimal,
    pub currency: String,
    /// Populated only after capture
    pub payer: Option<PayerIdentity>,
    /// Ordered log of received webhook events, deduplication source
    pub webhook_events: Vec<WebhookEventRecord>,
    /// Raw gateway payloads and timestamps, kept opaquely for audit
    pub metadata: JsonValue,
    /// Pending record safe to hand back to a retrying client
    pub reusable: bool,
    pub idempotency_key: String,
    pub last_error: Option<String>,
    pub refund_amount: Option<BigDecimal>,
    pub refund_reason: Option<String>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields persisted when a capture settles a payment
#[derive(Debug, Clone)]
pub struct CaptureUpdate {
    pub capture_id: String,
    pub payer: Option<PayerIdentity>,
    pub gateway_fee: Option<BigDecimal>,
    pub raw_response: JsonValue,
}

/// Fields persisted when a refund settles
#[derive(Debug, Clone)]
pub struct RefundUpdate {
    pub refund_id: String,
    pub amount: BigDecimal,
    pub reason: Option<String>,
    pub refunded_at: DateTime<Utc>,
    pub raw_response: JsonValue,
}

/// Aggregate row for the stats endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentStatusStats {
    pub status: PaymentStatus,
    pub count: i64,
    pub total_amount: BigDecimal,
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("duplicate key for {entity} '{id}'")]
    DuplicateKey { entity: &'static str, id: String },

    #[error("storage error: {message}")]
    Backend { message: String, is_retryable: bool },
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        StoreError::Backend {
            message: message.into(),
            is_retryable: false,
        }
    }
}

impl From<StoreError> for crate::error::AppError {
    fn from(err: StoreError) -> Self {
        use crate::error::{AppError, AppErrorKind, InfrastructureError};

        let is_retryable = matches!(
            err,
            StoreError::Backend {
                is_retryable: true,
                ..
            }
        );
        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: err.to_string(),
            is_retryable,
        }))
    }
}

#[async_trait]
pub trait ApplicationStore: Send + Sync {
    /// Insert a new application; fails with `DuplicateKey` when the
    /// identifier is already taken.
    async fn insert_application(&self, application: &Application) -> StoreResult<Application>;

    async fn find_application(&self, application_id: &str) -> StoreResult<Option<Application>>;

    /// Replace the stored record for an existing application.
    async fn update_application(&self, application: &Application) -> StoreResult<Application>;

    /// Atomically set status to `paid` if the application is still
    /// `submitted`; returns `None` when another writer got there first or
    /// the application is in a different state.
    async fn mark_paid_if_submitted(&self, application_id: &str)
        -> StoreResult<Option<Application>>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert_payment(&self, payment: &Payment) -> StoreResult<Payment>;

    async fn find_payment(&self, payment_id: Uuid) -> StoreResult<Option<Payment>>;

    /// Locate a payment by the gateway's order id or capture id.
    async fn find_payment_by_gateway_ref(&self, reference: &str)
        -> StoreResult<Option<Payment>>;

    /// The application's payment in an open state, if any.
    async fn find_open_payment(&self, application_id: &str) -> StoreResult<Option<Payment>>;

    /// Atomically transition to `Completed` if the payment is still open.
    /// Returns `None` if the payment is already settled (the caller lost
    /// the race, or the settlement happened through another path).
    async fn complete_if_open(
        &self,
        payment_id: Uuid,
        update: &CaptureUpdate,
    ) -> StoreResult<Option<Payment>>;

    /// Atomically transition to `Failed` with the error recorded, if the
    /// payment is still open.
    async fn fail_if_open(
        &self,
        payment_id: Uuid,
        error_message: &str,
    ) -> StoreResult<Option<Payment>>;

    /// Atomically transition to `Refunded` if the payment is `Completed`
    /// and carries no prior refund.
    async fn refund_if_completed(
        &self,
        payment_id: Uuid,
        update: &RefundUpdate,
    ) -> StoreResult<Option<Payment>>;

    /// Append a webhook event to the payment's log. Returns `false` when
    /// the event id was already recorded (duplicate delivery).
    async fn append_webhook_event(
        &self,
        payment_id: Uuid,
        event: &WebhookEventRecord,
    ) -> StoreResult<bool>;

    /// Aggregate counts and total amounts grouped by status.
    async fn payment_stats(&self) -> StoreResult<Vec<PaymentStatusStats>>;
}
