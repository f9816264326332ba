//! Postgres store backend.
//!
//! Entities map to one row each; applicant collections, payer identity,
//! webhook event logs and gateway payloads live in jsonb columns. The
//! conditional-update primitives are single `UPDATE … WHERE … RETURNING`
//! statements, so concurrent settlement attempts are serialized by the
//! database and exactly one wins.

use crate::applications::types::{Applicant, Application, ApplicationStatus};
use crate::config::DatabaseConfig;
use crate::store::{
    ApplicationStore, CaptureUpdate, Payment, PaymentStatus, PaymentStatusStats, PaymentStore,
    RefundUpdate, StoreError, StoreResult, WebhookEventRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::BigDecimal;
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use tracing::{error as log_error, info, warn};
use uuid::Uuid;

/// Initialize the database connection pool from configuration
pub async fn init_pool(config: &DatabaseConfig) -> StoreResult<PgPool> {
    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Initializing database pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connection_timeout))
        .idle_timeout(Duration::from_secs(config.idle_timeout.unwrap_or(600)))
        .connect(&config.url)
        .await
        .map_err(|e| {
            log_error!("Failed to initialize database pool: {}", e);
            from_sqlx(e)
        })?;

    info!("Database pool initialized successfully");
    Ok(pool)
}

/// Connection pool health check
pub async fn health_check(pool: &PgPool) -> StoreResult<()> {
    sqlx::query("SELECT 1").fetch_one(pool).await.map_err(|e| {
        warn!("Health check failed: {}", e);
        from_sqlx(e)
    })?;
    Ok(())
}

fn from_sqlx(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return StoreError::DuplicateKey {
                entity: "row",
                id: db_err.constraint().unwrap_or("unknown").to_string(),
            };
        }
    }
    let is_retryable = matches!(
        err,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
    );
    StoreError::Backend {
        message: err.to_string(),
        is_retryable,
    }
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct ApplicationRow {
    application_id: String,
    passport_country: String,
    visa_type: String,
    destination: String,
    email: String,
    main_applicant: Option<JsonValue>,
    additional_applicants: JsonValue,
    status: String,
    current_step: i32,
    visa_fee: BigDecimal,
    service_fee: BigDecimal,
    currency: String,
    total_fee: Option<BigDecimal>,
    submitted_at: Option<DateTime<Utc>>,
    client_ip: Option<String>,
    user_agent: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ApplicationRow> for Application {
    type Error = StoreError;

    fn try_from(row: ApplicationRow) -> Result<Self, Self::Error> {
        let main_applicant: Option<Applicant> = row
            .main_applicant
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| StoreError::backend(format!("corrupt main_applicant column: {}", e)))?;
        let additional_applicants: Vec<Applicant> =
            serde_json::from_value(row.additional_applicants).map_err(|e| {
                StoreError::backend(format!("corrupt additional_applicants column: {}", e))
            })?;
        let status = ApplicationStatus::from_db_status(&row.status)
            .ok_or_else(|| StoreError::backend(format!("unknown status '{}'", row.status)))?;

        Ok(Application {
            application_id: row.application_id,
            passport_country: row.passport_country,
            visa_type: row.visa_type,
            destination: row.destination,
            email: row.email,
            main_applicant,
            additional_applicants,
            status,
            current_step: row.current_step as u8,
            visa_fee: row.visa_fee,
            service_fee: row.service_fee,
            currency: row.currency,
            total_fee: row.total_fee,
            submitted_at: row.submitted_at,
            client_ip: row.client_ip,
            user_agent: row.user_agent,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const APPLICATION_COLUMNS: &str = "application_id, passport_country, visa_type, destination, \
     email, main_applicant, additional_applicants, status, current_step, visa_fee, service_fee, \
     currency, total_fee, submitted_at, client_ip, user_agent, created_at, updated_at";

fn applicants_json(application: &Application) -> StoreResult<(Option<JsonValue>, JsonValue)> {
    let main = application
        .main_applicant
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| StoreError::backend(format!("serialize main_applicant: {}", e)))?;
    let additional = serde_json::to_value(&application.additional_applicants)
        .map_err(|e| StoreError::backend(format!("serialize additional_applicants: {}", e)))?;
    Ok((main, additional))
}

#[async_trait]
impl ApplicationStore for PgStore {
    async fn insert_application(&self, application: &Application) -> StoreResult<Application> {
        let (main, additional) = applicants_json(application)?;
        let row = sqlx::query_as::<_, ApplicationRow>(&format!(
            "INSERT INTO applications ({APPLICATION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18) \
             RETURNING {APPLICATION_COLUMNS}"
        ))
        .bind(&application.application_id)
        .bind(&application.passport_country)
        .bind(&application.visa_type)
        .bind(&application.destination)
        .bind(&application.email)
        .bind(&main)
        .bind(&additional)
        .bind(application.status.as_str())
        .bind(application.current_step as i32)
        .bind(&application.visa_fee)
        .bind(&application.service_fee)
        .bind(&application.currency)
        .bind(&application.total_fee)
        .bind(application.submitted_at)
        .bind(&application.client_ip)
        .bind(&application.user_agent)
        .bind(application.created_at)
        .bind(application.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(from_sqlx)?;

        row.try_into()
    }

    async fn find_application(&self, application_id: &str) -> StoreResult<Option<Application>> {
        let row = sqlx::query_as::<_, ApplicationRow>(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications WHERE application_id = $1"
        ))
        .bind(application_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(from_sqlx)?;

        row.map(Application::try_from).transpose()
    }

    async fn update_application(&self, application: &Application) -> StoreResult<Application> {
        let (main, additional) = applicants_json(application)?;
        let row = sqlx::query_as::<_, ApplicationRow>(&format!(
            "UPDATE applications SET \
                 main_applicant = $2, additional_applicants = $3, status = $4, \
                 current_step = GREATEST(current_step, $5), visa_fee = $6, service_fee = $7, \
                 total_fee = $8, submitted_at = $9, updated_at = NOW() \
             WHERE application_id = $1 \
             RETURNING {APPLICATION_COLUMNS}"
        ))
        .bind(&application.application_id)
        .bind(&main)
        .bind(&additional)
        .bind(application.status.as_str())
        .bind(application.current_step as i32)
        .bind(&application.visa_fee)
        .bind(&application.service_fee)
        .bind(&application.total_fee)
        .bind(application.submitted_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(from_sqlx)?;

        match row {
            Some(row) => row.try_into(),
            None => Err(StoreError::NotFound {
                entity: "application",
                id: application.application_id.clone(),
            }),
        }
    }

    async fn mark_paid_if_submitted(
        &self,
        application_id: &str,
    ) -> StoreResult<Option<Application>> {
        let row = sqlx::query_as::<_, ApplicationRow>(&format!(
            "UPDATE applications SET status = 'paid', \
                 current_step = GREATEST(current_step, $2), updated_at = NOW() \
             WHERE application_id = $1 AND status = 'submitted' \
             RETURNING {APPLICATION_COLUMNS}"
        ))
        .bind(application_id)
        .bind(ApplicationStatus::Paid.step() as i32)
        .fetch_optional(&self.pool)
        .await
        .map_err(from_sqlx)?;

        row.map(Application::try_from).transpose()
    }
}

#[derive(Debug, FromRow)]
struct PaymentRow {
    payment_id: Uuid,
    application_id: String,
    order_id: String,
    capture_id: Option<String>,
    status: String,
    amount: BigDecimal,
    currency: String,
    payer: Option<JsonValue>,
    webhook_events: JsonValue,
    metadata: JsonValue,
    reusable: bool,
    idempotency_key: String,
    last_error: Option<String>,
    refund_amount: Option<BigDecimal>,
    refund_reason: Option<String>,
    refunded_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let status = PaymentStatus::from_db_status(&row.status)
            .ok_or_else(|| StoreError::backend(format!("unknown status '{}'", row.status)))?;
        let payer = row
            .payer
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| StoreError::backend(format!("corrupt payer column: {}", e)))?;
        let webhook_events: Vec<WebhookEventRecord> = serde_json::from_value(row.webhook_events)
            .map_err(|e| StoreError::backend(format!("corrupt webhook_events column: {}", e)))?;

        Ok(Payment {
            payment_id: row.payment_id,
            application_id: row.application_id,
            order_id: row.order_id,
            capture_id: row.capture_id,
            status,
            amount: row.amount,
            currency: row.currency,
            payer,
            webhook_events,
            metadata: row.metadata,
            reusable: row.reusable,
            idempotency_key: row.idempotency_key,
            last_error: row.last_error,
            refund_amount: row.refund_amount,
            refund_reason: row.refund_reason,
            refunded_at: row.refunded_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const PAYMENT_COLUMNS: &str = "payment_id, application_id, order_id, capture_id, status, \
     amount, currency, payer, webhook_events, metadata, reusable, idempotency_key, last_error, \
     refund_amount, refund_reason, refunded_at, created_at, updated_at";

const OPEN_STATUSES: &str = "('pending', 'created', 'approved')";

#[async_trait]
impl PaymentStore for PgStore {
    async fn insert_payment(&self, payment: &Payment) -> StoreResult<Payment> {
        let payer = payment
            .payer
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| StoreError::backend(format!("serialize payer: {}", e)))?;
        let webhook_events = serde_json::to_value(&payment.webhook_events)
            .map_err(|e| StoreError::backend(format!("serialize webhook_events: {}", e)))?;

        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "INSERT INTO payments ({PAYMENT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18) \
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(payment.payment_id)
        .bind(&payment.application_id)
        .bind(&payment.order_id)
        .bind(&payment.capture_id)
        .bind(payment.status.as_str())
        .bind(&payment.amount)
        .bind(&payment.currency)
        .bind(&payer)
        .bind(&webhook_events)
        .bind(&payment.metadata)
        .bind(payment.reusable)
        .bind(&payment.idempotency_key)
        .bind(&payment.last_error)
        .bind(&payment.refund_amount)
        .bind(&payment.refund_reason)
        .bind(payment.refunded_at)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(from_sqlx)?;

        row.try_into()
    }

    async fn find_payment(&self, payment_id: Uuid) -> StoreResult<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE payment_id = $1"
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(from_sqlx)?;

        row.map(Payment::try_from).transpose()
    }

    async fn find_payment_by_gateway_ref(
        &self,
        reference: &str,
    ) -> StoreResult<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE order_id = $1 OR capture_id = $1 \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(from_sqlx)?;

        row.map(Payment::try_from).transpose()
    }

    async fn find_open_payment(&self, application_id: &str) -> StoreResult<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE application_id = $1 AND status IN {OPEN_STATUSES} \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(application_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(from_sqlx)?;

        row.map(Payment::try_from).transpose()
    }

    async fn complete_if_open(
        &self,
        payment_id: Uuid,
        update: &CaptureUpdate,
    ) -> StoreResult<Option<Payment>> {
        let payer = update
            .payer
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| StoreError::backend(format!("serialize payer: {}", e)))?;
        let mut metadata_patch = serde_json::json!({
            "capture_response": update.raw_response,
            "captured_at": Utc::now().to_rfc3339(),
        });
        if let Some(fee) = &update.gateway_fee {
            metadata_patch["gateway_fee"] = serde_json::json!(fee.to_string());
        }

        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payments SET status = 'completed', capture_id = $2, payer = $3, \
                 metadata = metadata || $4, reusable = FALSE, last_error = NULL, \
                 updated_at = NOW() \
             WHERE payment_id = $1 AND status IN {OPEN_STATUSES} \
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(payment_id)
        .bind(&update.capture_id)
        .bind(&payer)
        .bind(&metadata_patch)
        .fetch_optional(&self.pool)
        .await
        .map_err(from_sqlx)?;

        match row {
            Some(row) => Ok(Some(row.try_into()?)),
            None => self.require_exists(payment_id).await.map(|_| None),
        }
    }

    async fn fail_if_open(
        &self,
        payment_id: Uuid,
        error_message: &str,
    ) -> StoreResult<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payments SET status = 'failed', last_error = $2, reusable = FALSE, \
                 updated_at = NOW() \
             WHERE payment_id = $1 AND status IN {OPEN_STATUSES} \
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(payment_id)
        .bind(error_message)
        .fetch_optional(&self.pool)
        .await
        .map_err(from_sqlx)?;

        match row {
            Some(row) => Ok(Some(row.try_into()?)),
            None => self.require_exists(payment_id).await.map(|_| None),
        }
    }

    async fn refund_if_completed(
        &self,
        payment_id: Uuid,
        update: &RefundUpdate,
    ) -> StoreResult<Option<Payment>> {
        let metadata_patch = serde_json::json!({
            "refund_id": update.refund_id,
            "refund_response": update.raw_response,
        });

        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payments SET status = 'refunded', refund_amount = $2, refund_reason = $3, \
                 refunded_at = $4, metadata = metadata || $5, updated_at = NOW() \
             WHERE payment_id = $1 AND status = 'completed' AND refunded_at IS NULL \
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(payment_id)
        .bind(&update.amount)
        .bind(&update.reason)
        .bind(update.refunded_at)
        .bind(&metadata_patch)
        .fetch_optional(&self.pool)
        .await
        .map_err(from_sqlx)?;

        match row {
            Some(row) => Ok(Some(row.try_into()?)),
            None => self.require_exists(payment_id).await.map(|_| None),
        }
    }

    async fn append_webhook_event(
        &self,
        payment_id: Uuid,
        event: &WebhookEventRecord,
    ) -> StoreResult<bool> {
        let event_json = serde_json::to_value(event)
            .map_err(|e| StoreError::backend(format!("serialize webhook event: {}", e)))?;
        let event_array = serde_json::json!([event_json]);
        let dedup_probe = serde_json::json!([{ "event_id": event.event_id }]);

        let result = sqlx::query(
            "UPDATE payments SET webhook_events = webhook_events || $2, updated_at = NOW() \
             WHERE payment_id = $1 AND NOT webhook_events @> $3",
        )
        .bind(payment_id)
        .bind(&event_array)
        .bind(&dedup_probe)
        .execute(&self.pool)
        .await
        .map_err(from_sqlx)?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        self.require_exists(payment_id).await.map(|_| false)
    }

    async fn payment_stats(&self) -> StoreResult<Vec<PaymentStatusStats>> {
        let rows: Vec<(String, i64, BigDecimal)> = sqlx::query_as(
            "SELECT status, COUNT(*) AS count, COALESCE(SUM(amount), 0) AS total_amount \
             FROM payments GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(from_sqlx)?;

        rows.into_iter()
            .map(|(status, count, total_amount)| {
                let status = PaymentStatus::from_db_status(&status)
                    .ok_or_else(|| StoreError::backend(format!("unknown status '{}'", status)))?;
                Ok(PaymentStatusStats {
                    status,
                    count,
                    total_amount,
                })
            })
            .collect()
    }
}

impl PgStore {
    /// Distinguish "row missing" from "condition not met" after a
    /// conditional update touched zero rows.
    async fn require_exists(&self, payment_id: Uuid) -> StoreResult<()> {
        let exists: Option<(Uuid,)> =
            sqlx::query_as("SELECT payment_id FROM payments WHERE payment_id = $1")
                .bind(payment_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(from_sqlx)?;

        match exists {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound {
                entity: "payment",
                id: payment_id.to_string(),
            }),
        }
    }
}
