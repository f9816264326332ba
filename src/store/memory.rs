//! In-memory store backend.
//!
//! Backs the test suite and credential-free local runs. Conditional updates
//! take the write lock for the whole check-and-set, giving the same
//! winner-takes-all semantics as the SQL backend's conditional `UPDATE`.

use crate::applications::types::{Application, ApplicationStatus};
use crate::store::{
    ApplicationStore, CaptureUpdate, Payment, PaymentStatus, PaymentStatusStats, PaymentStore,
    RefundUpdate, StoreError, StoreResult, WebhookEventRecord,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryStore {
    applications: RwLock<HashMap<String, Application>>,
    payments: RwLock<HashMap<Uuid, Payment>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApplicationStore for MemoryStore {
    async fn insert_application(&self, application: &Application) -> StoreResult<Application> {
        let mut applications = self.applications.write().await;
        if applications.contains_key(&application.application_id) {
            return Err(StoreError::DuplicateKey {
                entity: "application",
                id: application.application_id.clone(),
            });
        }
        applications.insert(application.application_id.clone(), application.clone());
        Ok(application.clone())
    }

    async fn find_application(&self, application_id: &str) -> StoreResult<Option<Application>> {
        Ok(self.applications.read().await.get(application_id).cloned())
    }

    async fn update_application(&self, application: &Application) -> StoreResult<Application> {
        let mut applications = self.applications.write().await;
        if !applications.contains_key(&application.application_id) {
            return Err(StoreError::NotFound {
                entity: "application",
                id: application.application_id.clone(),
            });
        }
        applications.insert(application.application_id.clone(), application.clone());
        Ok(application.clone())
    }

    async fn mark_paid_if_submitted(
        &self,
        application_id: &str,
    ) -> StoreResult<Option<Application>> {
        let mut applications = self.applications.write().await;
        match applications.get_mut(application_id) {
            Some(application) if application.status == ApplicationStatus::Submitted => {
                application.advance(ApplicationStatus::Paid);
                Ok(Some(application.clone()))
            }
            Some(_) => Ok(None),
            None => Err(StoreError::NotFound {
                entity: "application",
                id: application_id.to_string(),
            }),
        }
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn insert_payment(&self, payment: &Payment) -> StoreResult<Payment> {
        let mut payments = self.payments.write().await;
        if payments.contains_key(&payment.payment_id) {
            return Err(StoreError::DuplicateKey {
                entity: "payment",
                id: payment.payment_id.to_string(),
            });
        }
        payments.insert(payment.payment_id, payment.clone());
        Ok(payment.clone())
    }

    async fn find_payment(&self, payment_id: Uuid) -> StoreResult<Option<Payment>> {
        Ok(self.payments.read().await.get(&payment_id).cloned())
    }

    async fn find_payment_by_gateway_ref(
        &self,
        reference: &str,
    ) -> StoreResult<Option<Payment>> {
        Ok(self
            .payments
            .read()
            .await
            .values()
            .find(|p| p.order_id == reference || p.capture_id.as_deref() == Some(reference))
            .cloned())
    }

    async fn find_open_payment(&self, application_id: &str) -> StoreResult<Option<Payment>> {
        Ok(self
            .payments
            .read()
            .await
            .values()
            .find(|p| p.application_id == application_id && p.status.is_open())
            .cloned())
    }

    async fn complete_if_open(
        &self,
        payment_id: Uuid,
        update: &CaptureUpdate,
    ) -> StoreResult<Option<Payment>> {
        let mut payments = self.payments.write().await;
        let payment = payments.get_mut(&payment_id).ok_or(StoreError::NotFound {
            entity: "payment",
            id: payment_id.to_string(),
        })?;

        if !payment.status.is_open() {
            return Ok(None);
        }

        payment.status = PaymentStatus::Completed;
        payment.capture_id = Some(update.capture_id.clone());
        payment.payer = update.payer.clone();
        payment.reusable = false;
        payment.last_error = None;
        if let Some(fee) = &update.gateway_fee {
            payment.metadata["gateway_fee"] = serde_json::json!(fee.to_string());
        }
        payment.metadata["capture_response"] = update.raw_response.clone();
        payment.metadata["captured_at"] = serde_json::json!(Utc::now().to_rfc3339());
        payment.updated_at = Utc::now();
        Ok(Some(payment.clone()))
    }

    async fn fail_if_open(
        &self,
        payment_id: Uuid,
        error_message: &str,
    ) -> StoreResult<Option<Payment>> {
        let mut payments = self.payments.write().await;
        let payment = payments.get_mut(&payment_id).ok_or(StoreError::NotFound {
            entity: "payment",
            id: payment_id.to_string(),
        })?;

        if !payment.status.is_open() {
            return Ok(None);
        }

        payment.status = PaymentStatus::Failed;
        payment.reusable = false;
        payment.last_error = Some(error_message.to_string());
        payment.updated_at = Utc::now();
        Ok(Some(payment.clone()))
    }

    async fn refund_if_completed(
        &self,
        payment_id: Uuid,
        update: &RefundUpdate,
    ) -> StoreResult<Option<Payment>> {
        let mut payments = self.payments.write().await;
        let payment = payments.get_mut(&payment_id).ok_or(StoreError::NotFound {
            entity: "payment",
            id: payment_id.to_string(),
        })?;

        if payment.status != PaymentStatus::Completed || payment.refunded_at.is_some() {
            return Ok(None);
        }

        payment.status = PaymentStatus::Refunded;
        payment.refund_amount = Some(update.amount.clone());
        payment.refund_reason = update.reason.clone();
        payment.refunded_at = Some(update.refunded_at);
        payment.metadata["refund_id"] = serde_json::json!(update.refund_id);
        payment.metadata["refund_response"] = update.raw_response.clone();
        payment.updated_at = Utc::now();
        Ok(Some(payment.clone()))
    }

    async fn append_webhook_event(
        &self,
        payment_id: Uuid,
        event: &WebhookEventRecord,
    ) -> StoreResult<bool> {
        let mut payments = self.payments.write().await;
        let payment = payments.get_mut(&payment_id).ok_or(StoreError::NotFound {
            entity: "payment",
            id: payment_id.to_string(),
        })?;

        if payment
            .webhook_events
            .iter()
            .any(|e| e.event_id == event.event_id)
        {
            return Ok(false);
        }

        payment.webhook_events.push(event.clone());
        payment.updated_at = Utc::now();
        Ok(true)
    }

    async fn payment_stats(&self) -> StoreResult<Vec<PaymentStatusStats>> {
        let payments = self.payments.read().await;
        let mut grouped: HashMap<PaymentStatus, (i64, BigDecimal)> = HashMap::new();
        for payment in payments.values() {
            let entry = grouped
                .entry(payment.status)
                .or_insert_with(|| (0, BigDecimal::from(0)));
            entry.0 += 1;
            entry.1 += payment.amount.clone();
        }

        let mut stats: Vec<PaymentStatusStats> = grouped
            .into_iter()
            .map(|(status, (count, total_amount))| PaymentStatusStats {
                status,
                count,
                total_amount,
            })
            .collect();
        stats.sort_by_key(|s| s.status.as_str());
        Ok(stats)
    }
}
