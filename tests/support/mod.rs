//! Shared test support: a scripted gateway double and workflow fixtures.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use visapass_backend::applications::types::{
    Applicant, DocumentSet, SupportingDocument, UploadedFile,
};
use visapass_backend::applications::workflow::{StartApplicationRequest, WorkflowManager};
use visapass_backend::gateway::error::{GatewayError, GatewayResult};
use visapass_backend::gateway::paypal::normalize_event;
use visapass_backend::gateway::types::{
    CaptureDetails, CreateOrderRequest, CreatedOrder, GatewayEvent, GatewayOrder,
    GatewayOrderStatus, Money, PayerIdentity, RefundDetails, WebhookHeaders, WebhookVerification,
};
use visapass_backend::gateway::PaymentGateway;
use visapass_backend::services::notification::NotificationService;
use visapass_backend::services::payment_orchestrator::PaymentOrchestrator;
use visapass_backend::services::webhook_processor::WebhookProcessor;
use visapass_backend::store::memory::MemoryStore;
use visapass_backend::store::{ApplicationStore, PaymentStore};

/// How a scripted capture call behaves
#[derive(Debug, Clone)]
pub enum CaptureBehavior {
    Succeed,
    AlreadyCaptured,
    Fail(String),
}

/// Gateway double with scriptable live state and call counters
pub struct ScriptedGateway {
    pub create_calls: AtomicUsize,
    pub capture_calls: AtomicUsize,
    pub refund_calls: AtomicUsize,
    pub order_status: Mutex<GatewayOrderStatus>,
    pub order_capture_id: Mutex<Option<String>>,
    pub capture_behavior: Mutex<CaptureBehavior>,
    pub verify_ok: Mutex<bool>,
    pub get_order_fails: Mutex<bool>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            create_calls: AtomicUsize::new(0),
            capture_calls: AtomicUsize::new(0),
            refund_calls: AtomicUsize::new(0),
            order_status: Mutex::new(GatewayOrderStatus::Created),
            order_capture_id: Mutex::new(None),
            capture_behavior: Mutex::new(CaptureBehavior::Succeed),
            verify_ok: Mutex::new(true),
            get_order_fails: Mutex::new(false),
        }
    }

    pub async fn set_order_status(&self, status: GatewayOrderStatus) {
        *self.order_status.lock().await = status;
    }

    pub async fn set_capture_behavior(&self, behavior: CaptureBehavior) {
        *self.capture_behavior.lock().await = behavior;
    }

    pub async fn set_verify_ok(&self, ok: bool) {
        *self.verify_ok.lock().await = ok;
    }

    pub async fn set_get_order_fails(&self, fails: bool) {
        *self.get_order_fails.lock().await = fails;
    }

    pub fn create_count(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn capture_count(&self) -> usize {
        self.capture_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn create_order(&self, request: CreateOrderRequest) -> GatewayResult<CreatedOrder> {
        request.amount.validate_positive("amount")?;
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let order_id = format!("ORDER-{}", n);
        Ok(CreatedOrder {
            order_id: order_id.clone(),
            status: GatewayOrderStatus::Created,
            approve_url: Some(format!("https://gateway.test/approve/{}", order_id)),
            request_id: format!("req-{}", n),
            raw: serde_json::json!({
                "id": order_id,
                "status": "CREATED",
                "amount": request.amount,
            }),
        })
    }

    async fn get_order(&self, order_id: &str) -> GatewayResult<GatewayOrder> {
        if *self.get_order_fails.lock().await {
            return Err(GatewayError::NetworkError {
                message: "scripted outage".to_string(),
            });
        }
        let status = *self.order_status.lock().await;
        Ok(GatewayOrder {
            order_id: order_id.to_string(),
            status,
            approve_url: Some(format!("https://gateway.test/approve/{}", order_id)),
            capture_id: self.order_capture_id.lock().await.clone(),
            raw: serde_json::json!({"id": order_id, "status": status.as_str()}),
        })
    }

    async fn capture_order(&self, order_id: &str) -> GatewayResult<CaptureDetails> {
        self.capture_calls.fetch_add(1, Ordering::SeqCst);
        match self.capture_behavior.lock().await.clone() {
            CaptureBehavior::Succeed => {
                let capture_id = format!("CAP-{}", order_id);
                *self.order_capture_id.lock().await = Some(capture_id.clone());
                *self.order_status.lock().await = GatewayOrderStatus::Completed;
                Ok(CaptureDetails {
                    order_id: order_id.to_string(),
                    capture_id,
                    amount: Money::new("252.00", "USD"),
                    gateway_fee: Some(Money::new("8.52", "USD")),
                    payer: Some(PayerIdentity {
                        email: Some("payer@example.com".to_string()),
                        payer_id: Some("PAYER99".to_string()),
                        given_name: Some("Amina".to_string()),
                        surname: Some("Diallo".to_string()),
                    }),
                    raw: serde_json::json!({"id": order_id, "status": "COMPLETED"}),
                })
            }
            CaptureBehavior::AlreadyCaptured => Err(GatewayError::OrderAlreadyCaptured {
                order_id: order_id.to_string(),
            }),
            CaptureBehavior::Fail(message) => Err(GatewayError::ApiError {
                message,
                issue: None,
                retryable: false,
            }),
        }
    }

    async fn refund_capture(
        &self,
        capture_id: &str,
        amount: Option<&Money>,
        _note: Option<&str>,
    ) -> GatewayResult<RefundDetails> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        Ok(RefundDetails {
            refund_id: format!("RF-{}", capture_id),
            amount: amount.cloned(),
            raw: serde_json::json!({"id": format!("RF-{}", capture_id)}),
        })
    }

    async fn verify_webhook(
        &self,
        _headers: &WebhookHeaders,
        _payload: &JsonValue,
    ) -> GatewayResult<WebhookVerification> {
        if *self.verify_ok.lock().await {
            Ok(WebhookVerification::Verified)
        } else {
            Err(GatewayError::WebhookVerificationError {
                message: "scripted verification failure".to_string(),
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

/// Everything a payment test needs, wired over the in-memory store
pub struct TestEnv {
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<ScriptedGateway>,
    pub workflow: Arc<WorkflowManager>,
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub webhooks: Arc<WebhookProcessor>,
}

pub fn build_env() -> TestEnv {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(ScriptedGateway::new());
    let notifications = Arc::new(NotificationService::new());

    let application_store: Arc<dyn ApplicationStore> = store.clone();
    let payment_store: Arc<dyn PaymentStore> = store.clone();
    let gateway_dyn: Arc<dyn PaymentGateway> = gateway.clone();

    let workflow = Arc::new(WorkflowManager::new(
        application_store.clone(),
        notifications.clone(),
    ));
    let orchestrator = Arc::new(PaymentOrchestrator::new(
        gateway_dyn.clone(),
        payment_store,
        application_store,
        notifications,
    ));
    let webhooks = Arc::new(WebhookProcessor::new(gateway_dyn, orchestrator.clone()));

    TestEnv {
        store,
        gateway,
        workflow,
        orchestrator,
        webhooks,
    }
}

pub fn start_request() -> StartApplicationRequest {
    StartApplicationRequest {
        passport_country: "NG".to_string(),
        visa_type: "tourist".to_string(),
        destination: "PT".to_string(),
        email: "amina@example.com".to_string(),
        client_ip: Some("203.0.113.7".to_string()),
        user_agent: Some("integration-tests".to_string()),
    }
}

pub fn valid_applicant() -> Applicant {
    let year = Utc::now().date_naive().year();
    let date = |y: i32| chrono::NaiveDate::from_ymd_opt(y, 6, 15).expect("valid date");
    Applicant {
        given_name: "Amina".to_string(),
        family_name: "Diallo".to_string(),
        date_of_birth: date(year - 30),
        nationality: "NG".to_string(),
        passport_number: "A1234567".to_string(),
        passport_issue_date: date(year - 2),
        passport_expiry_date: date(year + 5),
        documents: DocumentSet::default(),
    }
}

pub fn unlimited_document_set() -> DocumentSet {
    DocumentSet {
        supporting_documents: vec![SupportingDocument {
            doc_type: "yellow_fever_certificate".to_string(),
            issuing_country: "NG".to_string(),
            document_number: "YF-2291".to_string(),
            expiry_date: None,
            unlimited_validity: true,
        }],
        files: vec![UploadedFile {
            file_id: "file-1".to_string(),
            filename: "passport-scan.pdf".to_string(),
            url: Some("https://media.test/file-1".to_string()),
        }],
    }
}

/// Drive an application through the workflow to `submitted` with the given
/// number of additional applicants; returns its identifier.
pub async fn submitted_application(env: &TestEnv, additional_applicants: usize) -> String {
    let application = env
        .workflow
        .start(start_request())
        .await
        .expect("start should succeed");
    let id = application.application_id.clone();

    env.workflow
        .save_main_applicant(&id, valid_applicant())
        .await
        .expect("applicant details should save");
    env.workflow
        .register_documents(&id, unlimited_document_set())
        .await
        .expect("documents should register");

    for _ in 0..additional_applicants {
        env.workflow
            .add_additional_applicant(&id, valid_applicant())
            .await
            .expect("additional applicant should be added");
    }

    env.workflow.submit(&id).await.expect("submit should succeed");
    id
}

/// Hand-built open payment record for invariant tests
pub fn open_payment(application_id: &str, reusable: bool) -> visapass_backend::store::Payment {
    use visapass_backend::store::{Payment, PaymentStatus};
    let now = Utc::now();
    Payment {
        payment_id: uuid::Uuid::new_v4(),
        application_id: application_id.to_string(),
        order_id: format!("ORDER-MANUAL-{}", uuid::Uuid::new_v4()),
        capture_id: None,
        status: PaymentStatus::Created,
        amount: bigdecimal::BigDecimal::from(84),
        currency: "USD".to_string(),
        payer: None,
        webhook_events: Vec::new(),
        metadata: serde_json::json!({}),
        reusable,
        idempotency_key: "manual-key".to_string(),
        last_error: None,
        refund_amount: None,
        refund_reason: None,
        refunded_at: None,
        created_at: now,
        updated_at: now,
    }
}

/// Webhook payload for a capture-scoped event
pub fn capture_event_payload(
    event_id: &str,
    event_type: &str,
    order_id: &str,
    capture_id: &str,
) -> String {
    serde_json::json!({
        "id": event_id,
        "event_type": event_type,
        "resource": {
            "id": capture_id,
            "amount": {"currency_code": "USD", "value": "84.00"},
            "status_details": {"reason": "DECLINED_BY_RISK_FRAUD_FILTERS"},
            "supplementary_data": {
                "related_ids": {"order_id": order_id}
            }
        }
    })
    .to_string()
}
