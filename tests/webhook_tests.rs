//! Webhook event processor integration tests: verification, dedup, and
//! gateway-driven transitions.

mod support;

use bigdecimal::BigDecimal;
use support::{build_env, capture_event_payload};
use visapass_backend::applications::types::ApplicationStatus;
use visapass_backend::gateway::types::{GatewayOrderStatus, WebhookHeaders};
use visapass_backend::services::payment_orchestrator::CreateOrderInput;
use visapass_backend::services::webhook_processor::{WebhookDisposition, WebhookProcessorError};
use visapass_backend::store::{PaymentStatus, PaymentStore};

fn create_input(application_id: &str) -> CreateOrderInput {
    CreateOrderInput {
        application_id: application_id.to_string(),
        amount: None,
        currency: None,
        description: None,
    }
}

async fn created_payment(env: &support::TestEnv) -> (String, uuid::Uuid, String) {
    let id = support::submitted_application(env, 0).await;
    let created = env
        .orchestrator
        .create_order(create_input(&id))
        .await
        .expect("creation");
    (id, created.payment_id, created.order_id)
}

#[tokio::test]
async fn completed_event_settles_payment_and_application() {
    let env = build_env();
    let (application_id, payment_id, order_id) = created_payment(&env).await;

    let body = capture_event_payload("WH-1", "PAYMENT.CAPTURE.COMPLETED", &order_id, "CAP-X");
    let disposition = env
        .webhooks
        .process(&WebhookHeaders::default(), body.as_bytes())
        .await
        .expect("processing should succeed");
    assert_eq!(disposition, WebhookDisposition::Processed);

    let payment = env
        .store
        .find_payment(payment_id)
        .await
        .expect("find")
        .expect("payment exists");
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(payment.capture_id.as_deref(), Some("CAP-X"));
    assert_eq!(payment.webhook_events.len(), 1);
    assert_eq!(payment.webhook_events[0].event_id, "WH-1");

    let application = env
        .workflow
        .load(&application_id)
        .await
        .expect("application exists");
    assert_eq!(application.status, ApplicationStatus::Paid);
}

#[tokio::test]
async fn duplicate_event_applies_exactly_one_transition() {
    let env = build_env();
    let (_application_id, payment_id, order_id) = created_payment(&env).await;

    let body = capture_event_payload("WH-1", "PAYMENT.CAPTURE.COMPLETED", &order_id, "CAP-X");
    let first = env
        .webhooks
        .process(&WebhookHeaders::default(), body.as_bytes())
        .await
        .expect("first delivery");
    assert_eq!(first, WebhookDisposition::Processed);

    let second = env
        .webhooks
        .process(&WebhookHeaders::default(), body.as_bytes())
        .await
        .expect("redelivery");
    assert_eq!(second, WebhookDisposition::Duplicate);

    let payment = env
        .store
        .find_payment(payment_id)
        .await
        .expect("find")
        .expect("payment exists");
    // Exactly one log entry, one transition
    assert_eq!(payment.webhook_events.len(), 1);
    assert_eq!(payment.status, PaymentStatus::Completed);
}

#[tokio::test]
async fn denied_event_fails_payment_without_touching_application() {
    let env = build_env();
    let (application_id, payment_id, order_id) = created_payment(&env).await;

    let body = capture_event_payload("WH-2", "PAYMENT.CAPTURE.DENIED", &order_id, "CAP-X");
    let disposition = env
        .webhooks
        .process(&WebhookHeaders::default(), body.as_bytes())
        .await
        .expect("processing should succeed");
    assert_eq!(disposition, WebhookDisposition::Processed);

    let payment = env
        .store
        .find_payment(payment_id)
        .await
        .expect("find")
        .expect("payment exists");
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert_eq!(
        payment.last_error.as_deref(),
        Some("DECLINED_BY_RISK_FRAUD_FILTERS")
    );

    // Application stays submitted
    let application = env
        .workflow
        .load(&application_id)
        .await
        .expect("application exists");
    assert_eq!(application.status, ApplicationStatus::Submitted);
}

#[tokio::test]
async fn refunded_event_records_amount_and_timestamp() {
    let env = build_env();
    let (_application_id, payment_id, order_id) = created_payment(&env).await;

    // Settle first through the synchronous path
    env.gateway.set_order_status(GatewayOrderStatus::Approved).await;
    env.orchestrator
        .capture_order(&order_id, &_application_id)
        .await
        .expect("capture");

    let body = capture_event_payload("WH-3", "PAYMENT.CAPTURE.REFUNDED", &order_id, "RF-7");
    let disposition = env
        .webhooks
        .process(&WebhookHeaders::default(), body.as_bytes())
        .await
        .expect("processing should succeed");
    assert_eq!(disposition, WebhookDisposition::Processed);

    let payment = env
        .store
        .find_payment(payment_id)
        .await
        .expect("find")
        .expect("payment exists");
    assert_eq!(payment.status, PaymentStatus::Refunded);
    assert_eq!(payment.refund_amount, Some(BigDecimal::from(84)));
    assert!(payment.refunded_at.is_some());
}

#[tokio::test]
async fn completed_event_after_synchronous_capture_keeps_richer_data() {
    let env = build_env();
    let (application_id, payment_id, order_id) = created_payment(&env).await;

    env.gateway.set_order_status(GatewayOrderStatus::Approved).await;
    env.orchestrator
        .capture_order(&order_id, &application_id)
        .await
        .expect("capture");

    let payment_before = env
        .store
        .find_payment(payment_id)
        .await
        .expect("find")
        .expect("payment exists");
    let payer_before = payment_before.payer.clone();
    assert!(payer_before.is_some());

    // A late completed webhook must not clobber the captured payer data
    let body = capture_event_payload("WH-4", "PAYMENT.CAPTURE.COMPLETED", &order_id, "CAP-LATE");
    env.webhooks
        .process(&WebhookHeaders::default(), body.as_bytes())
        .await
        .expect("processing should succeed");

    let payment_after = env
        .store
        .find_payment(payment_id)
        .await
        .expect("find")
        .expect("payment exists");
    assert_eq!(payment_after.status, PaymentStatus::Completed);
    assert_eq!(payment_after.payer, payer_before);
    assert_ne!(payment_after.capture_id.as_deref(), Some("CAP-LATE"));
    // The event is still logged for audit
    assert_eq!(payment_after.webhook_events.len(), 1);
}

#[tokio::test]
async fn unknown_order_is_acknowledged_but_not_applied() {
    let env = build_env();

    let body = capture_event_payload(
        "WH-5",
        "PAYMENT.CAPTURE.COMPLETED",
        "ORDER-NEVER-CREATED",
        "CAP-X",
    );
    let disposition = env
        .webhooks
        .process(&WebhookHeaders::default(), body.as_bytes())
        .await
        .expect("processing should succeed");
    assert_eq!(disposition, WebhookDisposition::Ignored);
}

#[tokio::test]
async fn unknown_event_kind_is_acknowledged_without_transition() {
    let env = build_env();
    let (_application_id, payment_id, order_id) = created_payment(&env).await;

    let body = serde_json::json!({
        "id": "WH-6",
        "event_type": "CHECKOUT.ORDER.APPROVED",
        "resource": {"id": order_id}
    })
    .to_string();

    let disposition = env
        .webhooks
        .process(&WebhookHeaders::default(), body.as_bytes())
        .await
        .expect("processing should succeed");
    assert_eq!(disposition, WebhookDisposition::Ignored);

    let payment = env
        .store
        .find_payment(payment_id)
        .await
        .expect("find")
        .expect("payment exists");
    assert_eq!(payment.status, PaymentStatus::Created);
}

#[tokio::test]
async fn verification_failure_rejects_without_mutation() {
    let env = build_env();
    let (_application_id, payment_id, order_id) = created_payment(&env).await;
    env.gateway.set_verify_ok(false).await;

    let body = capture_event_payload("WH-7", "PAYMENT.CAPTURE.COMPLETED", &order_id, "CAP-X");
    let error = env
        .webhooks
        .process(&WebhookHeaders::default(), body.as_bytes())
        .await
        .expect_err("verification failure must reject");
    assert!(matches!(
        error,
        WebhookProcessorError::VerificationFailed(_)
    ));

    let payment = env
        .store
        .find_payment(payment_id)
        .await
        .expect("find")
        .expect("payment exists");
    assert_eq!(payment.status, PaymentStatus::Created);
    assert!(payment.webhook_events.is_empty());
}

#[tokio::test]
async fn malformed_body_is_rejected_as_unverifiable() {
    let env = build_env();

    let error = env
        .webhooks
        .process(&WebhookHeaders::default(), b"not json at all")
        .await
        .expect_err("malformed body cannot be verified");
    assert!(matches!(
        error,
        WebhookProcessorError::VerificationFailed(_)
    ));
}
