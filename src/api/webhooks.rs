//! Gateway webhook endpoint.
//!
//! Always acknowledges with success once the signature checks out, even
//! when internal processing fails; only a signature failure is rejected
//! with a client error. Anything else would feed the gateway's retry
//! policy.

use crate::api::AppState;
use crate::gateway::types::WebhookHeaders;
use crate::middleware::error::message_response;
use crate::services::webhook_processor::{WebhookDisposition, WebhookProcessorError};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{error, info, warn};

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

/// POST /api/payments/paypal/webhook
pub async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    info!("received gateway webhook");

    let webhook_headers = WebhookHeaders {
        transmission_id: header(&headers, "paypal-transmission-id"),
        transmission_time: header(&headers, "paypal-transmission-time"),
        transmission_sig: header(&headers, "paypal-transmission-sig"),
        cert_url: header(&headers, "paypal-cert-url"),
        auth_algo: header(&headers, "paypal-auth-algo"),
    };

    match state.webhooks.process(&webhook_headers, body.as_bytes()).await {
        Ok(WebhookDisposition::Processed) => message_response("processed"),
        Ok(WebhookDisposition::Duplicate) => message_response("already processed"),
        Ok(WebhookDisposition::Ignored) => message_response("acknowledged"),
        Err(WebhookProcessorError::VerificationFailed(reason)) => {
            warn!(reason = %reason, "webhook signature verification failed");
            (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "success": false,
                    "error": {
                        "code": "WEBHOOK_VERIFICATION_FAILED",
                        "message": "Webhook signature verification failed",
                    }
                })),
            )
                .into_response()
        }
        Err(WebhookProcessorError::Processing(reason)) => {
            // Logged, never surfaced: the gateway still gets a success
            // acknowledgement.
            error!(reason = %reason, "webhook processing failed");
            message_response("acknowledged")
        }
    }
}
