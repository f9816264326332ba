//! HTTP API layer: request/response shapes and axum handlers.

pub mod applications;
pub mod payments;
pub mod webhooks;

use crate::applications::workflow::WorkflowManager;
use crate::services::payment_orchestrator::PaymentOrchestrator;
use crate::services::webhook_processor::WebhookProcessor;
use std::sync::Arc;

/// Shared handler state
pub struct AppState {
    pub workflow: Arc<WorkflowManager>,
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub webhooks: Arc<WebhookProcessor>,
}
