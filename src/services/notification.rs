//! Outbound notification boundary.
//!
//! Delivery is owned by an external mail service; this records what would be
//! sent. Notifications are dispatched fire-and-forget after the primary
//! state transition commits and never feed back into the request's error
//! path.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NotificationKind {
    ApplicationStarted,
    ApplicationSubmitted,
    PaymentReceived,
    PaymentRefunded,
}

pub struct NotificationService;

impl NotificationService {
    pub fn new() -> Self {
        Self
    }

    pub async fn send(&self, kind: NotificationKind, application_id: &str, email: &str) {
        match kind {
            NotificationKind::ApplicationStarted => {
                info!(
                    application_id = %application_id,
                    email = %email,
                    "NOTIFICATION: application started confirmation"
                );
            }
            NotificationKind::ApplicationSubmitted => {
                info!(
                    application_id = %application_id,
                    email = %email,
                    "NOTIFICATION: application submitted confirmation"
                );
            }
            NotificationKind::PaymentReceived => {
                info!(
                    application_id = %application_id,
                    email = %email,
                    "NOTIFICATION: payment received receipt"
                );
            }
            NotificationKind::PaymentRefunded => {
                info!(
                    application_id = %application_id,
                    email = %email,
                    "NOTIFICATION: payment refunded notice"
                );
            }
        }
    }

    /// Dispatch without blocking or affecting the caller's outcome.
    pub fn dispatch(
        self: &Arc<Self>,
        kind: NotificationKind,
        application_id: impl Into<String>,
        email: impl Into<String>,
    ) {
        let service = Arc::clone(self);
        let application_id = application_id.into();
        let email = email.into();
        tokio::spawn(async move {
            service.send(kind, &application_id, &email).await;
        });
    }
}

impl Default for NotificationService {
    fn default() -> Self {
        Self::new()
    }
}
