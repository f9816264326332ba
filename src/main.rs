use axum::{
    routing::{get, post, put},
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use visapass_backend::api::{applications, payments, webhooks, AppState};
use visapass_backend::applications::workflow::WorkflowManager;
use visapass_backend::config::AppConfig;
use visapass_backend::gateway::paypal::PayPalGateway;
use visapass_backend::gateway::PaymentGateway;
use visapass_backend::logging::init_tracing;
use visapass_backend::services::notification::NotificationService;
use visapass_backend::services::payment_orchestrator::PaymentOrchestrator;
use visapass_backend::services::webhook_processor::WebhookProcessor;
use visapass_backend::store::postgres::{init_pool, PgStore};
use visapass_backend::store::{ApplicationStore, PaymentStore};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    config.validate()?;
    init_tracing(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        "Starting visapass backend service"
    );

    let pool = init_pool(&config.database).await?;
    let store = Arc::new(PgStore::new(pool));
    let application_store: Arc<dyn ApplicationStore> = store.clone();
    let payment_store: Arc<dyn PaymentStore> = store;

    let gateway: Arc<dyn PaymentGateway> = Arc::new(PayPalGateway::new(config.paypal.clone())?);
    let notifications = Arc::new(NotificationService::new());

    let workflow = Arc::new(WorkflowManager::new(
        application_store.clone(),
        notifications.clone(),
    ));
    let orchestrator = Arc::new(PaymentOrchestrator::new(
        gateway.clone(),
        payment_store,
        application_store,
        notifications,
    ));
    let webhook_processor = Arc::new(WebhookProcessor::new(gateway, orchestrator.clone()));

    let state = Arc::new(AppState {
        workflow,
        orchestrator,
        webhooks: webhook_processor,
    });

    let app = Router::new()
        .route("/health", get(health))
        .route(
            "/api/applications/start",
            post(applications::start_application),
        )
        .route(
            "/api/applications/{id}/applicant-details",
            post(applications::save_applicant_details),
        )
        .route(
            "/api/applications/{id}/documents",
            post(applications::register_documents),
        )
        .route(
            "/api/applications/{id}/documents/update",
            post(applications::update_documents),
        )
        .route(
            "/api/applications/{id}/applicants",
            post(applications::add_applicant),
        )
        .route(
            "/api/applications/{id}/applicants/{index}",
            put(applications::update_applicant).delete(applications::remove_applicant),
        )
        .route(
            "/api/applications/{id}/submit",
            post(applications::submit_application),
        )
        .route("/api/applications/{id}", get(applications::get_application))
        .route("/api/payments/paypal/create", post(payments::create_order))
        .route("/api/payments/paypal/capture", post(payments::capture_order))
        .route("/api/payments/paypal/webhook", post(webhooks::handle_webhook))
        .route("/api/payments/refund", post(payments::refund))
        .route("/api/payments/stats", get(payments::payment_stats))
        .route("/api/payments/{payment_id}", get(payments::payment_status))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}
