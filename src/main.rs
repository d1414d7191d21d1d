use quotepay_backend::api::payments::{router, PaymentsState};
use quotepay_backend::config::AppConfig;
use quotepay_backend::logging::init_tracing;
use quotepay_backend::middleware::logging::UuidRequestId;
use quotepay_backend::payments::provider::PaymentGateway;
use quotepay_backend::payments::providers::MpesaGateway;
use quotepay_backend::services::payment_orchestrator::PaymentOrchestrator;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_and_cancel(orchestrator: Arc<PaymentOrchestrator>) {
    shutdown_signal().await;
    orchestrator.shutdown().await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.logging);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "Starting payment confirmation service"
    );

    info!(
        base_url = %config.mpesa.base_url,
        product_tag = %config.mpesa.product_tag,
        push_amount = %config.mpesa.push_amount,
        interval_ms = config.polling.interval.as_millis() as u64,
        max_attempts = config.polling.max_attempts,
        status_timeout_secs = config.polling.request_timeout.as_secs(),
        budget_secs = config.polling.polling_budget().as_secs(),
        "Payment configuration loaded"
    );

    let gateway: Arc<dyn PaymentGateway> = Arc::new(MpesaGateway::new(config.mpesa.clone())?);
    let orchestrator = Arc::new(PaymentOrchestrator::new(gateway, config.polling.clone()));

    let app = router(PaymentsState {
        orchestrator: orchestrator.clone(),
        push_amount: config.mpesa.push_amount,
    })
    .layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id()),
    );

    let addr = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        error!(address = %addr, error = %e, "Failed to bind server address");
        e
    })?;
    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_and_cancel(orchestrator))
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
