use orderpay_backend::api::{self, AppState};
use orderpay_backend::config::AppConfig;
use orderpay_backend::database::repository::{LedgerStore, RetryTaskStore};
use orderpay_backend::database::memory::{InMemoryLedgerStore, InMemoryRetryTaskStore};
use orderpay_backend::health::HealthChecker;
use orderpay_backend::logging::init_tracing;
use orderpay_backend::middleware::logging::{request_logging_middleware, UuidRequestId};
use orderpay_backend::payments::provider::PaymentGateway;
use orderpay_backend::payments::providers::{DisabledGateway, RazorpayConfig, RazorpayGateway};
use orderpay_backend::payments::signature::SignatureVerifier;
use orderpay_backend::services::commerce::LoggingCommerceHooks;
use orderpay_backend::services::invoice::InvoiceDispatcher;
use orderpay_backend::services::notification::{LoggingNotifier, Notifier};
use orderpay_backend::services::{
    ReconciliationService, RetryQueueProcessor, SideEffectOrchestrator, WebhookProcessor,
};
use orderpay_backend::workers::payment_jobs::{
    DailyReconciliationJob, OrderPaymentRetryJob, PaymentReminderJob, StalePaymentExpiryJob,
    SubscriptionPaymentRetryJob,
};
use orderpay_backend::workers::{JobScheduler, RetryQueueWorker};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
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

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[cfg(feature = "database")]
async fn build_stores(
    config: &AppConfig,
) -> anyhow::Result<(Arc<dyn LedgerStore>, Arc<dyn RetryTaskStore>)> {
    use orderpay_backend::database::init_pool_from_config;
    use orderpay_backend::database::ledger_repository::PgLedgerRepository;
    use orderpay_backend::database::task_repository::PgRetryTaskRepository;

    if config.skip_externals {
        info!("⏭️  Skipping database initialization (SKIP_EXTERNALS=true), using in-memory stores");
        return Ok((
            Arc::new(InMemoryLedgerStore::new()),
            Arc::new(InMemoryRetryTaskStore::new()),
        ));
    }

    info!("📊 Initializing database connection pool...");
    let pool = init_pool_from_config(&config.database).await.map_err(|e| {
        error!("Failed to initialize database pool: {}", e);
        e
    })?;
    info!(
        max_connections = pool.options().get_max_connections(),
        "✅ Database connection pool initialized, migrations applied"
    );

    Ok((
        Arc::new(PgLedgerRepository::new(pool.clone())),
        Arc::new(PgRetryTaskRepository::new(pool)),
    ))
}

#[cfg(not(feature = "database"))]
async fn build_stores(
    _config: &AppConfig,
) -> anyhow::Result<(Arc<dyn LedgerStore>, Arc<dyn RetryTaskStore>)> {
    warn!("Built without the database feature, using in-memory stores");
    Ok((
        Arc::new(InMemoryLedgerStore::new()),
        Arc::new(InMemoryRetryTaskStore::new()),
    ))
}

fn build_gateway(config: &AppConfig) -> anyhow::Result<Arc<dyn PaymentGateway>> {
    if config.skip_externals {
        info!("⏭️  Payment gateway disabled (SKIP_EXTERNALS=true)");
        return Ok(Arc::new(DisabledGateway));
    }
    let gateway = RazorpayGateway::new(RazorpayConfig::from_gateway_config(&config.gateway))?;
    info!(
        provider = %config.gateway.provider,
        base_url = %config.gateway.base_url,
        "✅ Payment gateway client initialized"
    );
    Ok(Arc::new(gateway))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.logging);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "🚀 Starting payment engine"
    );

    let (ledger, tasks) = build_stores(&config).await?;
    let gateway = build_gateway(&config)?;
    let notifier: Arc<dyn Notifier> = Arc::new(LoggingNotifier::new());

    // Services
    let invoices = Arc::new(InvoiceDispatcher::new(ledger.clone(), notifier.clone()));
    let side_effects = Arc::new(SideEffectOrchestrator::new(
        Arc::new(LoggingCommerceHooks::default()),
        invoices.clone(),
        tasks.clone(),
        &config.retry_queue,
    ));
    let webhooks = Arc::new(WebhookProcessor::new(
        SignatureVerifier::new(config.gateway.webhook_secret.clone()),
        ledger.clone(),
        side_effects,
        gateway.provider().to_string(),
        config.gateway.auto_capture,
    ));
    let retry_queue = Arc::new(RetryQueueProcessor::new(
        tasks.clone(),
        invoices,
        &config.retry_queue,
    ));
    let reconciliation = Arc::new(ReconciliationService::new(
        ledger.clone(),
        gateway.clone(),
        &config.reconciliation,
    ));
    info!("✅ Services initialized");

    // Scheduled jobs
    let mut scheduler = JobScheduler::new().await?;
    scheduler.register(Arc::new(SubscriptionPaymentRetryJob::new(
        ledger.clone(),
        gateway.clone(),
        notifier.clone(),
        config.jobs.clone(),
    )));
    scheduler.register(Arc::new(OrderPaymentRetryJob::new(
        ledger.clone(),
        notifier.clone(),
        config.jobs.clone(),
    )));
    scheduler.register(Arc::new(PaymentReminderJob::new(
        ledger.clone(),
        notifier.clone(),
        config.jobs.clone(),
    )));
    scheduler.register(Arc::new(StalePaymentExpiryJob::new(
        ledger.clone(),
        config.jobs.clone(),
    )));
    scheduler.register(Arc::new(DailyReconciliationJob::new(
        reconciliation.clone(),
        &config.jobs,
        &config.reconciliation,
    )));
    let scheduler = Arc::new(scheduler);
    if config.jobs.enabled {
        scheduler.start().await?;
        info!("⏰ Scheduled payment jobs started");
    } else {
        info!("Scheduled payment jobs disabled (JOBS_ENABLED=false)");
    }

    // Retry queue worker
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let worker_handle = if config.retry_queue.enabled {
        let worker = RetryQueueWorker::new(retry_queue.clone(), config.retry_queue.poll_interval);
        Some(tokio::spawn(worker.run(worker_shutdown_rx)))
    } else {
        info!("Retry queue worker disabled (RETRY_QUEUE_ENABLED=false)");
        None
    };

    let health = Arc::new(HealthChecker::new(ledger.clone(), tasks.clone()));

    let app = api::router(AppState {
        webhooks,
        signature_header: Arc::from(config.gateway.signature_header.as_str()),
        reconciliation,
        scheduler: scheduler.clone(),
        retry_queue,
        health,
    })
    .layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
            .layer(axum::middleware::from_fn(request_logging_middleware))
            .layer(PropagateRequestIdLayer::x_request_id()),
    );
    info!("✅ Routes configured");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(
        address = %addr,
        "🚀 Server listening on http://{}",
        addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    if let Err(e) = scheduler.shutdown().await {
        warn!(error = %e, "Job scheduler did not stop cleanly");
    }
    if let Some(handle) = worker_handle {
        if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
            error!("Timed out waiting for retry queue worker shutdown");
        }
    }

    info!("👋 Server shutdown complete");

    Ok(())
}
