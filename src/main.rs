use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;

use courier_notification_service::config::Settings;
use courier_notification_service::consumer::{EventConsumer, EventProcessor};
use courier_notification_service::email::EmailService;
use courier_notification_service::pool::{DispatchContext, WorkerPool};
use courier_notification_service::store;
use courier_notification_service::tasks::QueueDepthTask;
use courier_notification_service::telemetry;
use courier_notification_service::template::TemplateEngine;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing
    telemetry::init(&settings.log);
    tracing::info!("Configuration loaded");

    // Record stores (postgres or memory, per configuration)
    let stores = store::create_stores(&settings.database).await?;

    // File-backed template engine
    let engine = Arc::new(TemplateEngine::new(settings.templates.dir.clone()));
    match engine.list_templates() {
        Ok(names) => tracing::info!(
            count = names.len(),
            dir = %settings.templates.dir,
            "File templates available"
        ),
        Err(e) => tracing::warn!(error = %e, "Failed to list template directory"),
    }

    // Email delivery over SMTP
    let email = Arc::new(EmailService::new(&settings.smtp)?);

    // Worker pool
    let pool = Arc::new(WorkerPool::new(
        settings.workers.count,
        DispatchContext {
            notifications: stores.notifications.clone(),
            templates: stores.templates.clone(),
            email,
            engine,
        },
    ));
    pool.start().await;

    // Re-enqueue notifications stranded between create and submit by a
    // previous crash
    let stale_after = chrono::Duration::seconds(settings.workers.stale_pending_seconds as i64);
    if let Err(e) = pool.resubmit_stale_pending(stale_after).await {
        tracing::warn!(error = %e, "Startup recovery scan failed");
    }

    // Event consumer feeding the pool
    let processor = Arc::new(EventProcessor::new(
        stores.notifications.clone(),
        stores.preferences.clone(),
        pool.clone(),
    ));
    let consumer = Arc::new(EventConsumer::new(settings.broker.clone()));
    let shutdown_signal = consumer.shutdown_signal();

    let consumer_clone = consumer.clone();
    let consumer_handle = tokio::spawn(async move {
        if let Err(e) = consumer_clone.start(processor).await {
            tracing::error!(error = %e, "Event consumer failed");
        }
    });

    // Queue depth sampling in background
    let depth_task = QueueDepthTask::new(
        pool.clone(),
        Duration::from_secs(60),
        shutdown_signal.subscribe(),
    );
    let depth_handle = tokio::spawn(depth_task.run());

    tracing::info!(workers = settings.workers.count, "Notification service started");

    // Wait for shutdown signal
    shutdown_signal_handler().await;
    tracing::info!("Initiating graceful shutdown");

    // Stop the consumer first so no new work arrives, then drain the pool
    let _ = shutdown_signal.send(());
    let _ = tokio::join!(consumer_handle, depth_handle);
    pool.stop().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal_handler() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
