//! Background maintenance tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::metrics::JOB_QUEUE_DEPTH;
use crate::pool::WorkerPool;

/// Periodically samples the worker pool queue depth into the metrics
/// gauge and logs it for plain-log deployments.
pub struct QueueDepthTask {
    pool: Arc<WorkerPool>,
    interval: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl QueueDepthTask {
    pub fn new(pool: Arc<WorkerPool>, interval: Duration, shutdown: broadcast::Receiver<()>) -> Self {
        Self {
            pool,
            interval,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(self.interval);
        // Skip immediate first tick
        timer.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::debug!("Queue depth task received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    let depth = self.pool.queue_size().await;
                    JOB_QUEUE_DEPTH.set(depth as i64);
                    tracing::debug!(queue_depth = depth, "Worker pool queue depth");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::EmailService;
    use crate::pool::DispatchContext;
    use crate::store::Stores;
    use crate::template::TemplateEngine;

    #[tokio::test]
    async fn test_task_exits_on_shutdown() {
        let stores = Stores::in_memory();
        let email = Arc::new(EmailService::with_transport(
            Arc::new(NullTransport),
            "noreply@example.com".to_string(),
            Duration::from_secs(1),
        ));
        let pool = Arc::new(WorkerPool::new(
            1,
            DispatchContext {
                notifications: stores.notifications,
                templates: stores.templates,
                email,
                engine: Arc::new(TemplateEngine::new("templates/email")),
            },
        ));

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = QueueDepthTask::new(pool, Duration::from_millis(10), shutdown_rx);
        let handle = tokio::spawn(task.run());

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("task did not exit after shutdown")
            .unwrap();
    }

    struct NullTransport;

    #[async_trait::async_trait]
    impl crate::email::MailTransport for NullTransport {
        async fn deliver(
            &self,
            _email: &crate::email::OutgoingEmail,
        ) -> Result<(), crate::email::TransportError> {
            Ok(())
        }
    }
}
