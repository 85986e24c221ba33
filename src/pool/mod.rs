//! Bounded worker pool for notification dispatch.
//!
//! A fixed number of workers drain a bounded job queue (capacity twice
//! the worker count). Submission awaits a free slot once the queue is
//! full, so slow deliveries throttle upstream producers instead of
//! growing memory without bound.
//!
//! Stopping closes the job channel; every worker observes the close
//! simultaneously, finishes the jobs already queued, then exits.
//! `stop()` returns only after all workers have joined, so every job
//! submitted before the call completes (successfully or not) before it
//! returns.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::email::{EmailError, EmailService};
use crate::metrics::{JOB_QUEUE_DEPTH, NOTIFICATIONS_FAILED_TOTAL, NOTIFICATIONS_SENT_TOTAL};
use crate::notification::{Channel, Notification, NotificationStatus};
use crate::store::{NotificationStore, StoreError, TemplateStore};
use crate::template::{TemplateEngine, TemplateEngineError};

/// Per-notification dispatch failures. All of these are terminal: the
/// notification is marked failed and nothing at this layer retries it.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("template '{0}' not found")]
    TemplateNotFound(String),

    #[error("recipient_email not found in metadata")]
    MissingRecipient,

    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    #[error(transparent)]
    Email(#[from] EmailError),

    #[error(transparent)]
    Template(#[from] TemplateEngineError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors surfaced by pool submission and maintenance operations.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker pool is stopped")]
    Closed,

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Everything a worker needs to dispatch one notification.
pub struct DispatchContext {
    pub notifications: Arc<dyn NotificationStore>,
    pub templates: Arc<dyn TemplateStore>,
    pub email: Arc<EmailService>,
    pub engine: Arc<TemplateEngine>,
}

/// Fixed-size pool of workers draining a bounded job queue.
pub struct WorkerPool {
    num_workers: usize,
    queue_capacity: usize,
    job_tx: Mutex<Option<mpsc::Sender<Notification>>>,
    job_rx: Arc<Mutex<mpsc::Receiver<Notification>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    ctx: Arc<DispatchContext>,
}

impl WorkerPool {
    /// Create a pool with `num_workers` workers and a job queue holding
    /// `2 * num_workers` notifications.
    pub fn new(num_workers: usize, ctx: DispatchContext) -> Self {
        let queue_capacity = num_workers * 2;
        let (job_tx, job_rx) = mpsc::channel(queue_capacity);
        Self {
            num_workers,
            queue_capacity,
            job_tx: Mutex::new(Some(job_tx)),
            job_rx: Arc::new(Mutex::new(job_rx)),
            workers: Mutex::new(Vec::new()),
            ctx: Arc::new(ctx),
        }
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Spawn the worker tasks.
    pub async fn start(&self) {
        let mut workers = self.workers.lock().await;
        for id in 0..self.num_workers {
            let queue = self.job_rx.clone();
            let ctx = self.ctx.clone();
            workers.push(tokio::spawn(async move {
                Self::worker_loop(id, queue, ctx).await;
            }));
        }
        tracing::info!(workers = self.num_workers, "Worker pool started");
    }

    /// Enqueue one notification for dispatch.
    ///
    /// Awaits a free queue slot when the queue is at capacity; this is
    /// the backpressure point for upstream producers.
    pub async fn submit_job(&self, notification: Notification) -> Result<(), PoolError> {
        let sender = { self.job_tx.lock().await.clone() };
        let Some(sender) = sender else {
            return Err(PoolError::Closed);
        };
        sender
            .send(notification)
            .await
            .map_err(|_| PoolError::Closed)?;
        JOB_QUEUE_DEPTH.set(self.queue_depth(&sender) as i64);
        Ok(())
    }

    /// Enqueue several notifications sequentially. Inherits the blocking
    /// behavior of [`WorkerPool::submit_job`] per element.
    pub async fn submit_batch(&self, notifications: Vec<Notification>) -> Result<(), PoolError> {
        for notification in notifications {
            self.submit_job(notification).await?;
        }
        Ok(())
    }

    /// Current number of queued jobs. A racy snapshot, suitable for
    /// monitoring only.
    pub async fn queue_size(&self) -> usize {
        match self.job_tx.lock().await.as_ref() {
            Some(sender) => self.queue_depth(sender),
            None => 0,
        }
    }

    fn queue_depth(&self, sender: &mpsc::Sender<Notification>) -> usize {
        self.queue_capacity - sender.capacity()
    }

    /// Re-enqueue pending notifications older than `older_than`.
    ///
    /// Compensates for the non-transactional create-then-submit sequence:
    /// a crash between the two steps leaves a pending row nothing would
    /// otherwise resend. Run once at startup.
    pub async fn resubmit_stale_pending(
        &self,
        older_than: chrono::Duration,
    ) -> Result<usize, PoolError> {
        let stale = self.ctx.notifications.stale_pending(older_than).await?;
        let count = stale.len();
        for notification in stale {
            self.submit_job(notification).await?;
        }
        if count > 0 {
            tracing::info!(count, "Re-enqueued stale pending notifications");
        }
        Ok(count)
    }

    /// Stop the pool: close the job queue, let the workers drain it, and
    /// wait for every worker to exit. Safe to call more than once.
    pub async fn stop(&self) {
        {
            let mut sender = self.job_tx.lock().await;
            if sender.take().is_none() {
                return;
            }
        }

        let handles: Vec<_> = { self.workers.lock().await.drain(..).collect() };
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Worker task panicked during shutdown");
            }
        }
        tracing::info!("Worker pool stopped");
    }

    async fn worker_loop(
        id: usize,
        queue: Arc<Mutex<mpsc::Receiver<Notification>>>,
        ctx: Arc<DispatchContext>,
    ) {
        loop {
            let job = {
                let mut receiver = queue.lock().await;
                receiver.recv().await
            };
            let Some(notification) = job else {
                // Channel closed and drained: the pool is stopping
                break;
            };
            Self::handle(&ctx, notification).await;
        }
        tracing::debug!(worker = id, "Worker stopped");
    }

    /// Dispatch one notification and record the outcome.
    async fn handle(ctx: &DispatchContext, notification: Notification) {
        let channel = notification.channel.clone();
        let status = match Self::process(ctx, &notification).await {
            Ok(()) => {
                NOTIFICATIONS_SENT_TOTAL
                    .with_label_values(&[channel.as_str()])
                    .inc();
                NotificationStatus::Sent
            }
            Err(e) => {
                NOTIFICATIONS_FAILED_TOTAL
                    .with_label_values(&[channel.as_str()])
                    .inc();
                tracing::warn!(
                    notification_id = %notification.id,
                    channel = %channel,
                    error = %e,
                    "Failed to process notification"
                );
                NotificationStatus::Failed
            }
        };

        // Best-effort, last-write-wins status write
        if let Err(e) = ctx.notifications.update_status(notification.id, status).await {
            tracing::warn!(
                notification_id = %notification.id,
                error = %e,
                "Failed to record notification status"
            );
        }
    }

    /// Route the notification to its channel's delivery logic.
    async fn process(
        ctx: &DispatchContext,
        notification: &Notification,
    ) -> Result<(), DispatchError> {
        match notification.channel.parse::<Channel>() {
            Ok(Channel::Email) => Self::send_email_notification(ctx, notification).await,
            Ok(Channel::InApp) => {
                // Already durably stored at creation; nothing to deliver
                Ok(())
            }
            Ok(Channel::Push) => {
                // TODO: integrate a push provider (FCM); log-only until then
                tracing::info!(
                    user_id = notification.user_id,
                    title = %notification.title,
                    "Push notification (stub)"
                );
                Ok(())
            }
            Err(e) => Err(DispatchError::UnknownChannel(e.0)),
        }
    }

    async fn send_email_notification(
        ctx: &DispatchContext,
        notification: &Notification,
    ) -> Result<(), DispatchError> {
        let template = ctx
            .templates
            .find_by_name(&notification.kind)
            .await?
            .ok_or_else(|| DispatchError::TemplateNotFound(notification.kind.clone()))?;

        let data = notification.render_context();
        let subject = ctx.email.render_template(&template.subject, &data)?;
        let body_html = if template.body_html.trim().is_empty() {
            // Heavy layouts can live on disk instead of in the record
            ctx.engine.render(&template.name, &data).await?
        } else {
            ctx.email.render_template(&template.body_html, &data)?
        };

        let recipient = notification
            .recipient_email()
            .ok_or(DispatchError::MissingRecipient)?
            .to_string();

        tracing::debug!(
            notification_id = %notification.id,
            recipient = %recipient,
            template = %template.name,
            "Sending email notification"
        );

        ctx.email
            .send_email(&recipient, &subject, "", &body_html)
            .await?;

        Ok(())
    }
}
