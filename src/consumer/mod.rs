//! Event stream consumer.
//!
//! Bridges the broker's event stream into the notification pipeline
//! using a Redis Streams consumer group: entries are read with
//! `XREADGROUP`, acknowledged with `XACK` only after processing, and
//! retried by re-appending the raw body with a `retry` counter carried
//! on the stream entry itself. Entries that exhaust their delivery
//! budget are appended to a dead-letter stream instead of being
//! dropped. The counter lives on the entry, not inside the event body,
//! so undecodable bodies are capped the same way handler failures are.
//!
//! Stream entry fields:
//! - `body` - the event as JSON (see [`crate::notification::Event`])
//! - `retry` - delivery attempts consumed so far

mod backoff;
mod processor;

use std::sync::Arc;

use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::config::BrokerConfig;
use crate::metrics::{EVENTS_CONSUMED_TOTAL, EVENTS_DEAD_LETTERED_TOTAL, EVENTS_REQUEUED_TOTAL};
use crate::notification::Event;

pub use backoff::{BackoffConfig, ReconnectBackoff};
pub use processor::{EventProcessor, ProcessError};

/// Consumer errors. These cover broker connectivity and encoding only;
/// per-event processing failures are handled inside the consume loop and
/// never surface here.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("failed to encode event: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for consumer operations
pub type ConsumerResult<T> = Result<T, ConsumerError>;

/// One entry read from the stream, before decoding.
struct StreamEntry {
    id: String,
    body: Option<String>,
    retry: u32,
}

/// Consumes events from the broker stream and feeds the pipeline.
pub struct EventConsumer {
    config: BrokerConfig,
    shutdown: broadcast::Sender<()>,
}

impl EventConsumer {
    pub fn new(config: BrokerConfig) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self { config, shutdown }
    }

    /// Get a shutdown signal sender.
    pub fn shutdown_signal(&self) -> broadcast::Sender<()> {
        self.shutdown.clone()
    }

    /// Stop the consume loop. Safe to call at any time, including before
    /// a connection exists.
    pub fn close(&self) {
        let _ = self.shutdown.send(());
    }

    /// Run the consumer until shutdown, reconnecting with backoff on
    /// broker failures.
    pub async fn start(&self, processor: Arc<EventProcessor>) -> ConsumerResult<()> {
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut backoff = ReconnectBackoff::new();

        loop {
            match self.run_consume_loop(&processor).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Event stream connection lost, reconnecting"
                    );
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            tracing::info!("Consumer received shutdown signal during reconnect");
                            return Ok(());
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Connect, declare the consumer group, recover unacknowledged
    /// entries from a previous run, then block-read new entries until
    /// shutdown. Returns `Err` on broker failures so the outer loop can
    /// reconnect.
    async fn run_consume_loop(&self, processor: &Arc<EventProcessor>) -> ConsumerResult<()> {
        let client = redis::Client::open(self.config.url.as_str())?;
        let mut connection = ConnectionManager::new(client).await?;

        self.ensure_group(&mut connection).await?;

        tracing::info!(
            stream = %self.config.stream,
            group = %self.config.group,
            consumer = %self.config.consumer_name,
            "Listening for events"
        );

        // Entries delivered to this consumer but never acknowledged
        // (crash, dropped read) are replayed before new ones
        self.drain_pending(&mut connection, processor).await?;

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Consumer received shutdown signal");
                    return Ok(());
                }
                batch = self.read_batch(&mut connection, ">", true) => {
                    let entries = batch?;
                    for entry in entries {
                        self.process_entry(&mut connection, processor, entry).await?;
                    }
                }
            }
        }
    }

    /// Declare the durable stream and consumer group. Re-declaration of
    /// an existing group is not an error.
    async fn ensure_group(&self, connection: &mut ConnectionManager) -> ConsumerResult<()> {
        let result: redis::RedisResult<String> = connection
            .xgroup_create_mkstream(&self.config.stream, &self.config.group, "$")
            .await;

        match result {
            Ok(_) => {
                tracing::info!(
                    stream = %self.config.stream,
                    group = %self.config.group,
                    "Consumer group created"
                );
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => {
                tracing::debug!(group = %self.config.group, "Consumer group already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Replay this consumer's pending entry list.
    async fn drain_pending(
        &self,
        connection: &mut ConnectionManager,
        processor: &Arc<EventProcessor>,
    ) -> ConsumerResult<()> {
        loop {
            let entries = self.read_batch(connection, "0", false).await?;
            if entries.is_empty() {
                return Ok(());
            }
            tracing::info!(count = entries.len(), "Recovering unacknowledged entries");
            for entry in entries {
                self.process_entry(connection, processor, entry).await?;
            }
        }
    }

    async fn read_batch(
        &self,
        connection: &mut ConnectionManager,
        cursor: &str,
        block: bool,
    ) -> ConsumerResult<Vec<StreamEntry>> {
        let mut options = StreamReadOptions::default()
            .group(&self.config.group, &self.config.consumer_name)
            .count(self.config.batch_size);
        if block {
            options = options.block(self.config.block_ms as usize);
        }

        let reply: StreamReadReply = connection
            .xread_options(&[&self.config.stream], &[cursor], &options)
            .await?;

        let mut entries = Vec::new();
        for key in reply.keys {
            for id in key.ids {
                entries.push(StreamEntry {
                    retry: id.get("retry").unwrap_or(0),
                    body: id.get("body"),
                    id: id.id,
                });
            }
        }
        Ok(entries)
    }

    /// Handle one stream entry: decode, process, acknowledge. Decode and
    /// handler failures are retried through the capped requeue policy;
    /// only broker failures propagate.
    async fn process_entry(
        &self,
        connection: &mut ConnectionManager,
        processor: &Arc<EventProcessor>,
        entry: StreamEntry,
    ) -> ConsumerResult<()> {
        EVENTS_CONSUMED_TOTAL.inc();

        let Some(body) = entry.body.clone() else {
            tracing::warn!(entry_id = %entry.id, "Stream entry has no body field");
            return self.retry_or_dead_letter(connection, &entry, "missing body").await;
        };

        match serde_json::from_str::<Event>(&body) {
            Err(e) => {
                tracing::warn!(
                    entry_id = %entry.id,
                    error = %e,
                    "Failed to decode event body"
                );
                self.retry_or_dead_letter(connection, &entry, "decode failure")
                    .await
            }
            Ok(mut event) => {
                // The stream entry carries the authoritative attempt count
                event.retry = entry.retry;
                tracing::debug!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    user_id = event.user_id,
                    retry = event.retry,
                    "Received event"
                );

                match processor.handle(&event).await {
                    Ok(()) => self.ack(connection, &entry.id).await,
                    Err(e) => {
                        tracing::warn!(
                            event_id = %event.id,
                            error = %e,
                            "Failed to process event, retrying"
                        );
                        self.retry_or_dead_letter(connection, &entry, "handler failure")
                            .await
                    }
                }
            }
        }
    }

    /// Re-append the raw entry with an incremented retry counter, or
    /// move it to the dead-letter stream once the budget is exhausted.
    /// The consumed entry is acknowledged either way.
    async fn retry_or_dead_letter(
        &self,
        connection: &mut ConnectionManager,
        entry: &StreamEntry,
        reason: &str,
    ) -> ConsumerResult<()> {
        let attempt = entry.retry + 1;
        let body = entry.body.as_deref().unwrap_or("");
        let retry_field = attempt.to_string();

        if attempt >= self.config.max_deliveries {
            EVENTS_DEAD_LETTERED_TOTAL.inc();
            tracing::warn!(
                entry_id = %entry.id,
                attempts = attempt,
                reason = %reason,
                dead_letter_stream = %self.config.dead_letter_stream,
                "Delivery budget exhausted, dead-lettering event"
            );
            let _: String = connection
                .xadd(
                    &self.config.dead_letter_stream,
                    "*",
                    &[
                        ("body", body),
                        ("retry", retry_field.as_str()),
                        ("reason", reason),
                    ],
                )
                .await?;
        } else {
            EVENTS_REQUEUED_TOTAL.inc();
            let _: String = connection
                .xadd(
                    &self.config.stream,
                    "*",
                    &[("body", body), ("retry", retry_field.as_str())],
                )
                .await?;
        }

        self.ack(connection, &entry.id).await
    }

    async fn ack(&self, connection: &mut ConnectionManager, entry_id: &str) -> ConsumerResult<()> {
        let _: i64 = connection
            .xack(&self.config.stream, &self.config.group, &[entry_id])
            .await?;
        Ok(())
    }

    /// Publish an event to the consumer's own stream. Bootstrap and test
    /// path, not part of the steady-state pipeline.
    pub async fn publish_event(&self, event: &Event) -> ConsumerResult<String> {
        let body = serde_json::to_string(event)?;

        let client = redis::Client::open(self.config.url.as_str())?;
        let mut connection = client.get_multiplexed_async_connection().await?;
        let entry_id: String = connection
            .xadd(
                &self.config.stream,
                "*",
                &[("body", body.as_str()), ("retry", "0")],
            )
            .await?;

        tracing::debug!(entry_id = %entry_id, event_id = %event.id, "Event published");
        Ok(entry_id)
    }
}
