//! Redpanda (Kafka-compatible) message channel for the progression orchestrator.
//!
//! An alternative to Redis pub/sub for deployments whose simulation workers
//! sit on a Kafka-compatible broker. Channel names map one-to-one onto topics
//! and payloads are the raw JSON bytes produced by the dispatcher and worker.
//!
//! # Delivery Semantics
//!
//! Stronger than the orchestrator needs, which is harmless:
//! - Offsets are committed only after a message was handed to the subscriber
//! - A crash before the commit redelivers the message, and the reconciler
//!   treats the redelivery as a duplicate
//! - New consumer groups start at `latest` by default, so verdicts published
//!   while no orchestrator was running are skipped, as with Redis
//!
//! # Example
//!
//! ```no_run
//! use progression_redpanda::RedpandaChannel;
//! use progression_core::MessageChannel;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let channel = RedpandaChannel::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("progression-orchestrator")
//!     .build()?;
//!
//! channel.publish("simulation_requests", br#"{"user_id":1}"#).await?;
//!
//! let mut stream = channel.subscribe(&["simulation_responses"]).await?;
//! while let Some(result) = stream.next().await {
//!     match result {
//!         Ok(message) => println!("{} bytes on {}", message.payload.len(), message.channel),
//!         Err(e) => eprintln!("Error: {e}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use progression_core::{ChannelError, ChannelMessage, MessageChannel, MessageStream};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

const DEFAULT_BUFFER_SIZE: usize = 1000;
const DEFAULT_OFFSET_RESET: &str = "latest";

/// Redpanda implementation of [`MessageChannel`].
///
/// # Example
///
/// ```no_run
/// use progression_redpanda::RedpandaChannel;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let channel = RedpandaChannel::new("localhost:9092")?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaChannel {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    consumer_group: Option<String>,
    buffer_size: usize,
    auto_offset_reset: String,
}

impl RedpandaChannel {
    /// Create a channel with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, ChannelError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the channel.
    #[must_use]
    pub fn builder() -> RedpandaChannelBuilder {
        RedpandaChannelBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

impl std::fmt::Debug for RedpandaChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedpandaChannel")
            .field("brokers", &self.brokers)
            .field("consumer_group", &self.consumer_group)
            .finish_non_exhaustive()
    }
}

/// Builder for configuring a [`RedpandaChannel`].
#[derive(Default, Debug)]
pub struct RedpandaChannelBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaChannelBuilder {
    /// Comma-separated broker addresses (e.g., "localhost:9092").
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Producer acknowledgment mode: "0", "1" or "all". Default: "1".
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Producer send timeout. Default: 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Consumer group for subscriptions.
    ///
    /// Orchestrator replicas sharing a group split the result topic between
    /// them. If not set, the group is derived from the subscribed topics.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Messages buffered between the Kafka consumer and the subscriber.
    /// Zero is treated as one. Default: 1000.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size.max(1));
        self
    }

    /// Where new consumer groups start reading: "earliest" or "latest".
    /// Default: "latest".
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaChannel`].
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ConnectionFailed`] if brokers are not set or
    /// the producer cannot be created.
    pub fn build(self) -> Result<RedpandaChannel, ChannelError> {
        let brokers = self
            .brokers
            .ok_or_else(|| ChannelError::ConnectionFailed("Brokers not configured".to_string()))?;
        let acks = self.producer_acks.as_deref().unwrap_or("1");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", acks)
            .create()
            .map_err(|e| {
                ChannelError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;

        let buffer_size = self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE);
        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| DEFAULT_OFFSET_RESET.to_string());

        tracing::info!(
            brokers = %brokers,
            acks,
            buffer_size,
            auto_offset_reset = %auto_offset_reset,
            "RedpandaChannel created"
        );

        Ok(RedpandaChannel {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            consumer_group: self.consumer_group,
            buffer_size,
            auto_offset_reset,
        })
    }
}

impl MessageChannel for RedpandaChannel {
    fn publish(
        &self,
        channel: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send + '_>> {
        let topic = channel.to_string();
        let payload = payload.to_vec();
        let timeout = self.timeout;

        Box::pin(async move {
            let record: FutureRecord<'_, (), _> = FutureRecord::to(&topic).payload(&payload);

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        channel = %topic,
                        partition,
                        offset,
                        "Message published"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(
                        channel = %topic,
                        error = %kafka_error,
                        "Failed to publish message"
                    );
                    Err(ChannelError::PublishFailed {
                        channel: topic,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe(
        &self,
        channels: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, ChannelError>> + Send + '_>> {
        let topics: Vec<String> = channels.iter().map(|s| (*s).to_string()).collect();
        let brokers = self.brokers.clone();
        let consumer_group = self.consumer_group.clone();
        let buffer_size = self.buffer_size;
        let auto_offset_reset = self.auto_offset_reset.clone();

        Box::pin(async move {
            let consumer_group_id = consumer_group.unwrap_or_else(|| {
                let mut sorted = topics.clone();
                sorted.sort();
                format!("progression-{}", sorted.join("-"))
            });

            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &consumer_group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| ChannelError::SubscriptionFailed {
                    channels: topics.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| ChannelError::SubscriptionFailed {
                    channels: topics.clone(),
                    reason: format!("Failed to subscribe to topics: {e}"),
                })?;

            tracing::info!(
                channels = ?topics,
                consumer_group = %consumer_group_id,
                buffer_size,
                "Subscribed to Redpanda topics"
            );

            let (tx, rx) = tokio::sync::mpsc::channel(buffer_size);

            // The task owns the consumer; it stops when the subscriber drops the stream.
            tokio::spawn(async move {
                use futures::StreamExt;
                use rdkafka::consumer::CommitMode;

                let mut stream = consumer.stream();

                while let Some(received) = stream.next().await {
                    let message = match received {
                        Ok(message) => message,
                        Err(e) => {
                            let err = ChannelError::TransportError(format!(
                                "Failed to receive message: {e}"
                            ));
                            if tx.send(Err(err)).await.is_err() {
                                break;
                            }
                            continue;
                        }
                    };

                    // Empty payloads are forwarded as empty messages; the
                    // reconciler rejects them at decode time.
                    let forwarded = ChannelMessage::new(
                        message.topic(),
                        message.payload().unwrap_or_default(),
                    );

                    tracing::trace!(
                        channel = message.topic(),
                        partition = message.partition(),
                        offset = message.offset(),
                        "Received message"
                    );

                    if tx.send(Ok(forwarded)).await.is_err() {
                        tracing::debug!("Subscriber dropped, exiting consumer task");
                        break;
                    }

                    if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                        tracing::warn!(
                            channel = message.topic(),
                            partition = message.partition(),
                            offset = message.offset(),
                            error = %e,
                            "Failed to commit offset (message may be redelivered)"
                        );
                    }
                }

                tracing::debug!("Consumer task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as MessageStream)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redpanda_channel_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaChannel>();
        assert_sync::<RedpandaChannel>();
    }

    #[test]
    fn build_without_brokers_fails() {
        let result = RedpandaChannel::builder().build();
        assert!(matches!(result, Err(ChannelError::ConnectionFailed(_))));
    }

    #[test]
    fn zero_buffer_size_is_clamped() {
        let builder = RedpandaChannel::builder().buffer_size(0);
        assert_eq!(builder.buffer_size, Some(1));
    }
}
