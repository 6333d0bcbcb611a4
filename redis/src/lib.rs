//! Redis pub/sub message channel for the progression orchestrator.
//!
//! Redis pub/sub is the simulation worker's native transport. It matches the
//! delivery model the orchestrator is built for:
//!
//! - **At-most-once**: messages published while no subscriber is connected are lost
//! - **No acknowledgment**: `PUBLISH` only reports how many subscribers received it
//! - **Connection-scoped subscriptions**: a dropped connection ends the stream,
//!   and the caller re-subscribes
//!
//! Publishing goes through a shared [`ConnectionManager`], which reconnects on
//! its own. Every [`subscribe`](MessageChannel::subscribe) opens a dedicated
//! pub/sub connection.
//!
//! # Example
//!
//! ```no_run
//! use progression_redis::RedisChannel;
//! use progression_core::MessageChannel;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let channel = RedisChannel::new("redis://127.0.0.1:6379").await?;
//!
//! channel.publish("simulation_requests", br#"{"user_id":1}"#).await?;
//!
//! let mut stream = channel.subscribe(&["simulation_responses"]).await?;
//! while let Some(message) = stream.next().await {
//!     let message = message?;
//!     println!("{} bytes on {}", message.payload.len(), message.channel);
//! }
//! # Ok(())
//! # }
//! ```

use futures::StreamExt;
use progression_core::{ChannelError, ChannelMessage, MessageChannel, MessageStream};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::future::Future;
use std::pin::Pin;

/// Redis pub/sub implementation of [`MessageChannel`].
#[derive(Clone)]
pub struct RedisChannel {
    client: Client,
    conn_manager: ConnectionManager,
}

impl RedisChannel {
    /// Connect to Redis.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - `Redis` connection URL (e.g., "<redis://127.0.0.1:6379>")
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ConnectionFailed`] if the client cannot be
    /// created or the first connection fails.
    pub async fn new(redis_url: &str) -> Result<Self, ChannelError> {
        let client = Client::open(redis_url).map_err(|e| {
            ChannelError::ConnectionFailed(format!("Failed to create Redis client: {e}"))
        })?;

        let conn_manager = ConnectionManager::new(client.clone()).await.map_err(|e| {
            ChannelError::ConnectionFailed(format!(
                "Failed to create Redis connection manager: {e}"
            ))
        })?;

        tracing::info!("Connected to Redis");
        Ok(Self {
            client,
            conn_manager,
        })
    }

    /// Round-trip a `PING` for readiness checks.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::TransportError`] if Redis does not answer.
    pub async fn ping(&self) -> Result<(), ChannelError> {
        let mut conn = self.conn_manager.clone();
        let _pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| ChannelError::TransportError(e.to_string()))?;
        Ok(())
    }
}

impl std::fmt::Debug for RedisChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisChannel").finish_non_exhaustive()
    }
}

impl MessageChannel for RedisChannel {
    fn publish(
        &self,
        channel: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send + '_>> {
        let channel = channel.to_string();
        let payload = payload.to_vec();

        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let receivers: i64 = conn.publish(&channel, payload).await.map_err(|e| {
                tracing::error!(channel = %channel, error = %e, "Failed to publish message");
                metrics::counter!("progression.channel.publish_failed", "channel" => channel.clone())
                    .increment(1);
                ChannelError::PublishFailed {
                    channel: channel.clone(),
                    reason: e.to_string(),
                }
            })?;

            if receivers == 0 {
                // Nobody listening: the message is gone.
                tracing::warn!(channel = %channel, "Published message had no subscribers");
            } else {
                tracing::debug!(channel = %channel, receivers, "Message published");
            }
            metrics::counter!("progression.channel.published", "channel" => channel).increment(1);
            Ok(())
        })
    }

    fn subscribe(
        &self,
        channels: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, ChannelError>> + Send + '_>> {
        let channels: Vec<String> = channels.iter().map(|c| (*c).to_string()).collect();

        Box::pin(async move {
            let subscription_failed = |reason: String| ChannelError::SubscriptionFailed {
                channels: channels.clone(),
                reason,
            };

            let mut pubsub = self
                .client
                .get_async_pubsub()
                .await
                .map_err(|e| subscription_failed(e.to_string()))?;

            for channel in &channels {
                pubsub
                    .subscribe(channel)
                    .await
                    .map_err(|e| subscription_failed(e.to_string()))?;
            }

            tracing::info!(channels = ?channels, "Subscribed to Redis channels");

            let stream = async_stream::stream! {
                let mut messages = Box::pin(pubsub.into_on_message());
                while let Some(msg) = messages.next().await {
                    yield Ok::<_, ChannelError>(ChannelMessage::new(
                        msg.get_channel_name(),
                        msg.get_payload_bytes(),
                    ));
                }
                tracing::warn!("Redis subscription stream ended");
            };

            let stream: MessageStream = Box::pin(stream);
            Ok(stream)
        })
    }
}
