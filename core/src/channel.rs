//! Publish/subscribe transport between the orchestrator and the simulation
//! worker.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  simulation_requests   ┌──────────────┐
//! │  Dispatcher  │ ─────────────────────► │    Worker    │
//! └──────────────┘                        │  (external)  │
//! ┌──────────────┐  simulation_responses  │              │
//! │  Reconciler  │ ◄───────────────────── │              │
//! └──────────────┘                        └──────────────┘
//! ```
//!
//! # Delivery
//!
//! - **At-most-once**: a message published while nobody listens is lost
//! - **Unordered**: verdicts for different attempts may arrive in any order
//! - **No acknowledgment**: the publisher never learns whether work happened
//!
//! Consumers must therefore tolerate duplicates, stale messages and gaps.
//!
//! # Implementations
//!
//! - `InMemoryChannel` in `progression-testing` - for tests
//! - `RedisChannel` in `progression-redis` - Redis pub/sub
//! - `RedpandaChannel` in `progression-redpanda` - Kafka-compatible
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use progression_core::channel::MessageChannel;
//!
//! async fn example(channel: impl MessageChannel) -> Result<(), ChannelError> {
//!     channel.publish("simulation_requests", br#"{"user_id":1}"#).await?;
//!
//!     let mut stream = channel.subscribe(&["simulation_responses"]).await?;
//!     while let Some(message) = stream.next().await {
//!         match message {
//!             Ok(message) => println!("{} bytes on {}", message.payload.len(), message.channel),
//!             Err(e) => eprintln!("Channel error: {e}"),
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during channel operations.
#[derive(Error, Debug, Clone)]
pub enum ChannelError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message
    #[error("Publish failed for channel '{channel}': {reason}")]
    PublishFailed {
        /// The channel that failed
        channel: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe
    #[error("Subscription failed for channels {channels:?}: {reason}")]
    SubscriptionFailed {
        /// The channels that failed to subscribe
        channels: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Network or transport error while streaming
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// One message received from a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    /// Channel (or topic) the message arrived on
    pub channel: String,
    /// Raw payload bytes
    pub payload: Vec<u8>,
}

impl ChannelMessage {
    /// Create a message.
    #[must_use]
    pub fn new(channel: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Stream of messages from a subscription.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<ChannelMessage, ChannelError>> + Send>>;

/// Trait for channel implementations.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so that the service can hold
/// an `Arc<dyn MessageChannel>` chosen at startup.
pub trait MessageChannel: Send + Sync {
    /// Publish raw bytes to a channel.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::PublishFailed`] if the broker rejects the
    /// message or is unreachable.
    fn publish(
        &self,
        channel: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send + '_>>;

    /// Subscribe to one or more channels.
    ///
    /// The stream ends when the underlying connection closes; callers that need
    /// a long-lived subscription re-subscribe.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::SubscriptionFailed`] if subscription fails.
    fn subscribe(
        &self,
        channels: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, ChannelError>> + Send + '_>>;
}
