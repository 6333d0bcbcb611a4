//! Message handler trait.
//!
//! [`ResultConsumer`](super::ResultConsumer) owns the subscribe and reconnect
//! loop; a handler owns what happens to one message. Errors returned by a
//! handler are logged by the consumer and never stop the loop.

use async_trait::async_trait;
use progression_core::{ChannelMessage, ProgressionError};

/// Processes one channel message.
///
/// # Example
///
/// ```rust,ignore
/// struct Printer;
///
/// #[async_trait]
/// impl MessageHandler for Printer {
///     async fn handle(&self, message: &ChannelMessage) -> Result<(), ProgressionError> {
///         println!("{} bytes on {}", message.payload.len(), message.channel);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one message.
    ///
    /// # Errors
    ///
    /// Any [`ProgressionError`]; the consumer logs it and moves on.
    async fn handle(&self, message: &ChannelMessage) -> Result<(), ProgressionError>;
}
