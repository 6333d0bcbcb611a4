//! In-memory publish/subscribe channel.
//!
//! Mirrors broker semantics closely enough for the orchestrator's tests:
//! delivery is at-most-once (a publish with no live subscriber is lost) and
//! every publish is also recorded so tests can assert on what was sent.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on lock poisoning

use futures::stream;
use progression_core::{ChannelError, ChannelMessage, MessageChannel, MessageStream};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

/// In-memory channel backed by one `tokio::sync::broadcast` per name.
///
/// Clones share the same channels.
#[derive(Clone, Debug, Default)]
pub struct InMemoryChannel {
    senders: Arc<Mutex<HashMap<String, broadcast::Sender<ChannelMessage>>>>,
    published: Arc<Mutex<Vec<ChannelMessage>>>,
    fail_publish: Arc<AtomicBool>,
    fail_subscribe: Arc<AtomicBool>,
}

impl InMemoryChannel {
    /// Create a channel with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every publish fail until reset.
    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Make every subscribe fail until reset.
    pub fn fail_subscribes(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Every successful publish on `channel`, in order.
    #[must_use]
    pub fn published(&self, channel: &str) -> Vec<Vec<u8>> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|message| message.channel == channel)
            .map(|message| message.payload.clone())
            .collect()
    }

    /// Number of live subscribers on `channel`.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.senders
            .lock()
            .unwrap()
            .get(channel)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Drop every sender, ending all open subscription streams.
    ///
    /// Simulates a broker disconnect.
    pub fn disconnect_all(&self) {
        self.senders.lock().unwrap().clear();
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<ChannelMessage> {
        self.senders
            .lock()
            .unwrap()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl MessageChannel for InMemoryChannel {
    fn publish(
        &self,
        channel: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send + '_>> {
        let message = ChannelMessage::new(channel, payload);
        Box::pin(async move {
            if self.fail_publish.load(Ordering::SeqCst) {
                return Err(ChannelError::PublishFailed {
                    channel: message.channel,
                    reason: "injected failure".to_string(),
                });
            }
            self.published.lock().unwrap().push(message.clone());
            // No subscribers means the message is lost.
            let _ = self.sender(&message.channel).send(message);
            Ok(())
        })
    }

    fn subscribe(
        &self,
        channels: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, ChannelError>> + Send + '_>> {
        let channels: Vec<String> = channels.iter().map(|c| (*c).to_string()).collect();
        Box::pin(async move {
            if self.fail_subscribe.load(Ordering::SeqCst) {
                return Err(ChannelError::SubscriptionFailed {
                    channels,
                    reason: "injected failure".to_string(),
                });
            }

            let streams: Vec<MessageStream> = channels
                .iter()
                .map(|channel| {
                    let mut receiver = self.sender(channel).subscribe();
                    let stream: MessageStream = Box::pin(async_stream::stream! {
                        loop {
                            match receiver.recv().await {
                                Ok(message) => yield Ok(message),
                                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                    yield Err(ChannelError::TransportError(format!(
                                        "subscriber lagged, {skipped} messages lost"
                                    )));
                                }
                                Err(broadcast::error::RecvError::Closed) => break,
                            }
                        }
                    });
                    stream
                })
                .collect();

            let merged: MessageStream = Box::pin(stream::select_all(streams));
            Ok(merged)
        })
    }
}
