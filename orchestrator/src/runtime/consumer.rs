//! Result-channel consumer with automatic reconnection.
//!
//! # Pattern: Subscribe-Process-Reconnect Loop
//!
//! ```text
//! loop {
//!     subscribe:
//!         loop {
//!             next message:
//!                 - hand it to the handler
//!                 - log errors (never stop)
//!                 - check shutdown signal
//!         }
//!         stream ended or subscribe failed:
//!             wait retry_delay, then subscribe again
//! }
//! ```
//!
//! Messages are processed one at a time, in arrival order. Messages published
//! while the consumer is between subscriptions are lost with Redis pub/sub.

use super::MessageHandler;
use futures::StreamExt;
use progression_core::{MessageChannel, MessageStream, ProgressionError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Long-lived consumer feeding channel messages to a [`MessageHandler`].
pub struct ResultConsumer {
    name: String,
    channels: Vec<String>,
    channel: Arc<dyn MessageChannel>,
    handler: Arc<dyn MessageHandler>,
    shutdown: broadcast::Receiver<()>,
    retry_delay: Duration,
}

/// Why [`ResultConsumer::process_stream`] returned.
enum StreamEnd {
    Shutdown,
    Closed,
}

impl ResultConsumer {
    /// Create a consumer with the default retry delay (5 seconds).
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        channels: Vec<String>,
        channel: Arc<dyn MessageChannel>,
        handler: Arc<dyn MessageHandler>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            name: name.into(),
            channels,
            channel,
            handler,
            shutdown,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Set the wait before re-subscribing.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Spawn the consumer as a background task.
    ///
    /// The task runs until the shutdown signal fires (or its sender is dropped).
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&mut self) {
        info!(consumer = %self.name, channels = ?self.channels, "Result consumer started");

        loop {
            let channels: Vec<&str> = self.channels.iter().map(String::as_str).collect();

            let subscribed = tokio::select! {
                _ = self.shutdown.recv() => break,
                subscribed = self.channel.subscribe(&channels) => subscribed,
            };

            match subscribed {
                Ok(mut stream) => {
                    info!(consumer = %self.name, channels = ?self.channels, "Subscribed to result channel");
                    if matches!(self.process_stream(&mut stream).await, StreamEnd::Shutdown) {
                        break;
                    }
                    warn!(
                        consumer = %self.name,
                        retry_delay = ?self.retry_delay,
                        "Result stream ended, reconnecting"
                    );
                }
                Err(e) => {
                    error!(
                        consumer = %self.name,
                        error = %e,
                        retry_delay = ?self.retry_delay,
                        "Failed to subscribe to result channel"
                    );
                }
            }
            metrics::counter!("progression.consumer.reconnects").increment(1);

            tokio::select! {
                _ = self.shutdown.recv() => break,
                () = tokio::time::sleep(self.retry_delay) => {}
            }
        }

        info!(consumer = %self.name, "Result consumer stopped");
    }

    async fn process_stream(&mut self, stream: &mut MessageStream) -> StreamEnd {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Result consumer received shutdown signal");
                    return StreamEnd::Shutdown;
                }
                next = stream.next() => match next {
                    Some(Ok(message)) => {
                        let outcome = match self.handler.handle(&message).await {
                            Ok(()) => "processed",
                            Err(e) => self.log_dropped(&message.channel, &e),
                        };
                        metrics::counter!("progression.consumer.messages", "outcome" => outcome)
                            .increment(1);
                    }
                    Some(Err(e)) => {
                        error!(consumer = %self.name, error = %e, "Error receiving message");
                    }
                    None => return StreamEnd::Closed,
                }
            }
        }
    }

    /// Log a message the handler could not apply; returns the metric label.
    fn log_dropped(&self, channel: &str, error: &ProgressionError) -> &'static str {
        match error {
            ProgressionError::Decode(reason) => {
                warn!(consumer = %self.name, channel, %reason, "Dropping malformed message");
                "malformed"
            }
            ProgressionError::NotFound { user_id, stage_id } => {
                warn!(
                    consumer = %self.name,
                    channel,
                    %user_id,
                    %stage_id,
                    "Dropping result for unknown user and stage"
                );
                "unknown"
            }
            ProgressionError::InvalidState { .. } => {
                warn!(consumer = %self.name, channel, %error, "Dropping result");
                "rejected"
            }
            ProgressionError::TransientInfra(_) => {
                error!(consumer = %self.name, channel, %error, "Abandoning result after infrastructure failure");
                "abandoned"
            }
        }
    }
}

impl std::fmt::Debug for ResultConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultConsumer")
            .field("name", &self.name)
            .field("channels", &self.channels)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;
    use async_trait::async_trait;
    use progression_core::{ChannelMessage, RESULT_CHANNEL};
    use progression_testing::InMemoryChannel;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle(&self, message: &ChannelMessage) -> Result<(), ProgressionError> {
            self.seen.lock().unwrap().push(message.payload.clone());
            if message.payload == b"bad" {
                Err(ProgressionError::Decode("bad".into()))
            } else {
                Ok(())
            }
        }
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn keeps_processing_after_handler_errors() {
        let channel = Arc::new(InMemoryChannel::new());
        let recorder = Arc::new(Recorder::default());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = ResultConsumer::new(
            "test",
            vec![RESULT_CHANNEL.to_string()],
            channel.clone(),
            recorder.clone(),
            shutdown_rx,
        )
        .spawn();

        wait_for(|| channel.subscriber_count(RESULT_CHANNEL) == 1).await;
        channel.publish(RESULT_CHANNEL, b"bad").await.unwrap();
        channel.publish(RESULT_CHANNEL, b"good").await.unwrap();
        wait_for(|| recorder.seen.lock().unwrap().len() == 2).await;

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
        assert_eq!(*recorder.seen.lock().unwrap(), vec![b"bad".to_vec(), b"good".to_vec()]);
    }

    #[tokio::test]
    async fn resubscribes_after_stream_ends() {
        let channel = Arc::new(InMemoryChannel::new());
        let recorder = Arc::new(Recorder::default());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = ResultConsumer::new(
            "test",
            vec![RESULT_CHANNEL.to_string()],
            channel.clone(),
            recorder.clone(),
            shutdown_rx,
        )
        .with_retry_delay(Duration::from_millis(10))
        .spawn();

        wait_for(|| channel.subscriber_count(RESULT_CHANNEL) == 1).await;
        channel.disconnect_all();
        wait_for(|| channel.subscriber_count(RESULT_CHANNEL) == 1).await;

        channel.publish(RESULT_CHANNEL, b"after").await.unwrap();
        wait_for(|| recorder.seen.lock().unwrap().len() == 1).await;

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn retries_failed_subscriptions_until_shutdown() {
        let channel = Arc::new(InMemoryChannel::new());
        channel.fail_subscribes(true);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = ResultConsumer::new(
            "test",
            vec![RESULT_CHANNEL.to_string()],
            channel.clone(),
            Arc::new(Recorder::default()),
            shutdown_rx,
        )
        .with_retry_delay(Duration::from_millis(10))
        .spawn();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!handle.is_finished());

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
