//! Redis pub/sub transport for read model change notifications.
//!
//! Redis pub/sub is not durable: subscribers that are offline miss messages.
//! That matches the notification contract, since a subscriber recovers by
//! re-reading the read model.

use std::sync::mpsc;
use std::thread;

use redis::Commands;
use thiserror::Error;
use tracing::{debug, warn};

use projector_events::{MessageBus, ReadModelUpdatedMessage, Subscription};

#[derive(Debug, Error)]
pub enum RedisBusError {
    #[error("redis: {0}")]
    Redis(String),

    #[error("notification serialization failed: {0}")]
    Serialize(String),
}

/// Publishes JSON-encoded [`ReadModelUpdatedMessage`]s on one Redis channel.
#[derive(Debug, Clone)]
pub struct RedisPubSubBus {
    client: redis::Client,
    channel: String,
}

impl RedisPubSubBus {
    pub fn new(redis_url: impl AsRef<str>, channel: impl Into<String>) -> Result<Self, RedisBusError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(|e| RedisBusError::Redis(e.to_string()))?;
        Ok(Self {
            client,
            channel: channel.into(),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl MessageBus<ReadModelUpdatedMessage> for RedisPubSubBus {
    type Error = RedisBusError;

    fn publish(&self, message: ReadModelUpdatedMessage) -> Result<(), Self::Error> {
        let payload = serde_json::to_string(&message).map_err(|e| RedisBusError::Serialize(e.to_string()))?;

        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| RedisBusError::Redis(e.to_string()))?;

        let receivers: i64 = conn
            .publish(&self.channel, payload)
            .map_err(|e| RedisBusError::Redis(e.to_string()))?;

        debug!(channel = %self.channel, model_type = %message.model_type, receivers, "notification published");
        Ok(())
    }

    fn subscribe(&self) -> Subscription<ReadModelUpdatedMessage> {
        let (tx, rx) = mpsc::channel();

        let client = self.client.clone();
        let channel = self.channel.clone();

        // Forwards channel messages until the subscription is dropped.
        let spawned = thread::Builder::new()
            .name(format!("redis-sub-{channel}"))
            .spawn(move || {
                let mut conn = match client.get_connection() {
                    Ok(c) => c,
                    Err(err) => {
                        warn!(channel = %channel, error = %err, "redis subscription could not connect");
                        return;
                    }
                };

                let mut pubsub = conn.as_pubsub();
                if let Err(err) = pubsub.subscribe(&channel) {
                    warn!(channel = %channel, error = %err, "redis subscribe failed");
                    return;
                }

                loop {
                    let msg = match pubsub.get_message() {
                        Ok(m) => m,
                        Err(_) => return,
                    };

                    let payload: String = match msg.get_payload() {
                        Ok(p) => p,
                        Err(_) => continue,
                    };

                    let message: ReadModelUpdatedMessage = match serde_json::from_str(&payload) {
                        Ok(m) => m,
                        Err(err) => {
                            warn!(channel = %channel, error = %err, "undecodable notification skipped");
                            continue;
                        }
                    };

                    if tx.send(message).is_err() {
                        return;
                    }
                }
            });

        if let Err(err) = spawned {
            warn!(channel = %self.channel, error = %err, "redis subscription thread not started");
        }

        Subscription::new(rx)
    }
}
