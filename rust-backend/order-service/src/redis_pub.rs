use async_trait::async_trait;
use log::{info, warn};
use redis::{AsyncCommands, Client, RedisResult};
use serde::Serialize;
use tokio::time::{sleep, Duration};

use crate::error::AppError;

const MAX_ATTEMPTS: u32 = 5;

/// Outbound side of the order lifecycle: order events and supplier dispatch.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_json(&self, channel: &str, payload: &serde_json::Value) -> Result<(), AppError>;
}

pub async fn publish<T: Serialize + Sync>(
    events: &dyn EventPublisher,
    channel: &str,
    message: &T,
) -> Result<(), AppError> {
    let payload = serde_json::to_value(message)
        .map_err(|e| AppError::ExternalService(format!("Serialization failed: {e}")))?;
    events.publish_json(channel, &payload).await
}

/// Fire-and-forget variant: failures are logged, never returned.
pub async fn publish_best_effort<T: Serialize + Sync>(events: &dyn EventPublisher, channel: &str, message: &T) {
    if let Err(e) = publish(events, channel, message).await {
        warn!("Redis publish error ({}): {}", channel, e);
    }
}

#[derive(Clone)]
pub struct RedisPublisher {
    client: Option<Client>,
    retry_delay: Duration,
}

impl RedisPublisher {
    pub fn new(redis_url: &str) -> Result<Self, AppError> {
        let client = Client::open(redis_url)?;
        Ok(Self {
            client: Some(client),
            retry_delay: Duration::from_secs(2),
        })
    }

    /// Publisher used when no REDIS_URL is configured.
    pub fn new_noop() -> Self {
        Self {
            client: None,
            retry_delay: Duration::from_secs(2),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }
}

#[async_trait]
impl EventPublisher for RedisPublisher {
    async fn publish_json(&self, channel: &str, payload: &serde_json::Value) -> Result<(), AppError> {
        let Some(client) = &self.client else {
            info!("🟡 RedisPublisher disabled, skipping publish for channel '{}'", channel);
            return Ok(());
        };

        let payload = payload.to_string();
        let mut attempts = 0;

        loop {
            attempts += 1;
            match client.get_multiplexed_async_connection().await {
                Ok(mut conn) => {
                    let result: RedisResult<()> = conn.publish(channel, payload.as_str()).await;
                    match result {
                        Ok(()) => return Ok(()),
                        Err(e) if attempts >= MAX_ATTEMPTS => {
                            warn!("❌ Redis publish failed after {} attempts", attempts);
                            return Err(e.into());
                        }
                        Err(e) => warn!("⚠️ Redis publish failed (attempt {}): {}", attempts, e),
                    }
                }
                Err(e) => {
                    warn!("⚠️ Redis reconnect failed (attempt {}): {}", attempts, e);
                    if attempts >= MAX_ATTEMPTS {
                        return Err(e.into());
                    }
                }
            }

            sleep(self.retry_delay).await;
        }
    }
}
