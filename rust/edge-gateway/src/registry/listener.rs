//! Background tasks that keep the registry current.

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use redis::aio::PubSub;

use super::{RegistrationEvent, ServiceRegistry};
use crate::retry::{with_backoff, RetryPolicy};

/// Apply every payload of `events` to the registry until the stream ends.
///
/// Malformed payloads and invalid patterns are logged and skipped. Returns
/// the number of registrations applied.
pub async fn apply_events<S>(registry: &ServiceRegistry, events: S) -> usize
where
    S: Stream<Item = Vec<u8>>,
{
    let mut applied = 0;
    futures::pin_mut!(events);

    while let Some(payload) = events.next().await {
        let event = match RegistrationEvent::from_json(&payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    payload = %String::from_utf8_lossy(&payload),
                    "Skipping registration message"
                );
                continue;
            }
        };

        match registry.register(&event) {
            Ok(_) => applied += 1,
            Err(e) => tracing::warn!(
                service = %event.name,
                error = %e,
                "Rejected service registration"
            ),
        }
    }
    applied
}

/// Subscribes to the registration channel and feeds the registry.
#[derive(Debug)]
pub struct DiscoveryListener {
    client: redis::Client,
    channel: String,
    retry: RetryPolicy,
    registry: Arc<ServiceRegistry>,
}

impl DiscoveryListener {
    pub fn new(
        client: redis::Client,
        channel: impl Into<String>,
        retry: RetryPolicy,
        registry: Arc<ServiceRegistry>,
    ) -> Self {
        Self {
            client,
            channel: channel.into(),
            retry,
            registry,
        }
    }

    /// Open a subscription, retrying with backoff.
    pub async fn subscribe(&self) -> Result<PubSub, redis::RedisError> {
        with_backoff(&self.retry, "subscribe to discovery channel", || async {
            let mut pubsub = self.client.get_async_pubsub().await?;
            pubsub.subscribe(self.channel.as_str()).await?;
            Ok(pubsub)
        })
        .await
    }

    /// Consume registrations until the subscription is lost and cannot be
    /// re-established.
    pub async fn run(self, mut pubsub: PubSub) {
        tracing::info!(channel = %self.channel, "Listening for service registrations");

        loop {
            {
                let messages = pubsub
                    .on_message()
                    .map(|msg| msg.get_payload_bytes().to_vec());
                let applied = apply_events(&self.registry, messages).await;
                tracing::warn!(
                    channel = %self.channel,
                    applied,
                    "Discovery subscription ended, resubscribing"
                );
            }

            pubsub = match self.subscribe().await {
                Ok(pubsub) => pubsub,
                Err(e) => {
                    tracing::error!(
                        channel = %self.channel,
                        error = %e,
                        "Discovery listener stopped, registry will no longer be updated"
                    );
                    return;
                }
            };
        }
    }
}

/// Sweep the registry every `period`.
pub async fn run_sweeper(registry: Arc<ServiceRegistry>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let report = registry.sweep();
        if !report.is_empty() {
            tracing::info!(
                expired = report.expired_instances.len(),
                removed = report.removed_services.len(),
                remaining = registry.len(),
                "Registry sweep"
            );
        }
    }
}
