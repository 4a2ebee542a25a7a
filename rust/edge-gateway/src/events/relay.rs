//! Drains the broadcast queue into the notification hub.

use std::time::Duration;

use redis::aio::MultiplexedConnection;

use super::hub::NotificationHub;
use crate::error::HubClosed;
use crate::retry::{with_backoff, RetryPolicy};

/// Pops payloads from a Redis list and hands them to the hub.
#[derive(Debug)]
pub struct BroadcastRelay {
    client: redis::Client,
    queue: String,
    poll_timeout: Duration,
    retry: RetryPolicy,
    hub: NotificationHub,
}

impl BroadcastRelay {
    pub fn new(
        client: redis::Client,
        queue: impl Into<String>,
        poll_timeout: Duration,
        retry: RetryPolicy,
        hub: NotificationHub,
    ) -> Self {
        Self {
            client,
            queue: queue.into(),
            poll_timeout,
            retry,
            hub,
        }
    }

    /// Open a dedicated connection for blocking pops, retrying with backoff.
    pub async fn connect(&self) -> Result<MultiplexedConnection, redis::RedisError> {
        with_backoff(&self.retry, "connect to broadcast queue", || {
            self.client.get_multiplexed_async_connection()
        })
        .await
    }

    /// Forward queued payloads until the queue connection is lost for good or
    /// the hub stops.
    pub async fn run(self, mut conn: MultiplexedConnection) {
        use redis::AsyncCommands;

        tracing::info!(queue = %self.queue, "Relaying broadcast queue");
        // Short blocking pops keep each round trip within the client's
        // response timeout.
        let timeout = self.poll_timeout.as_secs_f64();

        loop {
            let popped: redis::RedisResult<Option<(String, Vec<u8>)>> =
                conn.blpop(self.queue.as_str(), timeout).await;

            match popped {
                Ok(Some((_, body))) => {
                    if forward(&self.hub, body).await.is_err() {
                        tracing::info!(queue = %self.queue, "Hub stopped, relay exiting");
                        return;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(queue = %self.queue, error = %e, "Broadcast queue read failed");
                    conn = match self.connect().await {
                        Ok(conn) => conn,
                        Err(e) => {
                            tracing::error!(
                                queue = %self.queue,
                                error = %e,
                                "Broadcast relay stopped, clients will receive no further events"
                            );
                            return;
                        }
                    };
                }
            }
        }
    }
}

/// Hand one queue body to the hub as a text payload.
///
/// Bodies that are not UTF-8 cannot be sent as text frames; they are logged
/// and dropped.
pub async fn forward(hub: &NotificationHub, body: Vec<u8>) -> Result<(), HubClosed> {
    match String::from_utf8(body) {
        Ok(text) => hub.notify(text).await,
        Err(e) => {
            tracing::warn!(
                len = e.as_bytes().len(),
                error = %e.utf8_error(),
                "Dropping non-UTF-8 broadcast payload"
            );
            Ok(())
        }
    }
}
