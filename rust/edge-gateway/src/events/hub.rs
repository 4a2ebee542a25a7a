//! Fan-out of broadcast payloads to connected WebSocket clients.
//!
//! One task owns the client set. Everything else talks to it through
//! channels, so the set itself needs no lock:
//!
//! - removals (unbounded, also fed by the owning task after a failed write)
//! - admissions
//! - payloads (bounded; [`NotificationHub::notify`] waits for capacity)
//!
//! The loop polls them in that order. A client admitted before a payload was
//! queued therefore receives it, one removed before it does not, and a client
//! whose write failed is gone before the next payload goes out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::{stream::SplitSink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::HubClosed;

/// Identifier assigned to a client on admission.
pub type ClientId = u64;

/// Write half of a client connection.
#[async_trait]
pub trait ClientConnection: Send + 'static {
    async fn send_text(&mut self, payload: &str) -> Result<(), axum::Error>;

    async fn close(&mut self);
}

#[async_trait]
impl ClientConnection for SplitSink<WebSocket, Message> {
    async fn send_text(&mut self, payload: &str) -> Result<(), axum::Error> {
        self.send(Message::Text(payload.to_owned().into())).await
    }

    async fn close(&mut self) {
        // The peer may already be gone.
        let _ = SinkExt::close(self).await;
    }
}

type Admission = (ClientId, Box<dyn ClientConnection>);

/// Handle to the hub task. Cheap to clone.
#[derive(Clone)]
pub struct NotificationHub {
    add_tx: mpsc::Sender<Admission>,
    remove_tx: mpsc::UnboundedSender<ClientId>,
    events_tx: mpsc::Sender<String>,
    count_tx: mpsc::Sender<oneshot::Sender<usize>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for NotificationHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationHub")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl NotificationHub {
    /// Spawn the hub task. `queue_capacity` bounds the number of payloads
    /// waiting to be fanned out.
    pub fn start(queue_capacity: usize) -> (Self, JoinHandle<()>) {
        let (add_tx, add_rx) = mpsc::channel(64);
        let (remove_tx, remove_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(queue_capacity.max(1));
        let (count_tx, count_rx) = mpsc::channel(8);

        let owner = HubLoop {
            clients: Vec::new(),
            add_rx,
            remove_rx,
            remove_tx: remove_tx.clone(),
            events_rx,
            count_rx,
        };
        let task = tokio::spawn(owner.run());

        let hub = Self {
            add_tx,
            remove_tx,
            events_tx,
            count_tx,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        (hub, task)
    }

    /// Hand the write half of a connection to the hub.
    pub async fn admit(&self, conn: Box<dyn ClientConnection>) -> Result<ClientId, HubClosed> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.add_tx.send((id, conn)).await.map_err(|_| HubClosed)?;
        Ok(id)
    }

    /// Read from the client only to notice when it goes away, then remove it.
    /// Incoming messages are discarded.
    pub async fn watch<S, T, E>(&self, id: ClientId, stream: S)
    where
        S: Stream<Item = Result<T, E>>,
        E: std::fmt::Display,
    {
        futures::pin_mut!(stream);
        while let Some(item) = stream.next().await {
            if let Err(e) = item {
                tracing::debug!(client = id, error = %e, "Client read failed");
                break;
            }
        }
        self.remove_client(id);
    }

    /// Admit a connection and watch it until it disconnects.
    pub async fn add_client<C, S, T, E>(&self, sink: C, stream: S)
    where
        C: ClientConnection,
        S: Stream<Item = Result<T, E>>,
        E: std::fmt::Display,
    {
        match self.admit(Box::new(sink)).await {
            Ok(id) => self.watch(id, stream).await,
            Err(e) => tracing::warn!(error = %e, "Dropping client connection"),
        }
    }

    /// Queue a payload for every connected client. Waits only for queue
    /// capacity, never for delivery.
    pub async fn notify(&self, payload: impl Into<String>) -> Result<(), HubClosed> {
        self.events_tx
            .send(payload.into())
            .await
            .map_err(|_| HubClosed)
    }

    /// Queue removal of a client. Unknown ids are ignored.
    pub fn remove_client(&self, id: ClientId) {
        // A closed hub has no clients to remove.
        let _ = self.remove_tx.send(id);
    }

    /// Number of connected clients, or 0 once the hub has stopped.
    pub async fn client_count(&self) -> usize {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.count_tx.send(reply_tx).await.is_err() {
            return 0;
        }
        reply_rx.await.unwrap_or(0)
    }
}

struct HubLoop {
    clients: Vec<(ClientId, Box<dyn ClientConnection>)>,
    add_rx: mpsc::Receiver<Admission>,
    remove_rx: mpsc::UnboundedReceiver<ClientId>,
    remove_tx: mpsc::UnboundedSender<ClientId>,
    events_rx: mpsc::Receiver<String>,
    count_rx: mpsc::Receiver<oneshot::Sender<usize>>,
}

impl HubLoop {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                Some(id) = self.remove_rx.recv() => self.remove(id).await,
                Some((id, conn)) = self.add_rx.recv() => {
                    self.clients.push((id, conn));
                    tracing::debug!(client = id, clients = self.clients.len(), "Client connected");
                }
                Some(reply) = self.count_rx.recv() => {
                    let _ = reply.send(self.clients.len());
                }
                payload = self.events_rx.recv() => match payload {
                    Some(payload) => self.broadcast(&payload).await,
                    None => break,
                },
            }
        }

        for (_, conn) in &mut self.clients {
            conn.close().await;
        }
        tracing::info!("Notification hub stopped");
    }

    async fn broadcast(&mut self, payload: &str) {
        for (id, conn) in &mut self.clients {
            if let Err(e) = conn.send_text(payload).await {
                tracing::debug!(client = *id, error = %e, "Write failed, dropping client");
                // Handled on a later iteration, before the next payload.
                let _ = self.remove_tx.send(*id);
            }
        }
    }

    async fn remove(&mut self, id: ClientId) {
        // A client can disconnect before its admission was picked up.
        while let Ok((admitted, conn)) = self.add_rx.try_recv() {
            self.clients.push((admitted, conn));
        }

        let Some(pos) = self.clients.iter().position(|(cid, _)| *cid == id) else {
            return;
        };
        let (_, mut conn) = self.clients.remove(pos);
        conn.close().await;
        tracing::debug!(client = id, clients = self.clients.len(), "Client removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Observed {
        fail: Arc<AtomicBool>,
        attempts: Arc<AtomicUsize>,
        closed: Arc<AtomicBool>,
    }

    struct MockConn {
        seen: Observed,
        delivered: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl ClientConnection for MockConn {
        async fn send_text(&mut self, payload: &str) -> Result<(), axum::Error> {
            self.seen.attempts.fetch_add(1, Ordering::SeqCst);
            if self.seen.fail.load(Ordering::SeqCst) {
                return Err(axum::Error::new(std::io::Error::other("broken pipe")));
            }
            let _ = self.delivered.send(payload.to_string());
            Ok(())
        }

        async fn close(&mut self) {
            self.seen.closed.store(true, Ordering::SeqCst);
        }
    }

    fn mock() -> (MockConn, Observed, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let seen = Observed::default();
        let conn = MockConn {
            seen: seen.clone(),
            delivered: tx,
        };
        (conn, seen, rx)
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<String>) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn test_payload_reaches_every_client() {
        let (hub, _task) = NotificationHub::start(16);
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (conn, _, rx) = mock();
            hub.admit(Box::new(conn)).await.unwrap();
            receivers.push(rx);
        }

        hub.notify("visitor arrived").await.unwrap();

        for rx in &mut receivers {
            assert_eq!(recv(rx).await.as_deref(), Some("visitor arrived"));
        }
        assert_eq!(hub.client_count().await, 3);
    }

    #[tokio::test]
    async fn test_removed_client_gets_nothing() {
        let (hub, _task) = NotificationHub::start(16);
        let (kept, _, mut kept_rx) = mock();
        let (gone, gone_seen, mut gone_rx) = mock();
        hub.admit(Box::new(kept)).await.unwrap();
        let gone_id = hub.admit(Box::new(gone)).await.unwrap();

        hub.remove_client(gone_id);
        hub.notify("hello").await.unwrap();

        assert_eq!(recv(&mut kept_rx).await.as_deref(), Some("hello"));
        assert_eq!(gone_seen.attempts.load(Ordering::SeqCst), 0);
        assert!(gone_seen.closed.load(Ordering::SeqCst));
        assert!(gone_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_write_removes_client() {
        let (hub, _task) = NotificationHub::start(16);
        let (healthy, _, mut healthy_rx) = mock();
        let (broken, broken_seen, _broken_rx) = mock();
        broken_seen.fail.store(true, Ordering::SeqCst);
        hub.admit(Box::new(broken)).await.unwrap();
        hub.admit(Box::new(healthy)).await.unwrap();

        hub.notify("first").await.unwrap();
        assert_eq!(recv(&mut healthy_rx).await.as_deref(), Some("first"));

        hub.notify("second").await.unwrap();
        assert_eq!(recv(&mut healthy_rx).await.as_deref(), Some("second"));

        assert_eq!(broken_seen.attempts.load(Ordering::SeqCst), 1);
        assert!(broken_seen.closed.load(Ordering::SeqCst));
        assert_eq!(hub.client_count().await, 1);
    }

    #[tokio::test]
    async fn test_watch_removes_on_stream_end_or_error() {
        let (hub, _task) = NotificationHub::start(16);
        let (a, a_seen, _a_rx) = mock();
        let (b, b_seen, _b_rx) = mock();

        let ended = futures::stream::iter(vec![Ok::<_, String>("ping"), Ok("pong")]);
        hub.add_client(a, ended).await;

        let failed = futures::stream::iter(vec![Ok("ping"), Err("reset".to_string())]);
        hub.add_client(b, failed).await;

        assert_eq!(hub.client_count().await, 0);
        assert!(a_seen.closed.load(Ordering::SeqCst));
        assert!(b_seen.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_hub_stops_when_handles_drop() {
        let (hub, task) = NotificationHub::start(1);
        let (conn, seen, _rx) = mock();
        hub.admit(Box::new(conn)).await.unwrap();
        assert_eq!(hub.client_count().await, 1);

        drop(hub);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(seen.closed.load(Ordering::SeqCst));
    }
}
