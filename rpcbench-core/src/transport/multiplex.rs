// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Multiplexed client over one persistent connection.
//!
//! Every call is tagged with a request id and parked in a pending table; a
//! reader task dispatches replies by id. Writes are serialized by a mutex
//! around the write half. The reader never waits on a consumer: stream items
//! are queued without bound, so one slow stream cannot hold up other replies.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::error::TransportError;
use crate::types::{Payload, Sharing, TransportKind};
use crate::wire::{read_frame, write_frame, Request, Response};

use super::{Transport, ValueStream};

enum PendingReply {
    Unary(oneshot::Sender<Result<Payload, TransportError>>),
    Stream(mpsc::UnboundedSender<Result<i64, TransportError>>),
}

type PendingTable = Arc<DashMap<u64, PendingReply>>;

/// Removes a pending entry when the call is finished or cancelled.
struct PendingGuard {
    pending: PendingTable,
    id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

struct Connection {
    writer: Arc<Mutex<OwnedWriteHalf>>,
    reader: JoinHandle<()>,
}

/// Shared-connection client for the multiplexed kinds.
pub struct MultiplexTransport {
    kind: TransportKind,
    endpoint: SocketAddr,
    connect_timeout: Duration,
    next_id: AtomicU64,
    pending: PendingTable,
    connection: std::sync::Mutex<Option<Connection>>,
}

impl std::fmt::Debug for MultiplexTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiplexTransport")
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl MultiplexTransport {
    pub fn new(kind: TransportKind, endpoint: SocketAddr, connect_timeout: Duration) -> Self {
        Self {
            kind,
            endpoint,
            connect_timeout,
            next_id: AtomicU64::new(1),
            pending: Arc::new(DashMap::new()),
            connection: std::sync::Mutex::new(None),
        }
    }

    /// Calls currently awaiting a reply.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    fn writer(&self) -> Result<Arc<Mutex<OwnedWriteHalf>>, TransportError> {
        let guard = self.connection.lock().map_err(|_| TransportError::NotReady)?;
        guard
            .as_ref()
            .map(|conn| Arc::clone(&conn.writer))
            .ok_or(TransportError::NotReady)
    }

    /// Register a pending reply and send the request that will answer it.
    async fn send(
        &self,
        id: u64,
        request: Request,
        reply: PendingReply,
    ) -> Result<PendingGuard, TransportError> {
        let writer = self.writer()?;
        self.pending.insert(id, reply);
        let guard = PendingGuard {
            pending: Arc::clone(&self.pending),
            id,
        };
        let mut writer = writer.lock().await;
        write_frame(&mut *writer, &request).await?;
        Ok(guard)
    }
}

#[async_trait]
impl Transport for MultiplexTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn sharing(&self) -> Sharing {
        Sharing::Shared
    }

    async fn setup(&self) -> Result<(), TransportError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(self.endpoint))
            .await
            .map_err(|_| TransportError::Timeout {
                timeout_ms: self.connect_timeout.as_millis() as u64,
            })?
            .map_err(|e| TransportError::Connect {
                endpoint: self.endpoint.to_string(),
                reason: e.to_string(),
            })?;
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();

        let reader = tokio::spawn(dispatch_replies(read_half, Arc::clone(&self.pending)));
        let connection = Connection {
            writer: Arc::new(Mutex::new(write_half)),
            reader,
        };

        let previous = match self.connection.lock() {
            Ok(mut guard) => guard.replace(connection),
            Err(_) => {
                connection.reader.abort();
                return Err(TransportError::NotReady);
            }
        };
        if let Some(previous) = previous {
            previous.reader.abort();
        }

        tracing::debug!(kind = %self.kind, endpoint = %self.endpoint, "Multiplexed connection open");
        Ok(())
    }

    async fn teardown(&self) {
        let connection = match self.connection.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(connection) = connection else {
            return;
        };

        connection.reader.abort();
        let _ = connection.writer.lock().await.shutdown().await;
        fail_pending(&self.pending);
        tracing::debug!(kind = %self.kind, endpoint = %self.endpoint, "Multiplexed connection closed");
    }

    async fn simple_call(&self, value: Payload) -> Result<Payload, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let _guard = self
            .send(id, Request::Simple { id, value }, PendingReply::Unary(tx))
            .await?;
        rx.await.unwrap_or(Err(TransportError::Closed))
    }

    async fn stream_values(&self, count: u64) -> Result<ValueStream, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let guard = self
            .send(id, Request::Stream { id, count }, PendingReply::Stream(tx))
            .await?;

        // The guard travels with the stream so dropping it cancels the call.
        Ok(futures::stream::unfold((rx, guard), |(mut rx, guard)| async move {
            rx.recv().await.map(|item| (item, (rx, guard)))
        })
        .boxed())
    }
}

async fn dispatch_replies(mut reader: OwnedReadHalf, pending: PendingTable) {
    loop {
        let response: Response = match read_frame(&mut reader).await {
            Ok(Some(response)) => response,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Multiplexed read failed");
                break;
            }
        };

        match response {
            Response::Value { id, value } => match pending.remove(&id) {
                Some((_, PendingReply::Unary(tx))) => {
                    let _ = tx.send(Ok(value));
                }
                Some((_, PendingReply::Stream(tx))) => {
                    let _ = tx.send(Err(TransportError::Protocol {
                        reason: "unary reply to a streaming call".to_string(),
                    }));
                }
                None => tracing::trace!(id, "Reply for cancelled call"),
            },
            Response::Item { id, value } => {
                let delivered = match pending.get(&id).as_deref() {
                    Some(PendingReply::Stream(tx)) => Some(tx.send(Ok(value)).is_ok()),
                    _ => None,
                };
                match delivered {
                    Some(true) => {}
                    Some(false) => {
                        pending.remove(&id);
                    }
                    None => tracing::trace!(id, "Item for unknown stream"),
                }
            }
            Response::End { id, .. } => {
                pending.remove(&id);
            }
            Response::Error { id, message } => match pending.remove(&id) {
                Some((_, PendingReply::Unary(tx))) => {
                    let _ = tx.send(Err(TransportError::Remote { message }));
                }
                Some((_, PendingReply::Stream(tx))) => {
                    let _ = tx.send(Err(TransportError::Remote { message }));
                }
                None => tracing::debug!(id, message = %message, "Error for unknown call"),
            },
            other => tracing::debug!(response = ?other, "Unexpected frame on multiplexed connection"),
        }
    }

    fail_pending(&pending);
}

/// Fail every pending call with `Closed`.
fn fail_pending(pending: &PendingTable) {
    let ids: Vec<u64> = pending.iter().map(|entry| *entry.key()).collect();
    for id in ids {
        match pending.remove(&id) {
            Some((_, PendingReply::Unary(tx))) => {
                let _ = tx.send(Err(TransportError::Closed));
            }
            Some((_, PendingReply::Stream(tx))) => {
                let _ = tx.send(Err(TransportError::Closed));
            }
            None => {}
        }
    }
}
