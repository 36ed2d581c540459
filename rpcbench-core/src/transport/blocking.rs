// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Blocking std-socket client, one connection per call.
//!
//! Each call runs on a `spawn_blocking` worker; stream items are bridged
//! back to the async side through a bounded channel.

use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::types::{Payload, Sharing, TransportKind};
use crate::wire::{read_frame_blocking, write_frame_blocking, Request, Response};

use super::{stream_step, unary_reply, with_call_timeout, StreamStep, Transport, ValueStream};

/// Stream items buffered between the worker thread and the consumer.
const STREAM_BUFFER: usize = 64;

/// Client for the thread-served kinds.
#[derive(Debug)]
pub struct BlockingTransport {
    kind: TransportKind,
    endpoint: SocketAddr,
    call_timeout: Duration,
    next_id: AtomicU64,
    ready: AtomicBool,
}

impl BlockingTransport {
    pub fn new(kind: TransportKind, endpoint: SocketAddr, call_timeout: Duration) -> Self {
        Self {
            kind,
            endpoint,
            call_timeout,
            next_id: AtomicU64::new(1),
            ready: AtomicBool::new(false),
        }
    }

    fn check_ready(&self) -> Result<(), TransportError> {
        if self.ready.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(TransportError::NotReady)
        }
    }

    /// Run `op` on a fresh connection on a blocking worker.
    async fn with_connection<T, F>(&self, op: F) -> Result<T, TransportError>
    where
        T: Send + 'static,
        F: FnOnce(&mut TcpStream) -> Result<T, TransportError> + Send + 'static,
    {
        let endpoint = self.endpoint;
        let timeout = self.call_timeout;
        tokio::task::spawn_blocking(move || {
            let mut stream = connect(endpoint, timeout)?;
            op(&mut stream).map_err(|e| with_call_timeout(e, timeout))
        })
        .await
        .map_err(|e| TransportError::Io {
            reason: format!("blocking call worker failed: {}", e),
        })?
    }
}

fn connect(endpoint: SocketAddr, timeout: Duration) -> Result<TcpStream, TransportError> {
    let stream =
        TcpStream::connect_timeout(&endpoint, timeout).map_err(|e| TransportError::Connect {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;
    stream
        .set_read_timeout(Some(timeout))
        .and_then(|_| stream.set_write_timeout(Some(timeout)))
        .and_then(|_| stream.set_nodelay(true))
        .map_err(TransportError::io)?;
    Ok(stream)
}

#[async_trait]
impl Transport for BlockingTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn sharing(&self) -> Sharing {
        Sharing::PerCall
    }

    async fn setup(&self) -> Result<(), TransportError> {
        self.with_connection(|stream| {
            write_frame_blocking(stream, &Request::Ping)?;
            match read_frame_blocking::<_, Response>(stream)? {
                Some(Response::Ack) => Ok(()),
                Some(other) => Err(TransportError::Protocol {
                    reason: format!("unexpected probe reply: {:?}", other),
                }),
                None => Err(TransportError::Closed),
            }
        })
        .await?;

        self.ready.store(true, Ordering::Release);
        tracing::debug!(kind = %self.kind, endpoint = %self.endpoint, "Blocking transport ready");
        Ok(())
    }

    async fn teardown(&self) {
        // Nothing persistent to close; in-flight workers finish on their own.
        self.ready.store(false, Ordering::Release);
    }

    async fn simple_call(&self, value: Payload) -> Result<Payload, TransportError> {
        self.check_ready()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.with_connection(move |stream| {
            write_frame_blocking(stream, &Request::Simple { id, value })?;
            let response = read_frame_blocking::<_, Response>(stream)?.ok_or(TransportError::Closed)?;
            unary_reply(id, response)
        })
        .await
    }

    async fn stream_values(&self, count: u64) -> Result<ValueStream, TransportError> {
        self.check_ready()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let endpoint = self.endpoint;
        let timeout = self.call_timeout;
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        // The worker is detached; it stops once the consumer drops the stream.
        tokio::task::spawn_blocking(move || {
            let result = connect(endpoint, timeout).and_then(|mut stream| {
                write_frame_blocking(&mut stream, &Request::Stream { id, count })?;
                loop {
                    let frame = read_frame_blocking::<_, Response>(&mut stream);
                    let step = match frame {
                        Ok(frame) => stream_step(id, frame),
                        Err(e) => StreamStep::Fail(e),
                    };
                    match step {
                        StreamStep::Item(value) => {
                            if tx.blocking_send(Ok(value)).is_err() {
                                return Ok(());
                            }
                        }
                        StreamStep::End => return Ok(()),
                        StreamStep::Fail(e) => return Err(e),
                    }
                }
            });
            if let Err(e) = result {
                let _ = tx.blocking_send(Err(with_call_timeout(e, timeout)));
            }
        });

        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }
}
