// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Async client opening a fresh connection per call.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::net::TcpStream;

use crate::error::TransportError;
use crate::types::{Payload, Sharing, TransportKind};
use crate::wire::{read_frame, write_frame, Request, Response};

use super::{stream_step, unary_reply, StreamStep, Transport, ValueStream};

#[derive(Debug)]
pub struct FramedTransport {
    kind: TransportKind,
    endpoint: SocketAddr,
    connect_timeout: Duration,
    next_id: AtomicU64,
    ready: AtomicBool,
}

impl FramedTransport {
    pub fn new(kind: TransportKind, endpoint: SocketAddr, connect_timeout: Duration) -> Self {
        Self {
            kind,
            endpoint,
            connect_timeout,
            next_id: AtomicU64::new(1),
            ready: AtomicBool::new(false),
        }
    }

    async fn connect(&self) -> Result<TcpStream, TransportError> {
        if !self.ready.load(Ordering::Acquire) {
            return Err(TransportError::NotReady);
        }
        self.open().await
    }

    async fn open(&self) -> Result<TcpStream, TransportError> {
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
        Ok(stream)
    }
}

#[async_trait]
impl Transport for FramedTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn sharing(&self) -> Sharing {
        Sharing::PerCall
    }

    async fn setup(&self) -> Result<(), TransportError> {
        let mut stream = self.open().await?;
        write_frame(&mut stream, &Request::Ping).await?;
        match read_frame::<_, Response>(&mut stream).await? {
            Some(Response::Ack) => {}
            Some(other) => {
                return Err(TransportError::Protocol {
                    reason: format!("unexpected probe reply: {:?}", other),
                })
            }
            None => return Err(TransportError::Closed),
        }
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    async fn teardown(&self) {
        self.ready.store(false, Ordering::Release);
    }

    async fn simple_call(&self, value: Payload) -> Result<Payload, TransportError> {
        let mut stream = self.connect().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        write_frame(&mut stream, &Request::Simple { id, value }).await?;
        let response = read_frame::<_, Response>(&mut stream)
            .await?
            .ok_or(TransportError::Closed)?;
        unary_reply(id, response)
    }

    async fn stream_values(&self, count: u64) -> Result<ValueStream, TransportError> {
        let mut stream = self.connect().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        write_frame(&mut stream, &Request::Stream { id, count }).await?;

        // The connection is dropped after the end marker or the first error.
        Ok(futures::stream::unfold(Some(stream), move |state| async move {
            let mut stream = state?;
            let step = match read_frame::<_, Response>(&mut stream).await {
                Ok(frame) => stream_step(id, frame),
                Err(e) => StreamStep::Fail(e),
            };
            match step {
                StreamStep::Item(value) => Some((Ok(value), Some(stream))),
                StreamStep::End => None,
                StreamStep::Fail(e) => Some((Err(e), None)),
            }
        })
        .boxed())
    }
}
