// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Task-per-connection tokio server.
//!
//! Requests on one connection are handled concurrently: unary calls are
//! answered inline, streams run in their own task, and a single writer task
//! per connection serializes the interleaved responses.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};

use crate::error::TransportError;
use crate::service::BenchService;
use crate::wire::{read_frame, write_frame, Request, Response};

use super::{handle_request, spawn_accept_loop, Reply};

/// Responses buffered per connection before stream producers wait.
const WRITE_QUEUE_DEPTH: usize = 256;

/// Async reference server.
#[derive(Debug)]
pub struct AsyncServer {
    local_addr: SocketAddr,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl AsyncServer {
    /// Bind and start accepting. Binding to port 0 picks a free port.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::Connect {
                endpoint: addr.to_string(),
                reason: format!("bind failed: {}", e),
            })?;
        let local_addr = listener.local_addr().map_err(TransportError::io)?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = spawn_accept_loop(listener, shutdown_rx, serve_connection);

        tracing::debug!(addr = %local_addr, "Async server listening");

        Ok(Self {
            local_addr,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, abort open connections and wait for the accept task.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(addr = %self.local_addr, error = %e, "Accept task failed");
            }
            tracing::debug!(addr = %self.local_addr, "Async server stopped");
        }
    }
}

impl Drop for AsyncServer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn serve_connection(stream: TcpStream) {
    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<Response>(WRITE_QUEUE_DEPTH);

    // Owned here so aborting the connection aborts its writer and streams.
    let mut tasks = JoinSet::new();
    tasks.spawn(async move {
        while let Some(response) = rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &response).await {
                tracing::debug!(error = %e, "Connection write failed");
                break;
            }
        }
    });

    let service = BenchService;
    loop {
        let request: Request = match read_frame(&mut reader).await {
            Ok(Some(request)) => request,
            Ok(None) | Err(TransportError::Closed) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Connection read failed");
                break;
            }
        };

        match handle_request(&service, request) {
            Reply::One(response) => {
                if tx.send(response).await.is_err() {
                    break;
                }
            }
            Reply::Stream { id, count } => {
                let tx = tx.clone();
                tasks.spawn(async move {
                    for value in service.stream_values(count) {
                        if tx.send(Response::Item { id, value }).await.is_err() {
                            return;
                        }
                    }
                    let _ = tx.send(Response::End { id, count }).await;
                });
            }
        }
    }

    // Let in-flight replies drain before the connection closes.
    drop(tx);
    while tasks.join_next().await.is_some() {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Payload;

    #[tokio::test]
    async fn test_interleaved_requests_on_one_connection() {
        let mut server = AsyncServer::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();

        write_frame(&mut stream, &Request::Stream { id: 1, count: 5 })
            .await
            .unwrap();
        write_frame(
            &mut stream,
            &Request::Simple {
                id: 2,
                value: Payload::Text("ab".into()),
            },
        )
        .await
        .unwrap();

        let mut items = Vec::new();
        let mut unary = None;
        let mut ended = false;
        while !(ended && unary.is_some()) {
            match read_frame::<_, Response>(&mut stream).await.unwrap().unwrap() {
                Response::Item { id: 1, value } => items.push(value),
                Response::End { id: 1, count } => {
                    assert_eq!(count, 5);
                    ended = true;
                }
                Response::Value { id: 2, value } => unary = Some(value),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(items, vec![0, 1, 2, 3, 4]);
        assert_eq!(unary, Some(Payload::Text("abab".into())));

        server.shutdown().await;
        server.shutdown().await;
    }
}
