// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Reference backend servers.
//!
//! Two server flavours back the six transport kinds: a thread-per-connection
//! server for the blocking kinds and a task-per-connection tokio server that
//! multiplexes requests by id for the rest. `serve_isolated` is the entry
//! point of a backend running in its own process.

mod async_server;
mod isolated;
mod threaded;

use std::future::Future;
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use crate::error::TransportError;
use crate::service::BenchService;
use crate::types::TransportKind;
use crate::wire::{Request, Response};

pub use async_server::AsyncServer;
pub use isolated::{
    serve_isolated, wait_for_shutdown_signal, Registration, ServeOptions, READY_SIGNAL,
};
pub use threaded::ThreadedServer;

/// Address every reference server binds to.
pub const LOOPBACK: [u8; 4] = [127, 0, 0, 1];

/// A running reference server of either flavour.
#[derive(Debug)]
pub enum ServerHandle {
    Threaded(ThreadedServer),
    Async(AsyncServer),
}

impl ServerHandle {
    /// Start the server flavour `kind` is served by.
    pub async fn start(kind: TransportKind, addr: SocketAddr) -> Result<Self, TransportError> {
        if kind.uses_thread_server() {
            ThreadedServer::bind(addr).map(Self::Threaded)
        } else {
            AsyncServer::bind(addr).await.map(Self::Async)
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        match self {
            Self::Threaded(server) => server.local_addr(),
            Self::Async(server) => server.local_addr(),
        }
    }

    /// Stop accepting, close open connections and wait for the server to exit.
    pub async fn stop(self) {
        match self {
            Self::Threaded(mut server) => {
                // Joining OS threads must not stall the runtime.
                if let Err(e) = tokio::task::spawn_blocking(move || server.shutdown()).await {
                    tracing::warn!(error = %e, "Threaded server shutdown panicked");
                }
            }
            Self::Async(mut server) => server.shutdown().await,
        }
    }
}

/// Reply to a single request, as a sequence of frames.
pub(crate) enum Reply {
    One(Response),
    Stream { id: u64, count: u64 },
}

/// Handle one benchmark request against the service.
pub(crate) fn handle_request(service: &BenchService, request: Request) -> Reply {
    match request {
        Request::Simple { id, value } => match service.simple_call(&value) {
            Ok(value) => Reply::One(Response::Value { id, value }),
            Err(e) => Reply::One(Response::Error {
                id,
                message: e.to_string(),
            }),
        },
        Request::Stream { id, count } => Reply::Stream { id, count },
        Request::Ping => Reply::One(Response::Ack),
        Request::Register { .. } | Request::Lookup { .. } | Request::Remove { .. } => {
            Reply::One(Response::Error {
                id: 0,
                message: "directory operations are not served by benchmark backends".to_string(),
            })
        }
    }
}

/// Accept connections until `shutdown` flips, running `handler` per
/// connection. Open connections are aborted when the loop exits.
pub(crate) fn spawn_accept_loop<F, Fut>(
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
    handler: F,
) -> JoinHandle<()>
where
    F: Fn(TcpStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let _ = stream.set_nodelay(true);
                        tracing::trace!(peer = %peer, "Accepted connection");
                        connections.spawn(handler(stream));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                    }
                },
                // Reap finished connections so the set does not grow unbounded.
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }
        connections.shutdown().await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Payload;

    #[test]
    fn test_handle_simple_request() {
        let reply = handle_request(
            &BenchService,
            Request::Simple {
                id: 4,
                value: Payload::Int(21),
            },
        );
        assert!(matches!(
            reply,
            Reply::One(Response::Value { id: 4, value: Payload::Int(42) })
        ));
    }

    #[test]
    fn test_handle_overflow_is_error_reply() {
        let reply = handle_request(
            &BenchService,
            Request::Simple {
                id: 1,
                value: Payload::Int(i64::MAX),
            },
        );
        assert!(matches!(reply, Reply::One(Response::Error { id: 1, .. })));
    }

    #[test]
    fn test_directory_ops_rejected() {
        let reply = handle_request(
            &BenchService,
            Request::Lookup {
                name: crate::types::ServiceName::new("svc").unwrap(),
            },
        );
        assert!(matches!(reply, Reply::One(Response::Error { .. })));
    }
}
