// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Thread-per-connection server on std sockets.

use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::TransportError;
use crate::service::BenchService;
use crate::wire::{read_frame_blocking, write_frame_blocking, Request, Response};

use super::{handle_request, Reply};

/// Pause after a failed accept, e.g. when out of file descriptors.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(20);

/// Bound on the connection that wakes a blocked accept at shutdown.
const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

type ConnectionList = Arc<Mutex<Vec<(TcpStream, JoinHandle<()>)>>>;

/// Server running its accept loop and every connection on OS threads.
#[derive(Debug)]
pub struct ThreadedServer {
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl ThreadedServer {
    /// Bind and start accepting. Binding to port 0 picks a free port.
    pub fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).map_err(|e| TransportError::Connect {
            endpoint: addr.to_string(),
            reason: format!("bind failed: {}", e),
        })?;
        let local_addr = listener.local_addr().map_err(TransportError::io)?;

        let stop = Arc::new(AtomicBool::new(false));
        let accept_stop = Arc::clone(&stop);
        let accept_thread = std::thread::Builder::new()
            .name(format!("rpcbench-accept-{}", local_addr.port()))
            .spawn(move || accept_loop(listener, accept_stop))
            .map_err(TransportError::io)?;

        tracing::debug!(addr = %local_addr, "Threaded server listening");

        Ok(Self {
            local_addr,
            stop,
            accept_thread: Some(accept_thread),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signal the accept loop and join it. Blocks; idempotent.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.accept_thread.take() {
            // The accept loop blocks in accept(); a connection wakes it up.
            if let Err(e) = TcpStream::connect_timeout(&self.local_addr, WAKE_TIMEOUT) {
                tracing::warn!(
                    addr = %self.local_addr,
                    error = %e,
                    "Failed to wake accept loop, detaching it"
                );
                return;
            }
            if thread.join().is_err() {
                tracing::warn!(addr = %self.local_addr, "Accept thread panicked");
            }
            tracing::debug!(addr = %self.local_addr, "Threaded server stopped");
        }
    }
}

impl Drop for ThreadedServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(listener: TcpListener, stop: Arc<AtomicBool>) {
    let connections: ConnectionList = Arc::new(Mutex::new(Vec::new()));

    loop {
        let accepted = listener.accept();
        if stop.load(Ordering::SeqCst) {
            break;
        }
        match accepted {
            Ok((stream, peer)) => {
                if let Err(e) = spawn_connection(stream, &connections) {
                    tracing::warn!(peer = %peer, error = %e, "Dropping connection");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Accept failed");
                std::thread::sleep(ACCEPT_ERROR_BACKOFF);
            }
        }
    }

    // Unblock connection threads stuck in reads, then wait for them.
    let connections = match connections.lock() {
        Ok(mut guard) => std::mem::take(&mut *guard),
        Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
    };
    for (stream, _) in &connections {
        let _ = stream.shutdown(Shutdown::Both);
    }
    for (_, thread) in connections {
        let _ = thread.join();
    }
}

fn spawn_connection(stream: TcpStream, connections: &ConnectionList) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    let control = stream.try_clone()?;
    let thread = std::thread::Builder::new()
        .name("rpcbench-conn".to_string())
        .spawn(move || serve_connection(stream))?;

    if let Ok(mut list) = connections.lock() {
        // Forget connections whose threads have already finished.
        list.retain(|(_, thread)| !thread.is_finished());
        list.push((control, thread));
    }
    Ok(())
}

fn serve_connection(mut stream: TcpStream) {
    let service = BenchService;
    loop {
        let request: Request = match read_frame_blocking(&mut stream) {
            Ok(Some(request)) => request,
            Ok(None) | Err(TransportError::Closed) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Connection read failed");
                break;
            }
        };

        let written = match handle_request(&service, request) {
            Reply::One(response) => write_frame_blocking(&mut stream, &response),
            Reply::Stream { id, count } => write_stream(&mut stream, &service, id, count),
        };
        if let Err(e) = written {
            tracing::debug!(error = %e, "Connection write failed");
            break;
        }
    }
}

fn write_stream(
    stream: &mut TcpStream,
    service: &BenchService,
    id: u64,
    count: u64,
) -> Result<(), TransportError> {
    for value in service.stream_values(count) {
        write_frame_blocking(stream, &Response::Item { id, value })?;
    }
    write_frame_blocking(stream, &Response::End { id, count })
}
