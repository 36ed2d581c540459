// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Directory (name) service.
//!
//! Maps logical service names to endpoints so directory-mediated backends
//! can be located by name. The server keeps registrations in a DashMap; the
//! client opens a short-lived connection per operation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::DirectoryConfig;
use crate::error::{LifecycleError, TransportError};
use crate::server::spawn_accept_loop;
use crate::types::ServiceName;
use crate::wire::{read_frame, write_frame, Request, Response};

/// Default timeout for one directory operation.
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

type Registry = Arc<DashMap<ServiceName, SocketAddr>>;

/// Retry schedule for resolving a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: Duration::from_secs(2),
        }
    }
}

impl From<&DirectoryConfig> for RetryPolicy {
    fn from(config: &DirectoryConfig) -> Self {
        Self {
            attempts: config.lookup_attempts,
            backoff: config.lookup_backoff,
        }
    }
}

/// Directory service server.
#[derive(Debug)]
pub struct DirectoryServer {
    registry: Registry,
    local_addr: SocketAddr,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl DirectoryServer {
    /// Bind and start serving registrations.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::Connect {
                endpoint: addr.to_string(),
                reason: format!("bind failed: {}", e),
            })?;
        let local_addr = listener.local_addr().map_err(TransportError::io)?;
        let registry: Registry = Arc::new(DashMap::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handler_registry = Arc::clone(&registry);
        let task = spawn_accept_loop(listener, shutdown_rx, move |stream| {
            serve_connection(stream, Arc::clone(&handler_registry))
        });

        tracing::info!(addr = %local_addr, "Directory service listening");

        Ok(Self {
            registry,
            local_addr,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Stop serving and wait for the accept task.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
            tracing::info!(
                addr = %self.local_addr,
                remaining = self.registry.len(),
                "Directory service stopped"
            );
        }
    }
}

impl Drop for DirectoryServer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn serve_connection(mut stream: TcpStream, registry: Registry) {
    loop {
        let request: Request = match read_frame(&mut stream).await {
            Ok(Some(request)) => request,
            Ok(None) | Err(TransportError::Closed) => return,
            Err(e) => {
                tracing::debug!(error = %e, "Directory read failed");
                return;
            }
        };

        let response = match request {
            Request::Register { name, endpoint } => {
                tracing::debug!(name = %name, endpoint = %endpoint, "Register");
                registry.insert(name, endpoint);
                Response::Ack
            }
            Request::Lookup { name } => Response::Endpoint {
                endpoint: registry.get(&name).map(|entry| *entry.value()),
            },
            Request::Remove { name } => {
                if registry.remove(&name).is_some() {
                    tracing::debug!(name = %name, "Removed registration");
                }
                Response::Ack
            }
            Request::Ping => Response::Ack,
            other => Response::Error {
                id: other.id().unwrap_or(0),
                message: "benchmark calls are not served by the directory".to_string(),
            },
        };

        if let Err(e) = write_frame(&mut stream, &response).await {
            tracing::debug!(error = %e, "Directory write failed");
            return;
        }
    }
}

/// Client of a directory service.
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    addr: SocketAddr,
    timeout: Duration,
}

impl DirectoryClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    /// Bound every operation by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Check that the service is reachable.
    pub async fn ping(&self) -> Result<(), TransportError> {
        self.expect_ack(Request::Ping).await
    }

    pub async fn register(&self, name: ServiceName, endpoint: SocketAddr) -> Result<(), TransportError> {
        self.expect_ack(Request::Register { name, endpoint }).await
    }

    pub async fn lookup(&self, name: &ServiceName) -> Result<Option<SocketAddr>, TransportError> {
        match self.request(Request::Lookup { name: name.clone() }).await? {
            Response::Endpoint { endpoint } => Ok(endpoint),
            other => Err(unexpected(&other)),
        }
    }

    /// Remove a registration. Removing an unknown name succeeds.
    pub async fn remove(&self, name: &ServiceName) -> Result<(), TransportError> {
        self.expect_ack(Request::Remove { name: name.clone() }).await
    }

    /// Ping the service, retrying per `policy` until it answers.
    pub async fn wait_reachable(&self, policy: &RetryPolicy) -> Result<(), LifecycleError> {
        let attempts = policy.attempts.max(1);
        let mut last_reason = String::new();

        for attempt in 1..=attempts {
            match self.ping().await {
                Ok(()) => {
                    tracing::debug!(addr = %self.addr, attempt, "Directory service reachable");
                    return Ok(());
                }
                Err(e) => last_reason = e.to_string(),
            }

            tracing::debug!(
                addr = %self.addr,
                attempt,
                attempts,
                reason = %last_reason,
                "Directory service not reachable"
            );
            if attempt < attempts {
                tokio::time::sleep(policy.backoff).await;
            }
        }

        Err(LifecycleError::BackendDiscovery {
            name: format!("directory service at {}", self.addr),
            attempts,
            reason: last_reason,
        })
    }

    /// Look `name` up, retrying per `policy` until it is registered.
    pub async fn resolve(
        &self,
        name: &ServiceName,
        policy: &RetryPolicy,
    ) -> Result<SocketAddr, LifecycleError> {
        let attempts = policy.attempts.max(1);
        let mut last_reason = String::new();

        for attempt in 1..=attempts {
            match self.lookup(name).await {
                Ok(Some(endpoint)) => {
                    tracing::debug!(name = %name, endpoint = %endpoint, attempt, "Resolved");
                    return Ok(endpoint);
                }
                Ok(None) => last_reason = "name not registered".to_string(),
                Err(e) => last_reason = e.to_string(),
            }

            tracing::debug!(
                name = %name,
                attempt,
                attempts,
                reason = %last_reason,
                "Lookup failed"
            );
            if attempt < attempts {
                tokio::time::sleep(policy.backoff).await;
            }
        }

        Err(LifecycleError::BackendDiscovery {
            name: name.to_string(),
            attempts,
            reason: last_reason,
        })
    }

    async fn expect_ack(&self, request: Request) -> Result<(), TransportError> {
        match self.request(request).await? {
            Response::Ack => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    async fn request(&self, request: Request) -> Result<Response, TransportError> {
        let exchange = async {
            let mut stream =
                TcpStream::connect(self.addr)
                    .await
                    .map_err(|e| TransportError::Connect {
                        endpoint: self.addr.to_string(),
                        reason: e.to_string(),
                    })?;
            write_frame(&mut stream, &request).await?;
            read_frame::<_, Response>(&mut stream)
                .await?
                .ok_or(TransportError::Closed)
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(Response::Error { message, .. })) => Err(TransportError::Remote { message }),
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

fn unexpected(response: &Response) -> TransportError {
    TransportError::Protocol {
        reason: format!("unexpected directory response: {:?}", response),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn start() -> (DirectoryServer, DirectoryClient) {
        let server = DirectoryServer::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let client = DirectoryClient::new(server.local_addr());
        (server, client)
    }

    #[tokio::test]
    async fn test_register_lookup_remove() {
        let (mut server, client) = start().await;
        let name = ServiceName::new("example.benchmark.service").unwrap();
        let endpoint: SocketAddr = "127.0.0.1:4242".parse().unwrap();

        client.ping().await.unwrap();
        assert_eq!(client.lookup(&name).await.unwrap(), None);

        client.register(name.clone(), endpoint).await.unwrap();
        assert_eq!(server.len(), 1);
        assert_eq!(client.lookup(&name).await.unwrap(), Some(endpoint));

        client.remove(&name).await.unwrap();
        client.remove(&name).await.unwrap();
        assert!(server.is_empty());

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_resolve_exhausts_attempts() {
        let (_server, client) = start().await;
        let policy = RetryPolicy {
            attempts: 3,
            backoff: Duration::from_millis(10),
        };
        let err = client
            .resolve(&ServiceName::new("missing").unwrap(), &policy)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::BackendDiscovery { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_resolve_waits_for_late_registration() {
        let (_server, client) = start().await;
        let name = ServiceName::unique("late");
        let endpoint: SocketAddr = "127.0.0.1:5555".parse().unwrap();

        let registrar = client.clone();
        let late_name = name.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            registrar.register(late_name, endpoint).await.unwrap();
        });

        let policy = RetryPolicy {
            attempts: 20,
            backoff: Duration::from_millis(25),
        };
        assert_eq!(client.resolve(&name, &policy).await.unwrap(), endpoint);
    }

    #[tokio::test]
    async fn test_unreachable_directory() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = DirectoryClient::new(addr).with_timeout(Duration::from_secs(1));
        assert!(client.ping().await.is_err());
    }

    #[tokio::test]
    async fn test_wait_reachable_retries_until_service_starts() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let late_server = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            DirectoryServer::bind(addr).await.unwrap()
        });

        let client = DirectoryClient::new(addr).with_timeout(Duration::from_secs(1));
        let policy = RetryPolicy {
            attempts: 20,
            backoff: Duration::from_millis(50),
        };
        client.wait_reachable(&policy).await.unwrap();

        let mut server = late_server.await.unwrap();
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_wait_reachable_reports_attempts() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = DirectoryClient::new(addr).with_timeout(Duration::from_secs(1));
        let policy = RetryPolicy {
            attempts: 3,
            backoff: Duration::from_millis(10),
        };
        let err = client.wait_reachable(&policy).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::BackendDiscovery { attempts: 3, .. }
        ));
    }
}
