// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Backend lifecycle coordination.
//!
//! Brings a transport backend up in one of three modes (in-process,
//! isolated subprocess, directory-mediated), hands out a ready
//! [`TransportHandle`], and releases everything the handle owns on teardown.
//! A failed setup releases what it acquired before the error is returned.

mod endpoint;
mod process;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, DirectoryConfig, ImplementationConfig};
use crate::directory::{DirectoryClient, RetryPolicy};
use crate::error::{LifecycleError, TransportError};
use crate::server::{ServerHandle, LOOPBACK};
use crate::transport::{build_transport, Transport};
use crate::types::{ServiceName, Sharing, TransportKind};

pub use endpoint::allocate_port;
pub use process::{ServerCommand, ServerProcess};
pub use state::{BackendState, BackendStateMachine};

/// Timing and discovery parameters of the coordinator.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub ready_timeout: Duration,
    pub setup_timeout: Duration,
    pub shutdown_grace: Duration,
    pub call_timeout: Duration,
    /// Executable with the `serve` sub-command; the current one if unset.
    pub server_program: Option<PathBuf>,
    pub directory: DirectoryConfig,
}

impl LifecycleSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ready_timeout: config.lifecycle.ready_timeout,
            setup_timeout: config.lifecycle.setup_timeout,
            shutdown_grace: config.lifecycle.shutdown_grace,
            call_timeout: config.harness.call_timeout,
            server_program: config.lifecycle.server_program.clone(),
            directory: config.directory.clone(),
        }
    }
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// What to bring up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendTarget {
    pub kind: TransportKind,
    pub isolated: bool,
}

impl BackendTarget {
    pub fn new(kind: TransportKind, isolated: bool) -> Self {
        Self {
            kind,
            isolated: isolated && kind.supports_isolation(),
        }
    }

    pub fn label(&self) -> String {
        ImplementationConfig::new(self.kind, self.isolated).name()
    }
}

impl From<&ImplementationConfig> for BackendTarget {
    fn from(config: &ImplementationConfig) -> Self {
        Self::new(config.kind, config.isolated)
    }
}

/// Something a handle owns and must release on teardown.
#[derive(Debug)]
enum BackendResource {
    Server(ServerHandle),
    Process(ServerProcess),
    Registration {
        client: DirectoryClient,
        name: ServiceName,
    },
}

/// A backend brought up by the coordinator.
///
/// Must be released with [`LifecycleCoordinator::teardown`]; dropping it
/// still kills subprocesses and stops servers, but without the grace period.
pub struct TransportHandle {
    target: BackendTarget,
    transport: Option<Arc<dyn Transport>>,
    resources: Vec<BackendResource>,
    state: BackendStateMachine,
    endpoint: Option<SocketAddr>,
    released: bool,
}

impl std::fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportHandle")
            .field("target", &self.target)
            .field("state", &self.state.state())
            .field("endpoint", &self.endpoint)
            .field("resources", &self.resources.len())
            .finish()
    }
}

impl TransportHandle {
    fn new(target: BackendTarget) -> Self {
        Self {
            target,
            transport: None,
            resources: Vec::new(),
            state: BackendStateMachine::new(target.label()),
            endpoint: None,
            released: false,
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.target.kind
    }

    pub fn is_isolated(&self) -> bool {
        self.target.isolated
    }

    pub fn label(&self) -> String {
        self.target.label()
    }

    pub fn state(&self) -> BackendState {
        self.state.state()
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    /// Endpoint the client talks to. `None` for the in-process kind.
    pub fn endpoint(&self) -> Option<SocketAddr> {
        self.endpoint
    }

    pub fn sharing(&self) -> Sharing {
        self.transport
            .as_ref()
            .map(|t| t.sharing())
            .unwrap_or(Sharing::PerCall)
    }

    /// The client of a ready backend.
    pub fn transport(&self) -> Result<Arc<dyn Transport>, TransportError> {
        match &self.transport {
            Some(transport) if self.state.is_ready() => Ok(Arc::clone(transport)),
            _ => Err(TransportError::NotReady),
        }
    }

    fn fail(&mut self) {
        if let Err(e) = self.state.transition_to(BackendState::Failed) {
            tracing::debug!(backend = %self.label(), error = %e, "Not marking backend failed");
        }
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        if !self.released && !self.resources.is_empty() {
            tracing::warn!(
                backend = %self.label(),
                resources = self.resources.len(),
                "Transport handle dropped without teardown"
            );
        }
    }
}

/// Uniform setup and teardown of heterogeneous backends.
#[derive(Debug, Clone)]
pub struct LifecycleCoordinator {
    settings: LifecycleSettings,
}

impl LifecycleCoordinator {
    pub fn new(settings: LifecycleSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    /// Bring a backend up and return a ready handle.
    ///
    /// Bounded by the setup timeout. On any error every resource acquired so
    /// far is released before the error is returned.
    pub async fn setup(&self, target: &BackendTarget) -> Result<TransportHandle, LifecycleError> {
        let mut handle = TransportHandle::new(*target);
        let timeout = self.settings.setup_timeout;

        tracing::info!(backend = %handle.label(), "Setting up backend");

        let result = match tokio::time::timeout(timeout, self.bring_up(&mut handle)).await {
            Ok(Ok(())) => handle
                .state
                .transition_to(BackendState::Ready)
                .map_err(LifecycleError::from),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(LifecycleError::BackendTimeout {
                phase: "setup",
                timeout_ms: timeout.as_millis() as u64,
            }),
        };

        match result {
            Ok(()) => {
                tracing::info!(
                    backend = %handle.label(),
                    endpoint = ?handle.endpoint,
                    sharing = %handle.sharing(),
                    "Backend ready"
                );
                Ok(handle)
            }
            Err(e) => {
                tracing::warn!(backend = %handle.label(), error = %e, "Backend setup failed");
                handle.fail();
                self.teardown(&mut handle).await;
                Err(e)
            }
        }
    }

    async fn bring_up(&self, handle: &mut TransportHandle) -> Result<(), LifecycleError> {
        let kind = handle.target.kind;
        handle.state.transition_to(BackendState::AwaitingReady)?;

        let endpoint = match (kind, handle.target.isolated) {
            (TransportKind::InProcess, _) => None,
            (_, false) => Some(self.start_in_process(handle).await?),
            (_, true) => Some(self.start_isolated(handle).await?),
        };
        handle.endpoint = endpoint;

        let transport = build_transport(kind, endpoint, self.settings.call_timeout)
            .map_err(|e| startup(kind, format!("no client for backend: {}", e)))?;
        // Stored first so teardown closes it even if setup fails.
        handle.transport = Some(Arc::clone(&transport));
        transport
            .setup()
            .await
            .map_err(|e| startup(kind, format!("transport setup failed: {}", e)))?;

        Ok(())
    }

    async fn start_in_process(&self, handle: &mut TransportHandle) -> Result<SocketAddr, LifecycleError> {
        let kind = handle.target.kind;
        let server = ServerHandle::start(kind, SocketAddr::from((LOOPBACK, 0)))
            .await
            .map_err(|e| startup(kind, e.to_string()))?;
        let addr = server.local_addr();
        handle.resources.push(BackendResource::Server(server));

        if !kind.uses_directory(false) {
            return Ok(addr);
        }

        let client = self.directory_client(kind).await?;
        let name = ServiceName::unique(&format!("rpcbench.{}", kind));
        client
            .register(name.clone(), addr)
            .await
            .map_err(|e| discovery(&name, e))?;
        handle.resources.push(BackendResource::Registration {
            client: client.clone(),
            name: name.clone(),
        });

        client.resolve(&name, &self.retry_policy()).await
    }

    async fn start_isolated(&self, handle: &mut TransportHandle) -> Result<SocketAddr, LifecycleError> {
        let kind = handle.target.kind;
        let port = allocate_port(kind)?;

        let registration = if kind.uses_directory(true) {
            let client = self.directory_client(kind).await?;
            Some((client, ServiceName::unique(&format!("rpcbench.{}", kind))))
        } else {
            None
        };

        let command = ServerCommand::serve(
            self.server_program(kind)?,
            kind,
            port,
            registration
                .as_ref()
                .map(|(client, name)| (name, client.addr())),
        );
        // Owned by the handle before the readiness wait, so a setup timeout
        // still terminates and reaps it.
        let process = ServerProcess::start(&command, kind)?;
        handle.resources.push(BackendResource::Process(process));
        if let Some(BackendResource::Process(process)) = handle.resources.last_mut() {
            process.wait_ready(self.settings.ready_timeout).await?;
        }

        match registration {
            Some((client, name)) => {
                // The server registers itself; removing again on teardown
                // covers a server that had to be killed.
                handle.resources.push(BackendResource::Registration {
                    client: client.clone(),
                    name: name.clone(),
                });
                client.resolve(&name, &self.retry_policy()).await
            }
            None => Ok(SocketAddr::from((LOOPBACK, port.value()))),
        }
    }

    /// Connect to the pre-existing directory service, retrying while it
    /// comes up.
    async fn directory_client(&self, kind: TransportKind) -> Result<DirectoryClient, LifecycleError> {
        let client = DirectoryClient::new(self.settings.directory.address)
            .with_timeout(self.settings.call_timeout);
        client.wait_reachable(&self.retry_policy()).await.map_err(|e| {
            tracing::warn!(kind = %kind, addr = %client.addr(), "Directory service unreachable");
            e
        })?;
        Ok(client)
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.settings.directory)
    }

    fn server_program(&self, kind: TransportKind) -> Result<PathBuf, LifecycleError> {
        match &self.settings.server_program {
            Some(program) => Ok(program.clone()),
            None => std::env::current_exe()
                .map_err(|e| startup(kind, format!("cannot locate server program: {}", e))),
        }
    }

    /// Release everything the handle owns. Idempotent; never fails.
    ///
    /// Secondary errors are logged and swallowed so the first error of a
    /// failed setup is the one reported.
    pub async fn teardown(&self, handle: &mut TransportHandle) {
        if handle.released {
            tracing::debug!(backend = %handle.label(), "Backend already torn down");
            return;
        }
        handle.released = true;

        if let Err(e) = handle.state.transition_to(BackendState::Terminating) {
            tracing::debug!(backend = %handle.label(), error = %e, "Teardown from unexpected state");
        }

        if let Some(transport) = handle.transport.take() {
            transport.teardown().await;
        }

        // Release in reverse acquisition order.
        while let Some(resource) = handle.resources.pop() {
            match resource {
                BackendResource::Registration { client, name } => {
                    if let Err(e) = client.remove(&name).await {
                        tracing::warn!(name = %name, error = %e, "Failed to remove directory registration");
                    }
                }
                BackendResource::Server(server) => server.stop().await,
                BackendResource::Process(mut process) => {
                    process.terminate(self.settings.shutdown_grace).await;
                }
            }
        }

        if let Err(e) = handle.state.transition_to(BackendState::Terminated) {
            tracing::debug!(backend = %handle.label(), error = %e, "Could not mark backend terminated");
        }
        tracing::info!(backend = %handle.label(), "Backend torn down");
    }
}

fn startup(kind: TransportKind, reason: String) -> LifecycleError {
    LifecycleError::BackendStartup {
        kind,
        reason,
        output: Vec::new(),
    }
}

fn discovery(name: &ServiceName, err: TransportError) -> LifecycleError {
    LifecycleError::BackendDiscovery {
        name: name.to_string(),
        attempts: 1,
        reason: err.to_string(),
    }
}
