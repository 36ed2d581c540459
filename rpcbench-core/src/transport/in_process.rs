// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Direct function-call baseline.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;

use crate::error::TransportError;
use crate::service::BenchService;
use crate::types::{Payload, Sharing, TransportKind};

use super::{Transport, ValueStream};

/// Calls the service directly with no transport in between.
#[derive(Debug, Default)]
pub struct InProcessTransport {
    service: BenchService,
    ready: AtomicBool,
}

impl InProcessTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_ready(&self) -> Result<(), TransportError> {
        if self.ready.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(TransportError::NotReady)
        }
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::InProcess
    }

    fn sharing(&self) -> Sharing {
        Sharing::Shared
    }

    async fn setup(&self) -> Result<(), TransportError> {
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    async fn teardown(&self) {
        self.ready.store(false, Ordering::Release);
    }

    async fn simple_call(&self, value: Payload) -> Result<Payload, TransportError> {
        self.check_ready()?;
        self.service
            .simple_call(&value)
            .map_err(|e| TransportError::Remote {
                message: e.to_string(),
            })
    }

    async fn stream_values(&self, count: u64) -> Result<ValueStream, TransportError> {
        self.check_ready()?;
        Ok(futures::stream::iter(self.service.stream_values(count).map(Ok)).boxed())
    }
}
