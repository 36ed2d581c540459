// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Uniform client interface over every transport kind.
//!
//! The load generator only ever sees `dyn Transport`; the concrete adapter is
//! chosen once per backend by [`build_transport`].

mod blocking;
mod framed;
mod in_process;
mod multiplex;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::TransportError;
use crate::types::{Payload, Sharing, TransportKind};
use crate::wire::Response;

pub use blocking::BlockingTransport;
pub use framed::FramedTransport;
pub use in_process::InProcessTransport;
pub use multiplex::MultiplexTransport;

/// Ordered stream of values produced by a streaming call.
pub type ValueStream = BoxStream<'static, Result<i64, TransportError>>;

/// Client side of one benchmark backend.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Whether concurrent calls share one connection.
    fn sharing(&self) -> Sharing;

    /// Establish connections and probe the backend. Calls made before a
    /// successful `setup` fail with `TransportError::NotReady`.
    async fn setup(&self) -> Result<(), TransportError>;

    /// Close connections and fail pending calls. Never fails.
    async fn teardown(&self);

    /// The unary doubling call.
    async fn simple_call(&self, value: Payload) -> Result<Payload, TransportError>;

    /// Stream the values `0..count`. `count == 0` yields an empty stream.
    async fn stream_values(&self, count: u64) -> Result<ValueStream, TransportError>;
}

/// Build the adapter for `kind`. Every kind except in-process needs an
/// endpoint.
pub fn build_transport(
    kind: TransportKind,
    endpoint: Option<SocketAddr>,
    call_timeout: Duration,
) -> Result<Arc<dyn Transport>, TransportError> {
    if kind == TransportKind::InProcess {
        return Ok(Arc::new(InProcessTransport::new()));
    }

    let endpoint = endpoint.ok_or_else(|| TransportError::Connect {
        endpoint: "<none>".to_string(),
        reason: format!("{} transport requires an endpoint", kind),
    })?;

    let transport: Arc<dyn Transport> = match kind {
        TransportKind::Threaded | TransportKind::Directory => {
            Arc::new(BlockingTransport::new(kind, endpoint, call_timeout))
        }
        TransportKind::MessageQueue | TransportKind::Broker => {
            Arc::new(MultiplexTransport::new(kind, endpoint, call_timeout))
        }
        TransportKind::Framed => Arc::new(FramedTransport::new(kind, endpoint, call_timeout)),
        TransportKind::InProcess => Arc::new(InProcessTransport::new()),
    };
    Ok(transport)
}

/// Interpret the reply to a unary request `id`.
pub(crate) fn unary_reply(id: u64, response: Response) -> Result<Payload, TransportError> {
    match response {
        Response::Value { id: got, value } if got == id => Ok(value),
        Response::Error { message, .. } => Err(TransportError::Remote { message }),
        other => Err(TransportError::Protocol {
            reason: format!("unexpected reply to call {}: {:?}", id, other),
        }),
    }
}

/// One step of a streaming reply: `Some(item)` to yield, `None` when done.
pub(crate) enum StreamStep {
    Item(i64),
    End,
    Fail(TransportError),
}

/// Interpret one frame of the reply to stream request `id`.
pub(crate) fn stream_step(id: u64, response: Option<Response>) -> StreamStep {
    match response {
        Some(Response::Item { id: got, value }) if got == id => StreamStep::Item(value),
        Some(Response::End { id: got, .. }) if got == id => StreamStep::End,
        Some(Response::Error { message, .. }) => {
            StreamStep::Fail(TransportError::Remote { message })
        }
        Some(other) => StreamStep::Fail(TransportError::Protocol {
            reason: format!("unexpected frame in stream {}: {:?}", id, other),
        }),
        None => StreamStep::Fail(TransportError::Closed),
    }
}

/// Replace the zero timeout of a socket-level timeout with the configured one.
pub(crate) fn with_call_timeout(err: TransportError, call_timeout: Duration) -> TransportError {
    match err {
        TransportError::Timeout { .. } => TransportError::Timeout {
            timeout_ms: call_timeout.as_millis() as u64,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_requires_endpoint() {
        let timeout = Duration::from_secs(1);
        assert!(build_transport(TransportKind::InProcess, None, timeout).is_ok());
        assert!(build_transport(TransportKind::Framed, None, timeout).is_err());

        let endpoint: SocketAddr = "127.0.0.1:1".parse().unwrap();
        for kind in TransportKind::ALL {
            let transport = build_transport(kind, Some(endpoint), timeout).unwrap();
            assert_eq!(transport.kind(), kind);
        }
    }

    #[test]
    fn test_sharing_per_kind() {
        let endpoint = Some("127.0.0.1:1".parse().unwrap());
        let timeout = Duration::from_secs(1);
        let sharing = |kind| build_transport(kind, endpoint, timeout).unwrap().sharing();
        assert_eq!(sharing(TransportKind::InProcess), Sharing::Shared);
        assert_eq!(sharing(TransportKind::Threaded), Sharing::PerCall);
        assert_eq!(sharing(TransportKind::MessageQueue), Sharing::Shared);
        assert_eq!(sharing(TransportKind::Framed), Sharing::PerCall);
        assert_eq!(sharing(TransportKind::Directory), Sharing::PerCall);
        assert_eq!(sharing(TransportKind::Broker), Sharing::Shared);
    }

    #[test]
    fn test_unary_reply_id_mismatch() {
        let reply = Response::Value {
            id: 9,
            value: Payload::Int(1),
        };
        assert!(matches!(
            unary_reply(1, reply),
            Err(TransportError::Protocol { .. })
        ));
    }
}
