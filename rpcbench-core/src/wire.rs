// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Loopback framing shared by the reference servers, adapters and the
//! directory service.
//!
//! A frame is a big-endian `u32` length followed by a JSON body. Both async
//! (tokio) and blocking (std) codecs are provided so thread-based servers and
//! blocking clients speak the same format as the task-based ones.

use std::io::{Read, Write};
use std::net::SocketAddr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransportError;
use crate::types::{Payload, ServiceName};

/// Largest accepted frame body. A doubled 1 MiB payload fits comfortably.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Client to server messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Simple { id: u64, value: Payload },
    Stream { id: u64, count: u64 },
    Register { name: ServiceName, endpoint: SocketAddr },
    Lookup { name: ServiceName },
    Remove { name: ServiceName },
    Ping,
}

impl Request {
    /// Correlation id of a call request.
    pub fn id(&self) -> Option<u64> {
        match self {
            Self::Simple { id, .. } | Self::Stream { id, .. } => Some(*id),
            _ => None,
        }
    }
}

/// Server to client messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Response {
    Value { id: u64, value: Payload },
    Item { id: u64, value: i64 },
    End { id: u64, count: u64 },
    Error { id: u64, message: String },
    Endpoint { endpoint: Option<SocketAddr> },
    Ack,
}

impl Response {
    /// Correlation id of a call response.
    pub fn id(&self) -> Option<u64> {
        match self {
            Self::Value { id, .. }
            | Self::Item { id, .. }
            | Self::End { id, .. }
            | Self::Error { id, .. } => Some(*id),
            _ => None,
        }
    }
}

fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, TransportError> {
    let body = serde_json::to_vec(message).map_err(|e| TransportError::Protocol {
        reason: format!("encode failed: {}", e),
    })?;
    if body.len() > MAX_FRAME_LEN {
        return Err(TransportError::Protocol {
            reason: format!("frame of {} bytes exceeds {}", body.len(), MAX_FRAME_LEN),
        });
    }
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, TransportError> {
    serde_json::from_slice(body).map_err(|e| TransportError::Protocol {
        reason: format!("decode failed: {}", e),
    })
}

fn check_len(len: u32) -> Result<usize, TransportError> {
    let len = len as usize;
    if len > MAX_FRAME_LEN {
        return Err(TransportError::Protocol {
            reason: format!("frame of {} bytes exceeds {}", len, MAX_FRAME_LEN),
        });
    }
    Ok(len)
}

/// Write one frame to an async stream.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode(message)?;
    writer.write_all(&frame).await.map_err(TransportError::io)?;
    writer.flush().await.map_err(TransportError::io)
}

/// Read one frame from an async stream. `Ok(None)` on clean end of stream.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, TransportError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = match reader.read_u32().await {
        Ok(len) => check_len(len)?,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(TransportError::io(e)),
    };
    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(TransportError::io)?;
    decode(&body).map(Some)
}

/// Write one frame to a blocking stream.
pub fn write_frame_blocking<W, T>(writer: &mut W, message: &T) -> Result<(), TransportError>
where
    W: Write,
    T: Serialize,
{
    let frame = encode(message)?;
    writer.write_all(&frame).map_err(TransportError::io)?;
    writer.flush().map_err(TransportError::io)
}

/// Read one frame from a blocking stream. `Ok(None)` on clean end of stream.
pub fn read_frame_blocking<R, T>(reader: &mut R) -> Result<Option<T>, TransportError>
where
    R: Read,
    T: DeserializeOwned,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(TransportError::io(e)),
    }
    let len = check_len(u32::from_be_bytes(header))?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).map_err(TransportError::io)?;
    decode(&body).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_request_json_shape() {
        let json = serde_json::to_string(&Request::Simple {
            id: 7,
            value: Payload::Int(42),
        })
        .unwrap();
        assert_eq!(json, r#"{"op":"simple","id":7,"value":42}"#);
    }

    #[test]
    fn test_blocking_frames_back_to_back() {
        let mut buf = Vec::new();
        write_frame_blocking(&mut buf, &Response::Item { id: 1, value: 0 }).unwrap();
        write_frame_blocking(&mut buf, &Response::End { id: 1, count: 1 }).unwrap();

        let mut cursor = Cursor::new(buf);
        let first: Option<Response> = read_frame_blocking(&mut cursor).unwrap();
        let second: Option<Response> = read_frame_blocking(&mut cursor).unwrap();
        let third: Option<Response> = read_frame_blocking(&mut cursor).unwrap();
        assert_eq!(first, Some(Response::Item { id: 1, value: 0 }));
        assert_eq!(second, Some(Response::End { id: 1, count: 1 }));
        assert_eq!(third, None);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut cursor = Cursor::new(((MAX_FRAME_LEN + 1) as u32).to_be_bytes().to_vec());
        let result: Result<Option<Response>, _> = read_frame_blocking(&mut cursor);
        assert!(matches!(result, Err(TransportError::Protocol { .. })));
    }

    #[test]
    fn test_garbage_body_is_protocol_error() {
        let mut buf = 3u32.to_be_bytes().to_vec();
        buf.extend_from_slice(b"{{{");
        let result: Result<Option<Response>, _> = read_frame_blocking(&mut Cursor::new(buf));
        assert!(matches!(result, Err(TransportError::Protocol { .. })));
    }

    #[tokio::test]
    async fn test_async_frames_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let request = Request::Stream { id: 3, count: 10 };
        write_frame(&mut client, &request).await.unwrap();
        drop(client);

        let received: Option<Request> = read_frame(&mut server).await.unwrap();
        assert_eq!(received, Some(request));
        let eof: Option<Request> = read_frame(&mut server).await.unwrap();
        assert!(eof.is_none());
    }
}
