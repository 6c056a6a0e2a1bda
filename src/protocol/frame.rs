//! Wire frames and transports for the kernel connection.
//!
//! The connection carries length-delimited JSON frames: 4-byte big-endian
//! length followed by the serialized [`Frame`]. The protocol is private
//! between a specific client build and a matching kernel build.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite, LengthDelimitedCodec};

use super::event::AsyncEvent;

/// Maximum frame size. Large table chunks must fit in one frame.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Error type for frame encoding, decoding and transport I/O.
#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("Failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("Malformed frame: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single message on the kernel connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    /// Client-initiated request. `id` correlates the response.
    Call {
        id: u64,
        method: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
    /// Kernel reply to the call with the same `id`. Exactly one of
    /// `result` and `error` is populated.
    Response {
        id: u64,
        #[serde(default)]
        result: Option<serde_json::Value>,
        #[serde(default)]
        error: Option<String>,
    },
    /// Unsolicited push notification. Carries no correlation id.
    Event { event: AsyncEvent },
}

/// Length-delimited JSON codec for [`Frame`].
#[derive(Debug)]
pub struct FrameCodec {
    inner: LengthDelimitedCodec,
}

impl FrameCodec {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .max_frame_length(MAX_FRAME_LEN)
                .new_codec(),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        let Some(body) = self.inner.decode(src)? else {
            return Ok(None);
        };
        let frame = serde_json::from_slice(&body).map_err(FrameError::Decode)?;
        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let body = serde_json::to_vec(&frame).map_err(FrameError::Encode)?;
        self.inner.encode(Bytes::from(body), dst)?;
        Ok(())
    }
}

/// Receiving half of a kernel connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Receive the next frame. `Ok(None)` signals a clean end of stream.
    async fn recv(&mut self) -> Result<Option<Frame>, FrameError>;
}

/// Sending half of a kernel connection.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: Frame) -> Result<(), FrameError>;
}

/// [`FrameSource`] over any async byte reader.
pub struct FramedSource<R> {
    inner: FramedRead<R, FrameCodec>,
}

impl<R: AsyncRead + Unpin + Send> FramedSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: FramedRead::new(reader, FrameCodec::new()),
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> FrameSource for FramedSource<R> {
    async fn recv(&mut self) -> Result<Option<Frame>, FrameError> {
        self.inner.next().await.transpose()
    }
}

/// [`FrameSink`] over any async byte writer.
pub struct FramedSink<W> {
    inner: FramedWrite<W, FrameCodec>,
}

impl<W: AsyncWrite + Unpin + Send> FramedSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: FramedWrite::new(writer, FrameCodec::new()),
        }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> FrameSink for FramedSink<W> {
    async fn send(&mut self, frame: Frame) -> Result<(), FrameError> {
        self.inner.send(frame).await
    }
}
