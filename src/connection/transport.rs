// src/connection/transport.rs

//! The message-level transport a `Connection` runs over.
//!
//! The session code only sees whole frames. `WsTransport` adapts an upgraded axum
//! WebSocket; `MemoryTransport` is an in-process pair used by tests and embedders.

use crate::core::errors::NotifierError;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use bytes::Bytes;
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use futures::{Sink, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

/// Close codes used when tearing a session down.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    /// Sent by clients that received a malformed frame.
    pub const PROTOCOL_ERROR: u16 = 1002;
    /// Only ever observed, never sent.
    pub const ABNORMAL: u16 = 1006;
    pub const POLICY_VIOLATION: u16 = 1008;
    /// Application code: a newer session for the same identity took over.
    pub const REPLACED: u16 = 4000;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn normal() -> Self {
        Self::new(close_code::NORMAL, "")
    }

    pub fn shutdown() -> Self {
        Self::new(close_code::GOING_AWAY, "server shutting down")
    }

    pub fn replaced() -> Self {
        Self::new(close_code::REPLACED, "replaced by a newer connection")
    }

    pub fn read_timeout() -> Self {
        Self::new(close_code::POLICY_VIOLATION, "read deadline expired")
    }
}

/// A single message-boundary frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<CloseReason>),
}

impl Frame {
    pub fn is_close(&self) -> bool {
        matches!(self, Frame::Close(_))
    }
}

/// Anything that can carry frames in both directions.
///
/// Implemented for every type with the right `Stream` and `Sink` shape, so
/// callers never implement it by hand.
pub trait Transport:
    Stream<Item = Result<Frame, NotifierError>> + Sink<Frame, Error = NotifierError> + Send + Unpin + 'static
{
}

impl<T> Transport for T where
    T: Stream<Item = Result<Frame, NotifierError>>
        + Sink<Frame, Error = NotifierError>
        + Send
        + Unpin
        + 'static
{
}

// --- WebSocket adapter ---

/// Adapts an upgraded axum `WebSocket` to the `Transport` shape.
pub struct WsTransport {
    inner: WebSocket,
}

impl WsTransport {
    pub fn new(inner: WebSocket) -> Self {
        Self { inner }
    }
}

impl From<Message> for Frame {
    fn from(msg: Message) -> Self {
        match msg {
            Message::Text(text) => Frame::Text(text.as_str().to_owned()),
            Message::Binary(data) => Frame::Binary(data),
            Message::Ping(data) => Frame::Ping(data),
            Message::Pong(data) => Frame::Pong(data),
            Message::Close(frame) => Frame::Close(frame.map(|f| CloseReason {
                code: f.code,
                reason: f.reason.as_str().to_owned(),
            })),
        }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data),
            Frame::Ping(data) => Message::Ping(data),
            Frame::Pong(data) => Message::Pong(data),
            Frame::Close(reason) => Message::Close(reason.map(|r| CloseFrame {
                code: r.code,
                reason: r.reason.into(),
            })),
        }
    }
}

impl Stream for WsTransport {
    type Item = Result<Frame, NotifierError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.get_mut().inner).poll_next(cx) {
            Poll::Ready(Some(Ok(msg))) => Poll::Ready(Some(Ok(msg.into()))),
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e.into()))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Sink<Frame> for WsTransport {
    type Error = NotifierError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.get_mut().inner)
            .poll_ready(cx)
            .map_err(Into::into)
    }

    fn start_send(self: Pin<&mut Self>, item: Frame) -> Result<(), Self::Error> {
        Pin::new(&mut self.get_mut().inner)
            .start_send(item.into())
            .map_err(Into::into)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.get_mut().inner)
            .poll_flush(cx)
            .map_err(Into::into)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.get_mut().inner)
            .poll_close(cx)
            .map_err(Into::into)
    }
}

// --- In-memory transport ---

/// The server half of an in-process frame pipe.
pub struct MemoryTransport {
    inbound: UnboundedReceiver<Result<Frame, NotifierError>>,
    outbound: UnboundedSender<Frame>,
    stalled: Arc<AtomicBool>,
}

/// The client half of a `MemoryTransport`.
pub struct MemoryPeer {
    inbound: UnboundedSender<Result<Frame, NotifierError>>,
    outbound: UnboundedReceiver<Frame>,
    stalled: Arc<AtomicBool>,
}

impl MemoryTransport {
    /// Creates a connected `(server, client)` pair.
    pub fn pair() -> (MemoryTransport, MemoryPeer) {
        let (in_tx, in_rx) = unbounded();
        let (out_tx, out_rx) = unbounded();
        let stalled = Arc::new(AtomicBool::new(false));
        (
            MemoryTransport {
                inbound: in_rx,
                outbound: out_tx,
                stalled: stalled.clone(),
            },
            MemoryPeer {
                inbound: in_tx,
                outbound: out_rx,
                stalled,
            },
        )
    }
}

impl Stream for MemoryTransport {
    type Item = Result<Frame, NotifierError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inbound.poll_next_unpin(cx)
    }
}

impl Sink<Frame> for MemoryTransport {
    type Error = NotifierError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let this = self.get_mut();
        // A stalled peer never becomes writable again; only a write deadline gets
        // the writer out.
        if this.stalled.load(Ordering::Acquire) {
            return Poll::Pending;
        }
        Pin::new(&mut this.outbound)
            .poll_ready(cx)
            .map_err(Into::into)
    }

    fn start_send(self: Pin<&mut Self>, item: Frame) -> Result<(), Self::Error> {
        Pin::new(&mut self.get_mut().outbound)
            .start_send(item)
            .map_err(Into::into)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.get_mut().outbound)
            .poll_flush(cx)
            .map_err(Into::into)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.get_mut().outbound)
            .poll_close(cx)
            .map_err(Into::into)
    }
}

impl MemoryPeer {
    /// Delivers a frame to the server side. Returns `false` once the server half is gone.
    pub fn push(&self, frame: Frame) -> bool {
        self.inbound.unbounded_send(Ok(frame)).is_ok()
    }

    /// Makes the server's next read fail with `err`.
    pub fn push_error(&self, err: NotifierError) -> bool {
        self.inbound.unbounded_send(Err(err)).is_ok()
    }

    /// Ends the inbound stream, as if the client vanished without a close frame.
    pub fn hang_up(&self) {
        self.inbound.close_channel();
    }

    /// Makes every subsequent server write block until its deadline.
    pub fn stall_writes(&self) {
        self.stalled.store(true, Ordering::Release);
    }

    /// Waits for the next frame the server wrote. `None` once the server half is dropped.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.outbound.next().await
    }

    /// Returns an already-written frame without waiting.
    pub fn try_next_frame(&mut self) -> Option<Frame> {
        self.outbound.try_recv().ok()
    }
}
