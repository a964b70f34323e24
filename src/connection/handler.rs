// src/connection/handler.rs

//! Defines the `ConnectionHandler` which manages the full lifecycle of a client session.
//!
//! A session runs two duties. The write duty is spawned and drains the outbound queue
//! interleaved with keepalive probes. The read duty runs on the calling task and only
//! watches for liveness, control frames and closure. Whichever ends first closes the
//! connection, which cancels the other.

use super::guard::ConnectionGuard;
use super::session::{Connection, OutboundReceiver};
use super::transport::{CloseReason, Frame, Transport, close_code};
use crate::config::SessionConfig;
use crate::core::dispatcher::send_envelope;
use crate::core::errors::NotifierError;
use crate::core::metrics;
use crate::core::protocol::Envelope;
use crate::core::registry::{Registry, Role};
use bytes::Bytes;
use chrono::Utc;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit};
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tracing::{debug, info, warn};

/// Why the read duty stopped.
#[derive(Debug)]
enum ReadEnd {
    ClientClosed(Option<CloseReason>),
    StreamEnded,
    Failed(NotifierError),
    DeadlineExpired,
    Cancelled,
}

/// Manages the full lifecycle of one accepted session.
pub struct ConnectionHandler<T: Transport> {
    conn: Arc<Connection>,
    transport: T,
    outbound: OutboundReceiver,
    settings: SessionConfig,
    guard: ConnectionGuard,
}

impl<T: Transport> ConnectionHandler<T> {
    /// Performs the registration half of the handshake.
    ///
    /// Creates the `Connection`, registers it (evicting a previous session of the same
    /// student) and queues the `CONNECTED` greeting. The duties start with [`run`].
    ///
    /// [`run`]: ConnectionHandler::run
    pub fn accept(
        registry: Arc<Registry>,
        identity: &str,
        role: Role,
        transport: T,
        settings: SessionConfig,
    ) -> Self {
        let (conn, outbound) = Connection::new(identity, role, settings.outbound_queue_capacity);
        registry.register(conn.clone());
        metrics::CONNECTIONS_ACCEPTED_TOTAL.inc();
        let guard = ConnectionGuard::new(registry, conn.clone());

        send_envelope(&conn, &Envelope::connected(identity, Utc::now()));
        info!(
            connection_id = conn.id(),
            identity = %identity,
            role = %role,
            "WebSocket session established."
        );

        Self {
            conn,
            transport,
            outbound,
            settings,
            guard,
        }
    }

    /// Keeps `permit` until the session is torn down.
    pub fn with_permit(mut self, permit: OwnedSemaphorePermit) -> Self {
        self.guard.hold_permit(permit);
        self
    }

    /// The handle other components use to reach this session.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Runs both duties until the session ends, then tears it down.
    ///
    /// Returns the close frame the session ended with.
    pub async fn run(self) -> Option<CloseReason> {
        let Self {
            conn,
            transport,
            outbound,
            settings,
            guard,
        } = self;

        let (sink, stream) = transport.split::<Frame>();
        let sink = Arc::new(Mutex::new(sink));

        let writer = tokio::spawn(write_duty(
            conn.clone(),
            sink.clone(),
            outbound,
            settings.ping_interval,
            settings.write_timeout,
        ));

        let end = read_duty(&conn, stream, &sink, &settings).await;
        match end {
            ReadEnd::ClientClosed(reason) => {
                debug!(connection_id = conn.id(), ?reason, "Client initiated close.");
                conn.close();
            }
            ReadEnd::StreamEnded => {
                debug!(connection_id = conn.id(), "Stream ended without a close frame.");
                conn.close_with(CloseReason::new(close_code::ABNORMAL, "stream ended"));
            }
            ReadEnd::Failed(e) => {
                if is_normal_disconnect(&e) {
                    debug!(connection_id = conn.id(), "Connection closed by peer: {}", e);
                } else {
                    warn!(connection_id = conn.id(), "Connection read error: {}", e);
                }
                conn.close_with(CloseReason::new(close_code::ABNORMAL, e.to_string()));
            }
            ReadEnd::DeadlineExpired => {
                info!(
                    connection_id = conn.id(),
                    identity = %conn.identity(),
                    "No frame within {:?}, closing.",
                    settings.read_timeout
                );
                conn.close_with(CloseReason::read_timeout());
            }
            ReadEnd::Cancelled => {}
        }

        // The write duty observes the cancellation and exits; no task outlives the session.
        if let Err(e) = writer.await {
            warn!(connection_id = conn.id(), "Write duty ended abnormally: {}", e);
        }

        let reason = conn.close_reason();
        drop(guard);
        info!(
            connection_id = conn.id(),
            identity = %conn.identity(),
            role = %conn.role(),
            code = reason.as_ref().map(|r| r.code),
            "WebSocket session ended."
        );
        reason
    }
}

/// Writes one frame under the write lock, bounded by `write_timeout`.
async fn write_frame<K>(
    sink: &Mutex<K>,
    frame: Frame,
    write_timeout: Duration,
) -> Result<(), NotifierError>
where
    K: Sink<Frame, Error = NotifierError> + Unpin,
{
    timeout(write_timeout, async {
        let mut sink = sink.lock().await;
        sink.send(frame).await
    })
    .await
    .map_err(|_| NotifierError::WriteTimeout(write_timeout))?
}

async fn read_duty<S, K>(
    conn: &Connection,
    mut stream: S,
    sink: &Mutex<K>,
    settings: &SessionConfig,
) -> ReadEnd
where
    S: Stream<Item = Result<Frame, NotifierError>> + Unpin,
    K: Sink<Frame, Error = NotifierError> + Unpin,
{
    let cancel = conn.cancellation();
    loop {
        // The deadline restarts with every frame received.
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ReadEnd::Cancelled,
            next = timeout(settings.read_timeout, stream.next()) => next,
        };

        let frame = match next {
            Err(_) => return ReadEnd::DeadlineExpired,
            Ok(None) => return ReadEnd::StreamEnded,
            Ok(Some(Err(e))) => return ReadEnd::Failed(e),
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Frame::Ping(data) => {
                if let Err(e) = write_frame(sink, Frame::Pong(data), settings.write_timeout).await {
                    return ReadEnd::Failed(e);
                }
            }
            Frame::Pong(_) => {}
            Frame::Text(text) => {
                debug!(
                    connection_id = conn.id(),
                    len = text.len(),
                    "Ignoring inbound text frame."
                );
            }
            Frame::Binary(data) => {
                debug!(
                    connection_id = conn.id(),
                    len = data.len(),
                    "Ignoring inbound binary frame."
                );
            }
            Frame::Close(reason) => return ReadEnd::ClientClosed(reason),
        }
    }
}

async fn write_duty<K>(
    conn: Arc<Connection>,
    sink: Arc<Mutex<K>>,
    mut outbound: OutboundReceiver,
    ping_interval: Duration,
    write_timeout: Duration,
) where
    K: Sink<Frame, Error = NotifierError> + Unpin,
{
    let cancel = conn.cancellation();
    let mut keepalive = interval_at(Instant::now() + ping_interval, ping_interval);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let heartbeat = Envelope::heartbeat().to_text().ok();

    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            msg = outbound.recv() => match msg {
                Some(text) => write_frame(&sink, Frame::Text(text.to_string()), write_timeout).await,
                // The sender is dropped only by `close`.
                None => break,
            },
            _ = keepalive.tick() => {
                match write_frame(&sink, Frame::Ping(Bytes::new()), write_timeout).await {
                    Ok(()) => match &heartbeat {
                        Some(text) => write_frame(&sink, Frame::Text(text.to_string()), write_timeout).await,
                        None => Ok(()),
                    },
                    Err(e) => Err(e),
                }
            }
        };

        if let Err(e) = result {
            if is_normal_disconnect(&e) {
                debug!(connection_id = conn.id(), "Write failed, peer gone: {}", e);
            } else {
                warn!(connection_id = conn.id(), "Write failed: {}", e);
            }
            conn.close_with(CloseReason::new(close_code::ABNORMAL, e.to_string()));
            break;
        }
    }

    // Best effort. An abnormal end has no frame to send.
    if let Some(reason) = conn.close_reason()
        && reason.code != close_code::ABNORMAL
        && let Err(e) = write_frame(&sink, Frame::Close(Some(reason)), write_timeout).await
    {
        debug!(connection_id = conn.id(), "Could not send close frame: {}", e);
    }
    let _ = timeout(write_timeout, async { sink.lock().await.close().await }).await;
}

/// Checks if an error is a "normal" disconnection error that doesn't need to be logged as a warning.
fn is_normal_disconnect(e: &NotifierError) -> bool {
    match e {
        NotifierError::ConnectionClosed => true,
        NotifierError::Io(arc_err) => matches!(
            arc_err.kind(),
            std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::ConnectionAborted
        ),
        NotifierError::Transport(msg) => {
            msg.contains("Connection reset") || msg.contains("closing handshake")
        }
        _ => false,
    }
}
