//! WebSocket connection to the orchestration server
//!
//! Owns the socket lifecycle. Outbound envelopes are written directly by
//! [`Connection::send`]; inbound text frames are decoded by a background
//! reader and handed to the [`Dispatcher`] for processing on the host
//! thread. Lifecycle changes are reported on an event channel.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::common::{Error, Result};
use crate::host::Dispatcher;
use crate::protocol::envelope::{self, Envelope};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Open = 2,
    Closing = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Open,
            3 => Self::Closing,
            _ => Self::Disconnected,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
        }
    }
}

/// Lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    Error(String),
}

/// Receives decoded envelopes on the host thread
pub trait EnvelopeHandler: Send + Sync + 'static {
    fn handle(&self, envelope: Envelope) -> Result<()>;
}

impl<F> EnvelopeHandler for F
where
    F: Fn(Envelope) -> Result<()> + Send + Sync + 'static,
{
    fn handle(&self, envelope: Envelope) -> Result<()> {
        self(envelope)
    }
}

/// Shared between the connection and its reader task
struct Shared {
    state: AtomicU8,
    writer: Mutex<Option<WsSink>>,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        tracing::trace!(%state, "Connection state");
        self.state.store(state as u8, Ordering::Release);
    }

    fn emit(&self, event: ConnectionEvent) {
        // Nobody listening is fine.
        let _ = self.event_tx.send(event);
    }
}

/// Persistent connection to one orchestration server
pub struct Connection {
    shared: Arc<Shared>,
    dispatcher: Dispatcher,
    /// Replaced on every connect, cancelled on disconnect
    cancel: parking_lot::Mutex<CancellationToken>,
    event_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<ConnectionEvent>>>,
}

impl Connection {
    pub fn new(dispatcher: Dispatcher) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                state: AtomicU8::new(ConnectionState::Disconnected as u8),
                writer: Mutex::new(None),
                event_tx,
            }),
            dispatcher,
            cancel: parking_lot::Mutex::new(CancellationToken::new()),
            event_rx: parking_lot::Mutex::new(Some(event_rx)),
        }
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<ConnectionEvent>> {
        self.event_rx.lock().take()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Point-in-time view of the socket state; may be stale by the time
    /// the caller acts on it
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Open the connection and start the reader
    ///
    /// Emits `Connected` on success or `Error` on failure. There is no
    /// automatic retry.
    pub async fn connect(&self, url: &str, handler: Arc<dyn EnvelopeHandler>) -> Result<()> {
        match self.state() {
            ConnectionState::Open => {
                tracing::info!(url, "Already connected");
                return Ok(());
            }
            ConnectionState::Connecting | ConnectionState::Closing => {
                tracing::info!(url, state = %self.state(), "Connection change already in progress");
                return Ok(());
            }
            ConnectionState::Disconnected => {}
        }

        tracing::info!(url, "Connecting to orchestration server");
        self.shared.set_state(ConnectionState::Connecting);

        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();

        let result = tokio::select! {
            _ = token.cancelled() => Err(Error::connection_failed(url, "cancelled")),
            result = tokio_tungstenite::connect_async(url) => {
                result.map_err(|e| Error::connection_failed(url, e))
            }
        };

        let ws_stream = match result {
            Ok((ws_stream, _response)) => ws_stream,
            Err(e) => {
                tracing::error!(url, "{}", e);
                self.shared.set_state(ConnectionState::Disconnected);
                self.shared.emit(ConnectionEvent::Error(e.to_string()));
                return Err(e);
            }
        };

        let (writer, reader) = ws_stream.split();
        *self.shared.writer.lock().await = Some(writer);
        self.shared.set_state(ConnectionState::Open);
        self.shared.emit(ConnectionEvent::Connected);
        tracing::info!(url, "Connected");

        let shared = Arc::clone(&self.shared);
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            read_loop(reader, shared, dispatcher, handler, token).await;
        });

        Ok(())
    }

    /// Close the connection
    pub async fn disconnect(&self) {
        self.cancel.lock().cancel();

        let state = self.state();
        if state == ConnectionState::Disconnected {
            tracing::debug!("Disconnect requested while already disconnected");
            return;
        }

        self.shared.set_state(ConnectionState::Closing);
        let writer = self.shared.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if state == ConnectionState::Open {
                if let Err(e) = writer.send(Message::Close(None)).await {
                    tracing::debug!("Failed to send close frame: {}", e);
                }
            }
            let _ = writer.close().await;
        }

        self.shared.set_state(ConnectionState::Disconnected);
        self.shared.emit(ConnectionEvent::Disconnected);
        tracing::info!("Disconnected");
    }

    /// Send one envelope as a single text frame
    ///
    /// The writer lock guards only the socket sink; it is never the
    /// dispatcher lock and the reader never takes it per frame.
    pub async fn send<P: Serialize + ?Sized>(&self, message_type: &str, payload: &P) -> Result<()> {
        if !self.is_connected() {
            tracing::error!(message_type, "Cannot send, not connected");
            return Err(Error::NotConnected);
        }

        let json = envelope::encode(message_type, payload)?;
        tracing::debug!(message_type, bytes = json.len(), "Sending envelope");

        let mut writer = self.shared.writer.lock().await;
        let sink = writer.as_mut().ok_or(Error::NotConnected)?;
        sink.send(Message::Text(json.into()))
            .await
            .map_err(|e| Error::ConnectionClosed(e.to_string()))
    }
}

/// Background task reading frames until close, failure or cancellation
async fn read_loop(
    mut reader: WsSource,
    shared: Arc<Shared>,
    dispatcher: Dispatcher,
    handler: Arc<dyn EnvelopeHandler>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = reader.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => match envelope::decode(text.as_str()) {
                Ok(envelope) => {
                    tracing::debug!(message_type = %envelope.message_type, id = %envelope.id, "Received envelope");
                    let handler = Arc::clone(&handler);
                    dispatcher.enqueue(move || handler.handle(envelope));
                }
                Err(e) => {
                    tracing::warn!("Dropping malformed frame: {}", e);
                }
            },
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(?frame, "Server closed the connection");
                break;
            }
            Some(Ok(_)) => {
                // Binary, ping and pong frames carry no envelopes.
                continue;
            }
            Some(Err(e)) => {
                tracing::warn!("WebSocket read error, stopping reader: {}", e);
                shared.emit(ConnectionEvent::Error(e.to_string()));
                break;
            }
            None => {
                tracing::info!("WebSocket stream ended");
                break;
            }
        }
    }

    if cancel.is_cancelled() {
        return;
    }
    shared.set_state(ConnectionState::Disconnected);
    shared.writer.lock().await.take();
    shared.emit(ConnectionEvent::Disconnected);
}
