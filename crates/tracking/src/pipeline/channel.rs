//! Persistent WebSocket link to the turret controller.
//!
//! A [`Connection`] owns the socket behind a mutex so the control loop and the
//! keepalive thread can both write whole frames without interleaving. The
//! keepalive side only ever holds a [`LivenessHandle`], a weak reference that
//! stops resolving once the connection is closed.

use std::{
    fmt,
    io::{ErrorKind, Read, Write},
    net::{TcpStream, ToSocketAddrs},
    sync::{Arc, Mutex, Weak},
    time::Duration,
};

use thiserror::Error;
use tracing::{debug, warn};
use tungstenite::{Message, WebSocket, http::Uri, stream::MaybeTlsStream};

use crate::pipeline::message::TelemetryMessage;

/// Read timeout applied to the socket so draining inbound frames never parks
/// the writer lock.
pub const INBOUND_POLL_TIMEOUT: Duration = Duration::from_millis(5);

/// Bound on the TCP connect and the WebSocket handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on inbound frames drained per keepalive tick.
const MAX_DRAIN_PER_TICK: usize = 256;

/// Error from the telemetry channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Endpoint unreachable or handshake rejected
    #[error("connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },
    /// Failed to write a payload
    #[error("send: {0}")]
    Send(String),
    /// Liveness probe failed
    #[error("probe: {0}")]
    Probe(String),
    /// JSON serialization failed
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
    /// Connection already closed
    #[error("connection closed")]
    Closed,
    /// A writer panicked while holding the socket
    #[error("connection lock poisoned")]
    Poisoned,
}

/// Byte-level operations the channel needs from its transport.
///
/// Implementations must not block indefinitely in [`Transport::drain_inbound`];
/// it runs while the writer lock is held.
pub trait Transport: Send + 'static {
    fn send_text(&mut self, payload: String) -> Result<(), ChannelError>;
    fn probe(&mut self) -> Result<(), ChannelError>;
    /// Consume whatever inbound frames are already buffered, returning how many.
    fn drain_inbound(&mut self) -> Result<usize, ChannelError>;
    fn close(&mut self) -> Result<(), ChannelError>;
}

pub type WsTransport = WebSocket<MaybeTlsStream<TcpStream>>;

impl<S> Transport for WebSocket<S>
where
    S: Read + Write + Send + 'static,
{
    fn send_text(&mut self, payload: String) -> Result<(), ChannelError> {
        self.send(Message::Text(payload.into()))
            .map_err(|e| ChannelError::Send(e.to_string()))
    }

    fn probe(&mut self) -> Result<(), ChannelError> {
        self.send(Message::Ping(Default::default()))
            .map_err(|e| ChannelError::Probe(e.to_string()))
    }

    fn drain_inbound(&mut self) -> Result<usize, ChannelError> {
        let mut drained = 0;
        while drained < MAX_DRAIN_PER_TICK {
            match self.read() {
                Ok(Message::Text(text)) => {
                    debug!(payload = %text.as_str(), "controller status");
                    drained += 1;
                }
                Ok(Message::Close(frame)) => {
                    return Err(ChannelError::Probe(format!(
                        "controller closed the connection ({frame:?})"
                    )));
                }
                Ok(_) => drained += 1,
                Err(tungstenite::Error::Io(err))
                    if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    break;
                }
                Err(err) => return Err(ChannelError::Probe(err.to_string())),
            }
        }
        Ok(drained)
    }

    fn close(&mut self) -> Result<(), ChannelError> {
        match WebSocket::close(self, None) {
            Ok(()) => {}
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                return Ok(());
            }
            Err(err) => return Err(ChannelError::Send(err.to_string())),
        }
        match self.flush() {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed) => Ok(()),
            Err(err) => Err(ChannelError::Send(err.to_string())),
        }
    }
}

/// Long-lived handle to the controller endpoint.
pub struct Connection<T: Transport = WsTransport> {
    endpoint: String,
    inner: Arc<Mutex<T>>,
}

impl Connection<WsTransport> {
    /// Open the WebSocket. Failure is final; callers decide whether to exit.
    pub fn connect(endpoint: &str) -> Result<Self, ChannelError> {
        Self::connect_with_timeout(endpoint, CONNECT_TIMEOUT)
    }

    /// Open the WebSocket, giving up if the TCP connect or the handshake
    /// takes longer than `timeout`.
    pub fn connect_with_timeout(endpoint: &str, timeout: Duration) -> Result<Self, ChannelError> {
        let stream = open_tcp(endpoint, timeout).map_err(|e| connect_error(endpoint, e))?;
        stream
            .set_read_timeout(Some(timeout))
            .and_then(|()| stream.set_write_timeout(Some(timeout)))
            .map_err(|e| connect_error(endpoint, e))?;
        if let Err(err) = stream.set_nodelay(true) {
            debug!("failed to set TCP_NODELAY on {endpoint}: {err}");
        }
        // Shares the socket, so timeouts can be retuned once TLS owns the stream.
        let control = stream.try_clone().map_err(|e| connect_error(endpoint, e))?;

        let (socket, response) =
            tungstenite::client_tls(endpoint, stream).map_err(|e| connect_error(endpoint, e))?;
        debug!(status = %response.status(), "websocket handshake complete");

        if let Err(err) = control.set_read_timeout(Some(INBOUND_POLL_TIMEOUT)) {
            warn!("failed to set read timeout on {endpoint}: {err}");
        }

        Ok(Self::from_transport(endpoint, socket))
    }
}

fn connect_error(endpoint: &str, reason: impl fmt::Display) -> ChannelError {
    ChannelError::Connect {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    }
}

/// Resolve the endpoint host and connect to the first address that answers.
fn open_tcp(endpoint: &str, timeout: Duration) -> Result<TcpStream, String> {
    let uri: Uri = endpoint
        .parse()
        .map_err(|e| format!("invalid URL: {e}"))?;
    let host = uri
        .host()
        .ok_or("URL has no host")?
        .trim_start_matches('[')
        .trim_end_matches(']');
    let default_port = match uri.scheme_str() {
        Some("wss") => 443,
        _ => 80,
    };
    let port = uri.port_u16().unwrap_or(default_port);

    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| format!("resolve {host}: {e}"))?;
    let mut last_err = format!("{host} resolved to no addresses");
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = format!("{addr}: {err}"),
        }
    }
    Err(last_err)
}

impl<T: Transport> Connection<T> {
    pub fn from_transport(endpoint: impl Into<String>, transport: T) -> Self {
        Self {
            endpoint: endpoint.into(),
            inner: Arc::new(Mutex::new(transport)),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Serialize and write one message. No retry on failure.
    pub fn send(&self, message: &TelemetryMessage) -> Result<(), ChannelError> {
        let payload = message.to_json()?;
        debug!(%payload, "sending");
        let mut transport = self.inner.lock().map_err(|_| ChannelError::Poisoned)?;
        transport.send_text(payload)
    }

    /// Non-owning reference for the keepalive task.
    pub fn liveness_handle(&self) -> LivenessHandle<T> {
        LivenessHandle {
            endpoint: self.endpoint.clone(),
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Best-effort graceful shutdown. Errors are logged, never returned.
    pub fn close(self) {
        let mut transport = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match transport.close() {
            Ok(()) => debug!("closed connection to {}", self.endpoint),
            Err(err) => debug!("close on {} ignored: {err}", self.endpoint),
        }
    }
}

/// Weak reference used by the keepalive task.
pub struct LivenessHandle<T: Transport = WsTransport> {
    endpoint: String,
    inner: Weak<Mutex<T>>,
}

impl<T: Transport> LivenessHandle<T> {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Ping the endpoint and drain buffered inbound frames.
    ///
    /// Returns [`ChannelError::Closed`] once the owning [`Connection`] is gone.
    pub fn probe(&self) -> Result<usize, ChannelError> {
        let inner = self.inner.upgrade().ok_or(ChannelError::Closed)?;
        let mut transport = inner.lock().map_err(|_| ChannelError::Poisoned)?;
        transport.probe()?;
        transport.drain_inbound()
    }
}
