use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::error::{Result, TransportError};

/// Default port used when none is configured.
pub const DEFAULT_PORT: u16 = 3000;

/// Default per-socket idle timeout: 5 minutes.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Callback run once an asynchronous transport operation has completed.
pub type DoneCallback = Box<dyn FnOnce() + Send + 'static>;

/// Where a connection should be opened, or a listener bound.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new("0.0.0.0", DEFAULT_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Remote side of a socket, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub host: String,
    pub port: String,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Something that happened on a socket.
#[derive(Debug)]
pub enum SocketEvent {
    /// The socket finished connecting and is ready for sends.
    Connect,
    /// One complete inbound payload.
    Data(Bytes),
    /// A socket-level failure. Never changes connection state by itself.
    Error(TransportError),
    /// The socket is fully closed. Emitted at most once per socket.
    Close,
}

/// Event sink handed to a transport when a socket is attached.
#[derive(Clone)]
pub struct SocketHandlers {
    sink: Arc<dyn Fn(SocketEvent) + Send + Sync>,
    /// Close the socket after this long without inbound traffic.
    pub idle_timeout: Option<Duration>,
}

impl SocketHandlers {
    pub fn new(
        idle_timeout: Option<Duration>,
        sink: impl Fn(SocketEvent) + Send + Sync + 'static,
    ) -> Self {
        Self {
            sink: Arc::new(sink),
            idle_timeout,
        }
    }

    /// Deliver an event to the owning connection.
    pub fn emit(&self, event: SocketEvent) {
        (self.sink)(event)
    }
}

impl fmt::Debug for SocketHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketHandlers")
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

/// Listener options.
#[derive(Debug, Clone)]
pub struct ListenOptions {
    /// File mode for filesystem-backed listeners.
    pub mode: u32,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self { mode: 0o600 }
    }
}

/// A socket technology a connection can run over.
///
/// Implementations report everything that happens on a socket through the
/// [`SocketHandlers`] passed to [`Transport::attach_socket`]. Only `send`
/// may wait on the network, and only while the peer is not reading.
pub trait Transport: Send + Sync + 'static {
    /// Owned handle to one socket.
    type Socket: Send + 'static;
    /// Owned handle to one listening endpoint.
    type Listener: Send + 'static;

    /// Transport name for diagnostics.
    fn name(&self) -> &'static str;

    /// Create a socket for `endpoint`. Connecting starts once it is attached.
    fn create_socket(&self, endpoint: &Endpoint) -> Result<Self::Socket>;

    /// Start delivering events for `socket` to `handlers`.
    ///
    /// A socket is attached at most once; later calls fail with
    /// [`TransportError::AlreadyAttached`](crate::TransportError::AlreadyAttached).
    fn attach_socket(&self, socket: &mut Self::Socket, handlers: SocketHandlers) -> Result<()>;

    /// Send one payload. Failures surface as [`SocketEvent::Error`].
    ///
    /// Stream transports write on the caller's thread, so a peer that stops
    /// reading can stall this call until the transport's write timeout.
    fn send(&self, socket: &mut Self::Socket, payload: &[u8]);

    /// Close `socket`. `done` runs once it is fully closed.
    fn disconnect(&self, socket: Self::Socket, done: DoneCallback);

    /// Bind a listener on `endpoint`.
    fn listen(&self, endpoint: &Endpoint, options: &ListenOptions) -> Result<Self::Listener>;

    /// Accept the next inbound socket (blocking). The socket is already connected.
    fn accept(&self, listener: &Self::Listener) -> Result<Self::Socket>;

    /// Remote origin of `socket`.
    fn origin(&self, socket: &Self::Socket) -> Origin;

    /// Stop `listener`. `done` runs once it no longer accepts.
    fn stop(&self, listener: Self::Listener, done: DoneCallback);
}
