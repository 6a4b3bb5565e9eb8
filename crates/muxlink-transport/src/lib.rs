//! Pluggable socket transports for muxlink.
//!
//! A transport adapter owns the raw socket plumbing for one network
//! technology. Connections talk to it only through the [`Transport`] trait:
//! create and attach a socket, send opaque byte payloads, and receive
//! [`SocketEvent`]s back through [`SocketHandlers`].
//!
//! Stream sockets wrap every payload in a small length-prefixed
//! [`envelope`] so each `send` surfaces as exactly one `Data` event on
//! the remote side.

pub mod envelope;
pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use envelope::{EnvelopeReader, DEFAULT_MAX_ENVELOPE, ENVELOPE_HEADER_SIZE};
pub use error::{Result, TransportError};
pub use traits::{
    DoneCallback, Endpoint, ListenOptions, Origin, SocketEvent, SocketHandlers, Transport,
    DEFAULT_IDLE_TIMEOUT, DEFAULT_PORT,
};

#[cfg(unix)]
pub use uds::{UdsListener, UdsSocket, UdsTransport};
