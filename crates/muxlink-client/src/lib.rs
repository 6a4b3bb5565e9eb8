//! Realtime channel multiplexing over a single transport connection.
//!
//! This is the "just works" layer. Open a [`Connection`], `write` messages
//! to named channels and `subscribe` handlers to them. Writes are batched
//! per channel into frames according to a [`Profile`], buffered in a
//! backlog until the socket connects, and inbound frames are routed back
//! to subscribers in arrival order.

pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod handle;
pub mod multiplex;
pub mod observer;
pub mod profile;
pub mod queue;
pub mod server;
pub mod session;

pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionState};
pub use error::{ClientError, Result};
pub use event::{FrameInfo, InboundEvent};
pub use handle::ConnectionHandle;
pub use multiplex::{Handler, Multiplexer};
pub use observer::ConnectionObserver;
pub use profile::{FlushPolicy, Profile};
pub use queue::{ChannelQueue, QueuedFrame};
pub use server::Server;
pub use session::{MemorySessionStore, Session, SessionStore};

pub use muxlink_frame::Body;
