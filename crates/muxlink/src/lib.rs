//! Realtime channel multiplexing over a single socket.
//!
//! muxlink batches application messages per named channel into frames,
//! optionally seals them with a shared key, sends them over one transport
//! connection and routes inbound frames back to channel subscribers.
//!
//! # Crate Structure
//!
//! - [`transport`]: transport contract and the Unix domain socket adapter
//! - [`frame`]: frame codec, payload cipher and message encoding
//! - [`client`]: connection state machine, batching and multiplexing
//!
//! The most used types are also re-exported at the crate root.

/// Re-export transport types.
pub mod transport {
    pub use muxlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use muxlink_frame::*;
}

/// Re-export client types.
pub mod client {
    pub use muxlink_client::*;
}

pub use muxlink_client::{
    Body, Connection, ConnectionConfig, ConnectionHandle, ConnectionState, Handler, InboundEvent,
    Profile, Server,
};
pub use muxlink_frame::SecretKey;
pub use muxlink_transport::Endpoint;
#[cfg(unix)]
pub use muxlink_transport::UdsTransport;
