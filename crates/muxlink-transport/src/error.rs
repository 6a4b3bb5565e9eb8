use std::path::PathBuf;

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// The stream envelope header contains an invalid magic number.
    #[error("invalid envelope magic (expected 0x4D58 \"MX\")")]
    InvalidMagic,

    /// An envelope payload exceeds the configured maximum size.
    #[error("envelope too large ({size} bytes, max {max})")]
    EnvelopeTooLarge { size: usize, max: usize },

    /// The socket was used before it finished connecting, or after it closed.
    #[error("socket not connected")]
    NotConnected,

    /// Handlers were already attached to this socket.
    #[error("socket already attached")]
    AlreadyAttached,

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, TransportError>;
