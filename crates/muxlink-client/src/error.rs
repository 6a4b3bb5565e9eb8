/// Errors surfaced by a connection.
///
/// None of these tear a connection down; they are reported to observers
/// and logged. Only the transport's close event ends a connection.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] muxlink_transport::TransportError),

    /// Frame encoding/decoding error.
    #[error("frame error: {0}")]
    Frame(#[from] muxlink_frame::FrameError),

    /// Payload encryption/decryption error.
    #[error("cipher error: {0}")]
    Cipher(#[from] muxlink_frame::CipherError),

    /// Payload encoding error.
    #[error("serial error: {0}")]
    Serial(#[from] muxlink_frame::SerialError),
}

pub type Result<T> = std::result::Result<T, ClientError>;
