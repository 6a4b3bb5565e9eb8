/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame header contains an invalid magic number.
    #[error("invalid frame magic (expected 0x4D46 \"MF\")")]
    InvalidMagic,

    /// The input ended before a complete frame was read.
    #[error("truncated frame (needed {needed} more bytes)")]
    Truncated { needed: usize },

    /// A field exceeds what the wire format can represent.
    #[error("{field} too large ({size}, max {max})")]
    TooLarge {
        field: &'static str,
        size: usize,
        max: usize,
    },

    /// The channel name is not valid UTF-8.
    #[error("channel name is not valid UTF-8")]
    InvalidChannel(#[from] std::str::Utf8Error),
}

/// Errors raised by a payload cipher.
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    /// Encryption failed.
    #[error("encryption failed")]
    Encrypt,

    /// Ciphertext did not authenticate under the given key.
    #[error("decryption failed (wrong key or corrupted payload)")]
    Decrypt,

    /// Ciphertext is shorter than the nonce it must carry.
    #[error("ciphertext too short ({len} bytes, need at least {min})")]
    TooShort { len: usize, min: usize },

    /// Key material has the wrong length.
    #[error("invalid key length ({0} bytes, expected 32)")]
    InvalidKeyLength(usize),
}

/// Errors raised by a payload serial.
#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
