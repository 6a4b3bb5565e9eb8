//! Channel frames and the strategies that turn them into bytes.
//!
//! A frame is one batch of packets written to one named channel. This crate
//! holds the three swappable strategies a connection runs frames through:
//! - [`FrameCodec`]: frames to bytes and back ([`BinaryCodec`] by default)
//! - [`Cipher`]: optional payload encryption ([`AesGcmCipher`])
//! - [`Serial`]: per-packet payload encoding ([`JsonSerial`])

pub mod cipher;
pub mod codec;
pub mod error;
pub mod serial;

pub use cipher::{AesGcmCipher, Cipher, SecretKey, KEY_SIZE, NONCE_SIZE};
pub use codec::{BinaryCodec, Frame, FrameCodec, FRAME_HEADER_SIZE, MAGIC};
pub use error::{CipherError, FrameError, Result, SerialError};
pub use serial::{Body, JsonSerial, Serial};
