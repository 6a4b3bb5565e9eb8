//! Optional payload encryption.
//!
//! The default [`AesGcmCipher`] produces `nonce (12B) || ciphertext+tag`.
//! A payload sealed under one key never opens under another: the GCM tag
//! check fails and [`CipherError::Decrypt`] is returned.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use bytes::{BufMut, Bytes, BytesMut};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::CipherError;

/// Key size in bytes (AES-256).
pub const KEY_SIZE: usize = 32;

/// Nonce size for AES-GCM (96 bits = 12 bytes).
pub const NONCE_SIZE: usize = 12;

/// Shared secret used to seal frame payloads.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey([u8; KEY_SIZE]);

impl SecretKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Derive a key from a passphrase (SHA-256).
    pub fn derive(passphrase: &str) -> Self {
        Self(Sha256::digest(passphrase.as_bytes()).into())
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl TryFrom<&[u8]> for SecretKey {
    type Error = CipherError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let key: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| CipherError::InvalidKeyLength(bytes.len()))?;
        Ok(Self(key))
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey(<redacted:{KEY_SIZE} bytes>)")
    }
}

/// Seals and opens serialized frame payloads.
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8], key: &SecretKey) -> Result<Bytes, CipherError>;

    fn decrypt(&self, ciphertext: &[u8], key: &SecretKey) -> Result<Bytes, CipherError>;
}

/// AES-256-GCM with a random nonce per payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct AesGcmCipher;

impl Cipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &[u8], key: &SecretKey) -> Result<Bytes, CipherError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);

        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| CipherError::Encrypt)?;

        let mut out = BytesMut::with_capacity(NONCE_SIZE + sealed.len());
        out.put_slice(&nonce_bytes);
        out.put_slice(&sealed);
        Ok(out.freeze())
    }

    fn decrypt(&self, ciphertext: &[u8], key: &SecretKey) -> Result<Bytes, CipherError> {
        if ciphertext.len() < NONCE_SIZE {
            return Err(CipherError::TooShort {
                len: ciphertext.len(),
                min: NONCE_SIZE,
            });
        }
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
        let (nonce, sealed) = ciphertext.split_at(NONCE_SIZE);

        cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map(Bytes::from)
            .map_err(|_| CipherError::Decrypt)
    }
}
