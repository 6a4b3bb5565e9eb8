use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use muxlink_frame::{AesGcmCipher, BinaryCodec, Cipher, FrameCodec, JsonSerial, SecretKey, Serial};
use muxlink_transport::{Endpoint, DEFAULT_IDLE_TIMEOUT};

use crate::profile::{FlushPolicy, Profile};
use crate::session::{MemorySessionStore, SessionStore};

/// Configuration for one connection.
///
/// Defaults: port 3000, JSON payloads, binary frames, no encryption,
/// the dynamic batching profile and a 5 minute idle timeout.
#[derive(Clone)]
pub struct ConnectionConfig {
    pub endpoint: Endpoint,
    /// Identity used for session lookup and logs. Defaults to `host:port`.
    pub id: Option<String>,
    /// Shared secret. When set, every frame payload is sealed with `cipher`.
    pub secret_key: Option<SecretKey>,
    /// Transport-level idle timeout.
    pub idle_timeout: Option<Duration>,
    pub profile: Arc<dyn FlushPolicy>,
    /// Per-message encoding. `None` sends bodies as-is.
    pub serial: Option<Arc<dyn Serial>>,
    pub codec: Arc<dyn FrameCodec>,
    pub cipher: Arc<dyn Cipher>,
    pub sessions: Arc<dyn SessionStore>,
}

impl ConnectionConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_secret_key(mut self, key: SecretKey) -> Self {
        self.secret_key = Some(key);
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_profile(mut self, profile: impl FlushPolicy + 'static) -> Self {
        self.profile = Arc::new(profile);
        self
    }

    pub fn with_serial(mut self, serial: Option<Arc<dyn Serial>>) -> Self {
        self.serial = serial;
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn FrameCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_cipher(mut self, cipher: Arc<dyn Cipher>) -> Self {
        self.cipher = cipher;
        self
    }

    pub fn with_sessions(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    /// The identity a connection built from this config will use.
    pub fn identity(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| self.endpoint.to_string())
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            id: None,
            secret_key: None,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            profile: Arc::new(Profile::dynamic()),
            serial: Some(Arc::new(JsonSerial)),
            codec: Arc::new(BinaryCodec),
            cipher: Arc::new(AesGcmCipher),
            sessions: Arc::new(MemorySessionStore::new()),
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("endpoint", &self.endpoint)
            .field("id", &self.id)
            .field("secret_key", &self.secret_key)
            .field("idle_timeout", &self.idle_timeout)
            .field("profile", &self.profile)
            .field("serial", &self.serial.is_some())
            .finish_non_exhaustive()
    }
}
