use bytes::Bytes;
use serde_json::Value;

use crate::error::SerialError;

/// An application message, before encoding or after decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Wire-ready bytes, passed through untouched.
    Raw(Bytes),
    /// A structured value for the configured serial to encode.
    Value(Value),
}

impl Body {
    /// Bytes of this body when no serial is configured.
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Body::Raw(bytes) => bytes.clone(),
            Body::Value(value) => Bytes::from(value.to_string()),
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Body::Value(value) => Some(value),
            Body::Raw(_) => None,
        }
    }

    pub fn as_raw(&self) -> Option<&Bytes> {
        match self {
            Body::Raw(bytes) => Some(bytes),
            Body::Value(_) => None,
        }
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Body::Value(value)
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Raw(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Raw(Bytes::from(bytes))
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Body::Value(Value::String(text.to_string()))
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Value(Value::String(text))
    }
}

/// Per-packet payload encoding.
pub trait Serial: Send + Sync {
    fn encode(&self, body: &Body) -> Result<Bytes, SerialError>;

    fn decode(&self, packet: &[u8]) -> Result<Body, SerialError>;
}

/// JSON payload encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerial;

impl Serial for JsonSerial {
    fn encode(&self, body: &Body) -> Result<Bytes, SerialError> {
        match body {
            Body::Raw(bytes) => Ok(bytes.clone()),
            Body::Value(value) => Ok(Bytes::from(serde_json::to_vec(value)?)),
        }
    }

    fn decode(&self, packet: &[u8]) -> Result<Body, SerialError> {
        Ok(Body::Value(serde_json::from_slice(packet)?))
    }
}
