use std::sync::Arc;

use muxlink_frame::Body;

use crate::handle::ConnectionHandle;
use crate::session::Session;

/// Where an inbound message sat on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    /// Sender's frame id. Diagnostic only.
    pub id: u64,
    pub channel: String,
    /// Encoded size of the whole frame.
    pub payload_bytes: usize,
    /// Number of messages in the frame.
    pub payload_messages: usize,
    /// Position of this message in the frame.
    pub message_index: usize,
}

/// One inbound message, as handed to subscribers.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// Decoded payload, or the raw packet if decoding failed.
    pub body: Body,
    pub connection: ConnectionHandle,
    pub frame: FrameInfo,
    pub session: Option<Arc<Session>>,
}

impl InboundEvent {
    /// Write `body` back on the channel this message arrived on.
    pub fn reply(&self, body: impl Into<Body>) {
        self.connection.write(self.frame.channel.clone(), body);
    }
}
