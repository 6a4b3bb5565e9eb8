use std::fmt;
use std::sync::mpsc;
use std::sync::Arc;

use muxlink_frame::Body;
use muxlink_transport::SocketEvent;
use tracing::debug;

/// Work handed to a connection from outside its own call stack.
#[derive(Debug)]
pub(crate) enum Inbox {
    /// An event from the socket attached under `generation`.
    Socket { generation: u64, event: SocketEvent },
    Write { channel: String, body: Body },
    Destroy,
}

/// Cloneable, `Send` handle to a [`crate::Connection`].
///
/// Calls are queued to the connection and take effect the next time it is
/// polled; they never block.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: Arc<str>,
    tx: mpsc::Sender<Inbox>,
}

impl ConnectionHandle {
    pub(crate) fn new(id: Arc<str>, tx: mpsc::Sender<Inbox>) -> Self {
        Self { id, tx }
    }

    /// Identity of the connection.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queue a write to `channel`.
    pub fn write(&self, channel: impl Into<String>, body: impl Into<Body>) -> &Self {
        self.send(Inbox::Write {
            channel: channel.into(),
            body: body.into(),
        });
        self
    }

    /// Ask the connection to drain its queues and disconnect.
    pub fn destroy(&self) {
        self.send(Inbox::Destroy);
    }

    fn send(&self, message: Inbox) {
        if self.tx.send(message).is_err() {
            debug!(id = %self.id, "connection dropped; discarding request");
        }
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .finish()
    }
}
