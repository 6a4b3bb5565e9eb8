use std::collections::BTreeMap;
use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use muxlink_frame::{Body, Frame};
use muxlink_transport::{SocketEvent, SocketHandlers, Transport};
use tracing::{debug, info, trace, warn};

use crate::config::ConnectionConfig;
use crate::error::ClientError;
use crate::event::{FrameInfo, InboundEvent};
use crate::handle::{ConnectionHandle, Inbox};
use crate::multiplex::{Handler, Multiplexer};
use crate::observer::ConnectionObserver;
use crate::queue::{ChannelQueue, QueuedFrame};
use crate::session::Session;

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket ready for sends yet. Frames go to the backlog.
    Pending,
    /// Socket open. Frames go straight to the transport.
    Connected,
    /// Socket closed. `init` opens a new one.
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Pending => "pending",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// One logical link to a peer, multiplexing named channels over one socket.
///
/// All state is owned here and mutated only through these methods. Socket
/// events and [`ConnectionHandle`] requests are queued to an inbox and
/// applied by [`Connection::poll`] or [`Connection::run`].
pub struct Connection<T: Transport> {
    id: Arc<str>,
    config: ConnectionConfig,
    transport: Arc<T>,
    state: ConnectionState,
    socket: Option<T::Socket>,
    attached: bool,
    generation: u64,
    backlog: Vec<Bytes>,
    queues: BTreeMap<String, ChannelQueue>,
    multiplex: Multiplexer<InboundEvent>,
    session: Option<Arc<Session>>,
    observers: Vec<Box<dyn ConnectionObserver>>,
    inbox_tx: mpsc::Sender<Inbox>,
    inbox: mpsc::Receiver<Inbox>,
    disconnect_scheduled: bool,
}

impl<T: Transport> Connection<T> {
    /// Create a connection. Nothing touches the network until [`Connection::init`].
    pub fn new(transport: Arc<T>, config: ConnectionConfig) -> Self {
        let (inbox_tx, inbox) = mpsc::channel();
        Self {
            id: Arc::from(config.identity()),
            config,
            transport,
            state: ConnectionState::Pending,
            socket: None,
            attached: false,
            generation: 0,
            backlog: Vec::new(),
            queues: BTreeMap::new(),
            multiplex: Multiplexer::new(),
            session: None,
            observers: Vec::new(),
            inbox_tx,
            inbox,
            disconnect_scheduled: false,
        }
    }

    /// Wrap an already-connected socket (server side).
    pub(crate) fn with_socket(
        transport: Arc<T>,
        config: ConnectionConfig,
        socket: T::Socket,
    ) -> Self {
        let mut connection = Self::new(transport, config);
        connection.socket = Some(socket);
        connection
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Session resolved on the most recent connect.
    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    /// Serialized frames waiting for the socket to connect.
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// A `Send` handle for writing from other threads or from handlers.
    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle::new(Arc::clone(&self.id), self.inbox_tx.clone())
    }

    /// Register a lifecycle observer.
    pub fn observe(&mut self, observer: impl ConnectionObserver + 'static) -> &mut Self {
        self.observers.push(Box::new(observer));
        self
    }

    /// Open the socket, or adopt an accepted one.
    ///
    /// An accepted socket enters the connected state immediately; a new one
    /// waits in `Pending` for the transport's connect event. While a socket
    /// is connected or still connecting, `init` does nothing.
    pub fn init(&mut self) -> &mut Self {
        if self.state == ConnectionState::Connected {
            debug!(id = %self.id, "init on connected connection ignored");
            return self;
        }
        if self.attached {
            debug!(id = %self.id, "init while connecting ignored");
            return self;
        }
        self.disconnect_scheduled = false;

        if self.socket.is_some() {
            if self.attach() {
                self.handle_connect();
            }
            return self;
        }

        match self.transport.create_socket(&self.config.endpoint) {
            Ok(socket) => {
                self.socket = Some(socket);
                self.state = ConnectionState::Pending;
                debug!(
                    id = %self.id,
                    endpoint = %self.config.endpoint,
                    transport = self.transport.name(),
                    "connecting"
                );
                self.attach();
            }
            Err(err) => self.report_error(err.into()),
        }
        self
    }

    /// Queue `body` on `channel`. Never blocks, never fails.
    ///
    /// The message is encoded now; it reaches the transport when its
    /// channel queue flushes.
    pub fn write(&mut self, channel: impl Into<String>, body: impl Into<Body>) -> &mut Self {
        let channel = channel.into();
        let body = body.into();
        let encoded = match &self.config.serial {
            Some(serial) => serial.encode(&body),
            None => Ok(body.to_bytes()),
        };
        let packet = match encoded {
            Ok(packet) => packet,
            Err(err) => {
                warn!(id = %self.id, %channel, error = %err, "dropping unencodable message");
                self.report_error(err.into());
                return self;
            }
        };

        let policy = Arc::clone(&self.config.profile);
        let flushed = self
            .queues
            .entry(channel.clone())
            .or_insert_with(|| ChannelQueue::new(channel))
            .add(packet, policy.as_ref());
        if let Some(frame) = flushed {
            self.wrap(frame);
        }
        self
    }

    /// The queue for `channel`, created if needed.
    pub fn queue(&mut self, channel: &str) -> &ChannelQueue {
        self.queues
            .entry(channel.to_string())
            .or_insert_with(|| ChannelQueue::new(channel))
    }

    /// Flush `channel` now, regardless of profile.
    pub fn flush(&mut self, channel: &str) -> &mut Self {
        if let Some(frame) = self.queues.get_mut(channel).and_then(ChannelQueue::step) {
            self.wrap(frame);
        }
        self
    }

    /// Flush every channel now.
    pub fn flush_all(&mut self) -> &mut Self {
        let frames: Vec<QueuedFrame> = self
            .queues
            .values_mut()
            .filter_map(ChannelQueue::step)
            .collect();
        for frame in frames {
            self.wrap(frame);
        }
        self
    }

    pub fn subscribe(
        &mut self,
        channel: impl Into<String>,
        handler: Handler<InboundEvent>,
    ) -> &mut Self {
        let channel = channel.into();
        self.queue(&channel);
        self.multiplex.subscribe(channel, handler);
        self
    }

    /// Remove `handler` from `channel`, or every handler when `None`.
    pub fn unsubscribe(
        &mut self,
        channel: &str,
        handler: Option<&Handler<InboundEvent>>,
    ) -> &mut Self {
        self.multiplex.unsubscribe(channel, handler);
        self
    }

    pub fn subscribers(&self, channel: &str) -> usize {
        self.multiplex.subscribers(channel)
    }

    /// Drain every channel queue, then disconnect on the next poll.
    ///
    /// The disconnect itself is deferred so frames flushed here reach the
    /// transport before teardown.
    pub fn destroy(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        self.flush_all();
        self.disconnect_scheduled = true;
        debug!(id = %self.id, "disconnect scheduled");
    }

    /// Apply everything currently queued, flush queues whose tick window
    /// closed, and run a scheduled disconnect. Returns the inbox items handled.
    pub fn poll(&mut self) -> usize {
        let mut handled = self.drain_inbox();
        self.flush_due(Instant::now());
        if self.disconnect_scheduled {
            self.disconnect_scheduled = false;
            self.perform_disconnect();
            handled += self.drain_inbox();
        }
        handled
    }

    /// Drive the connection until it disconnects.
    pub fn run(&mut self) {
        self.drive(None);
    }

    /// Drive the connection until it disconnects or `deadline` passes.
    /// Returns `true` if it disconnected.
    pub fn run_until(&mut self, deadline: Instant) -> bool {
        self.drive(Some(deadline))
    }

    fn drive(&mut self, deadline: Option<Instant>) -> bool {
        loop {
            self.poll();
            if self.state == ConnectionState::Disconnected && !self.disconnect_scheduled {
                return true;
            }
            if self.disconnect_scheduled {
                continue;
            }

            let now = Instant::now();
            if deadline.is_some_and(|d| d <= now) {
                return false;
            }
            let wake = match (self.next_tick(), deadline) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            let received = match wake {
                Some(wake) => match self.inbox.recv_timeout(wake.saturating_duration_since(now)) {
                    Ok(message) => Some(message),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => return false,
                },
                None => match self.inbox.recv() {
                    Ok(message) => Some(message),
                    Err(_) => return false,
                },
            };
            if let Some(message) = received {
                self.dispatch(message);
            }
        }
    }

    fn drain_inbox(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(message) = self.inbox.try_recv() {
            self.dispatch(message);
            handled += 1;
        }
        handled
    }

    fn dispatch(&mut self, message: Inbox) {
        match message {
            Inbox::Socket { generation, event } => {
                if generation != self.generation {
                    trace!(id = %self.id, generation, "ignoring event from previous socket");
                    return;
                }
                match event {
                    SocketEvent::Connect => self.handle_connect(),
                    SocketEvent::Data(payload) => self.handle_data(payload),
                    SocketEvent::Error(err) => self.report_error(err.into()),
                    SocketEvent::Close => self.handle_close(),
                }
            }
            Inbox::Write { channel, body } => {
                self.write(channel, body);
            }
            Inbox::Destroy => self.destroy(),
        }
    }

    fn next_tick(&self) -> Option<Instant> {
        let policy = self.config.profile.as_ref();
        self.queues.values().filter_map(|q| q.deadline(policy)).min()
    }

    fn flush_due(&mut self, now: Instant) {
        let policy = Arc::clone(&self.config.profile);
        let frames: Vec<QueuedFrame> = self
            .queues
            .values_mut()
            .filter(|q| q.is_due(policy.as_ref(), now))
            .filter_map(ChannelQueue::step)
            .collect();
        for frame in frames {
            self.wrap(frame);
        }
    }

    /// Attach protocol handlers to the current socket. Returns `false` if
    /// the transport refused, in which case the connection is closed.
    fn attach(&mut self) -> bool {
        let Some(socket) = self.socket.as_mut() else {
            return false;
        };
        self.generation += 1;
        let generation = self.generation;
        let tx = self.inbox_tx.clone();
        let handlers = SocketHandlers::new(self.config.idle_timeout, move |event| {
            let _ = tx.send(Inbox::Socket { generation, event });
        });

        match self.transport.attach_socket(socket, handlers) {
            Ok(()) => {
                self.attached = true;
                true
            }
            Err(err) => {
                self.report_error(err.into());
                self.socket = None;
                self.handle_close();
                false
            }
        }
    }

    /// Serialize, optionally seal, then send or backlog one flushed batch.
    fn wrap(&mut self, frame: QueuedFrame) {
        let payload = match self
            .config
            .codec
            .serialize(frame.id, &frame.channel, &frame.packets)
        {
            Ok(payload) => payload,
            Err(err) => {
                warn!(id = %self.id, channel = %frame.channel, error = %err, "dropping unserializable frame");
                self.report_error(err.into());
                return;
            }
        };

        let sealed = match &self.config.secret_key {
            Some(key) => self.config.cipher.encrypt(&payload, key),
            None => Ok(payload),
        };
        let payload = match sealed {
            Ok(payload) => payload,
            Err(err) => {
                warn!(id = %self.id, channel = %frame.channel, error = %err, "dropping frame that failed to encrypt");
                self.report_error(err.into());
                return;
            }
        };

        match (self.state, self.socket.as_mut()) {
            (ConnectionState::Connected, Some(socket)) => {
                trace!(id = %self.id, channel = %frame.channel, frame = frame.id, bytes = payload.len(), "sending frame");
                self.transport.send(socket, &payload);
            }
            _ => {
                trace!(id = %self.id, channel = %frame.channel, frame = frame.id, "backlogging frame");
                self.backlog.push(payload);
            }
        }
    }

    fn handle_connect(&mut self) {
        let Some(socket) = self.socket.as_mut() else {
            return;
        };
        self.state = ConnectionState::Connected;

        let backlog = std::mem::take(&mut self.backlog);
        for payload in &backlog {
            self.transport.send(socket, payload);
        }

        self.session = self.config.sessions.resolve(&self.id);
        info!(
            id = %self.id,
            endpoint = %self.config.endpoint,
            flushed = backlog.len(),
            session = self.session.is_some(),
            "connected"
        );

        let handle = self.handle();
        for observer in &mut self.observers {
            observer.on_connect(&handle);
        }
    }

    fn handle_data(&mut self, payload: Bytes) {
        let opened = match &self.config.secret_key {
            Some(key) => self.config.cipher.decrypt(&payload, key),
            None => Ok(payload.clone()),
        };
        let plain = match opened {
            Ok(plain) => plain,
            Err(err) => {
                warn!(id = %self.id, bytes = payload.len(), error = %err, "dropping chunk that failed to decrypt");
                self.report_error(err.into());
                return;
            }
        };

        let frames = match self.config.codec.deserialize(&plain) {
            Ok(frames) => frames,
            Err(err) => {
                warn!(id = %self.id, bytes = plain.len(), error = %err, "dropping undecodable chunk");
                self.report_error(err.into());
                return;
            }
        };

        let handle = self.handle();
        for frame in frames {
            let Frame {
                id,
                channel,
                packets,
                payload_bytes,
            } = frame;
            let payload_messages = packets.len();
            for (message_index, packet) in packets.into_iter().enumerate() {
                let event = InboundEvent {
                    body: self.decode_packet(packet),
                    connection: handle.clone(),
                    frame: FrameInfo {
                        id,
                        channel: channel.clone(),
                        payload_bytes,
                        payload_messages,
                        message_index,
                    },
                    session: self.session.clone(),
                };
                self.multiplex.trigger(&channel, &event);
            }
        }
    }

    fn decode_packet(&self, packet: Bytes) -> Body {
        let Some(serial) = &self.config.serial else {
            return Body::Raw(packet);
        };
        match serial.decode(&packet) {
            Ok(body) => body,
            Err(err) => {
                debug!(id = %self.id, error = %err, "packet decode failed; delivering raw payload");
                Body::Raw(packet)
            }
        }
    }

    fn handle_close(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        self.state = ConnectionState::Disconnected;
        self.socket = None;
        self.attached = false;
        info!(id = %self.id, backlog = self.backlog.len(), "disconnected");

        let handle = self.handle();
        for observer in &mut self.observers {
            observer.on_disconnect(&handle);
        }
    }

    fn perform_disconnect(&mut self) {
        self.attached = false;
        let Some(socket) = self.socket.take() else {
            self.handle_close();
            return;
        };
        let generation = self.generation;
        let tx = self.inbox_tx.clone();
        self.transport.disconnect(
            socket,
            Box::new(move || {
                let _ = tx.send(Inbox::Socket {
                    generation,
                    event: SocketEvent::Close,
                });
            }),
        );
    }

    fn report_error(&mut self, error: ClientError) {
        debug!(id = %self.id, %error, "connection error");
        let handle = self.handle();
        for observer in &mut self.observers {
            observer.on_error(&handle, &error);
        }
    }
}

impl<T: Transport> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("endpoint", &self.config.endpoint)
            .field("backlog", &self.backlog.len())
            .field("queues", &self.queues.len())
            .field("multiplex", &self.multiplex)
            .finish_non_exhaustive()
    }
}
