#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use muxlink_client::{
    ClientError, Connection, ConnectionHandle, ConnectionObserver, Handler, InboundEvent,
};
use muxlink_frame::{AesGcmCipher, BinaryCodec, Cipher, Frame, FrameCodec, SecretKey};
use muxlink_transport::{
    DoneCallback, Endpoint, ListenOptions, Origin, SocketEvent, SocketHandlers, Transport,
    TransportError,
};
use serde_json::Value;

/// In-process transport that records sends and lets tests inject socket events.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    handlers: Vec<Option<SocketHandlers>>,
    sent: Vec<(usize, Bytes)>,
    disconnects: Vec<usize>,
    fail_next_create: bool,
}

#[derive(Debug)]
pub struct MockSocket {
    pub id: usize,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn fail_next_create(&self) {
        self.lock().fail_next_create = true;
    }

    pub fn sockets(&self) -> usize {
        self.lock().handlers.len()
    }

    pub fn emit(&self, socket: usize, event: SocketEvent) {
        let handlers = self.lock().handlers[socket]
            .clone()
            .expect("socket should be attached");
        handlers.emit(event);
    }

    pub fn connect(&self, socket: usize) {
        self.emit(socket, SocketEvent::Connect);
    }

    pub fn data(&self, socket: usize, payload: Bytes) {
        self.emit(socket, SocketEvent::Data(payload));
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.lock().sent.iter().map(|(_, b)| b.clone()).collect()
    }

    pub fn sent_on(&self, socket: usize) -> Vec<Bytes> {
        self.lock()
            .sent
            .iter()
            .filter(|(id, _)| *id == socket)
            .map(|(_, b)| b.clone())
            .collect()
    }

    pub fn disconnects(&self) -> Vec<usize> {
        self.lock().disconnects.clone()
    }
}

impl Transport for MockTransport {
    type Socket = MockSocket;
    type Listener = ();

    fn name(&self) -> &'static str {
        "mock"
    }

    fn create_socket(&self, _endpoint: &Endpoint) -> muxlink_transport::Result<MockSocket> {
        let mut state = self.lock();
        if std::mem::take(&mut state.fail_next_create) {
            return Err(TransportError::Shutdown);
        }
        state.handlers.push(None);
        Ok(MockSocket {
            id: state.handlers.len() - 1,
        })
    }

    fn attach_socket(
        &self,
        socket: &mut MockSocket,
        handlers: SocketHandlers,
    ) -> muxlink_transport::Result<()> {
        self.lock().handlers[socket.id] = Some(handlers);
        Ok(())
    }

    fn send(&self, socket: &mut MockSocket, payload: &[u8]) {
        self.lock()
            .sent
            .push((socket.id, Bytes::copy_from_slice(payload)));
    }

    fn disconnect(&self, socket: MockSocket, done: DoneCallback) {
        let handlers = {
            let mut state = self.lock();
            state.disconnects.push(socket.id);
            state.handlers[socket.id].clone()
        };
        // Like a real socket, the close is reported through the handlers too.
        if let Some(handlers) = handlers {
            handlers.emit(SocketEvent::Close);
        }
        done();
    }

    fn listen(&self, _endpoint: &Endpoint, _options: &ListenOptions) -> muxlink_transport::Result<()> {
        Ok(())
    }

    fn accept(&self, _listener: &()) -> muxlink_transport::Result<MockSocket> {
        let mut state = self.lock();
        state.handlers.push(None);
        Ok(MockSocket {
            id: state.handlers.len() - 1,
        })
    }

    fn origin(&self, socket: &MockSocket) -> Origin {
        Origin {
            host: "mock".to_string(),
            port: socket.id.to_string(),
        }
    }

    fn stop(&self, _listener: (), done: DoneCallback) {
        done();
    }
}

/// Records lifecycle notifications.
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<String>>>);

impl Recorder {
    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

impl ConnectionObserver for Recorder {
    fn on_connect(&mut self, _connection: &ConnectionHandle) {
        self.0.lock().unwrap().push("connect".to_string());
    }

    fn on_disconnect(&mut self, _connection: &ConnectionHandle) {
        self.0.lock().unwrap().push("disconnect".to_string());
    }

    fn on_error(&mut self, _connection: &ConnectionHandle, error: &ClientError) {
        self.0.lock().unwrap().push(format!("error: {error}"));
    }
}

/// Subscribe a handler that keeps every event it sees.
pub fn collect<T: Transport>(
    connection: &mut Connection<T>,
    channel: &str,
) -> Arc<Mutex<Vec<InboundEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    connection.subscribe(
        channel,
        Handler::new(move |event: &InboundEvent| sink.lock().unwrap().push(event.clone())),
    );
    seen
}

/// Encode one inbound frame the way a peer would.
pub fn inbound(id: u64, channel: &str, packets: &[&[u8]]) -> Bytes {
    let packets: Vec<Bytes> = packets.iter().map(|p| Bytes::copy_from_slice(p)).collect();
    BinaryCodec.serialize(id, channel, &packets).unwrap()
}

/// Decode what a connection sent, opening it first when `key` is given.
pub fn frames(sent: &[Bytes], key: Option<&SecretKey>) -> Vec<Frame> {
    sent.iter()
        .flat_map(|payload| {
            let plain = match key {
                Some(key) => AesGcmCipher.decrypt(payload, key).unwrap(),
                None => payload.clone(),
            };
            BinaryCodec.deserialize(&plain).unwrap()
        })
        .collect()
}

/// Every packet sent, in order, parsed as JSON.
pub fn json_packets(sent: &[Bytes]) -> Vec<Value> {
    frames(sent, None)
        .iter()
        .flat_map(|frame| frame.packets.iter())
        .map(|packet| serde_json::from_slice(packet).unwrap())
        .collect()
}
