mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use common::{collect, frames, inbound, json_packets, MockTransport, Recorder};
use muxlink_client::{
    Body, Connection, ConnectionConfig, ConnectionState, Handler, InboundEvent,
    MemorySessionStore, Profile, Server,
};
use muxlink_frame::{AesGcmCipher, Cipher, SecretKey};
use muxlink_transport::{SocketEvent, TransportError};
use serde_json::json;

fn connection(transport: &Arc<MockTransport>, profile: Profile) -> Connection<MockTransport> {
    Connection::new(
        Arc::clone(transport),
        ConnectionConfig::default().with_profile(profile),
    )
}

/// Init and deliver the connect event for the first socket.
fn connected(transport: &Arc<MockTransport>, profile: Profile) -> Connection<MockTransport> {
    let mut conn = connection(transport, profile);
    conn.init();
    transport.connect(0);
    conn.poll();
    assert!(conn.is_connected());
    conn
}

#[test]
fn writes_before_connect_are_backlogged_then_sent_in_order() {
    let transport = MockTransport::new();
    let mut conn = connection(&transport, Profile::immediate());
    conn.init();
    assert_eq!(conn.state(), ConnectionState::Pending);

    for i in 0..5 {
        conn.write("chat", json!(i));
    }
    assert_eq!(conn.backlog_len(), 5);
    assert!(transport.sent().is_empty());

    transport.connect(0);
    conn.poll();

    assert!(conn.is_connected());
    assert_eq!(conn.backlog_len(), 0);
    let expected: Vec<_> = (0..5).map(|i| json!(i)).collect();
    assert_eq!(json_packets(&transport.sent()), expected);
}

#[test]
fn backlog_is_sent_before_later_writes() {
    let transport = MockTransport::new();
    let mut conn = connection(&transport, Profile::immediate());
    conn.init();
    conn.write("chat", json!("early-1"));
    conn.write("chat", json!("early-2"));

    transport.connect(0);
    conn.poll();
    conn.write("chat", json!("late"));

    let sent = frames(&transport.sent(), None);
    let ids: Vec<u64> = sent.iter().map(|f| f.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(
        json_packets(&transport.sent()),
        vec![json!("early-1"), json!("early-2"), json!("late")]
    );
}

#[test]
fn writes_before_init_wait_for_connect() {
    let transport = MockTransport::new();
    let mut conn = connection(&transport, Profile::immediate());
    conn.write("chat", json!("queued"));
    assert_eq!(conn.backlog_len(), 1);
    assert_eq!(transport.sockets(), 0);

    conn.init();
    transport.connect(0);
    conn.poll();
    assert_eq!(json_packets(&transport.sent()), vec![json!("queued")]);
}

#[test]
fn manual_profile_batches_until_flush() {
    let transport = MockTransport::new();
    let mut conn = connected(&transport, Profile::manual());

    conn.write("x", json!("m1"));
    conn.write("x", json!("m2"));
    conn.write("x", json!("m3"));
    conn.poll();
    assert!(transport.sent().is_empty());
    assert_eq!(conn.queue("x").pending(), 3);

    conn.flush("x");
    let sent = frames(&transport.sent(), None);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].id, 1);
    assert_eq!(sent[0].channel, "x");
    assert_eq!(sent[0].packets.len(), 3);
    assert_eq!(conn.queue("x").frame(), 1);

    conn.flush("x");
    conn.flush("missing");
    assert_eq!(transport.sent().len(), 1);
}

#[test]
fn channels_batch_independently() {
    let transport = MockTransport::new();
    let mut conn = connected(&transport, Profile::manual());
    conn.write("a", json!(1));
    conn.write("b", json!(2));
    conn.write("a", json!(3));

    conn.flush("b");
    let sent = frames(&transport.sent(), None);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].channel, "b");
    assert_eq!(conn.queue("a").pending(), 2);

    conn.flush_all();
    let sent = frames(&transport.sent(), None);
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].channel, "a");
    assert_eq!(sent[1].id, 1);
}

#[test]
fn size_threshold_flushes_on_add() {
    let transport = MockTransport::new();
    let profile = Profile {
        tick: None,
        max_bytes: Some(10),
    };
    let mut conn = connected(&transport, profile);

    // "\"abc\"" is 5 bytes once encoded.
    conn.write("x", json!("abc"));
    assert!(transport.sent().is_empty());
    conn.write("x", json!("def"));

    let sent = frames(&transport.sent(), None);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].packets.len(), 2);
    assert_eq!(conn.queue("x").pending(), 0);
}

#[test]
fn tick_window_flushes_on_poll() {
    let transport = MockTransport::new();
    let profile = Profile {
        tick: Some(Duration::from_millis(200)),
        max_bytes: None,
    };
    let mut conn = connected(&transport, profile);

    conn.write("x", json!(1));
    conn.write("x", json!(2));
    conn.poll();
    assert!(transport.sent().is_empty());

    thread::sleep(Duration::from_millis(250));
    conn.poll();
    let sent = frames(&transport.sent(), None);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].packets.len(), 2);
}

#[test]
fn run_until_flushes_on_tick() {
    let transport = MockTransport::new();
    let profile = Profile {
        tick: Some(Duration::from_millis(20)),
        max_bytes: None,
    };
    let mut conn = connected(&transport, profile);

    conn.write("x", json!("tick"));
    let disconnected = conn.run_until(Instant::now() + Duration::from_millis(200));

    assert!(!disconnected);
    assert_eq!(json_packets(&transport.sent()), vec![json!("tick")]);
}

#[test]
fn destroy_drains_queues_before_disconnecting() {
    let transport = MockTransport::new();
    let recorder = Recorder::default();
    let mut conn = connection(&transport, Profile::manual());
    conn.observe(recorder.clone());
    conn.init();
    transport.connect(0);
    conn.poll();

    conn.write("x", json!("a"));
    conn.write("y", json!("b"));
    conn.destroy();

    assert_eq!(transport.sent().len(), 2);
    assert!(transport.disconnects().is_empty());
    assert!(conn.is_connected());

    conn.poll();
    assert_eq!(transport.disconnects(), vec![0]);
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(recorder.events(), vec!["connect", "disconnect"]);
}

#[test]
fn destroy_from_handle_disconnects_on_run() {
    let transport = MockTransport::new();
    let mut conn = connected(&transport, Profile::manual());
    conn.write("x", json!("last"));

    conn.handle().destroy();
    let disconnected = conn.run_until(Instant::now() + Duration::from_secs(2));

    assert!(disconnected);
    assert_eq!(json_packets(&transport.sent()), vec![json!("last")]);
    assert_eq!(transport.disconnects(), vec![0]);
}

#[test]
fn destroy_before_connect_closes_directly() {
    let transport = MockTransport::new();
    let mut conn = connection(&transport, Profile::immediate());
    conn.destroy();
    conn.poll();
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert!(transport.disconnects().is_empty());

    conn.destroy();
    conn.poll();
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

#[test]
fn inbound_frame_fans_out_to_subscribers_in_order() {
    let transport = MockTransport::new();
    let mut conn = connected(&transport, Profile::immediate());
    let log = Arc::new(std::sync::Mutex::new(Vec::new()));
    for tag in ["A", "B"] {
        let log = Arc::clone(&log);
        conn.subscribe(
            "x",
            Handler::new(move |event: &InboundEvent| {
                let value = event.body.as_value().cloned().unwrap_or_default();
                log.lock().unwrap().push(format!("{tag}:{value}"));
            }),
        );
    }
    let other = collect(&mut conn, "y");

    let wire = inbound(9, "x", &[b"1", b"2"]);
    transport.data(0, wire);
    conn.poll();

    assert_eq!(*log.lock().unwrap(), vec!["A:1", "B:1", "A:2", "B:2"]);
    assert!(other.lock().unwrap().is_empty());
}

#[test]
fn inbound_events_carry_frame_info() {
    let transport = MockTransport::new();
    let mut conn = connected(&transport, Profile::immediate());
    let seen = collect(&mut conn, "x");

    let wire = inbound(42, "x", &[b"\"a\"", b"\"b\"", b"\"c\""]);
    let wire_len = wire.len();
    transport.data(0, wire);
    conn.poll();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    for (index, event) in seen.iter().enumerate() {
        assert_eq!(event.frame.id, 42);
        assert_eq!(event.frame.channel, "x");
        assert_eq!(event.frame.payload_bytes, wire_len);
        assert_eq!(event.frame.payload_messages, 3);
        assert_eq!(event.frame.message_index, index);
        assert_eq!(event.connection.id(), conn.id());
    }
    assert_eq!(seen[2].body, Body::Value(json!("c")));
}

#[test]
fn concatenated_frames_dispatch_in_order() {
    let transport = MockTransport::new();
    let mut conn = connected(&transport, Profile::immediate());
    let seen = collect(&mut conn, "x");

    let mut chunk = inbound(1, "x", &[b"1"]).to_vec();
    chunk.extend_from_slice(&inbound(2, "x", &[b"2"]));
    transport.data(0, Bytes::from(chunk));
    conn.poll();

    let ids: Vec<u64> = seen.lock().unwrap().iter().map(|e| e.frame.id).collect();
    assert_eq!(ids, vec![1, 2]);
}

#[test]
fn undecodable_packet_is_delivered_raw() {
    let transport = MockTransport::new();
    let mut conn = connected(&transport, Profile::immediate());
    let seen = collect(&mut conn, "x");

    transport.data(0, inbound(1, "x", &[b"not json", b"\"ok\""]));
    conn.poll();

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].body, Body::Raw(Bytes::from_static(b"not json")));
    assert_eq!(seen[1].body, Body::Value(json!("ok")));
}

#[test]
fn without_serial_bodies_pass_through_raw() {
    let transport = MockTransport::new();
    let mut conn = Connection::new(
        Arc::clone(&transport),
        ConnectionConfig::default()
            .with_profile(Profile::immediate())
            .with_serial(None),
    );
    let seen = collect(&mut conn, "bin");
    conn.init();
    transport.connect(0);
    conn.poll();

    conn.write("bin", Bytes::from_static(&[0xde, 0xad]));
    let sent = frames(&transport.sent(), None);
    assert_eq!(sent[0].packets, vec![Bytes::from_static(&[0xde, 0xad])]);

    transport.data(0, inbound(1, "bin", &[b"{}"]));
    conn.poll();
    assert_eq!(seen.lock().unwrap()[0].body, Body::Raw(Bytes::from_static(b"{}")));
}

#[test]
fn encrypted_frames_round_trip() {
    let transport = MockTransport::new();
    let key = SecretKey::derive("shared secret");
    let recorder = Recorder::default();
    let mut conn = Connection::new(
        Arc::clone(&transport),
        ConnectionConfig::default()
            .with_profile(Profile::immediate())
            .with_secret_key(key.clone()),
    );
    conn.observe(recorder.clone());
    let seen = collect(&mut conn, "x");
    conn.init();
    transport.connect(0);
    conn.poll();

    conn.write("x", json!({"secret": true}));
    let opened = frames(&transport.sent(), Some(&key));
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].packets[0], Bytes::from_static(b"{\"secret\":true}"));

    // Garbage is dropped and reported; the connection stays usable.
    transport.data(0, Bytes::from_static(b"definitely not sealed"));
    conn.poll();
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(recorder.count("error"), 1);
    assert!(conn.is_connected());

    let sealed = AesGcmCipher
        .encrypt(&inbound(1, "x", &[b"\"hi\""]), &key)
        .expect("encrypt inbound frame");
    transport.data(0, sealed);
    conn.poll();
    assert_eq!(seen.lock().unwrap()[0].body, Body::Value(json!("hi")));
}

#[test]
fn reply_writes_on_the_same_channel() {
    let transport = MockTransport::new();
    let mut conn = connected(&transport, Profile::immediate());
    conn.subscribe(
        "ping",
        Handler::new(|event: &InboundEvent| event.reply(json!("pong"))),
    );

    transport.data(0, inbound(1, "ping", &[b"\"ping\""]));
    conn.poll();

    let sent = frames(&transport.sent(), None);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].channel, "ping");
    assert_eq!(json_packets(&transport.sent()), vec![json!("pong")]);
}

#[test]
fn handle_writes_from_another_thread() {
    let transport = MockTransport::new();
    let mut conn = connected(&transport, Profile::immediate());
    let handle = conn.handle();

    thread::spawn(move || {
        handle.write("x", json!(1)).write("x", json!(2));
    })
    .join()
    .expect("writer thread");
    conn.poll();

    assert_eq!(json_packets(&transport.sent()), vec![json!(1), json!(2)]);
}

#[test]
fn unsubscribed_handler_stops_receiving() {
    let transport = MockTransport::new();
    let mut conn = connected(&transport, Profile::immediate());
    let seen = Arc::new(std::sync::Mutex::new(0usize));
    let counter = Arc::clone(&seen);
    let handler = Handler::new(move |_: &InboundEvent| *counter.lock().unwrap() += 1);
    conn.subscribe("x", handler.clone());
    conn.subscribe("x", handler.clone());

    transport.data(0, inbound(1, "x", &[b"1"]));
    conn.poll();
    assert_eq!(*seen.lock().unwrap(), 2);

    conn.unsubscribe("x", Some(&handler));
    assert_eq!(conn.subscribers("x"), 0);
    transport.data(0, inbound(2, "x", &[b"2"]));
    conn.poll();
    assert_eq!(*seen.lock().unwrap(), 2);
}

#[test]
fn events_from_a_previous_socket_are_ignored() {
    let transport = MockTransport::new();
    let recorder = Recorder::default();
    let mut conn = connection(&transport, Profile::immediate());
    conn.observe(recorder.clone());
    conn.init();
    transport.connect(0);
    conn.poll();
    conn.destroy();
    conn.poll();
    assert_eq!(conn.state(), ConnectionState::Disconnected);

    conn.init();
    assert_eq!(transport.sockets(), 2);
    conn.write("x", json!("after"));

    transport.emit(0, SocketEvent::Close);
    transport.connect(0);
    conn.poll();
    assert_eq!(conn.state(), ConnectionState::Pending);

    transport.connect(1);
    conn.poll();
    assert!(conn.is_connected());
    assert_eq!(json_packets(&transport.sent_on(1)), vec![json!("after")]);
    assert_eq!(recorder.events(), vec!["connect", "disconnect", "connect"]);
}

#[test]
fn init_on_connected_connection_is_noop() {
    let transport = MockTransport::new();
    let mut conn = connected(&transport, Profile::immediate());
    conn.init();
    assert_eq!(transport.sockets(), 1);
    assert!(conn.is_connected());
}

#[test]
fn init_while_connecting_keeps_one_socket() {
    let transport = MockTransport::new();
    let mut conn = connection(&transport, Profile::immediate());
    conn.init();
    conn.write("x", json!(1));
    conn.init();
    conn.poll();

    assert_eq!(conn.state(), ConnectionState::Pending);
    assert_eq!(transport.sockets(), 1);
    assert!(transport.sent().is_empty());
    assert_eq!(conn.backlog_len(), 1);

    transport.connect(0);
    conn.poll();
    assert!(conn.is_connected());
    assert_eq!(json_packets(&transport.sent_on(0)), vec![json!(1)]);
}

#[test]
fn accepted_connection_reports_connect_to_observers() {
    let transport = MockTransport::new();
    let server = Server::bind(Arc::clone(&transport), ConnectionConfig::default())
        .expect("server should bind");
    let recorder = Recorder::default();

    let mut conn = server.accept().expect("server should accept");
    assert_eq!(conn.state(), ConnectionState::Pending);
    assert_eq!(conn.id(), "mock:0");
    conn.observe(recorder.clone()).init();
    assert!(conn.is_connected());

    conn.init();
    assert_eq!(transport.sockets(), 1);

    conn.destroy();
    conn.poll();
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(recorder.events(), vec!["connect", "disconnect"]);
    server.stop();
}

#[test]
fn transport_error_keeps_state_and_backlog() {
    let transport = MockTransport::new();
    let recorder = Recorder::default();
    let mut conn = connection(&transport, Profile::immediate());
    conn.observe(recorder.clone());
    conn.init();
    conn.write("x", json!(1));
    conn.write("x", json!(2));

    transport.emit(
        0,
        SocketEvent::Error(TransportError::Io(std::io::Error::from(
            std::io::ErrorKind::ConnectionRefused,
        ))),
    );
    conn.poll();
    assert_eq!(conn.state(), ConnectionState::Pending);
    assert_eq!(recorder.count("error"), 1);

    transport.emit(0, SocketEvent::Close);
    conn.poll();
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(conn.backlog_len(), 2);

    conn.init();
    transport.connect(1);
    conn.poll();
    assert_eq!(json_packets(&transport.sent_on(1)), vec![json!(1), json!(2)]);
}

#[test]
fn failed_socket_creation_is_reported() {
    let transport = MockTransport::new();
    transport.fail_next_create();
    let recorder = Recorder::default();
    let mut conn = connection(&transport, Profile::immediate());
    conn.observe(recorder.clone());

    conn.init();
    assert_eq!(conn.state(), ConnectionState::Pending);
    assert_eq!(recorder.count("error"), 1);

    conn.init();
    transport.connect(0);
    conn.poll();
    assert!(conn.is_connected());
}

#[test]
fn session_is_resolved_on_connect_and_shared_across_reconnects() {
    let transport = MockTransport::new();
    let store = Arc::new(MemorySessionStore::new());
    let mut conn = Connection::new(
        Arc::clone(&transport),
        ConnectionConfig::default()
            .with_id("client-a")
            .with_profile(Profile::immediate())
            .with_sessions(store.clone()),
    );
    let seen = collect(&mut conn, "x");
    assert!(conn.session().is_none());

    conn.init();
    transport.connect(0);
    conn.poll();
    let first = Arc::clone(conn.session().expect("session after connect"));
    assert_eq!(first.id(), "client-a");
    first.set("user", json!("ada"));

    transport.data(0, inbound(1, "x", &[b"1"]));
    conn.poll();
    let event_session = seen.lock().unwrap()[0]
        .session
        .clone()
        .expect("event carries session");
    assert!(Arc::ptr_eq(&first, &event_session));

    conn.destroy();
    conn.poll();
    conn.init();
    transport.connect(1);
    conn.poll();
    let second = conn.session().expect("session after reconnect");
    assert!(Arc::ptr_eq(&first, second));
    assert_eq!(second.get("user"), Some(json!("ada")));
    assert_eq!(store.len(), 1);
}

#[test]
fn observers_fire_once_per_transition() {
    let transport = MockTransport::new();
    let first = Recorder::default();
    let second = Recorder::default();
    let mut conn = connection(&transport, Profile::immediate());
    conn.observe(first.clone()).observe(second.clone());

    conn.init();
    transport.connect(0);
    conn.poll();
    transport.emit(0, SocketEvent::Close);
    transport.emit(0, SocketEvent::Close);
    conn.poll();

    for recorder in [first, second] {
        assert_eq!(recorder.events(), vec!["connect", "disconnect"]);
    }
}
