//! Sends a burst of messages on two channels and prints the echoes.
//!
//! Start `cargo run --example echo-server` first, then:
//!   cargo run --example chat-client

use std::sync::Arc;
use std::time::{Duration, Instant};

use muxlink::{
    Connection, ConnectionConfig, Endpoint, Handler, InboundEvent, Profile, UdsTransport,
};
use serde_json::json;

fn main() {
    let transport = Arc::new(UdsTransport::new());
    let config = ConnectionConfig::new(Endpoint::new("localhost", 3000))
        .with_profile(Profile::realtime());
    let mut conn = Connection::new(transport, config);

    conn.subscribe(
        "echo",
        Handler::new(|event: &InboundEvent| {
            println!("echo #{}: {:?}", event.frame.message_index, event.body);
        }),
    );

    conn.init();
    for i in 0..10 {
        // Writes inside one 16 ms window leave as a single frame.
        conn.write("echo", json!({ "seq": i }));
    }
    // Nobody listens on "log" remotely; the server drops it.
    conn.write("log", "client started");

    conn.run_until(Instant::now() + Duration::from_secs(1));
    conn.destroy();
    conn.run_until(Instant::now() + Duration::from_secs(1));
}
