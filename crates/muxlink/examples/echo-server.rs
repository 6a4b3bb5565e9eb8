//! Minimal echo server: accepts connections one at a time and replies to
//! every message on the `echo` channel.
//!
//! Run with:
//!   cargo run --example echo-server
//!
//! In another terminal:
//!   cargo run --example chat-client

use std::sync::Arc;

use muxlink::{ConnectionConfig, Endpoint, Handler, InboundEvent, Server, UdsTransport};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let transport = Arc::new(UdsTransport::new());
    let config = ConnectionConfig::new(Endpoint::new("localhost", 3000));
    let server = Server::bind(transport, config)?;
    eprintln!("Listening on port 3000");

    loop {
        let mut conn = server.accept()?;
        eprintln!("Connected: {}", conn.id());
        conn.subscribe(
            "echo",
            Handler::new(|event: &InboundEvent| {
                eprintln!(
                    "Received message {}/{} of frame {}",
                    event.frame.message_index + 1,
                    event.frame.payload_messages,
                    event.frame.id
                );
                event.reply(event.body.clone());
            }),
        );
        conn.init().run();
        eprintln!("Disconnected: {}", conn.id());
    }
}
