use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use muxlink_client::{Connection, Handler, InboundEvent, Server};
use muxlink_transport::Transport;
use tracing::info;

use crate::cmd::{install_ctrlc_handler, EchoArgs, POLL_INTERVAL};
use crate::exit::{client_error, CliResult, SUCCESS};
use crate::output::OutputFormat;

pub fn run(args: EchoArgs, _format: OutputFormat) -> CliResult<i32> {
    let server = Server::bind(args.link.transport(), args.link.config())
        .map_err(|err| client_error("bind failed", &err))?;
    info!(endpoint = %server.config().endpoint, channels = ?args.channels, "echo server listening");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    while running.load(Ordering::SeqCst) {
        let mut conn = server
            .accept()
            .map_err(|err| client_error("accept failed", &err))?;
        subscribe_echo(&mut conn, &args.channels);
        conn.init();

        while running.load(Ordering::SeqCst) {
            let closed = conn.run_until(Instant::now() + POLL_INTERVAL);
            if closed {
                break;
            }
            // Manual profile never flushes on its own.
            conn.flush_all();
        }
    }

    server.stop();
    Ok(SUCCESS)
}

fn subscribe_echo<T: Transport>(conn: &mut Connection<T>, channels: &[String]) {
    let handler = Handler::new(|event: &InboundEvent| {
        info!(
            channel = %event.frame.channel,
            frame = event.frame.id,
            connection = event.connection.id(),
            "echoing message"
        );
        event.reply(event.body.clone());
    });
    for channel in channels {
        conn.subscribe(channel.clone(), handler.clone());
    }
}
