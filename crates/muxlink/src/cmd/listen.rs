use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Instant;

use muxlink_client::{Handler, InboundEvent, Server};
use tracing::info;

use crate::cmd::{install_ctrlc_handler, ListenArgs, POLL_INTERVAL};
use crate::exit::{client_error, CliResult, SUCCESS};
use crate::output::{print_event, OutputFormat};

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let server = Server::bind(args.link.transport(), args.link.config())
        .map_err(|err| client_error("bind failed", &err))?;
    info!(endpoint = %server.config().endpoint, channels = ?args.channels, "listening");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut printed = 0usize;

    while running.load(Ordering::SeqCst) {
        let mut conn = server
            .accept()
            .map_err(|err| client_error("accept failed", &err))?;

        let (tx, rx) = mpsc::channel();
        let handler = Handler::new(move |event: &InboundEvent| {
            let _ = tx.send(event.clone());
        });
        for channel in &args.channels {
            conn.subscribe(channel.clone(), handler.clone());
        }
        conn.init();

        while running.load(Ordering::SeqCst) {
            let closed = conn.run_until(Instant::now() + POLL_INTERVAL);

            for event in rx.try_iter() {
                print_event(&event, format);
                printed = printed.saturating_add(1);

                if args.count.is_some_and(|count| printed >= count) {
                    conn.destroy();
                    conn.poll();
                    server.stop();
                    return Ok(SUCCESS);
                }
            }

            if closed {
                break;
            }
        }
    }

    server.stop();
    Ok(SUCCESS)
}
