use std::fs;
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use muxlink_client::{
    Body, ClientError, Connection, ConnectionHandle, ConnectionObserver, Handler, InboundEvent,
};
use muxlink_transport::Transport;
use serde_json::Value;
use tracing::debug;

use crate::cmd::SendArgs;
use crate::exit::{client_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_event, OutputFormat};

const STEP: Duration = Duration::from_millis(20);

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let body = resolve_body(&args)?;

    let errors = FirstError::default();
    let (tx, rx) = mpsc::channel();
    let mut conn = Connection::new(args.link.transport(), args.link.config());
    conn.observe(errors.clone());
    if args.wait {
        conn.subscribe(
            args.channel.clone(),
            Handler::new(move |event: &InboundEvent| {
                let _ = tx.send(event.clone());
            }),
        );
    }

    conn.init();
    wait_for_connect(&mut conn, &errors, Instant::now() + wait_timeout)?;

    conn.write(args.channel.clone(), body);
    conn.flush(&args.channel);
    debug!(channel = %args.channel, "message sent");

    if args.wait {
        let event = wait_for_reply(&mut conn, &rx, Instant::now() + wait_timeout)
            .map_err(|err| errors.take().unwrap_or(err))?;
        print_event(&event, format);
    }

    conn.destroy();
    conn.run_until(Instant::now() + wait_timeout);
    Ok(SUCCESS)
}

/// Keeps the first error a connection reports, labelled by the phase it
/// happened in.
#[derive(Clone, Default)]
struct FirstError(Arc<Mutex<ErrorSlot>>);

#[derive(Default)]
struct ErrorSlot {
    connected: bool,
    error: Option<CliError>,
}

impl FirstError {
    fn take(&self) -> Option<CliError> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).error.take()
    }
}

fn error_context(connected: bool, error: &ClientError) -> &'static str {
    match (connected, error) {
        (false, _) => "connect failed",
        (true, ClientError::Transport(_)) => "connection error",
        (true, _) => "invalid data on connection",
    }
}

impl ConnectionObserver for FirstError {
    fn on_connect(&mut self, _connection: &ConnectionHandle) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).connected = true;
    }

    fn on_error(&mut self, _connection: &ConnectionHandle, error: &ClientError) {
        let mut slot = self.0.lock().unwrap_or_else(|e| e.into_inner());
        let context = error_context(slot.connected, error);
        slot.error
            .get_or_insert_with(|| client_error(context, error));
    }
}

fn wait_for_connect<T: Transport>(
    conn: &mut Connection<T>,
    errors: &FirstError,
    deadline: Instant,
) -> CliResult<()> {
    loop {
        let closed = conn.run_until(deadline.min(Instant::now() + STEP));
        if conn.is_connected() {
            return Ok(());
        }
        if closed {
            return Err(errors
                .take()
                .unwrap_or_else(|| CliError::new(FAILURE, "connection closed before connect")));
        }
        if Instant::now() >= deadline {
            return Err(CliError::new(TIMEOUT, "timed out waiting for connection"));
        }
    }
}

fn wait_for_reply<T: Transport>(
    conn: &mut Connection<T>,
    replies: &mpsc::Receiver<InboundEvent>,
    deadline: Instant,
) -> CliResult<InboundEvent> {
    loop {
        if let Ok(event) = replies.try_recv() {
            return Ok(event);
        }
        if Instant::now() >= deadline {
            return Err(CliError::new(TIMEOUT, "timed out waiting for reply"));
        }
        if conn.run_until(deadline.min(Instant::now() + STEP)) {
            return replies
                .try_recv()
                .map_err(|_| CliError::new(FAILURE, "connection closed before reply"));
        }
    }
}

fn resolve_body(args: &SendArgs) -> CliResult<Body> {
    if let Some(json) = &args.json {
        let value: Value = serde_json::from_str(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(Body::Value(value));
    }
    if let Some(data) = &args.data {
        return Ok(Body::from(data.as_str()));
    }
    if let Some(path) = &args.file {
        let bytes = fs::read(path).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), &err)
        })?;
        return Ok(Body::from(bytes));
    }
    Ok(Body::Value(Value::Null))
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
