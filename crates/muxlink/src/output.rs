use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use muxlink_client::{Body, InboundEvent};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct EventOutput<'a> {
    channel: &'a str,
    frame: u64,
    message_index: usize,
    payload_messages: usize,
    payload_bytes: usize,
    connection: &'a str,
    body: Value,
    timestamp: String,
}

pub fn print_event(event: &InboundEvent, format: OutputFormat) {
    let frame = &event.frame;
    match format {
        OutputFormat::Json => {
            let out = EventOutput {
                channel: &frame.channel,
                frame: frame.id,
                message_index: frame.message_index,
                payload_messages: frame.payload_messages,
                payload_bytes: frame.payload_bytes,
                connection: event.connection.id(),
                body: body_json(&event.body),
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CHANNEL", "FRAME", "MESSAGE", "CONNECTION", "BODY"])
                .add_row(vec![
                    frame.channel.clone(),
                    frame.id.to_string(),
                    format!("{}/{}", frame.message_index + 1, frame.payload_messages),
                    event.connection.id().to_string(),
                    body_preview(&event.body),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "channel={} frame={} message={}/{} connection={} body={}",
                frame.channel,
                frame.id,
                frame.message_index + 1,
                frame.payload_messages,
                event.connection.id(),
                body_preview(&event.body)
            );
        }
        OutputFormat::Raw => {
            print_raw(&event.body.to_bytes());
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn body_json(body: &Body) -> Value {
    match body {
        Body::Value(value) => value.clone(),
        Body::Raw(bytes) => Value::String(raw_preview(bytes)),
    }
}

fn body_preview(body: &Body) -> String {
    match body {
        Body::Value(value) => value.to_string(),
        Body::Raw(bytes) => raw_preview(bytes),
    }
}

fn raw_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
