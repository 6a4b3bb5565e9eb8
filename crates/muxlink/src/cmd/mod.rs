use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use muxlink_client::{ConnectionConfig, Profile};
use muxlink_frame::SecretKey;
use muxlink_transport::{Endpoint, UdsTransport, DEFAULT_PORT};

use crate::exit::{CliError, CliResult, INTERNAL};
use crate::output::OutputFormat;

pub mod echo;
pub mod listen;
pub mod send;
pub mod version;

/// How long server loops block before rechecking for Ctrl-C.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Reply to every inbound message on the channel it arrived on.
    Echo(EchoArgs),
    /// Send a single message.
    Send(SendArgs),
    /// Accept connections and print inbound messages.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Echo(args) => echo::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Listen(args) => listen::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Options shared by every command that opens a link.
#[derive(Args, Debug, Clone)]
pub struct LinkArgs {
    /// Port to connect to or listen on.
    #[arg(long, short = 'p', default_value_t = DEFAULT_PORT, env = "MUXLINK_PORT")]
    pub port: u16,
    /// Directory holding socket files.
    #[arg(long, value_name = "DIR", default_value = "/tmp", env = "MUXLINK_SOCKET_DIR")]
    pub socket_dir: PathBuf,
    /// Shared secret. Frames are sealed with a key derived from it.
    #[arg(long, value_name = "SECRET", env = "MUXLINK_SECRET", hide_env_values = true)]
    pub secret: Option<String>,
    /// Outbound batching profile.
    #[arg(long, value_enum, default_value = "dynamic")]
    pub profile: ProfileArg,
}

impl LinkArgs {
    pub fn transport(&self) -> Arc<UdsTransport> {
        Arc::new(UdsTransport::new().with_socket_dir(&self.socket_dir))
    }

    pub fn config(&self) -> ConnectionConfig {
        let config = ConnectionConfig::new(Endpoint::new("localhost", self.port))
            .with_profile(self.profile.profile());
        match &self.secret {
            Some(secret) => config.with_secret_key(SecretKey::derive(secret)),
            None => config,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ProfileArg {
    Immediate,
    Realtime,
    Dynamic,
    Heartbeat,
    Manual,
}

impl ProfileArg {
    pub fn profile(self) -> Profile {
        match self {
            ProfileArg::Immediate => Profile::immediate(),
            ProfileArg::Realtime => Profile::realtime(),
            ProfileArg::Dynamic => Profile::dynamic(),
            ProfileArg::Heartbeat => Profile::heartbeat(),
            ProfileArg::Manual => Profile::manual(),
        }
    }
}

#[derive(Args, Debug)]
pub struct EchoArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Channels to echo (comma-separated).
    #[arg(long, value_delimiter = ',', default_value = "echo")]
    pub channels: Vec<String>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Channel to send on.
    #[arg(long, short = 'c', default_value = "echo")]
    pub channel: String,
    /// JSON payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
    /// Wait for one reply on the same channel and print it.
    #[arg(long)]
    pub wait: bool,
    /// How long to wait for the connection and, with --wait, the reply (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Channels to print (comma-separated).
    #[arg(long, value_delimiter = ',', required = true)]
    pub channels: Vec<String>,
    /// Exit after printing N messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
