use std::io::{ErrorKind, Write};
use std::net::Shutdown;
use std::os::fd::AsRawFd;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::BytesMut;
use tracing::{debug, info, warn};

use crate::envelope::{encode_envelope, EnvelopeReader};
use crate::error::{Result, TransportError};
use crate::traits::{
    DoneCallback, Endpoint, ListenOptions, Origin, SocketEvent, SocketHandlers, Transport,
};

/// Unix domain socket transport.
///
/// Endpoint ports map onto filesystem paths: `<socket_dir>/<prefix><port>`.
///
/// `send` writes on the calling thread. When the peer stops reading and the
/// kernel buffer fills, it blocks for up to the write timeout (default 5 s)
/// and then reports an `Io` error.
pub struct UdsTransport {
    socket_dir: PathBuf,
    prefix: String,
    max_envelope: usize,
    write_timeout: Option<Duration>,
}

impl UdsTransport {
    /// Maximum socket path length.
    /// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new() -> Self {
        Self {
            socket_dir: PathBuf::from("/tmp"),
            prefix: "muxlink.socket-".to_string(),
            max_envelope: crate::envelope::DEFAULT_MAX_ENVELOPE,
            write_timeout: Some(Self::DEFAULT_WRITE_TIMEOUT),
        }
    }

    /// Place socket files under `dir` instead of `/tmp`.
    pub fn with_socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = dir.into();
        self
    }

    /// Override the socket file name prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Override the largest inbound payload accepted.
    pub fn with_max_envelope(mut self, max_envelope: usize) -> Self {
        self.max_envelope = max_envelope;
        self
    }

    /// How long `send` may block on a full socket buffer. `None` waits forever.
    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Filesystem path for `endpoint`.
    pub fn socket_path(&self, endpoint: &Endpoint) -> PathBuf {
        self.socket_dir
            .join(format!("{}{}", self.prefix, endpoint.port))
    }

    fn checked_path(&self, endpoint: &Endpoint) -> Result<PathBuf> {
        let path = self.socket_path(endpoint);
        let len = path.as_os_str().len();
        if len >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len,
                max: Self::MAX_PATH_LEN,
            });
        }
        Ok(path)
    }
}

impl Default for UdsTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// One Unix domain socket, connecting or connected.
pub struct UdsSocket {
    path: PathBuf,
    origin: Origin,
    /// Already-connected stream (accepted sockets) until attached.
    accepted: Option<UnixStream>,
    shared: Arc<SocketShared>,
    reader: Option<JoinHandle<()>>,
    max_envelope: usize,
    write_timeout: Option<Duration>,
}

#[derive(Default)]
struct SocketShared {
    writer: Mutex<WriterSlot>,
    handlers: Mutex<Option<SocketHandlers>>,
    closed: AtomicBool,
}

#[derive(Default)]
struct WriterSlot {
    stream: Option<UnixStream>,
    closing: bool,
}

impl SocketShared {
    fn writer(&self) -> MutexGuard<'_, WriterSlot> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: SocketEvent) {
        let handlers = self
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(handlers) = handlers {
            handlers.emit(event);
        }
    }

    fn emit_close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.emit(SocketEvent::Close);
        }
    }
}

impl std::fmt::Debug for UdsSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdsSocket")
            .field("path", &self.path)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl UdsSocket {
    fn connecting(transport: &UdsTransport, path: PathBuf, origin: Origin) -> Self {
        Self {
            path,
            origin,
            accepted: None,
            shared: Arc::new(SocketShared::default()),
            reader: None,
            max_envelope: transport.max_envelope,
            write_timeout: transport.write_timeout,
        }
    }

    /// The path this socket connects to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A bound Unix domain socket listener.
///
/// Stale socket files are removed on bind; the file is removed again when
/// the listener drops, unless something else replaced it in the meantime.
pub struct UdsListener {
    listener: UnixListener,
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
}

impl UdsListener {
    /// The path this listener is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UdsListener {
    fn drop(&mut self) {
        if let Some((expected_dev, expected_ino)) = self.created_inode {
            if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
                if metadata.file_type().is_socket()
                    && metadata.dev() == expected_dev
                    && metadata.ino() == expected_ino
                {
                    debug!(path = ?self.path, "cleaning up socket file");
                    let _ = std::fs::remove_file(&self.path);
                } else {
                    debug!(
                        path = ?self.path,
                        "socket path identity changed; skipping cleanup"
                    );
                }
            }
        }
    }
}

impl Transport for UdsTransport {
    type Socket = UdsSocket;
    type Listener = UdsListener;

    fn name(&self) -> &'static str {
        "unix-domain-socket"
    }

    fn create_socket(&self, endpoint: &Endpoint) -> Result<UdsSocket> {
        let path = self.checked_path(endpoint)?;
        let origin = Origin {
            host: path.display().to_string(),
            port: endpoint.port.to_string(),
        };
        Ok(UdsSocket::connecting(self, path, origin))
    }

    fn attach_socket(&self, socket: &mut UdsSocket, handlers: SocketHandlers) -> Result<()> {
        if socket.reader.is_some() {
            return Err(TransportError::AlreadyAttached);
        }
        let idle_timeout = handlers.idle_timeout;
        *socket
            .shared
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(handlers);

        let shared = Arc::clone(&socket.shared);
        let path = socket.path.clone();
        let max_envelope = socket.max_envelope;
        let write_timeout = socket.write_timeout;
        let accepted = socket.accepted.take();
        // Accepted sockets are usable as soon as attach returns.
        if let Some(stream) = &accepted {
            let writer = stream.try_clone()?;
            writer.set_write_timeout(write_timeout)?;
            socket.shared.writer().stream = Some(writer);
        }

        let reader = std::thread::Builder::new()
            .name("muxlink-uds".to_string())
            .spawn(move || {
                let announce = accepted.is_none();
                let stream = match accepted {
                    Some(stream) => stream,
                    None => match UnixStream::connect(&path) {
                        Ok(stream) => stream,
                        Err(source) => {
                            debug!(?path, error = %source, "connect failed");
                            shared.emit(SocketEvent::Error(TransportError::Connect {
                                path,
                                source,
                            }));
                            shared.emit_close();
                            return;
                        }
                    },
                };
                run_socket(
                    shared,
                    stream,
                    SocketTimeouts {
                        idle: idle_timeout,
                        write: write_timeout,
                    },
                    max_envelope,
                    announce,
                );
            })?;
        socket.reader = Some(reader);
        Ok(())
    }

    fn send(&self, socket: &mut UdsSocket, payload: &[u8]) {
        let mut wire = BytesMut::new();
        let result = encode_envelope(payload, &mut wire).and_then(|()| {
            let mut slot = socket.shared.writer();
            match slot.stream.as_mut() {
                Some(stream) => stream.write_all(&wire).map_err(TransportError::Io),
                None => Err(TransportError::NotConnected),
            }
        });
        if let Err(err) = result {
            socket.shared.emit(SocketEvent::Error(err));
        }
    }

    fn disconnect(&self, mut socket: UdsSocket, done: DoneCallback) {
        {
            let mut slot = socket.shared.writer();
            slot.closing = true;
            if let Some(stream) = slot.stream.take() {
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
        if let Some(stream) = socket.accepted.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        if let Some(reader) = socket.reader.take() {
            if reader.join().is_err() {
                warn!(path = ?socket.path, "socket reader thread panicked");
            }
        }
        socket.shared.emit_close();
        debug!(path = ?socket.path, "socket disconnected");
        done();
    }

    fn listen(&self, endpoint: &Endpoint, options: &ListenOptions) -> Result<UdsListener> {
        let path = self.checked_path(endpoint)?;

        // Remove stale socket if it exists, but never remove non-socket files.
        if path.exists() {
            let metadata = std::fs::symlink_metadata(&path).map_err(|e| TransportError::Bind {
                path: path.clone(),
                source: e,
            })?;
            if !metadata.file_type().is_socket() {
                return Err(TransportError::Bind {
                    path,
                    source: std::io::Error::new(
                        ErrorKind::AlreadyExists,
                        "existing path is not a unix socket",
                    ),
                });
            }
            debug!(?path, "removing stale socket");
            std::fs::remove_file(&path).map_err(|e| TransportError::Bind {
                path: path.clone(),
                source: e,
            })?;
        }

        let listener = UnixListener::bind(&path).map_err(|e| TransportError::Bind {
            path: path.clone(),
            source: e,
        })?;

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(options.mode)).map_err(
            |e| TransportError::Bind {
                path: path.clone(),
                source: e,
            },
        )?;
        let created = std::fs::symlink_metadata(&path).map_err(|e| TransportError::Bind {
            path: path.clone(),
            source: e,
        })?;

        info!(?path, "listening on unix domain socket");

        Ok(UdsListener {
            listener,
            path,
            created_inode: Some((created.dev(), created.ino())),
        })
    }

    fn accept(&self, listener: &UdsListener) -> Result<UdsSocket> {
        let (stream, _addr) = listener.listener.accept().map_err(TransportError::Accept)?;
        let origin = Origin {
            host: listener.path.display().to_string(),
            port: stream.as_raw_fd().to_string(),
        };
        debug!(%origin, "accepted connection");

        let mut socket = UdsSocket::connecting(self, listener.path.clone(), origin);
        socket.accepted = Some(stream);
        Ok(socket)
    }

    fn origin(&self, socket: &UdsSocket) -> Origin {
        socket.origin.clone()
    }

    fn stop(&self, listener: UdsListener, done: DoneCallback) {
        debug!(path = ?listener.path, "stopping listener");
        drop(listener);
        done();
    }
}

struct SocketTimeouts {
    idle: Option<Duration>,
    write: Option<Duration>,
}

fn run_socket(
    shared: Arc<SocketShared>,
    stream: UnixStream,
    timeouts: SocketTimeouts,
    max_envelope: usize,
    announce: bool,
) {
    if let Err(err) = stream.set_read_timeout(timeouts.idle) {
        shared.emit(SocketEvent::Error(TransportError::Io(err)));
    }

    let writer = if announce {
        match stream
            .try_clone()
            .and_then(|writer| writer.set_write_timeout(timeouts.write).map(|()| writer))
        {
            Ok(writer) => Some(writer),
            Err(err) => {
                shared.emit(SocketEvent::Error(TransportError::Io(err)));
                shared.emit_close();
                return;
            }
        }
    } else {
        None
    };

    {
        let mut slot = shared.writer();
        if slot.closing {
            let _ = stream.shutdown(Shutdown::Both);
            drop(slot);
            shared.emit_close();
            return;
        }
        if writer.is_some() {
            slot.stream = writer;
        }
    }

    if announce {
        shared.emit(SocketEvent::Connect);
    }

    let mut reader = EnvelopeReader::with_max_payload(stream, max_envelope);
    loop {
        match reader.read_envelope() {
            Ok(Some(payload)) => shared.emit(SocketEvent::Data(payload)),
            Ok(None) => break,
            Err(TransportError::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                debug!("socket idle timeout expired");
                break;
            }
            Err(err) => {
                if !shared.writer().closing {
                    shared.emit(SocketEvent::Error(err));
                }
                break;
            }
        }
    }

    let _ = reader.get_ref().shutdown(Shutdown::Both);
    shared.writer().stream = None;
    shared.emit_close();
}
