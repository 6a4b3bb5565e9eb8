use std::sync::Arc;

use muxlink_transport::{ListenOptions, Transport};
use tracing::debug;

use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::error::Result;

/// Listens for and accepts inbound connections.
pub struct Server<T: Transport> {
    transport: Arc<T>,
    listener: T::Listener,
    config: ConnectionConfig,
}

impl<T: Transport> Server<T> {
    /// Bind on `config.endpoint`. Accepted connections inherit `config`.
    pub fn bind(transport: Arc<T>, config: ConnectionConfig) -> Result<Self> {
        Self::bind_with_options(transport, config, &ListenOptions::default())
    }

    pub fn bind_with_options(
        transport: Arc<T>,
        config: ConnectionConfig,
        options: &ListenOptions,
    ) -> Result<Self> {
        let listener = transport.listen(&config.endpoint, options)?;
        Ok(Self {
            transport,
            listener,
            config,
        })
    }

    /// Accept the next connection (blocking).
    ///
    /// The returned connection holds the accepted socket but is not yet
    /// initialized: register observers and subscriptions, then call
    /// [`Connection::init`], which connects it immediately. Its identity
    /// is the socket origin.
    pub fn accept(&self) -> Result<Connection<T>> {
        let socket = self.transport.accept(&self.listener)?;
        let origin = self.transport.origin(&socket);
        debug!(%origin, "accepted connection");

        let config = self.config.clone().with_id(origin.to_string());
        Ok(Connection::with_socket(
            Arc::clone(&self.transport),
            config,
            socket,
        ))
    }

    /// Stop accepting. Existing connections are unaffected.
    pub fn stop(self) {
        let endpoint = self.config.endpoint.clone();
        self.transport.stop(
            self.listener,
            Box::new(move || debug!(%endpoint, "listener stopped")),
        );
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}
