use crate::error::ClientError;
use crate::handle::ConnectionHandle;

/// Lifecycle notifications for the hosting application.
///
/// Connect and disconnect fire exactly once per transition, after the
/// transition has completed.
pub trait ConnectionObserver: Send {
    fn on_connect(&mut self, _connection: &ConnectionHandle) {}

    fn on_disconnect(&mut self, _connection: &ConnectionHandle) {}

    fn on_error(&mut self, _connection: &ConnectionHandle, _error: &ClientError) {}
}
