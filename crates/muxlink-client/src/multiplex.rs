use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A subscriber callback.
///
/// Handlers compare by identity: clones of one `Handler` are equal, two
/// handlers built from identical closures are not.
pub struct Handler<E>(Arc<dyn Fn(&E) + Send + Sync>);

impl<E> Handler<E> {
    pub fn new(f: impl Fn(&E) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn call(&self, event: &E) {
        (self.0)(event)
    }
}

impl<E> Clone for Handler<E> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<E> PartialEq for Handler<E> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<E> Eq for Handler<E> {}

impl<E> fmt::Debug for Handler<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler({:p})", Arc::as_ptr(&self.0))
    }
}

/// Channel name → subscribers, in registration order.
pub struct Multiplexer<E> {
    channels: HashMap<String, Vec<Handler<E>>>,
}

impl<E> Multiplexer<E> {
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
        }
    }

    /// Register `handler` on `channel`. Registering twice fires twice.
    pub fn subscribe(&mut self, channel: impl Into<String>, handler: Handler<E>) {
        self.channels
            .entry(channel.into())
            .or_default()
            .push(handler);
    }

    /// Remove every occurrence of `handler`, or every subscriber when `None`.
    pub fn unsubscribe(&mut self, channel: &str, handler: Option<&Handler<E>>) {
        let Some(handler) = handler else {
            self.channels.remove(channel);
            return;
        };
        if let Some(handlers) = self.channels.get_mut(channel) {
            handlers.retain(|h| h != handler);
            if handlers.is_empty() {
                self.channels.remove(channel);
            }
        }
    }

    /// Invoke every subscriber of `channel` with `event`. Returns how many ran.
    pub fn trigger(&self, channel: &str, event: &E) -> usize {
        let Some(handlers) = self.channels.get(channel) else {
            return 0;
        };
        for handler in handlers {
            handler.call(event);
        }
        handlers.len()
    }

    pub fn subscribers(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, Vec::len)
    }
}

impl<E> Default for Multiplexer<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Multiplexer<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<&str, usize> = self
            .channels
            .iter()
            .map(|(name, handlers)| (name.as_str(), handlers.len()))
            .collect();
        f.debug_struct("Multiplexer")
            .field("channels", &counts)
            .finish()
    }
}
