//! Batching profiles: when a channel queue turns pending messages into a frame.

use std::fmt;
use std::time::Duration;

/// Decides when a channel queue flushes.
///
/// A queue flushes right after an add when [`FlushPolicy::flush_on_add`]
/// says so, and otherwise once [`FlushPolicy::tick`] has elapsed since the
/// oldest pending message was added.
pub trait FlushPolicy: Send + Sync + fmt::Debug {
    fn flush_on_add(&self, pending_packets: usize, pending_bytes: usize) -> bool;

    fn tick(&self) -> Option<Duration>;
}

/// Tick/size based flush policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Profile {
    /// Flush this long after the first pending message. `None` disables.
    pub tick: Option<Duration>,
    /// Flush as soon as this many bytes are pending. `None` disables.
    pub max_bytes: Option<usize>,
}

impl Profile {
    /// One frame per message.
    pub const fn immediate() -> Self {
        Self {
            tick: None,
            max_bytes: Some(0),
        }
    }

    /// 16 ms time window.
    pub const fn realtime() -> Self {
        Self {
            tick: Some(Duration::from_millis(16)),
            max_bytes: None,
        }
    }

    /// 16 ms time window, or sooner once a frame reaches 1400 bytes.
    pub const fn dynamic() -> Self {
        Self {
            tick: Some(Duration::from_millis(16)),
            max_bytes: Some(1400),
        }
    }

    /// 1 s time window.
    pub const fn heartbeat() -> Self {
        Self {
            tick: Some(Duration::from_secs(1)),
            max_bytes: None,
        }
    }

    /// Only explicit flushes (and destroy) send frames.
    pub const fn manual() -> Self {
        Self {
            tick: None,
            max_bytes: None,
        }
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self::dynamic()
    }
}

impl FlushPolicy for Profile {
    fn flush_on_add(&self, _pending_packets: usize, pending_bytes: usize) -> bool {
        self.max_bytes.is_some_and(|max| pending_bytes >= max)
    }

    fn tick(&self) -> Option<Duration> {
        self.tick
    }
}
