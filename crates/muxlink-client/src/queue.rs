use std::time::Instant;

use bytes::Bytes;

use crate::profile::FlushPolicy;

/// A flushed batch, ready for the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedFrame {
    pub id: u64,
    pub channel: String,
    pub packets: Vec<Bytes>,
}

/// Pending outbound messages for one channel.
///
/// Messages leave the queue in the order they were added, each in exactly
/// one frame. Frame ids increase strictly per queue, starting at 1.
#[derive(Debug)]
pub struct ChannelQueue {
    name: String,
    frame: u64,
    pending: Vec<Bytes>,
    pending_bytes: usize,
    oldest: Option<Instant>,
}

impl ChannelQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            frame: 0,
            pending: Vec::new(),
            pending_bytes: 0,
            oldest: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id of the last frame flushed (0 before the first flush).
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    /// Append an encoded message. Returns a frame if `policy` flushes on this add.
    pub fn add(&mut self, packet: Bytes, policy: &dyn FlushPolicy) -> Option<QueuedFrame> {
        self.add_at(packet, policy, Instant::now())
    }

    pub(crate) fn add_at(
        &mut self,
        packet: Bytes,
        policy: &dyn FlushPolicy,
        now: Instant,
    ) -> Option<QueuedFrame> {
        self.pending_bytes += packet.len();
        self.pending.push(packet);
        self.oldest.get_or_insert(now);

        if policy.flush_on_add(self.pending.len(), self.pending_bytes) {
            self.step()
        } else {
            None
        }
    }

    /// Flush now, regardless of policy. `None` if nothing is pending.
    pub fn step(&mut self) -> Option<QueuedFrame> {
        if self.pending.is_empty() {
            return None;
        }
        self.frame += 1;
        self.pending_bytes = 0;
        self.oldest = None;
        Some(QueuedFrame {
            id: self.frame,
            channel: self.name.clone(),
            packets: std::mem::take(&mut self.pending),
        })
    }

    /// When the tick window for the current pending batch closes.
    pub fn deadline(&self, policy: &dyn FlushPolicy) -> Option<Instant> {
        let tick = policy.tick()?;
        self.oldest.map(|oldest| oldest + tick)
    }

    /// Whether the tick window has closed at `now`.
    pub fn is_due(&self, policy: &dyn FlushPolicy, now: Instant) -> bool {
        self.deadline(policy).is_some_and(|deadline| deadline <= now)
    }
}
