use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Fixed part of a frame header: magic (2) + id (8) + channel length (2).
pub const FRAME_HEADER_SIZE: usize = 12;

/// Magic bytes: "MF" (0x4D 0x46).
pub const MAGIC: [u8; 2] = [0x4D, 0x46];

/// One batch of packets written to a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Per-channel frame counter value. Diagnostic only.
    pub id: u64,
    /// The channel this frame belongs to.
    pub channel: String,
    /// Encoded packets, in write order.
    pub packets: Vec<Bytes>,
    /// Encoded size of this frame on the wire.
    pub payload_bytes: usize,
}

impl Frame {
    /// Create a frame. `payload_bytes` is filled in by the codec.
    pub fn new(id: u64, channel: impl Into<String>, packets: Vec<Bytes>) -> Self {
        Self {
            id,
            channel: channel.into(),
            packets,
            payload_bytes: 0,
        }
    }
}

/// Turns frames into opaque byte payloads and back.
///
/// `deserialize` must invert `serialize` for every frame this crate
/// produces; one input chunk may carry several concatenated frames.
pub trait FrameCodec: Send + Sync {
    fn serialize(&self, id: u64, channel: &str, packets: &[Bytes]) -> Result<Bytes>;

    fn deserialize(&self, payload: &[u8]) -> Result<Vec<Frame>>;
}

/// Default length-prefixed binary frame codec.
///
/// Wire format:
/// ```text
/// ┌───────────┬──────────┬──────────┬──────────┬──────────┬─────────────────────────┐
/// │ Magic 2B  │ Id 8B LE │ ChLen 2B │ Channel  │ Count 4B │ Count × (Len 4B + data) │
/// │ "MF"      │          │ LE       │ (UTF-8)  │ LE       │                         │
/// └───────────┴──────────┴──────────┴──────────┴──────────┴─────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl FrameCodec for BinaryCodec {
    fn serialize(&self, id: u64, channel: &str, packets: &[Bytes]) -> Result<Bytes> {
        if channel.len() > u16::MAX as usize {
            return Err(FrameError::TooLarge {
                field: "channel name",
                size: channel.len(),
                max: u16::MAX as usize,
            });
        }
        if packets.len() > u32::MAX as usize {
            return Err(FrameError::TooLarge {
                field: "packet count",
                size: packets.len(),
                max: u32::MAX as usize,
            });
        }

        let body: usize = packets.iter().map(|p| 4 + p.len()).sum();
        let mut dst = BytesMut::with_capacity(FRAME_HEADER_SIZE + channel.len() + 4 + body);
        dst.put_slice(&MAGIC);
        dst.put_u64_le(id);
        dst.put_u16_le(channel.len() as u16);
        dst.put_slice(channel.as_bytes());
        dst.put_u32_le(packets.len() as u32);
        for packet in packets {
            if packet.len() > u32::MAX as usize {
                return Err(FrameError::TooLarge {
                    field: "packet",
                    size: packet.len(),
                    max: u32::MAX as usize,
                });
            }
            dst.put_u32_le(packet.len() as u32);
            dst.put_slice(packet);
        }
        Ok(dst.freeze())
    }

    fn deserialize(&self, payload: &[u8]) -> Result<Vec<Frame>> {
        let mut src = Bytes::copy_from_slice(payload);
        let mut frames = Vec::new();
        while src.has_remaining() {
            let before = src.remaining();
            let mut frame = decode_one(&mut src)?;
            frame.payload_bytes = before - src.remaining();
            frames.push(frame);
        }
        Ok(frames)
    }
}

fn need(src: &Bytes, len: usize) -> Result<()> {
    if src.remaining() < len {
        return Err(FrameError::Truncated {
            needed: len - src.remaining(),
        });
    }
    Ok(())
}

fn decode_one(src: &mut Bytes) -> Result<Frame> {
    need(src, FRAME_HEADER_SIZE)?;
    if src[0..2] != MAGIC {
        return Err(FrameError::InvalidMagic);
    }
    src.advance(2);
    let id = src.get_u64_le();
    let channel_len = src.get_u16_le() as usize;

    need(src, channel_len + 4)?;
    let channel = std::str::from_utf8(&src[..channel_len])?.to_string();
    src.advance(channel_len);
    let count = src.get_u32_le() as usize;

    // Each packet needs at least its length prefix; reject impossible counts
    // before allocating for them.
    need(src, count.saturating_mul(4))?;
    let mut packets = Vec::with_capacity(count);
    for _ in 0..count {
        need(src, 4)?;
        let len = src.get_u32_le() as usize;
        need(src, len)?;
        packets.push(src.split_to(len));
    }

    Ok(Frame {
        id,
        channel,
        packets,
        payload_bytes: 0,
    })
}
