// SentryFlow wire codec - framing, validation and the streaming decoder
//
// Every frame is a fixed 20-byte header followed by a CRC-protected payload.
// The decoder works against a bounded receive buffer that connections append
// raw socket reads into; it tolerates partial frames and several back-to-back
// frames in one buffer, consuming exactly one frame per successful call.

use crate::crc32::crc32;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Frame magic, the ASCII bytes "SFLW".
pub const MAGIC: u32 = 0x5346_4C57;

/// The only protocol version this build speaks.
pub const PROTOCOL_VERSION: u8 = 1;

/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 20;

/// Maximum payload the encoder will accept, far above any buffer the server
/// actually uses; a request for more is a caller bug, not peer input.
pub const MAX_ENCODE_PAYLOAD: usize = 1024 * 1024;

/// Default capacity of a per-connection receive buffer.
pub const RX_BUFFER_CAPACITY: usize = 8192;

/// Decoded frame header.
///
/// `msg_type` stays a raw byte here: an unrecognized command code is not a
/// framing error (the dispatcher answers it with an ERROR reply), so the
/// codec must not reject it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub msg_type: u8,
    pub flags: u16,
    pub seq: u32,
    pub payload_len: u32,
    pub payload_crc32: u32,
}

/// One fully decoded frame: validated header plus owned payload bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

/// Codec errors.
///
/// Any variant produced while decoding is fatal for the connection that fed
/// the bytes; the framing is untrusted at that point and no ERROR reply is
/// sent.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("payload of {0} bytes exceeds the {MAX_ENCODE_PAYLOAD} byte encode limit")]
    PayloadTooLong(usize),

    #[error("encoded frame needs {needed} bytes but only {available} fit in the output buffer")]
    OutputTooSmall { needed: usize, available: usize },

    #[error("receive buffer overflow: {len} buffered + {incoming} incoming exceeds {capacity}")]
    RxOverflow {
        len: usize,
        incoming: usize,
        capacity: usize,
    },

    #[error("bad frame magic {0:#010x}")]
    BadMagic(u32),

    #[error("unsupported protocol version {0}")]
    BadVersion(u8),

    #[error("declared payload length {0} exceeds receive buffer capacity")]
    PayloadExceedsBuffer(u32),

    #[error("payload length {len} exceeds the {limit} byte dispatch limit")]
    PayloadExceedsLimit { len: u32, limit: usize },

    #[error("payload CRC mismatch: header says {header:#010x}, computed {computed:#010x}")]
    CrcMismatch { header: u32, computed: u32 },
}

/// Encode one frame into `out`, enforcing `capacity` as the hard limit on
/// the buffer's final length.
///
/// All multi-byte fields are written big-endian; the payload CRC is computed
/// here so callers cannot produce a frame the peer would reject. The frame
/// occupies exactly `HEADER_LEN + payload.len()` bytes.
pub fn encode_frame(
    out: &mut BytesMut,
    capacity: usize,
    msg_type: u8,
    flags: u16,
    seq: u32,
    payload: &[u8],
) -> Result<(), CodecError> {
    if payload.len() > MAX_ENCODE_PAYLOAD {
        return Err(CodecError::PayloadTooLong(payload.len()));
    }

    let needed = HEADER_LEN + payload.len();
    let available = capacity.saturating_sub(out.len());
    if needed > available {
        return Err(CodecError::OutputTooSmall { needed, available });
    }

    out.put_u32(MAGIC);
    out.put_u8(PROTOCOL_VERSION);
    out.put_u8(msg_type);
    out.put_u16(flags);
    out.put_u32(seq);
    out.put_u32(payload.len() as u32);
    out.put_u32(crc32(payload));
    out.put_slice(payload);
    Ok(())
}

/// Bounded per-connection receive buffer.
///
/// Socket reads are appended at the back; the streaming decoder consumes
/// whole frames from the front. The buffer never holds more than its
/// configured capacity, which also bounds the largest frame a peer can make
/// us accept.
#[derive(Debug)]
pub struct RxBuffer {
    buf: BytesMut,
    capacity: usize,
}

impl Default for RxBuffer {
    fn default() -> Self {
        Self::with_capacity(RX_BUFFER_CAPACITY)
    }
}

impl RxBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        RxBuffer {
            buf: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append raw bytes read from the socket.
    ///
    /// Fails without consuming anything when the bytes would not fit; the
    /// caller is expected to drop the connection.
    pub fn append(&mut self, data: &[u8]) -> Result<(), CodecError> {
        if self.buf.len() + data.len() > self.capacity {
            return Err(CodecError::RxOverflow {
                len: self.buf.len(),
                incoming: data.len(),
                capacity: self.capacity,
            });
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Try to decode one frame from the front of the buffer.
    ///
    /// Returns `Ok(None)` while the buffer holds less than a complete frame.
    /// On success the frame's bytes are consumed and the remainder shifts to
    /// the front, so the caller must loop: another complete frame may already
    /// be waiting. Frames come out in the exact order their first byte
    /// arrived.
    ///
    /// `max_payload` is the dispatcher's scratch limit; a frame declaring a
    /// larger payload is an error even though it would fit the buffer.
    pub fn try_decode(&mut self, max_payload: usize) -> Result<Option<Frame>, CodecError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut hdr = &self.buf[..HEADER_LEN];
        let magic = hdr.get_u32();
        if magic != MAGIC {
            return Err(CodecError::BadMagic(magic));
        }
        let version = hdr.get_u8();
        let msg_type = hdr.get_u8();
        let flags = hdr.get_u16();
        let seq = hdr.get_u32();
        let payload_len = hdr.get_u32();
        let payload_crc32 = hdr.get_u32();

        if version != PROTOCOL_VERSION {
            return Err(CodecError::BadVersion(version));
        }
        if payload_len as usize > self.capacity.saturating_sub(HEADER_LEN) {
            return Err(CodecError::PayloadExceedsBuffer(payload_len));
        }

        let total = HEADER_LEN + payload_len as usize;
        if self.buf.len() < total {
            return Ok(None);
        }

        if payload_len as usize > max_payload {
            return Err(CodecError::PayloadExceedsLimit {
                len: payload_len,
                limit: max_payload,
            });
        }

        let computed = crc32(&self.buf[HEADER_LEN..total]);
        if computed != payload_crc32 {
            return Err(CodecError::CrcMismatch {
                header: payload_crc32,
                computed,
            });
        }

        self.buf.advance(HEADER_LEN);
        let payload = self.buf.split_to(payload_len as usize).freeze();

        Ok(Some(Frame {
            header: FrameHeader {
                msg_type,
                flags,
                seq,
                payload_len,
                payload_crc32,
            },
            payload,
        }))
    }
}
