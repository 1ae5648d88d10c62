//! Sans-IO frame decoder
//!
//! `FrameDecoder` looks at the unconsumed region of a receive buffer and
//! reports what the stream should do with it: wait for more bytes, consume
//! some handshake bytes, or consume one complete message. It never owns the
//! buffer, so the stream pops exactly what the decoder reported.
//!
//! Per protocol:
//! - **rpc**: optional handshake secret, then `varint(len) · body`; the body
//!   must start with a complete router header
//! - **pack**: 17-byte header; `len` covers the header, must be at least 17
//!   and at most the package limit, and `seq_id` must equal the expected
//!   counter (which wraps at 256)
//! - **common**: `u32` little-endian content length, then content
//! - **text**: everything buffered is one message

use bytes::Bytes;
use hivenet_core::error::NetError;
use hivenet_core::proto::{PackHeader, ProtoType, COMMON_HEADER_LEN, PACK_HEADER_LEN};
use hivenet_core::router::{MsgKind, RouterHeader};
use hivenet_core::varint::{decode_u64, MAX_VARINT_LEN};
use thiserror::Error;

/// Framing violations. Each one force-closes the connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("handshake mismatch at byte {offset}")]
    HandshakeMismatch { offset: usize },

    #[error("sequence mismatch: expected {expected}, got {got}")]
    SequenceMismatch { expected: u8, got: u8 },

    #[error("package too large: {size} bytes (max: {max})")]
    PackageTooLarge { size: usize, max: usize },

    #[error("header too short: len {len} < {}", PACK_HEADER_LEN)]
    HeaderTooShort { len: u32 },

    #[error("invalid varint length prefix")]
    InvalidVarint,

    #[error("invalid router header")]
    InvalidHeader,
}

impl From<FrameError> for NetError {
    fn from(err: FrameError) -> Self {
        NetError::protocol(err.to_string())
    }
}

/// One complete inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// RPC message addressed to this node
    Call { header: RouterHeader, payload: Bytes },
    /// RPC message to forward; `body` is the routing selector followed by the payload
    Forward { header: RouterHeader, body: Bytes },
    Pack { header: PackHeader, body: Bytes },
    Common(Bytes),
    Text(Bytes),
}

/// Outcome of one decode step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Not enough bytes yet
    Incomplete,
    /// Consume this many handshake bytes; no message yet
    Skip(usize),
    /// Consume `consumed` bytes, yielding `frame`
    Frame { consumed: usize, frame: Frame },
}

#[derive(Debug)]
pub struct FrameDecoder {
    proto: ProtoType,
    max_package: usize,
    handshake: Option<Bytes>,
    matched: usize,
    next_seq: u8,
}

impl FrameDecoder {
    #[must_use]
    pub fn new(proto: ProtoType, max_package: usize) -> Self {
        Self {
            proto,
            max_package,
            handshake: None,
            matched: 0,
            next_seq: 0,
        }
    }

    /// Require `key` at the front of the stream before any framing.
    ///
    /// Only meaningful for RPC mode; an empty key disables the check.
    #[must_use]
    pub fn with_handshake(mut self, key: Bytes) -> Self {
        if self.proto == ProtoType::Rpc && !key.is_empty() {
            self.handshake = Some(key);
        }
        self
    }

    #[inline]
    pub fn handshake_pending(&self) -> bool {
        self.handshake.is_some()
    }

    /// Sequence number the next pack message must carry.
    #[inline]
    pub fn expected_seq(&self) -> u8 {
        self.next_seq
    }

    pub fn decode(&mut self, src: &[u8]) -> Result<Decoded, FrameError> {
        if self.handshake.is_some() {
            return self.decode_handshake(src);
        }
        match self.proto {
            ProtoType::Rpc => self.decode_rpc(src),
            ProtoType::Pack => self.decode_pack(src),
            ProtoType::Common => self.decode_common(src),
            ProtoType::Text => Ok(decode_text(src)),
        }
    }

    fn decode_handshake(&mut self, src: &[u8]) -> Result<Decoded, FrameError> {
        let Some(key) = self.handshake.as_ref() else {
            return Ok(Decoded::Incomplete);
        };
        let rest = &key[self.matched..];
        let n = rest.len().min(src.len());
        if n == 0 {
            return Ok(Decoded::Incomplete);
        }
        if let Some(pos) = rest[..n].iter().zip(src).position(|(a, b)| a != b) {
            return Err(FrameError::HandshakeMismatch {
                offset: self.matched + pos,
            });
        }
        self.matched += n;
        if self.matched == key.len() {
            self.handshake = None;
            self.matched = 0;
        }
        Ok(Decoded::Skip(n))
    }

    fn decode_rpc(&self, src: &[u8]) -> Result<Decoded, FrameError> {
        let Some((len, prefix)) = decode_u64(src) else {
            if src.len() >= MAX_VARINT_LEN {
                return Err(FrameError::InvalidVarint);
            }
            return Ok(Decoded::Incomplete);
        };
        let len = usize::try_from(len).map_err(|_| FrameError::InvalidVarint)?;
        if len > self.max_package {
            return Err(FrameError::PackageTooLarge {
                size: len,
                max: self.max_package,
            });
        }
        if src.len() - prefix < len {
            return Ok(Decoded::Incomplete);
        }

        let body = &src[prefix..prefix + len];
        let (header, used) = RouterHeader::decode(body).ok_or(FrameError::InvalidHeader)?;
        let rest = Bytes::copy_from_slice(&body[used..]);
        let frame = if header.kind == MsgKind::RemoteCall {
            Frame::Call {
                header,
                payload: rest,
            }
        } else {
            Frame::Forward { header, body: rest }
        };
        Ok(Decoded::Frame {
            consumed: prefix + len,
            frame,
        })
    }

    fn decode_pack(&mut self, src: &[u8]) -> Result<Decoded, FrameError> {
        let Some(header) = PackHeader::decode(src) else {
            return Ok(Decoded::Incomplete);
        };
        if (header.len as usize) < PACK_HEADER_LEN {
            return Err(FrameError::HeaderTooShort { len: header.len });
        }
        if header.len as usize > self.max_package {
            return Err(FrameError::PackageTooLarge {
                size: header.len as usize,
                max: self.max_package,
            });
        }
        if header.seq_id != self.next_seq {
            return Err(FrameError::SequenceMismatch {
                expected: self.next_seq,
                got: header.seq_id,
            });
        }
        let total = header.len as usize;
        if src.len() < total {
            return Ok(Decoded::Incomplete);
        }

        self.next_seq = self.next_seq.wrapping_add(1);
        Ok(Decoded::Frame {
            consumed: total,
            frame: Frame::Pack {
                header,
                body: Bytes::copy_from_slice(&src[PACK_HEADER_LEN..total]),
            },
        })
    }

    fn decode_common(&self, src: &[u8]) -> Result<Decoded, FrameError> {
        if src.len() < COMMON_HEADER_LEN {
            return Ok(Decoded::Incomplete);
        }
        let len = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > self.max_package {
            return Err(FrameError::PackageTooLarge {
                size: len,
                max: self.max_package,
            });
        }
        let total = COMMON_HEADER_LEN + len;
        if src.len() < total {
            return Ok(Decoded::Incomplete);
        }
        Ok(Decoded::Frame {
            consumed: total,
            frame: Frame::Common(Bytes::copy_from_slice(&src[COMMON_HEADER_LEN..total])),
        })
    }
}

fn decode_text(src: &[u8]) -> Decoded {
    if src.is_empty() {
        return Decoded::Incomplete;
    }
    Decoded::Frame {
        consumed: src.len(),
        frame: Frame::Text(Bytes::copy_from_slice(src)),
    }
}
