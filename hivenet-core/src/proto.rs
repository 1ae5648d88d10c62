//! Message framing protocols.
//!
//! Every listener and stream is bound to one of four framing conventions,
//! distinguished by the shape of their header:
//!
//! - **rpc**: handshake secret, then `varint(len) · body` where the body
//!   starts with a [`RouterHeader`](crate::router::RouterHeader)
//! - **pack**: fixed 17-byte [`PackHeader`] carrying a per-direction
//!   sequence number, then `len - 17` payload bytes
//! - **common**: `u32` little-endian content length, then content
//! - **text**: no framing; whatever is buffered is one message

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::options::ReactorOptions;

/// Framing protocol of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProtoType {
    /// Length-prefixed router messages behind a shared-secret handshake
    Rpc = 0,

    /// Fixed binary header with sequence checking and flow control
    Pack = 1,

    /// Plain `u32` length prefix
    Common = 2,

    /// Raw bytes, no framing
    Text = 3,
}

impl ProtoType {
    /// Get the protocol as a string name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rpc => "rpc",
            Self::Pack => "pack",
            Self::Common => "common",
            Self::Text => "text",
        }
    }

    /// Longest a single stream may spend dispatching messages per tick.
    pub fn dispatch_budget(&self, options: &ReactorOptions) -> Duration {
        match self {
            Self::Pack => options.pack_dispatch_budget,
            Self::Text => options.text_dispatch_budget,
            Self::Rpc | Self::Common => options.dispatch_budget,
        }
    }
}

impl fmt::Display for ProtoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<u8> for ProtoType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Rpc),
            1 => Ok(Self::Pack),
            2 => Ok(Self::Common),
            3 => Ok(Self::Text),
            other => Err(other),
        }
    }
}

impl FromStr for ProtoType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rpc" => Ok(Self::Rpc),
            "pack" => Ok(Self::Pack),
            "common" => Ok(Self::Common),
            "text" => Ok(Self::Text),
            other => Err(format!("unknown protocol: {other}")),
        }
    }
}

/// Size of the encoded [`PackHeader`].
pub const PACK_HEADER_LEN: usize = 17;

/// Size of the common-mode length prefix.
pub const COMMON_HEADER_LEN: usize = 4;

/// Fixed header of a pack-mode message.
///
/// Layout (little-endian, packed):
/// ```text
/// [0..4]   cmd_id
/// [4..8]   flag
/// [8..12]  session_id
/// [12]     seq_id
/// [13..17] len (header included)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PackHeader {
    pub cmd_id: u32,
    pub flag: u32,
    pub session_id: u32,
    pub seq_id: u8,
    pub len: u32,
}

impl PackHeader {
    /// Header for a payload of `body_len` bytes; `seq_id` is stamped by the sender.
    pub const fn new(cmd_id: u32, flag: u32, session_id: u32, body_len: usize) -> Self {
        Self {
            cmd_id,
            flag,
            session_id,
            seq_id: 0,
            len: (PACK_HEADER_LEN + body_len) as u32,
        }
    }

    /// Number of payload bytes following the header.
    #[inline]
    pub const fn body_len(&self) -> usize {
        (self.len as usize).saturating_sub(PACK_HEADER_LEN)
    }

    pub fn encode(&self) -> [u8; PACK_HEADER_LEN] {
        let mut out = [0u8; PACK_HEADER_LEN];
        out[0..4].copy_from_slice(&self.cmd_id.to_le_bytes());
        out[4..8].copy_from_slice(&self.flag.to_le_bytes());
        out[8..12].copy_from_slice(&self.session_id.to_le_bytes());
        out[12] = self.seq_id;
        out[13..17].copy_from_slice(&self.len.to_le_bytes());
        out
    }

    /// Parse a header from the front of `src`; `None` if fewer than 17 bytes.
    pub fn decode(src: &[u8]) -> Option<Self> {
        if src.len() < PACK_HEADER_LEN {
            return None;
        }
        let word = |at: usize| u32::from_le_bytes([src[at], src[at + 1], src[at + 2], src[at + 3]]);
        Some(Self {
            cmd_id: word(0),
            flag: word(4),
            session_id: word(8),
            seq_id: src[12],
            len: word(13),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proto_display() {
        assert_eq!(ProtoType::Rpc.to_string(), "rpc");
        assert_eq!(ProtoType::Text.to_string(), "text");
        assert_eq!("pack".parse::<ProtoType>(), Ok(ProtoType::Pack));
        assert!("http".parse::<ProtoType>().is_err());
        assert_eq!(ProtoType::try_from(2), Ok(ProtoType::Common));
        assert_eq!(ProtoType::try_from(9), Err(9));
    }

    #[test]
    fn test_dispatch_budgets() {
        let opts = ReactorOptions::default();
        assert_eq!(ProtoType::Pack.dispatch_budget(&opts), Duration::from_millis(5));
        assert_eq!(ProtoType::Text.dispatch_budget(&opts), Duration::from_millis(100));
        assert_eq!(ProtoType::Rpc.dispatch_budget(&opts), Duration::from_millis(50));
        assert_eq!(ProtoType::Common.dispatch_budget(&opts), Duration::from_millis(50));
    }

    #[test]
    fn test_pack_header_layout() {
        let mut header = PackHeader::new(0x0102_0304, 1, 9, 3);
        header.seq_id = 5;
        let raw = header.encode();
        assert_eq!(&raw[0..4], &[4, 3, 2, 1]);
        assert_eq!(raw[12], 5);
        assert_eq!(&raw[13..17], &[20, 0, 0, 0]);
        assert_eq!(PackHeader::decode(&raw), Some(header));
        assert_eq!(header.body_len(), 3);
        assert_eq!(PackHeader::decode(&raw[..16]), None);
    }
}
