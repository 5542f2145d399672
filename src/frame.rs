//! Frame codec.
//!
//! Every frame on the medium starts with a fixed 6-byte header followed by
//! the payload:
//!
//! | Offset | Size | Field          | Notes                          |
//! |--------|------|----------------|--------------------------------|
//! | 0      | 2    | `header_to`    | destination address, big-endian |
//! | 2      | 2    | `header_from`  | source address, big-endian      |
//! | 4      | 1    | `header_id`    | sender's message id             |
//! | 5      | 1    | `header_flags` | bit 7 = ACK, rest reserved      |
//! | 6      | N    | payload        | at most [`MAX_PAYLOAD_LEN`]     |
//!
//! # Example
//!
//! ```
//! use lora_link::frame::{decode, encode, FrameFlags};
//!
//! let raw = encode(2000, 1000, 7, FrameFlags::NONE, b"ping").unwrap();
//! let frame = decode(&raw).unwrap();
//! assert_eq!(frame.header_to, 2000);
//! assert_eq!(frame.payload, b"ping");
//! ```

use std::fmt;

/// Node address on the medium.
pub type Address = u16;

/// Per-sender message sequence number (wraps at 256).
pub type MessageId = u8;

/// Destination value that reaches every node. Never acknowledged.
pub const BROADCAST_ADDRESS: Address = 0xFFFF;

/// Header size in bytes (2 + 2 + 1 + 1).
pub const HEADER_LEN: usize = 6;

/// Largest frame the radio FIFO can carry.
pub const MAX_FRAME_LEN: usize = 255;

/// Largest payload that fits after the header.
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - HEADER_LEN;

/// Payload carried by acknowledgement frames.
pub const ACK_PAYLOAD: &[u8] = b"!";

/// Header flag bitset.
///
/// Only [`FrameFlags::ACK`] has a meaning; the reserved bits are carried
/// through encode/decode untouched so applications can use them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// No flags set.
    pub const NONE: FrameFlags = FrameFlags(0);
    /// Frame acknowledges the message with the same id.
    pub const ACK: FrameFlags = FrameFlags(0x80);
    /// Bits with no protocol meaning.
    pub const RESERVED_MASK: u8 = 0x7F;

    /// Wrap a raw flags byte.
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw flags byte.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// ACK bit is set.
    pub fn is_ack(self) -> bool {
        self.0 & Self::ACK.0 != 0
    }

    /// Reserved (application) bits.
    pub fn reserved(self) -> u8 {
        self.0 & Self::RESERVED_MASK
    }

    /// Copy of these flags with the ACK bit set or cleared.
    pub fn with_ack(self, ack: bool) -> Self {
        if ack {
            Self(self.0 | Self::ACK.0)
        } else {
            Self(self.0 & !Self::ACK.0)
        }
    }
}

impl From<u8> for FrameFlags {
    fn from(bits: u8) -> Self {
        Self(bits)
    }
}

impl From<FrameFlags> for u8 {
    fn from(flags: FrameFlags) -> Self {
        flags.0
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header_to: Address,
    pub header_from: Address,
    pub header_id: MessageId,
    pub header_flags: FrameFlags,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a data frame (ACK unset).
    pub fn data(to: Address, from: Address, id: MessageId, payload: Vec<u8>) -> Self {
        Self {
            header_to: to,
            header_from: from,
            header_id: id,
            header_flags: FrameFlags::NONE,
            payload,
        }
    }

    /// Build the acknowledgement for `frame`, sent from `local`.
    pub fn ack_for(frame: &Frame, local: Address) -> Self {
        Self {
            header_to: frame.header_from,
            header_from: local,
            header_id: frame.header_id,
            header_flags: FrameFlags::ACK,
            payload: ACK_PAYLOAD.to_vec(),
        }
    }

    /// Frame is an acknowledgement.
    pub fn is_ack(&self) -> bool {
        self.header_flags.is_ack()
    }

    /// Frame is addressed to every node.
    pub fn is_broadcast(&self) -> bool {
        self.header_to == BROADCAST_ADDRESS
    }

    /// Serialize this frame.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode(
            self.header_to,
            self.header_from,
            self.header_id,
            self.header_flags,
            &self.payload,
        )
    }
}

/// Serialize header fields and payload into raw frame bytes.
pub fn encode(
    header_to: Address,
    header_from: Address,
    header_id: MessageId,
    flags: FrameFlags,
    payload: &[u8],
) -> Result<Vec<u8>, CodecError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(CodecError::TooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }

    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(&header_to.to_be_bytes());
    bytes.extend_from_slice(&header_from.to_be_bytes());
    bytes.push(header_id);
    bytes.push(flags.bits());
    bytes.extend_from_slice(payload);
    Ok(bytes)
}

/// Parse raw frame bytes.
pub fn decode(bytes: &[u8]) -> Result<Frame, CodecError> {
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::Truncated { len: bytes.len() });
    }
    if bytes.len() > MAX_FRAME_LEN {
        return Err(CodecError::TooLarge {
            size: bytes.len() - HEADER_LEN,
            max: MAX_PAYLOAD_LEN,
        });
    }

    Ok(Frame {
        header_to: u16::from_be_bytes([bytes[0], bytes[1]]),
        header_from: u16::from_be_bytes([bytes[2], bytes[3]]),
        header_id: bytes[4],
        header_flags: FrameFlags::from_bits(bytes[5]),
        payload: bytes[HEADER_LEN..].to_vec(),
    })
}

/// Frame codec errors. Always recoverable: the frame is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Fewer bytes than a header.
    Truncated { len: usize },
    /// Payload exceeds what the medium can carry.
    TooLarge { size: usize, max: usize },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { len } => {
                write!(f, "truncated frame: {} bytes (header is {})", len, HEADER_LEN)
            }
            Self::TooLarge { size, max } => {
                write!(f, "payload too large: {} bytes (max {})", size, max)
            }
        }
    }
}

impl std::error::Error for CodecError {}
