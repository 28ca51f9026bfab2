//! Packet encoding and decoding for the backend wire protocol.
//!
//! Every packet is a single frame:
//!
//! ```text
//! +-------------------+-------------------+--------------------+
//! | type (2 bytes)    | length (2 bytes)  |   payload          |
//! | u16 little-endian | u16 little-endian |   (length bytes)   |
//! +-------------------+-------------------+--------------------+
//! ```
//!
//! The length counts payload bytes only. All numeric payload fields are
//! little-endian. [`PacketEncoder`] builds one frame field by field;
//! [`PacketReader`] walks a payload in the same order.

use std::fmt;

/// Size of the `[type][length]` frame header in bytes.
pub const HEADER_LEN: usize = 4;

/// Numeric message type carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketType(pub u16);

impl PacketType {
    /// Server assigns the connecting player's own slot.
    pub const SET_USER_SLOT: PacketType = PacketType(3);
    /// Player slot activation toggle.
    pub const PLAYER_ACTIVE: PacketType = PacketType(14);
    /// Dropped item state update.
    pub const ITEM_UPDATE: PacketType = PacketType(21);
    /// NPC state update.
    pub const NPC_UPDATE: PacketType = PacketType(23);
    /// Chat line with author and colour.
    pub const CHAT_TEXT: PacketType = PacketType(25);
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::SET_USER_SLOT => write!(f, "SetUserSlot"),
            Self::PLAYER_ACTIVE => write!(f, "PlayerActive"),
            Self::ITEM_UPDATE => write!(f, "ItemUpdate"),
            Self::NPC_UPDATE => write!(f, "NpcUpdate"),
            Self::CHAT_TEXT => write!(f, "ChatText"),
            Self(other) => write!(f, "Packet({other})"),
        }
    }
}

/// Errors raised while building a packet.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// A value does not fit the declared field width.
    #[error("value {value} does not fit in {width}")]
    Overflow {
        /// Declared field width, e.g. `"i16"`.
        width: &'static str,
        /// The rejected value.
        value: i64,
    },

    /// [`PacketEncoder::finish`] was called before a type was set.
    #[error("packet type was never set")]
    MissingType,

    /// The payload cannot be described by the 2-byte length field.
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// The actual payload size.
        size: usize,
        /// The largest encodable payload.
        max: usize,
    },
}

/// Errors raised while reading a payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The payload ended before the requested field.
    #[error("needed {needed} bytes, {remaining} remaining")]
    UnexpectedEnd {
        /// Bytes the field requires.
        needed: usize,
        /// Bytes left in the payload.
        remaining: usize,
    },

    /// A string field was not valid UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    /// A 7-bit length prefix ran past five bytes.
    #[error("malformed string length prefix")]
    BadLength,
}

/// Single-use builder for one framed packet.
///
/// Fields are written in exactly the order they are appended. The encoder
/// does not know which fields a given message type expects; callers that
/// build a specific message own that contract. Integer appenders reject
/// values outside their width instead of truncating them.
///
/// ```
/// use dimensions_net::{PacketEncoder, PacketType};
///
/// let frame = PacketEncoder::new(PacketType::PLAYER_ACTIVE)
///     .put_u8(7)?
///     .put_u8(0)?
///     .finish()?;
/// assert_eq!(frame, [14, 0, 2, 0, 7, 0]);
/// # Ok::<(), dimensions_net::EncodeError>(())
/// ```
#[derive(Debug, Default)]
pub struct PacketEncoder {
    packet_type: Option<PacketType>,
    payload: Vec<u8>,
}

impl PacketEncoder {
    /// Start a packet of the given type.
    pub fn new(packet_type: PacketType) -> Self {
        Self {
            packet_type: Some(packet_type),
            payload: Vec::new(),
        }
    }

    /// Set (or replace) the message type.
    pub fn set_type(mut self, packet_type: PacketType) -> Self {
        self.packet_type = Some(packet_type);
        self
    }

    /// Append a 1-byte unsigned integer.
    pub fn put_u8(mut self, value: impl Into<i64>) -> Result<Self, EncodeError> {
        let value = value.into();
        let byte = u8::try_from(value).map_err(|_| EncodeError::Overflow { width: "u8", value })?;
        self.payload.push(byte);
        Ok(self)
    }

    /// Append a 2-byte signed little-endian integer.
    pub fn put_i16(mut self, value: impl Into<i64>) -> Result<Self, EncodeError> {
        let value = value.into();
        let narrow =
            i16::try_from(value).map_err(|_| EncodeError::Overflow { width: "i16", value })?;
        self.payload.extend_from_slice(&narrow.to_le_bytes());
        Ok(self)
    }

    /// Append a 4-byte signed little-endian integer.
    pub fn put_i32(mut self, value: impl Into<i64>) -> Result<Self, EncodeError> {
        let value = value.into();
        let narrow =
            i32::try_from(value).map_err(|_| EncodeError::Overflow { width: "i32", value })?;
        self.payload.extend_from_slice(&narrow.to_le_bytes());
        Ok(self)
    }

    /// Append a 4-byte IEEE-754 float.
    pub fn put_f32(mut self, value: f32) -> Self {
        self.payload.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Append a string as a 7-bit variable-length byte count followed by
    /// UTF-8 bytes.
    pub fn put_str(mut self, value: &str) -> Self {
        let mut len = value.len();
        while len >= 0x80 {
            self.payload.push((len as u8 & 0x7F) | 0x80);
            len >>= 7;
        }
        self.payload.push(len as u8);
        self.payload.extend_from_slice(value.as_bytes());
        self
    }

    /// Produce the `[type][length][payload]` frame.
    pub fn finish(self) -> Result<Vec<u8>, EncodeError> {
        let packet_type = self.packet_type.ok_or(EncodeError::MissingType)?;
        let len = u16::try_from(self.payload.len()).map_err(|_| EncodeError::PayloadTooLarge {
            size: self.payload.len(),
            max: u16::MAX as usize,
        })?;

        let mut frame = Vec::with_capacity(HEADER_LEN + self.payload.len());
        frame.extend_from_slice(&packet_type.0.to_le_bytes());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&self.payload);
        Ok(frame)
    }
}

/// Cursor over a packet payload, reading fields in wire order.
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    /// Wrap a payload (without the frame header).
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let end = self.pos + N;
        let bytes = self
            .buf
            .get(self.pos..end)
            .ok_or(DecodeError::UnexpectedEnd {
                needed: N,
                remaining: self.remaining(),
            })?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Read a 1-byte unsigned integer.
    pub fn get_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take::<1>()?[0])
    }

    /// Read a 2-byte signed little-endian integer.
    pub fn get_i16(&mut self) -> Result<i16, DecodeError> {
        Ok(i16::from_le_bytes(self.take()?))
    }

    /// Skip `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<(), DecodeError> {
        if n > self.remaining() {
            return Err(DecodeError::UnexpectedEnd {
                needed: n,
                remaining: self.remaining(),
            });
        }
        self.pos += n;
        Ok(())
    }

    /// Read a 7-bit length-prefixed UTF-8 string.
    pub fn get_str(&mut self) -> Result<String, DecodeError> {
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            if shift > 28 {
                return Err(DecodeError::BadLength);
            }
            let byte = self.get_u8()?;
            len |= ((byte & 0x7F) as usize) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }

        if len > self.remaining() {
            return Err(DecodeError::UnexpectedEnd {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
    }
}
