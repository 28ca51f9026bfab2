//! Chat text frames.
//!
//! Clients send chat lines to the proxy as `ChatText` frames, and the proxy
//! answers with its own `ChatText` frames authored by [`SERVER_AUTHOR`].
//!
//! Payload layout: `author:u8, r:u8, g:u8, b:u8, text:str`.

use std::fmt;
use std::str::FromStr;

use crate::packet::{DecodeError, EncodeError, PacketEncoder, PacketReader, PacketType};

/// Author id used for lines that originate from the proxy itself.
pub const SERVER_AUTHOR: u8 = 255;

/// 24-bit colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb::new(0xFF, 0xFF, 0xFF);
    pub const RED: Rgb = Rgb::new(0xFF, 0x00, 0x00);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Error returned for colour strings that are not six hex digits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid hex colour {0:?}")]
pub struct InvalidColor(pub String);

impl FromStr for Rgb {
    type Err = InvalidColor;

    /// Parse `RRGGBB`, with or without a leading `#`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.strip_prefix('#').unwrap_or(s);
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(InvalidColor(s.to_string()));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| InvalidColor(s.to_string()))
        };
        Ok(Rgb::new(channel(0)?, channel(2)?, channel(4)?))
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// A decoded `ChatText` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatText {
    pub author: u8,
    pub color: Rgb,
    pub text: String,
}

impl ChatText {
    /// A line authored by the proxy.
    pub fn from_server(text: impl Into<String>, color: Rgb) -> Self {
        Self {
            author: SERVER_AUTHOR,
            color,
            text: text.into(),
        }
    }

    /// Encode as a complete frame.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        PacketEncoder::new(PacketType::CHAT_TEXT)
            .put_u8(self.author)?
            .put_u8(self.color.r)?
            .put_u8(self.color.g)?
            .put_u8(self.color.b)?
            .put_str(&self.text)
            .finish()
    }

    /// Decode from a frame payload.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = PacketReader::new(payload);
        let author = reader.get_u8()?;
        let color = Rgb::new(reader.get_u8()?, reader.get_u8()?, reader.get_u8()?);
        let text = reader.get_str()?;
        Ok(Self {
            author,
            color,
            text,
        })
    }
}
