//! Wire protocol plumbing: packet encoding and decoding, frame I/O over
//! tokio streams, and chat-notice frames.

pub mod chat;
pub mod framing;
pub mod packet;

pub use chat::{ChatText, InvalidColor, Rgb, SERVER_AUTHOR};
pub use framing::{Frame, FrameConfig, FrameError, read_frame, write_frame};
pub use packet::{DecodeError, EncodeError, HEADER_LEN, PacketEncoder, PacketReader, PacketType};
