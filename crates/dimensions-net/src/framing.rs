//! Frame I/O over tokio byte streams.
//!
//! Reads and writes the `[type u16][length u16][payload]` frames described in
//! [`crate::packet`]. A length of 0 is a valid frame with an empty payload.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::packet::{DecodeError, EncodeError, HEADER_LEN, PacketType};

/// Configuration for the framing layer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum allowed payload size in bytes. Default: `u16::MAX`.
    pub max_payload_size: u16,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: u16::MAX,
        }
    }
}

/// Errors that can occur during framing operations.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload size exceeds the configured maximum.
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// The actual payload size.
        size: usize,
        /// The configured maximum.
        max: u16,
    },

    /// The connection was closed before a complete frame was received.
    #[error("connection closed")]
    ConnectionClosed,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message type from the header.
    pub packet_type: PacketType,
    /// Payload bytes, without the header.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Split a complete encoded frame into type and payload.
    ///
    /// Trailing bytes beyond the declared length are rejected.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < HEADER_LEN {
            return Err(DecodeError::UnexpectedEnd {
                needed: HEADER_LEN,
                remaining: bytes.len(),
            });
        }
        let packet_type = PacketType(u16::from_le_bytes([bytes[0], bytes[1]]));
        let len = u16::from_le_bytes([bytes[2], bytes[3]]) as usize;
        let payload = &bytes[HEADER_LEN..];
        if payload.len() != len {
            return Err(DecodeError::UnexpectedEnd {
                needed: len,
                remaining: payload.len(),
            });
        }
        Ok(Self {
            packet_type,
            payload: payload.to_vec(),
        })
    }

    /// Re-encode into `[type][length][payload]` bytes.
    ///
    /// Fails if the payload cannot be described by the 2-byte length field.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        let len = u16::try_from(self.payload.len()).map_err(|_| EncodeError::PayloadTooLarge {
            size: self.payload.len(),
            max: u16::MAX as usize,
        })?;

        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(&self.packet_type.0.to_le_bytes());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&self.payload);
        Ok(out)
    }
}

/// Read a single frame from the stream.
///
/// Returns [`FrameError::ConnectionClosed`] if the peer closes the connection
/// before the frame is complete.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<Frame, FrameError> {
    let mut header = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::ConnectionClosed);
        }
        Err(e) => return Err(FrameError::Io(e)),
    }

    let packet_type = PacketType(u16::from_le_bytes([header[0], header[1]]));
    let payload_len = u16::from_le_bytes([header[2], header[3]]);

    if payload_len > config.max_payload_size {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len as usize,
            max: config.max_payload_size,
        });
    }

    let mut payload = vec![0u8; payload_len as usize];
    if payload_len > 0 {
        reader.read_exact(&mut payload).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                FrameError::ConnectionClosed
            } else {
                FrameError::Io(e)
            }
        })?;
    }

    Ok(Frame {
        packet_type,
        payload,
    })
}

/// Write pre-encoded frame bytes to the stream and flush.
///
/// `bytes` must already carry its header (see
/// [`PacketEncoder::finish`](crate::PacketEncoder::finish) and
/// [`Frame::to_bytes`]); only the payload size is checked here.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    bytes: &[u8],
    config: &FrameConfig,
) -> Result<(), FrameError> {
    let size = bytes.len().saturating_sub(HEADER_LEN);
    if size > config.max_payload_size as usize {
        return Err(FrameError::PayloadTooLarge {
            size,
            max: config.max_payload_size,
        });
    }

    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PacketEncoder;
    use tokio::io::duplex;

    fn ping(n: u8) -> Vec<u8> {
        PacketEncoder::new(PacketType(1))
            .put_u8(n)
            .unwrap()
            .finish()
            .unwrap()
    }

    #[tokio::test]
    async fn test_single_frame_roundtrip() {
        let (mut client, mut server) = duplex(8192);
        let config = FrameConfig::default();

        write_frame(&mut client, &ping(5), &config).await.unwrap();
        let frame = read_frame(&mut server, &config).await.unwrap();
        assert_eq!(frame.packet_type, PacketType(1));
        assert_eq!(frame.payload, vec![5]);
    }

    #[tokio::test]
    async fn test_back_to_back_frames_dont_merge() {
        let (mut client, mut server) = duplex(8192);
        let config = FrameConfig::default();

        write_frame(&mut client, &ping(1), &config).await.unwrap();
        write_frame(&mut client, &ping(2), &config).await.unwrap();

        let first = read_frame(&mut server, &config).await.unwrap();
        let second = read_frame(&mut server, &config).await.unwrap();
        assert_eq!(first.payload, vec![1]);
        assert_eq!(second.payload, vec![2]);
    }

    #[tokio::test]
    async fn test_partial_read_resumes_correctly() {
        let (mut client, mut server) = duplex(3);
        let config = FrameConfig::default();
        let bytes = PacketEncoder::new(PacketType(9))
            .put_str("longer than the pipe buffer")
            .finish()
            .unwrap();

        let expected = bytes.clone();
        let write_config = config.clone();
        let write_task = tokio::spawn(async move {
            write_frame(&mut client, &bytes, &write_config).await.unwrap();
        });

        let frame = read_frame(&mut server, &config).await.unwrap();
        write_task.await.unwrap();
        assert_eq!(frame.to_bytes().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_on_read() {
        let (mut client, mut server) = duplex(8192);
        let config = FrameConfig {
            max_payload_size: 16,
        };

        client.write_all(&[1, 0, 0x00, 0x04]).await.unwrap();
        client.flush().await.unwrap();

        let result = read_frame(&mut server, &config).await;
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_on_write() {
        let (mut client, _server) = duplex(8192);
        let config = FrameConfig { max_payload_size: 2 };

        let bytes = PacketEncoder::new(PacketType(1))
            .put_i32(1)
            .unwrap()
            .finish()
            .unwrap();
        let result = write_frame(&mut client, &bytes, &config).await;
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { size: 4, .. })));
    }

    #[tokio::test]
    async fn test_zero_length_frame_handled() {
        let (mut client, mut server) = duplex(8192);
        let config = FrameConfig::default();

        write_frame(&mut client, &[3, 0, 0, 0], &config).await.unwrap();
        let frame = read_frame(&mut server, &config).await.unwrap();
        assert_eq!(frame.packet_type, PacketType(3));
        assert!(frame.payload.is_empty());
    }

    #[tokio::test]
    async fn test_connection_closed_during_header_read() {
        let (client, mut server) = duplex(8192);
        drop(client);

        let result = read_frame(&mut server, &FrameConfig::default()).await;
        assert!(matches!(result, Err(FrameError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_connection_closed_mid_payload() {
        let (mut client, mut server) = duplex(8192);
        client.write_all(&[1, 0, 4, 0, 0xAA]).await.unwrap();
        drop(client);

        let result = read_frame(&mut server, &FrameConfig::default()).await;
        assert!(matches!(result, Err(FrameError::ConnectionClosed)));
    }

    #[test]
    fn test_to_bytes_rejects_oversized_payload() {
        let frame = Frame {
            packet_type: PacketType(1),
            payload: vec![0; 70_000],
        };
        assert_eq!(
            frame.to_bytes(),
            Err(EncodeError::PayloadTooLarge {
                size: 70_000,
                max: u16::MAX as usize
            })
        );

        let largest = Frame {
            packet_type: PacketType(1),
            payload: vec![0; u16::MAX as usize],
        };
        assert_eq!(&largest.to_bytes().unwrap()[2..4], &[0xFF, 0xFF]);
    }

    #[test]
    fn test_decode_rejects_length_mismatch() {
        assert!(Frame::decode(&[1, 0, 2, 0, 9]).is_err());
        assert!(Frame::decode(&[1, 0]).is_err());
        let frame = Frame::decode(&[1, 0, 1, 0, 9]).unwrap();
        assert_eq!(frame.payload, vec![9]);
    }
}
