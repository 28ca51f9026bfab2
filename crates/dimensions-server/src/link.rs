//! Backend connections.
//!
//! [`connect_backend`] opens the TCP connection for one session and spawns
//! its reader and writer tasks. Both exit when the session closes the
//! [`BackendLink`]; the reader also exits once nobody is subscribed to its
//! events.

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};

use dimensions_net::{FrameConfig, FrameError, read_frame, write_frame};
use dimensions_proxy::{Backend, BackendEvent, BackendLink, LinkEnd};

/// Connect to `backend` and return the session's end of the link.
pub async fn connect_backend(
    backend: &Backend,
    frame_config: &FrameConfig,
) -> std::io::Result<BackendLink> {
    let stream = TcpStream::connect(backend.address()).await?;
    stream.set_nodelay(true)?;
    tracing::debug!(backend = backend.name(), address = backend.address(), "backend connected");

    let (reader, writer) = stream.into_split();
    let (link, end) = BackendLink::pair();
    let LinkEnd {
        events,
        to_backend,
        shutdown,
    } = end;

    let writer_events = events.clone();
    let reader_config = frame_config.clone();
    let mut reader_shutdown = shutdown.clone();
    tokio::spawn(async move {
        read_loop(reader, &events, &reader_config, &mut reader_shutdown).await;
    });

    let writer_config = frame_config.clone();
    let mut writer_shutdown = shutdown;
    tokio::spawn(async move {
        write_loop(writer, to_backend, &writer_events, &writer_config, &mut writer_shutdown).await;
    });

    Ok(link)
}

/// Publish frames from the backend until it closes or the link shuts down.
async fn read_loop(
    mut reader: OwnedReadHalf,
    events: &mpsc::UnboundedSender<BackendEvent>,
    config: &FrameConfig,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = read_frame(&mut reader, config) => {
                let event = match result {
                    Ok(frame) => BackendEvent::Data(frame),
                    Err(FrameError::ConnectionClosed) => {
                        let _ = events.send(BackendEvent::Closed);
                        break;
                    }
                    Err(e) => {
                        let _ = events.send(BackendEvent::Error(e.to_string()));
                        let _ = events.send(BackendEvent::Closed);
                        break;
                    }
                };
                if events.send(event).is_err() {
                    // Unsubscribed.
                    break;
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

/// Write queued session frames to the backend, then half-close the socket.
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut to_backend: mpsc::UnboundedReceiver<Vec<u8>>,
    events: &mpsc::UnboundedSender<BackendEvent>,
    config: &FrameConfig,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            next = to_backend.recv() => {
                let Some(bytes) = next else { break };
                if let Err(e) = write_frame(&mut writer, &bytes, config).await {
                    let _ = events.send(BackendEvent::Error(e.to_string()));
                    break;
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use dimensions_net::{Frame, PacketEncoder, PacketType};
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, Backend) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, Backend::new("lobby", addr.to_string()))
    }

    fn ping(n: u8) -> Vec<u8> {
        PacketEncoder::new(PacketType(1))
            .put_u8(n)
            .unwrap()
            .finish()
            .unwrap()
    }

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (listener, backend) = listener().await;
        let config = FrameConfig::default();

        let mut link = connect_backend(&backend, &config).await.unwrap();
        let (mut socket, _) = listener.accept().await.unwrap();

        link.send(ping(1)).unwrap();
        let frame = read_frame(&mut socket, &config).await.unwrap();
        assert_eq!(frame.payload, vec![1]);

        write_frame(&mut socket, &ping(2), &config).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(1), link.next_event())
            .await
            .unwrap();
        assert_eq!(event, Some(BackendEvent::Data(Frame::decode(&ping(2)).unwrap())));
    }

    #[tokio::test]
    async fn test_backend_close_reported() {
        let (listener, backend) = listener().await;
        let config = FrameConfig::default();

        let mut link = connect_backend(&backend, &config).await.unwrap();
        let (socket, _) = listener.accept().await.unwrap();
        drop(socket);

        let event = tokio::time::timeout(Duration::from_secs(1), link.next_event())
            .await
            .unwrap();
        assert_eq!(event, Some(BackendEvent::Closed));
    }

    #[tokio::test]
    async fn test_close_shuts_backend_socket() {
        let (listener, backend) = listener().await;
        let config = FrameConfig::default();

        let link = connect_backend(&backend, &config).await.unwrap();
        let (mut socket, _) = listener.accept().await.unwrap();
        link.close();

        let result = tokio::time::timeout(Duration::from_secs(1), read_frame(&mut socket, &config))
            .await
            .unwrap();
        assert!(matches!(result, Err(FrameError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_unreachable_backend_errors() {
        let (listener, backend) = listener().await;
        drop(listener);
        assert!(connect_backend(&backend, &FrameConfig::default()).await.is_err());
    }
}
