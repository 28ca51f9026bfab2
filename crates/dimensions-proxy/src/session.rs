//! Proxy-side player sessions.
//!
//! A [`Session`] is owned by exactly one task, the one serving its client
//! connection, so every mutation goes through `&mut Session`. The backend
//! side reaches the session only through its [`BackendLink`] subscription;
//! dropping that subscription is what detaches the session from a backend's
//! data, error and close events.

use std::fmt;
use std::sync::Arc;

use dimensions_net::{ChatText, EncodeError, Frame, PacketType, Rgb};
use tokio::sync::{mpsc, watch};

use crate::directory::Backend;
use crate::teardown::{self, TeardownReport};
use crate::tracking::{EntityTracking, SlotId, observe_frame};

/// Unique identifier for a client session within one proxy process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Whether the session currently has a backend binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Bound,
    Unbound,
}

/// A chat line shown to one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub text: String,
    pub color: Option<Rgb>,
}

impl Notice {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            color: None,
        }
    }

    pub fn colored(text: impl Into<String>, color: Rgb) -> Self {
        Self {
            text: text.into(),
            color: Some(color),
        }
    }

    /// Render as a server-authored chat line; uncoloured notices are white.
    pub fn to_chat(&self) -> ChatText {
        ChatText::from_server(self.text.clone(), self.color.unwrap_or(Rgb::WHITE))
    }
}

/// Errors from writing to a client or backend.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The client connection is gone.
    #[error("client channel closed")]
    Closed,

    /// No backend link is attached, or it has shut down.
    #[error("backend link closed")]
    LinkClosed,

    /// The outgoing frame could not be encoded.
    #[error("encode failed: {0}")]
    Encode(#[from] EncodeError),
}

/// Outbound path to one client.
pub trait ClientSink: Send + Sync {
    /// Queue one complete frame for the client.
    fn send_frame(&self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Queue a chat notice for the client.
    fn send_notice(&self, notice: &Notice) -> Result<(), TransportError> {
        self.send_frame(notice.to_chat().encode()?)
    }
}

/// [`ClientSink`] backed by an unbounded channel drained by the client
/// writer task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self { tx }
    }

    /// Create a sink together with the receiver its frames arrive on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl ClientSink for ChannelSink {
    fn send_frame(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.tx.send(frame).map_err(|_| TransportError::Closed)
    }
}

/// Inbound events from a backend connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// A frame the backend sent toward the client.
    Data(Frame),
    /// A transport error on the backend socket.
    Error(String),
    /// The backend closed the connection.
    Closed,
}

/// The session's end of a live backend connection.
///
/// Holds the event subscription, the outbound frame queue, and the shutdown
/// switch for the connection's I/O tasks.
#[derive(Debug)]
pub struct BackendLink {
    events: mpsc::UnboundedReceiver<BackendEvent>,
    to_backend: mpsc::UnboundedSender<Vec<u8>>,
    shutdown: watch::Sender<bool>,
}

/// The I/O side of a [`BackendLink`], held by the tasks driving the socket.
#[derive(Debug)]
pub struct LinkEnd {
    /// Publishes backend events to the session.
    pub events: mpsc::UnboundedSender<BackendEvent>,
    /// Frames the session wants written to the backend.
    pub to_backend: mpsc::UnboundedReceiver<Vec<u8>>,
    /// Flips to `true` when the session closes the link.
    pub shutdown: watch::Receiver<bool>,
}

impl BackendLink {
    /// Create a connected link and I/O end.
    pub fn pair() -> (BackendLink, LinkEnd) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (to_backend_tx, to_backend_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        (
            BackendLink {
                events: events_rx,
                to_backend: to_backend_tx,
                shutdown: shutdown_tx,
            },
            LinkEnd {
                events: events_tx,
                to_backend: to_backend_rx,
                shutdown: shutdown_rx,
            },
        )
    }

    /// Queue a frame for the backend.
    pub fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.to_backend
            .send(frame)
            .map_err(|_| TransportError::LinkClosed)
    }

    /// Next event, if one is already queued.
    pub fn try_next_event(&mut self) -> Option<BackendEvent> {
        self.events.try_recv().ok()
    }

    /// Wait for the next event. `None` once the I/O side is gone.
    pub async fn next_event(&mut self) -> Option<BackendEvent> {
        self.events.recv().await
    }

    /// Unsubscribe from every event and force the connection closed.
    pub fn close(mut self) {
        self.events.close();
        self.shutdown.send_replace(true);
    }
}

/// One connected player.
pub struct Session {
    id: SessionId,
    backend: Arc<Backend>,
    tracking: EntityTracking,
    link: Option<BackendLink>,
    player_slot: Option<SlotId>,
    sink: Arc<dyn ClientSink>,
    lifecycle: watch::Sender<Lifecycle>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("backend", &self.backend.name())
            .field("lifecycle", &self.lifecycle())
            .field("player_slot", &self.player_slot)
            .field("tracked", &self.tracking.len())
            .field("linked", &self.link.is_some())
            .finish()
    }
}

impl Session {
    /// Create a session bound to `backend`. No link is attached yet.
    pub fn new(id: SessionId, backend: Arc<Backend>, sink: Arc<dyn ClientSink>) -> Self {
        backend.client_joined();
        let (lifecycle, _) = watch::channel(Lifecycle::Bound);
        Self {
            id,
            backend,
            tracking: EntityTracking::new(),
            link: None,
            player_slot: None,
            sink,
            lifecycle,
        }
    }

    pub fn with_player_slot(mut self, slot: SlotId) -> Self {
        self.player_slot = Some(slot);
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The backend this session is (or was last) bound to.
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    pub fn player_slot(&self) -> Option<SlotId> {
        self.player_slot
    }

    pub fn set_player_slot(&mut self, slot: SlotId) {
        self.player_slot = Some(slot);
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    pub fn is_bound(&self) -> bool {
        self.lifecycle() == Lifecycle::Bound
    }

    /// Observe lifecycle changes. The receiver errors once the session is
    /// dropped.
    pub fn subscribe(&self) -> watch::Receiver<Lifecycle> {
        self.lifecycle.subscribe()
    }

    pub fn tracking(&self) -> &EntityTracking {
        &self.tracking
    }

    pub fn tracking_mut(&mut self) -> &mut EntityTracking {
        &mut self.tracking
    }

    pub fn sink(&self) -> &Arc<dyn ClientSink> {
        &self.sink
    }

    pub fn has_link(&self) -> bool {
        self.link.is_some()
    }

    /// Send a notice to the client. Failures are logged, not returned.
    pub fn notify(&self, notice: Notice) {
        if let Err(e) = self.sink.send_notice(&notice) {
            tracing::warn!(session = %self.id, error = %e, "failed to deliver notice");
        }
    }

    /// Attach the live connection for the current backend, replacing (and
    /// closing) any previous one.
    pub fn attach_link(&mut self, link: BackendLink) {
        if let Some(old) = self.link.replace(link) {
            old.close();
        }
    }

    /// Forward a client frame to the backend.
    pub fn send_to_backend(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        match &self.link {
            Some(link) => link.send(frame),
            None => Err(TransportError::LinkClosed),
        }
    }

    /// Wait for the next backend event. Never resolves while no link is
    /// attached; resolves to [`BackendEvent::Closed`] if the I/O side went
    /// away without saying so.
    pub async fn next_backend_event(&mut self) -> BackendEvent {
        match &mut self.link {
            Some(link) => link.next_event().await.unwrap_or(BackendEvent::Closed),
            None => std::future::pending().await,
        }
    }

    /// Apply one backend event to session state.
    pub fn apply_backend_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::Data(frame) => {
                if frame.packet_type == PacketType::SET_USER_SLOT
                    && let Some(&slot) = frame.payload.first()
                {
                    tracing::debug!(session = %self.id, slot, "player slot assigned");
                    self.player_slot = Some(SlotId::from(slot));
                }
                if let Err(e) = observe_frame(&mut self.tracking, &frame) {
                    tracing::debug!(
                        session = %self.id,
                        packet = %frame.packet_type,
                        error = %e,
                        "undecodable entity update"
                    );
                }
                let forwarded = frame
                    .to_bytes()
                    .map_err(TransportError::from)
                    .and_then(|bytes| self.sink.send_frame(bytes));
                if let Err(e) = forwarded {
                    tracing::warn!(session = %self.id, error = %e, "failed to forward frame");
                }
            }
            BackendEvent::Error(message) => {
                tracing::warn!(
                    session = %self.id,
                    backend = self.backend.name(),
                    "backend error: {message}"
                );
            }
            BackendEvent::Closed => {
                tracing::info!(
                    session = %self.id,
                    backend = self.backend.name(),
                    "backend closed the connection"
                );
                self.detach_link();
                self.mark_unbound();
            }
        }
    }

    /// Apply every already-queued backend event. Returns how many ran.
    pub fn pump_backend(&mut self) -> usize {
        let mut applied = 0;
        while let Some(event) = self.link.as_mut().and_then(BackendLink::try_next_event) {
            self.apply_backend_event(event);
            applied += 1;
        }
        applied
    }

    /// Emit deactivation packets for everything tracked on the current
    /// backend except the player's own slot.
    pub fn clear_entities(&mut self) -> TeardownReport {
        teardown::teardown(&mut self.tracking, self.sink.as_ref(), self.player_slot)
    }

    /// Unsubscribe from and close the current link. Returns whether one was
    /// attached.
    pub(crate) fn detach_link(&mut self) -> bool {
        match self.link.take() {
            Some(link) => {
                link.close();
                true
            }
            None => false,
        }
    }

    /// Returns `false` if the session was already unbound.
    pub(crate) fn mark_unbound(&mut self) -> bool {
        if !self.is_bound() {
            return false;
        }
        self.lifecycle.send_replace(Lifecycle::Unbound);
        self.backend.client_left();
        true
    }

    /// Point the session at `target` with fresh tracking. The old link must
    /// already be detached. Returns the previous backend.
    pub(crate) fn rebind(&mut self, target: Arc<Backend>) -> Arc<Backend> {
        debug_assert!(self.link.is_none());
        if self.is_bound() {
            self.backend.client_left();
        }
        target.client_joined();
        self.tracking = EntityTracking::new();
        self.lifecycle.send_replace(Lifecycle::Bound);
        std::mem::replace(&mut self.backend, target)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.detach_link();
        if self.is_bound() {
            self.backend.client_left();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dimensions_net::PacketEncoder;

    fn session() -> (Session, mpsc::UnboundedReceiver<Vec<u8>>, Arc<Backend>) {
        let backend = Arc::new(Backend::new("lobby", "127.0.0.1:7001"));
        let (sink, rx) = ChannelSink::channel();
        let session = Session::new(SessionId(1), Arc::clone(&backend), Arc::new(sink));
        (session, rx, backend)
    }

    fn player_active(slot: u8, active: u8) -> Frame {
        let bytes = PacketEncoder::new(PacketType::PLAYER_ACTIVE)
            .put_u8(slot)
            .unwrap()
            .put_u8(active)
            .unwrap()
            .finish()
            .unwrap();
        Frame::decode(&bytes).unwrap()
    }

    #[test]
    fn test_new_session_is_bound_and_counted() {
        let (session, _rx, backend) = session();
        assert!(session.is_bound());
        assert_eq!(backend.client_count(), 1);
        drop(session);
        assert_eq!(backend.client_count(), 0);
    }

    #[test]
    fn test_notice_rendered_as_server_chat() {
        let (session, mut rx, _) = session();
        session.notify(Notice::colored("hello", Rgb::RED));

        let frame = Frame::decode(&rx.try_recv().unwrap()).unwrap();
        let line = ChatText::decode(&frame.payload).unwrap();
        assert_eq!(line.text, "hello");
        assert_eq!(line.color, Rgb::RED);
        assert_eq!(line.author, dimensions_net::SERVER_AUTHOR);
    }

    #[test]
    fn test_backend_frames_tracked_and_forwarded() {
        let (mut session, mut rx, _) = session();
        let (link, end) = BackendLink::pair();
        session.attach_link(link);

        end.events
            .send(BackendEvent::Data(player_active(9, 1)))
            .unwrap();
        assert_eq!(session.pump_backend(), 1);

        assert!(session.tracking().players().contains(9));
        assert_eq!(rx.try_recv().unwrap(), player_active(9, 1).to_bytes().unwrap());
    }

    #[test]
    fn test_user_slot_frame_sets_player_slot() {
        let (mut session, _rx, _) = session();
        let (link, end) = BackendLink::pair();
        session.attach_link(link);

        end.events
            .send(BackendEvent::Data(Frame {
                packet_type: PacketType::SET_USER_SLOT,
                payload: vec![4],
            }))
            .unwrap();
        session.pump_backend();
        assert_eq!(session.player_slot(), Some(4));
    }

    #[test]
    fn test_client_frames_reach_backend() {
        let (session, _rx, _) = session();
        assert!(matches!(
            session.send_to_backend(vec![1, 0, 0, 0]),
            Err(TransportError::LinkClosed)
        ));

        let (mut session, _rx, _) = self::session();
        let (link, mut end) = BackendLink::pair();
        session.attach_link(link);
        session.send_to_backend(vec![1, 0, 0, 0]).unwrap();
        assert_eq!(end.to_backend.try_recv().unwrap(), vec![1, 0, 0, 0]);
    }

    #[test]
    fn test_backend_close_unbinds() {
        let (mut session, _rx, backend) = session();
        let (link, end) = BackendLink::pair();
        session.attach_link(link);

        end.events.send(BackendEvent::Closed).unwrap();
        session.pump_backend();

        assert!(!session.is_bound());
        assert!(!session.has_link());
        assert_eq!(backend.client_count(), 0);
    }

    #[test]
    fn test_replacing_link_closes_previous() {
        let (mut session, _rx, _) = session();
        let (first, first_end) = BackendLink::pair();
        let (second, _second_end) = BackendLink::pair();
        session.attach_link(first);
        session.attach_link(second);

        assert!(*first_end.shutdown.borrow());
        assert!(first_end.events.send(BackendEvent::Closed).is_err());
    }

    #[tokio::test]
    async fn test_next_event_reports_vanished_io_side_as_closed() {
        let (mut session, _rx, _) = session();
        let (link, end) = BackendLink::pair();
        session.attach_link(link);
        drop(end);

        assert_eq!(session.next_backend_event().await, BackendEvent::Closed);
    }

    #[test]
    fn test_lifecycle_watch_sees_unbind() {
        let (mut session, _rx, _) = session();
        let rx = session.subscribe();
        assert_eq!(*rx.borrow(), Lifecycle::Bound);

        assert!(session.mark_unbound());
        assert!(!session.mark_unbound());
        assert_eq!(*rx.borrow(), Lifecycle::Unbound);
    }
}
