//! Moving a session between dimensions, and leaving them altogether.

use std::sync::Arc;

use dimensions_net::Rgb;

use crate::directory::Backend;
use crate::session::{Notice, Session};
use crate::teardown::TeardownReport;

/// Errors from [`migrate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MigrateError {
    /// The target is the backend the session is already bound to.
    #[error("session is already in dimension {0:?}")]
    AlreadyBound(String),
}

/// What a completed migration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub from: String,
    pub to: String,
    pub teardown: TeardownReport,
}

/// Move `session` to `target`.
///
/// In order: tell the client where it is going, tear down every entity it
/// can see on the current backend except its own player, drop the old
/// link's subscription and close it, then rebind to `target` with empty
/// tracking. The caller attaches the new link afterwards.
pub fn migrate(session: &mut Session, target: Arc<Backend>) -> Result<MigrationReport, MigrateError> {
    if session.backend().name() == target.name() {
        return Err(MigrateError::AlreadyBound(target.name().to_string()));
    }

    session.notify(Notice::colored(
        format!("Shifting to the {} Dimension", target.display_name()),
        Rgb::RED,
    ));

    let teardown = session.clear_entities();
    session.detach_link();
    let previous = session.rebind(Arc::clone(&target));

    tracing::info!(
        session = %session.id(),
        from = previous.name(),
        to = target.name(),
        cleared = teardown.cleared(),
        failed = teardown.failed,
        "session migrated"
    );

    Ok(MigrationReport {
        from: previous.name().to_string(),
        to: target.name().to_string(),
        teardown,
    })
}

/// Detach `session` from its current backend for good.
///
/// Unsubscribes from the link's events, closes the backend connection,
/// marks the session unbound and says goodbye. Returns `false` (and does
/// nothing) if the session was already unbound.
pub fn disconnect(session: &mut Session) -> bool {
    if !session.is_bound() {
        return false;
    }

    session.detach_link();
    session.mark_unbound();
    session.notify(Notice::plain(
        "You have entered the Void. You will soon disappear.",
    ));

    tracing::info!(
        session = %session.id(),
        backend = session.backend().name(),
        "session entered the void"
    );
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{BackendEvent, BackendLink, ChannelSink, SessionId};
    use crate::tracking::{Domain, SlotRecord};
    use dimensions_net::{ChatText, Frame, PacketType};
    use tokio::sync::mpsc;

    fn setup() -> (
        Session,
        mpsc::UnboundedReceiver<Vec<u8>>,
        Arc<Backend>,
        Arc<Backend>,
    ) {
        let lobby = Arc::new(Backend::new("lobby", "127.0.0.1:7001"));
        let arena = Arc::new(Backend::new("arena", "127.0.0.1:7002"));
        let (sink, rx) = ChannelSink::channel();
        let session = Session::new(SessionId(7), Arc::clone(&lobby), Arc::new(sink))
            .with_player_slot(3);
        (session, rx, lobby, arena)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(bytes) = rx.try_recv() {
            frames.push(Frame::decode(&bytes).unwrap());
        }
        frames
    }

    fn chat_text(frame: &Frame) -> String {
        ChatText::decode(&frame.payload).unwrap().text
    }

    #[test]
    fn test_notice_then_teardown_then_rebind() {
        let (mut session, mut rx, lobby, arena) = setup();
        for slot in [1, 3, 8] {
            session
                .tracking_mut()
                .domain_mut(Domain::Player)
                .insert(slot, SlotRecord::default());
        }
        session
            .tracking_mut()
            .domain_mut(Domain::Npc)
            .insert(20, SlotRecord::default());

        let report = migrate(&mut session, Arc::clone(&arena)).unwrap();

        assert_eq!(report.from, "lobby");
        assert_eq!(report.to, "arena");
        assert_eq!(report.teardown.sent, 3);

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0].packet_type, PacketType::CHAT_TEXT);
        assert_eq!(chat_text(&frames[0]), "Shifting to the Arena Dimension");
        assert_eq!(frames[1].packet_type, PacketType::PLAYER_ACTIVE);
        assert_eq!(frames[1].payload, vec![1, 0]);
        assert_eq!(frames[2].payload, vec![8, 0]);
        assert_eq!(frames[3].packet_type, PacketType::NPC_UPDATE);

        assert_eq!(session.backend().name(), "arena");
        assert!(session.tracking().is_empty());
        assert!(session.is_bound());
        assert_eq!(lobby.client_count(), 0);
        assert_eq!(arena.client_count(), 1);
    }

    #[test]
    fn test_same_backend_rejected_without_side_effects() {
        let (mut session, mut rx, lobby, _) = setup();
        session
            .tracking_mut()
            .domain_mut(Domain::Item)
            .insert(5, SlotRecord::default());

        let result = migrate(&mut session, Arc::clone(&lobby));

        assert_eq!(result, Err(MigrateError::AlreadyBound("lobby".into())));
        assert!(drain(&mut rx).is_empty());
        assert!(session.tracking().items().contains(5));
        assert_eq!(lobby.client_count(), 1);
    }

    #[test]
    fn test_old_link_detached_before_rebind() {
        let (mut session, _rx, _, arena) = setup();
        let (link, end) = BackendLink::pair();
        session.attach_link(link);

        migrate(&mut session, arena).unwrap();

        assert!(!session.has_link());
        assert!(*end.shutdown.borrow());
        assert!(end.events.send(BackendEvent::Closed).is_err());
        assert!(session.is_bound());
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let (mut session, mut rx, lobby, _) = setup();
        let (link, end) = BackendLink::pair();
        session.attach_link(link);

        assert!(disconnect(&mut session));
        assert!(!session.is_bound());
        assert!(*end.shutdown.borrow());
        assert_eq!(lobby.client_count(), 0);

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(
            chat_text(&frames[0]),
            "You have entered the Void. You will soon disappear."
        );

        assert!(!disconnect(&mut session));
        assert!(drain(&mut rx).is_empty());
        assert_eq!(lobby.client_count(), 0);
    }

    #[test]
    fn test_migrate_out_of_the_void_rebinds() {
        let (mut session, mut rx, lobby, arena) = setup();
        disconnect(&mut session);
        drain(&mut rx);

        let report = migrate(&mut session, Arc::clone(&arena)).unwrap();

        assert_eq!(report.to, "arena");
        assert!(session.is_bound());
        assert_eq!(lobby.client_count(), 0);
        assert_eq!(arena.client_count(), 1);
    }
}
