//! Session migration between backend dimensions.
//!
//! A client's chat line is parsed into a [`Command`], routed by the
//! [`CommandDispatcher`] to either a built-in handler or a dimension switch,
//! and a switch tears down every entity the client can see on the old
//! backend before the [`Session`] is rebound to the new one.

pub mod command;
pub mod directory;
pub mod dispatch;
pub mod migrate;
pub mod session;
pub mod teardown;
pub mod tracking;

pub use command::{Command, DEFAULT_MARKER, parse_command};
pub use directory::{Backend, DuplicateBackend, RoutingDirectory};
pub use dispatch::{CommandDispatcher, DEFAULT_WHO_DELAY, Route};
pub use migrate::{MigrateError, MigrationReport, disconnect, migrate};
pub use session::{
    BackendEvent, BackendLink, ChannelSink, ClientSink, Lifecycle, LinkEnd, Notice, Session,
    SessionId, TransportError,
};
pub use teardown::{TeardownReport, item_cleared, npc_cleared, player_inactive, teardown};
pub use tracking::{Domain, EntityTracking, SlotId, SlotMap, SlotRecord, observe_frame};
