//! Entity teardown: deactivate everything a client sees on a backend.
//!
//! Each domain is walked from an owned, ascending snapshot of its present
//! slots, so the output for a given tracking state is always the same packet
//! sequence: players, then NPCs, then items. Every visited slot is cleared
//! locally whether or not its packet could be written.

use dimensions_net::{EncodeError, PacketEncoder, PacketType};

use crate::session::{ClientSink, TransportError};
use crate::tracking::{Domain, EntityTracking, SlotId};

/// `PlayerActive` with `active = 0`.
pub fn player_inactive(slot: SlotId) -> Result<Vec<u8>, EncodeError> {
    PacketEncoder::new(PacketType::PLAYER_ACTIVE)
        .put_u8(slot)?
        .put_u8(0)?
        .finish()
}

/// `NpcUpdate` that zeroes the NPC in `slot`.
pub fn npc_cleared(slot: SlotId) -> Result<Vec<u8>, EncodeError> {
    PacketEncoder::new(PacketType::NPC_UPDATE)
        .put_i16(slot)?
        .put_f32(0.0) // position x
        .put_f32(0.0) // position y
        .put_f32(0.0) // velocity x
        .put_f32(0.0) // velocity y
        .put_u8(0)? // target
        .put_u8(0)? // reserved
        .put_u8(0)? // flags
        .put_i16(0)? // net id
        .put_u8(4)? // life byte size
        .put_i32(0)? // life
        .put_u8(0)? // release owner
        .finish()
}

/// `ItemUpdate` that empties the item in `slot`.
pub fn item_cleared(slot: SlotId) -> Result<Vec<u8>, EncodeError> {
    PacketEncoder::new(PacketType::ITEM_UPDATE)
        .put_i16(slot)?
        .put_f32(0.0) // position x
        .put_f32(0.0) // position y
        .put_f32(0.0) // velocity x
        .put_f32(0.0) // velocity y
        .put_i16(0)? // stack count
        .put_u8(0)? // prefix
        .put_u8(0)? // no delay
        .put_i16(0)? // owner
        .finish()
}

fn deactivation(domain: Domain, slot: SlotId) -> Result<Vec<u8>, EncodeError> {
    match domain {
        Domain::Player => player_inactive(slot),
        Domain::Npc => npc_cleared(slot),
        Domain::Item => item_cleared(slot),
    }
}

/// Outcome of one teardown pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Packets written successfully.
    pub sent: usize,
    /// Slots whose packet could not be encoded or written.
    pub failed: usize,
}

impl TeardownReport {
    /// Slots visited.
    pub fn cleared(&self) -> usize {
        self.sent + self.failed
    }
}

/// Deactivate and clear every present slot in `tracking`, skipping
/// `exclude_player` in the player domain.
///
/// Slots that are already absent produce nothing, so running this twice in
/// a row emits nothing the second time.
pub fn teardown(
    tracking: &mut EntityTracking,
    sink: &dyn ClientSink,
    exclude_player: Option<SlotId>,
) -> TeardownReport {
    let mut report = TeardownReport::default();

    for domain in Domain::ALL {
        let snapshot = tracking.domain(domain).snapshot();
        for slot in snapshot {
            if domain == Domain::Player && exclude_player == Some(slot) {
                continue;
            }

            let written = deactivation(domain, slot)
                .map_err(TransportError::from)
                .and_then(|frame| sink.send_frame(frame));
            match written {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(%domain, slot, error = %e, "teardown write failed");
                }
            }
            tracking.domain_mut(domain).remove(slot);
        }
    }

    tracing::debug!(sent = report.sent, failed = report.failed, "teardown complete");
    report
}
