//! Per-binding entity bookkeeping.
//!
//! A session bound to a backend tracks which player, NPC and item slots the
//! client currently knows about. Slots become present when the backend's
//! update frames are observed on their way to the client and are cleared by
//! teardown when the session leaves.

use std::collections::BTreeMap;
use std::fmt;

use dimensions_net::{DecodeError, Frame, PacketReader, PacketType};

/// Slot index within one entity domain.
pub type SlotId = u16;

/// The three independently tracked entity domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Player,
    Npc,
    Item,
}

impl Domain {
    /// Teardown order.
    pub const ALL: [Domain; 3] = [Domain::Player, Domain::Npc, Domain::Item];
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::Player => write!(f, "player"),
            Domain::Npc => write!(f, "npc"),
            Domain::Item => write!(f, "item"),
        }
    }
}

/// Opaque state carried by a present slot: the payload of the last update
/// seen for it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotRecord {
    pub last_update: Vec<u8>,
}

/// Sparse map of present slots in one domain.
///
/// Keys iterate in ascending order, which is what makes teardown output
/// reproducible.
#[derive(Debug, Clone, Default)]
pub struct SlotMap {
    slots: BTreeMap<SlotId, SlotRecord>,
}

impl SlotMap {
    pub fn insert(&mut self, slot: SlotId, record: SlotRecord) {
        self.slots.insert(slot, record);
    }

    pub fn remove(&mut self, slot: SlotId) -> Option<SlotRecord> {
        self.slots.remove(&slot)
    }

    pub fn get(&self, slot: SlotId) -> Option<&SlotRecord> {
        self.slots.get(&slot)
    }

    pub fn contains(&self, slot: SlotId) -> bool {
        self.slots.contains_key(&slot)
    }

    /// Owned, ascending copy of the present slot ids.
    pub fn snapshot(&self) -> Vec<SlotId> {
        self.slots.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Player, NPC and item slot maps for one backend binding.
#[derive(Debug, Clone, Default)]
pub struct EntityTracking {
    players: SlotMap,
    npcs: SlotMap,
    items: SlotMap,
}

impl EntityTracking {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn domain(&self, domain: Domain) -> &SlotMap {
        match domain {
            Domain::Player => &self.players,
            Domain::Npc => &self.npcs,
            Domain::Item => &self.items,
        }
    }

    pub fn domain_mut(&mut self, domain: Domain) -> &mut SlotMap {
        match domain {
            Domain::Player => &mut self.players,
            Domain::Npc => &mut self.npcs,
            Domain::Item => &mut self.items,
        }
    }

    pub fn players(&self) -> &SlotMap {
        &self.players
    }

    pub fn npcs(&self) -> &SlotMap {
        &self.npcs
    }

    pub fn items(&self) -> &SlotMap {
        &self.items
    }

    /// Total present slots across all domains.
    pub fn len(&self) -> usize {
        self.players.len() + self.npcs.len() + self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// Payload offsets of the fields that decide presence.
const NPC_NET_ID_OFFSET: usize = 2 + 4 * 4 + 3;
const ITEM_STACK_OFFSET: usize = 2 + 4 * 4;

/// Update `tracking` from a backend frame headed to the client.
///
/// Only `PlayerActive`, `NpcUpdate` and `ItemUpdate` frames affect tracking;
/// every other type is ignored. Returns the slot that changed, if any.
///
/// - `PlayerActive`: present when `active != 0`.
/// - `NpcUpdate`: present unless `netId == 0`.
/// - `ItemUpdate`: present unless `stackCount == 0`.
pub fn observe_frame(
    tracking: &mut EntityTracking,
    frame: &Frame,
) -> Result<Option<(Domain, SlotId)>, DecodeError> {
    let mut reader = PacketReader::new(&frame.payload);
    let (domain, slot, present) = match frame.packet_type {
        PacketType::PLAYER_ACTIVE => {
            let slot = reader.get_u8()?;
            let active = reader.get_u8()?;
            (Domain::Player, SlotId::from(slot), active != 0)
        }
        PacketType::NPC_UPDATE => {
            let slot = reader.get_i16()?;
            reader.skip(NPC_NET_ID_OFFSET - 2)?;
            let net_id = reader.get_i16()?;
            match SlotId::try_from(slot) {
                Ok(slot) => (Domain::Npc, slot, net_id != 0),
                Err(_) => return Ok(None),
            }
        }
        PacketType::ITEM_UPDATE => {
            let slot = reader.get_i16()?;
            reader.skip(ITEM_STACK_OFFSET - 2)?;
            let stack = reader.get_i16()?;
            match SlotId::try_from(slot) {
                Ok(slot) => (Domain::Item, slot, stack != 0),
                Err(_) => return Ok(None),
            }
        }
        _ => return Ok(None),
    };

    let map = tracking.domain_mut(domain);
    if present {
        map.insert(
            slot,
            SlotRecord {
                last_update: frame.payload.clone(),
            },
        );
    } else {
        map.remove(slot);
    }
    Ok(Some((domain, slot)))
}
