//! Gameplay protocol carried over UDP. The first byte of every datagram is a
//! [`UdpOpcode`].

use super::{wire_message, wire_record, ListHeader, ProtocolError, WireMessage, WireRecord};
use super::MAX_DATAGRAM_SIZE;
use serde::{Deserialize, Serialize};
use std::ops::{BitOr, BitOrAssign};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UdpOpcode {
    PlayerInput = 1,
    PlayerState = 2,
    EntitySpawn = 3,
    EntityUpdate = 4,
    EntityDestroy = 5,
    Ping = 6,
    Pong = 7,
    PlayerDisconnect = 8,
    GlobalStateSync = 9,
    YouHaveBeenKicked = 10,
}

impl TryFrom<u8> for UdpOpcode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::PlayerInput,
            2 => Self::PlayerState,
            3 => Self::EntitySpawn,
            4 => Self::EntityUpdate,
            5 => Self::EntityDestroy,
            6 => Self::Ping,
            7 => Self::Pong,
            8 => Self::PlayerDisconnect,
            9 => Self::GlobalStateSync,
            10 => Self::YouHaveBeenKicked,
            other => return Err(ProtocolError::UnknownOpcode(other)),
        })
    }
}

/// Action bitmask carried by `PLAYER_INPUT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputFlags(u8);

impl InputFlags {
    pub const NONE: Self = Self(0);
    pub const UP: Self = Self(0x01);
    pub const DOWN: Self = Self(0x02);
    pub const LEFT: Self = Self(0x04);
    pub const RIGHT: Self = Self(0x08);
    /// Fire a normal shot.
    pub const PRESSED: Self = Self(0x10);
    /// Fire a charged shot.
    pub const HOLD: Self = Self(0x20);

    const ALL: u8 = 0x3f;

    /// Keeps only the defined bits.
    pub fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::ALL)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for InputFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for InputFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Entity type tags used on the wire.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Shot = 1,
    Enemy = 2,
    EliteEnemy = 3,
    ChargedShot = 4,
}

impl EntityKind {
    pub fn from_wire(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::Shot),
            2 => Some(Self::Enemy),
            3 => Some(Self::EliteEnemy),
            4 => Some(Self::ChargedShot),
            _ => None,
        }
    }

    pub fn is_projectile(self) -> bool {
        matches!(self, Self::Shot | Self::ChargedShot)
    }

    pub fn is_enemy(self) -> bool {
        matches!(self, Self::Enemy | Self::EliteEnemy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerInput {
    pub player_id: u32,
    pub tick: u32,
    pub inputs: InputFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub sequence: u32,
    pub player_id: u32,
    pub last_processed_tick: u32,
    pub timestamp: u32,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntitySpawn {
    pub entity_id: u32,
    pub entity_type: u16,
    pub timestamp: u32,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntityUpdate {
    pub entity_id: u32,
    pub timestamp: u32,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntityDestroy {
    pub entity_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    pub timestamp: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pong {
    pub timestamp: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerDisconnect {
    pub player_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct YouHaveBeenKicked;

/// Header of one fragment of a full-state sync.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlobalStateSync {
    pub sync_id: u32,
    pub fragment_index: u8,
    pub fragment_count: u8,
    pub entity_count: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyncedEntity {
    pub entity_id: u32,
    pub entity_type: u16,
    pub x: f32,
    pub y: f32,
}

wire_message!(PlayerInput, UdpOpcode::PlayerInput, 10);
wire_message!(PlayerState, UdpOpcode::PlayerState, 25);
wire_message!(EntitySpawn, UdpOpcode::EntitySpawn, 19);
wire_message!(EntityUpdate, UdpOpcode::EntityUpdate, 17);
wire_message!(EntityDestroy, UdpOpcode::EntityDestroy, 5);
wire_message!(Ping, UdpOpcode::Ping, 5);
wire_message!(Pong, UdpOpcode::Pong, 5);
wire_message!(PlayerDisconnect, UdpOpcode::PlayerDisconnect, 5);
wire_message!(GlobalStateSync, UdpOpcode::GlobalStateSync, 9);
wire_message!(YouHaveBeenKicked, UdpOpcode::YouHaveBeenKicked, 1);

wire_record!(SyncedEntity, 14);

impl ListHeader for GlobalStateSync {
    fn record_count(&self) -> usize {
        self.entity_count as usize
    }
}

/// Fragments a single sync may be split into before entities are dropped.
pub const MAX_SYNC_FRAGMENTS: usize = 8;

/// Entities that fit in one sync datagram next to its header.
pub const SYNC_ENTITIES_PER_FRAGMENT: usize =
    (MAX_DATAGRAM_SIZE - GlobalStateSync::SIZE) / SyncedEntity::SIZE;
