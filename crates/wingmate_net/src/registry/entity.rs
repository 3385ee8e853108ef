//! Entity identity, kinds and records.

use std::fmt;

use wingmate_shared::{Team, Transform, Vec3};

use super::interpolation::InterpolationBuffer;
use crate::lobby::PeerId;

/// Session-unique entity id: the spawning peer plus that peer's serial.
///
/// Ordered by origin, then serial, which is the order of
/// `current_entities()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    /// Peer that spawned the entity. Unchanged by ownership transfer.
    pub origin: PeerId,
    /// Per-origin counter.
    pub serial: u32,
}

impl EntityId {
    /// Creates an id.
    #[must_use]
    pub const fn new(origin: PeerId, serial: u32) -> Self {
        Self { origin, serial }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.origin.0, self.serial)
    }
}

/// What happens to an entity when its owner goes away.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OwnerLossPolicy {
    /// Removed for everyone.
    Despawn,
    /// Handed to the host.
    TransferToHost,
}

/// Replicated entity kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EntityKind {
    /// A peer's avatar.
    Player = 0,
    /// Ordinary enemy.
    Enemy = 1,
    /// Short-lived projectile.
    Projectile = 2,
    /// Level boss, outlives its owner.
    Boss = 3,
}

impl EntityKind {
    /// Parses a wire discriminant.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Player),
            1 => Some(Self::Enemy),
            2 => Some(Self::Projectile),
            3 => Some(Self::Boss),
            _ => None,
        }
    }

    /// Wire discriminant.
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Ownership policy when the owner leaves or times out.
    #[must_use]
    pub const fn owner_loss_policy(self) -> OwnerLossPolicy {
        match self {
            Self::Boss => OwnerLossPolicy::TransferToHost,
            Self::Player | Self::Enemy | Self::Projectile => OwnerLossPolicy::Despawn,
        }
    }

    /// Avatars follow their peer across scenes; everything else is level-scoped.
    #[must_use]
    pub const fn is_always_persistent(self) -> bool {
        matches!(self, Self::Player)
    }
}

/// State supplied by the owner at spawn time.
#[derive(Clone, Debug, Default)]
pub struct InitialState {
    /// Starting transform.
    pub transform: Transform,
    /// Starting velocity hint.
    pub velocity: Option<Vec3>,
    /// Kind-specific state.
    pub payload: Vec<u8>,
    /// Survive scene changes. Always true for players.
    pub persistent: bool,
}

impl InitialState {
    /// State at `transform` with no velocity or payload.
    #[must_use]
    pub fn at(transform: Transform) -> Self {
        Self { transform, ..Self::default() }
    }

    /// Sets the velocity hint.
    #[must_use]
    pub fn with_velocity(mut self, velocity: Vec3) -> Self {
        self.velocity = Some(velocity);
        self
    }

    /// Sets the kind-specific payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Marks the entity persistent across scenes.
    #[must_use]
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }
}

/// Who writes an entity's state on this peer.
#[derive(Clone, Debug)]
pub enum Authority {
    /// The local peer owns the entity.
    Owned {
        /// Sequence of the next emitted snapshot.
        next_seq: u32,
    },
    /// A remote peer owns the entity.
    Replica {
        /// Received history.
        buffer: InterpolationBuffer,
        /// Highest applied sequence. `None` right after an ownership transfer.
        last_seq: Option<u32>,
    },
}

/// One registered entity.
#[derive(Clone, Debug)]
pub struct EntityRecord {
    /// Entity id.
    pub id: EntityId,
    /// Entity kind.
    pub kind: EntityKind,
    /// Current owner.
    pub owner: PeerId,
    /// Survives scene changes.
    pub persistent: bool,
    /// Scene epoch at spawn.
    pub epoch: u32,
    /// Owned: authoritative transform. Replica: last rendered transform.
    pub transform: Transform,
    /// Latest velocity hint.
    pub velocity: Option<Vec3>,
    /// Latest kind-specific state.
    pub payload: Vec<u8>,
    /// Writer of the state above.
    pub authority: Authority,
}

impl EntityRecord {
    /// Returns true if the local peer owns this entity.
    #[inline]
    #[must_use]
    pub const fn is_owned(&self) -> bool {
        matches!(self.authority, Authority::Owned { .. })
    }
}

/// Read-only copy of an entity handed to collaborators.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityView {
    /// Entity id.
    pub id: EntityId,
    /// Entity kind.
    pub kind: EntityKind,
    /// Current owner.
    pub owner: PeerId,
    /// Owner's team, if the owner is a known member.
    pub team: Option<Team>,
    /// Interpolated transform for replicas, authoritative for owned entities.
    pub transform: Transform,
    /// Latest velocity hint.
    pub velocity: Option<Vec3>,
    /// Latest kind-specific state.
    pub payload: Vec<u8>,
    /// Survives scene changes.
    pub persistent: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_order_by_origin_then_serial() {
        let mut ids = vec![
            EntityId::new(PeerId(2), 0),
            EntityId::new(PeerId(1), 5),
            EntityId::new(PeerId(1), 1),
        ];
        ids.sort();
        assert_eq!(ids[0], EntityId::new(PeerId(1), 1));
        assert_eq!(ids[2], EntityId::new(PeerId(2), 0));
        assert_eq!(ids[1].to_string(), "1:5");
    }

    #[test]
    fn test_only_bosses_transfer() {
        assert_eq!(EntityKind::Boss.owner_loss_policy(), OwnerLossPolicy::TransferToHost);
        for kind in [EntityKind::Player, EntityKind::Enemy, EntityKind::Projectile] {
            assert_eq!(kind.owner_loss_policy(), OwnerLossPolicy::Despawn);
        }
    }
}
