//! # Message Definitions
//!
//! Every logical message exchanged between lobby peers.
//!
//! Unlike per-tick packets in a client/server shooter, these are owned values
//! with variable-length strings and payloads. Only `Transform` is copied as a
//! fixed block.

use wingmate_shared::{Team, Transform, Vec3};

use crate::lobby::{LobbyId, PeerId};
use crate::registry::{EntityId, EntityKind};
use crate::world::WorldObject;

/// Wire discriminant of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum MessageKind {
    /// Guest -> Host: request to join.
    JoinRequest = 1,
    /// Host -> Guest: full lobby state for a new member.
    JoinManifest = 2,
    /// Host -> Guest: join refused.
    JoinRejected = 3,
    /// Any -> All: the sender is leaving.
    LeaveNotice = 4,
    /// Any -> All: peer metadata.
    PeerState = 5,
    /// Owner -> All: a new entity.
    EntitySpawn = 6,
    /// Owner -> All: per-tick entity state.
    EntitySnapshot = 7,
    /// Owner -> All: entity removed.
    EntityDespawn = 8,
    /// Any -> All: chat line.
    ChatMessage = 9,
    /// Any -> All: typing indicator.
    TypingState = 10,
    /// Host -> All: load another scene.
    SceneChange = 11,
    /// Any -> All: door or pickup state.
    WorldObjectState = 12,
    /// Any -> All: keep-alive.
    Heartbeat = 13,
}

impl MessageKind {
    /// Number of message kinds.
    pub const COUNT: usize = 13;

    /// Every kind in wire order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::JoinRequest,
        Self::JoinManifest,
        Self::JoinRejected,
        Self::LeaveNotice,
        Self::PeerState,
        Self::EntitySpawn,
        Self::EntitySnapshot,
        Self::EntityDespawn,
        Self::ChatMessage,
        Self::TypingState,
        Self::SceneChange,
        Self::WorldObjectState,
        Self::Heartbeat,
    ];

    /// Parses a wire discriminant.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| *kind as u8 == value)
    }

    /// Dense index for per-kind tables.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize - 1
    }

    /// Losing a critical message breaks consistency, so it travels reliably
    /// and is never evicted from the inbound queue.
    #[inline]
    #[must_use]
    pub const fn is_critical(self) -> bool {
        !matches!(self, Self::EntitySnapshot | Self::TypingState | Self::Heartbeat)
    }
}

/// Why a host refused a join.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RejectReason {
    /// The lobby already holds its maximum number of peers.
    LobbyFull = 0,
}

impl RejectReason {
    /// Parses a wire discriminant.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::LobbyFull),
            _ => None,
        }
    }
}

/// Peer metadata as carried on the wire.
#[derive(Clone, Debug, PartialEq)]
pub struct PeerRecord {
    /// Peer the record describes.
    pub peer_id: PeerId,
    /// Display name.
    pub display_name: String,
    /// Selected team.
    pub team: Team,
    /// Whether this peer hosts the lobby.
    pub is_host: bool,
}

/// Everything a receiver needs to create a replica.
#[derive(Clone, Debug, PartialEq)]
pub struct SpawnRecord {
    /// Entity id.
    pub id: EntityId,
    /// Entity kind.
    pub kind: EntityKind,
    /// Current owner. Differs from `id.origin` after a transfer.
    pub owner: PeerId,
    /// Survives scene changes.
    pub persistent: bool,
    /// Scene epoch the entity was spawned in.
    pub epoch: u32,
    /// Sequence of the included state.
    pub seq: u32,
    /// Owner clock when the state was sampled.
    pub timestamp_ms: u64,
    /// Latest transform.
    pub transform: Transform,
    /// Optional velocity used for extrapolation.
    pub velocity: Option<Vec3>,
    /// Kind-specific state, opaque to this layer.
    pub payload: Vec<u8>,
}

/// One per-tick state sample of an owned entity.
#[derive(Clone, Debug, PartialEq)]
pub struct SnapshotRecord {
    /// Entity id.
    pub id: EntityId,
    /// Per-entity sequence, strictly increasing per owner.
    pub seq: u32,
    /// Owner clock when the sample was taken.
    pub timestamp_ms: u64,
    /// Sampled transform.
    pub transform: Transform,
    /// Optional velocity used for extrapolation.
    pub velocity: Option<Vec3>,
    /// Kind-specific state, opaque to this layer.
    pub payload: Vec<u8>,
}

/// Full lobby state sent atomically to a new member.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Manifest {
    /// Lobby being joined.
    pub lobby: LobbyId,
    /// Current scene name.
    pub scene: String,
    /// Current scene epoch.
    pub epoch: u32,
    /// Existing members, the joiner excluded.
    pub peers: Vec<PeerRecord>,
    /// Every live entity with its latest state.
    pub entities: Vec<SpawnRecord>,
    /// Level objects of the current scene.
    pub objects: Vec<WorldObject>,
}

/// A decoded message.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Request to join the sender's target lobby.
    JoinRequest {
        /// Name the joiner wants to show.
        display_name: String,
        /// Team the joiner starts on.
        team: Team,
    },
    /// Full lobby state.
    JoinManifest(Manifest),
    /// Join refused.
    JoinRejected {
        /// Why.
        reason: RejectReason,
    },
    /// Sender is leaving the lobby.
    LeaveNotice,
    /// Peer metadata changed or a peer was admitted.
    PeerState(PeerRecord),
    /// New entity.
    EntitySpawn(SpawnRecord),
    /// Entity state sample.
    EntitySnapshot(SnapshotRecord),
    /// Entity removed by its owner.
    EntityDespawn {
        /// Removed entity.
        id: EntityId,
    },
    /// Chat line.
    ChatMessage {
        /// Already trimmed and truncated by the sender.
        text: String,
    },
    /// Typing indicator.
    TypingState {
        /// New flag.
        typing: bool,
    },
    /// Host moved the lobby to another scene.
    SceneChange {
        /// Scene to load.
        scene: String,
        /// New epoch, strictly greater than the previous one.
        epoch: u32,
    },
    /// Level object changed.
    WorldObjectState(WorldObject),
    /// Keep-alive.
    Heartbeat,
}

impl Message {
    /// Wire kind of this message.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::JoinRequest { .. } => MessageKind::JoinRequest,
            Self::JoinManifest(_) => MessageKind::JoinManifest,
            Self::JoinRejected { .. } => MessageKind::JoinRejected,
            Self::LeaveNotice => MessageKind::LeaveNotice,
            Self::PeerState(_) => MessageKind::PeerState,
            Self::EntitySpawn(_) => MessageKind::EntitySpawn,
            Self::EntitySnapshot(_) => MessageKind::EntitySnapshot,
            Self::EntityDespawn { .. } => MessageKind::EntityDespawn,
            Self::ChatMessage { .. } => MessageKind::ChatMessage,
            Self::TypingState { .. } => MessageKind::TypingState,
            Self::SceneChange { .. } => MessageKind::SceneChange,
            Self::WorldObjectState(_) => MessageKind::WorldObjectState,
            Self::Heartbeat => MessageKind::Heartbeat,
        }
    }

    /// Shorthand for `self.kind().is_critical()`.
    #[inline]
    #[must_use]
    pub const fn is_critical(&self) -> bool {
        self.kind().is_critical()
    }
}
