//! # Error Types
//!
//! Every error the replication layer can surface. Only [`ConnectError`] is meant
//! for the user; the rest are returned from local calls or counted and dropped.

use thiserror::Error;

use crate::lobby::PeerId;
use crate::registry::EntityId;

/// Reasons a join attempt fails. Never retried automatically.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectError {
    /// No lobby with the requested id exists.
    #[error("lobby not found")]
    LobbyNotFound,

    /// The host refused the join because the lobby is at capacity.
    #[error("lobby is full")]
    LobbyFull,

    /// The host did not answer with a manifest in time.
    #[error("timed out waiting for the lobby host")]
    NetworkTimeout,
}

/// Errors returned by local session operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The operation needs an active lobby membership.
    #[error("not in a lobby")]
    NotInLobby,

    /// Only the host may perform this operation.
    #[error("only the host may do this")]
    NotHost,

    /// The local peer does not own this entity.
    #[error("entity {0} is owned by another peer")]
    NotOwner(EntityId),

    /// No entity with this id is registered.
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),

    /// The local scene is not loaded, so level-scoped entities cannot exist.
    #[error("scene is not loaded")]
    SceneNotReady,

    /// A payload does not fit the wire format's length prefix.
    #[error("payload of {len} bytes is too large")]
    PayloadTooLarge {
        /// Rejected payload length.
        len: usize,
    },

    /// The local peer already owns its one player entity.
    #[error("local player already exists")]
    PlayerExists,

    /// The local player is removed only by leaving the lobby.
    #[error("cannot despawn the local player")]
    LocalPlayer,

    /// Every entity id of the local peer has been handed out.
    #[error("entity ids exhausted")]
    IdsExhausted,

    /// The transport refused the operation.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors reported by a [`Transport`](crate::transport::Transport).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transport or its lobby has been shut down.
    #[error("transport closed")]
    Closed,

    /// The target peer is not reachable through this transport.
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),

    /// A lobby with this id already exists.
    #[error("lobby already exists")]
    LobbyExists,
}

/// A message that could not be decoded. Dropped and counted, never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer ended before the message did.
    #[error("message truncated")]
    Truncated,

    /// The frame does not start with the protocol magic byte.
    #[error("bad frame magic {0:#04x}")]
    BadMagic(u8),

    /// The message kind byte is not a known kind.
    #[error("unknown message kind {0}")]
    UnknownKind(u8),

    /// A field held a value outside its domain.
    #[error("invalid {field}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
    },

    /// A string field was not valid UTF-8.
    #[error("invalid utf-8 in {field}")]
    InvalidUtf8 {
        /// Name of the offending field.
        field: &'static str,
    },

    /// Bytes were left over after the message body.
    #[error("{0} trailing bytes")]
    TrailingBytes(usize),
}

/// Errors loading a session configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is outside its allowed range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for local session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Result type for decoding.
pub type DecodeResult<T> = Result<T, DecodeError>;
