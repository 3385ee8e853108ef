//! Peer identity and per-peer metadata.

use std::fmt;

use wingmate_shared::{Team, MAX_DISPLAY_NAME_LENGTH};

use crate::protocol::PeerRecord;

/// Transport-assigned peer identifier, unique per session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Lobby identifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LobbyId(pub u64);

impl fmt::Display for LobbyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lobby#{}", self.0)
    }
}

/// How we last heard from a peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// The local peer.
    Local,
    /// Heard from within the last heartbeat interval.
    Connected,
    /// Missed at least two heartbeats but not yet timed out.
    Silent,
}

/// A lobby member.
#[derive(Clone, Debug)]
pub struct Peer {
    /// Peer id.
    pub id: PeerId,
    /// Sanitized display name.
    pub display_name: String,
    /// Selected team.
    pub team: Team,
    /// Hosts the lobby.
    pub is_host: bool,
    /// Local clock time at which the typing flag clears. `None` when idle.
    pub typing_until: Option<u64>,
    /// Liveness.
    pub connection: ConnectionState,
}

impl Peer {
    /// Creates a remote peer from a wire record.
    #[must_use]
    pub fn from_record(record: &PeerRecord) -> Self {
        Self {
            id: record.peer_id,
            display_name: sanitize_display_name(&record.display_name),
            team: record.team,
            is_host: record.is_host,
            typing_until: None,
            connection: ConnectionState::Connected,
        }
    }

    /// Returns true while the typing flag has not expired.
    #[inline]
    #[must_use]
    pub fn is_typing(&self, now_ms: u64) -> bool {
        self.typing_until.is_some_and(|until| now_ms < until)
    }

    /// Wire record for this peer.
    #[must_use]
    pub fn to_record(&self) -> PeerRecord {
        PeerRecord {
            peer_id: self.id,
            display_name: self.display_name.clone(),
            team: self.team,
            is_host: self.is_host,
        }
    }
}

/// Read-only copy of a peer handed to collaborators.
#[derive(Clone, Debug, PartialEq)]
pub struct PeerView {
    /// Peer id.
    pub peer_id: PeerId,
    /// Display name.
    pub display_name: String,
    /// Selected team.
    pub team: Team,
    /// Hosts the lobby.
    pub is_host: bool,
    /// Currently typing.
    pub is_typing: bool,
    /// Liveness.
    pub connection: ConnectionState,
}

/// Name shown for a peer that sent a blank one.
pub const FALLBACK_DISPLAY_NAME: &str = "Player";

/// Trims a display name and caps it at [`MAX_DISPLAY_NAME_LENGTH`] characters.
#[must_use]
pub fn sanitize_display_name(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return FALLBACK_DISPLAY_NAME.to_owned();
    }
    trimmed.chars().take(MAX_DISPLAY_NAME_LENGTH).collect()
}
