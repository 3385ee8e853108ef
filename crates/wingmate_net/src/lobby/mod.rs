//! # Lobby Session
//!
//! Peer membership and metadata for one lobby.
//!
//! ## State Machine
//!
//! ```text
//! Disconnected ──join──> Connecting ──manifest──> InLobby ──leave──> Leaving
//!      ^                     │                      │                   │
//!      └──────timeout────────┘                      │                   │
//!      └──────────────────session lost──────────────┘                   │
//!      └────────────────────────────flushed─────────────────────────────┘
//! ```
//!
//! The local peer is always a member of its own peer set. Host election is
//! deterministic: every peer independently picks the lowest remaining id.

mod chat;
mod peer;

pub use chat::{prepare_chat, typing_banner, LOCAL_TYPING_NAME};
pub use peer::{
    sanitize_display_name, ConnectionState, LobbyId, Peer, PeerId, PeerView,
    FALLBACK_DISPLAY_NAME,
};

use std::collections::BTreeMap;

use wingmate_shared::Team;

use crate::protocol::PeerRecord;

/// Lifecycle of the local membership.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LobbyState {
    /// Not in any lobby.
    Disconnected,
    /// Waiting for the host's manifest.
    Connecting,
    /// Member of a lobby.
    InLobby,
    /// Teardown in progress.
    Leaving,
}

impl LobbyState {
    /// Returns true if `self -> next` is a legal transition.
    #[must_use]
    pub const fn can_transition(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected, Self::Connecting)
                | (Self::Connecting, Self::InLobby | Self::Disconnected)
                | (Self::InLobby, Self::Leaving | Self::Disconnected)
                | (Self::Leaving, Self::Disconnected)
        )
    }
}

/// Outcome of applying a peer record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerUpdate {
    /// The peer was not known before.
    Joined,
    /// Known peer, metadata changed.
    Updated,
    /// Nothing changed.
    Unchanged,
}

/// Membership and per-peer metadata.
#[derive(Debug)]
pub struct LobbySession {
    lobby: Option<LobbyId>,
    local: PeerId,
    state: LobbyState,
    peers: BTreeMap<PeerId, Peer>,
    typing_timeout_ms: u64,
}

impl LobbySession {
    /// Creates a disconnected session holding only the local peer.
    #[must_use]
    pub fn new(local: PeerId, display_name: &str, team: Team, typing_timeout_ms: u64) -> Self {
        let mut peers = BTreeMap::new();
        peers.insert(
            local,
            Peer {
                id: local,
                display_name: sanitize_display_name(display_name),
                team,
                is_host: false,
                typing_until: None,
                connection: ConnectionState::Local,
            },
        );
        Self { lobby: None, local, state: LobbyState::Disconnected, peers, typing_timeout_ms }
    }

    /// Current lifecycle state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> LobbyState {
        self.state
    }

    /// Moves to `next`. Illegal transitions are refused and logged.
    pub fn transition(&mut self, next: LobbyState) -> bool {
        if self.state == next {
            return true;
        }
        if !self.state.can_transition(next) {
            tracing::warn!("Refusing lobby transition {:?} -> {:?}", self.state, next);
            return false;
        }
        tracing::debug!("Lobby state {:?} -> {:?}", self.state, next);
        self.state = next;
        true
    }

    /// Lobby currently joined or being joined.
    #[inline]
    #[must_use]
    pub const fn lobby_id(&self) -> Option<LobbyId> {
        self.lobby
    }

    /// Records the lobby being joined.
    pub fn set_lobby(&mut self, lobby: LobbyId) {
        self.lobby = Some(lobby);
    }

    /// Local peer id.
    #[inline]
    #[must_use]
    pub const fn local_id(&self) -> PeerId {
        self.local
    }

    /// The local peer.
    #[must_use]
    pub fn local_peer(&self) -> Option<&Peer> {
        self.peers.get(&self.local)
    }

    /// Looks up a member.
    #[must_use]
    pub fn peer(&self, id: PeerId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    /// Returns true if `id` is a member.
    #[must_use]
    pub fn contains(&self, id: PeerId) -> bool {
        self.peers.contains_key(&id)
    }

    /// Number of members, the local peer included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Always false; the local peer is a member.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Iterates members in peer-id order.
    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    /// Iterates remote member ids in peer-id order.
    pub fn remote_ids(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.peers.keys().copied().filter(move |id| *id != self.local)
    }

    /// Current host.
    #[must_use]
    pub fn host_id(&self) -> Option<PeerId> {
        self.peers.values().find(|p| p.is_host).map(|p| p.id)
    }

    /// Returns true if the local peer hosts the lobby.
    #[must_use]
    pub fn is_local_host(&self) -> bool {
        self.local_peer().is_some_and(|p| p.is_host)
    }

    /// Makes the local peer the only host.
    pub fn claim_host(&mut self) {
        let local = self.local;
        for peer in self.peers.values_mut() {
            peer.is_host = peer.id == local;
        }
    }

    /// Inserts or updates a remote member from a wire record.
    ///
    /// A host flag is honored only when no other peer holds it, so a stale
    /// record cannot produce two hosts.
    pub fn upsert(&mut self, record: &PeerRecord) -> PeerUpdate {
        if record.peer_id == self.local {
            return PeerUpdate::Unchanged;
        }
        let host_elsewhere = self.host_id().is_some_and(|h| h != record.peer_id);
        let mut incoming = Peer::from_record(record);
        incoming.is_host &= !host_elsewhere;

        match self.peers.get_mut(&record.peer_id) {
            None => {
                self.peers.insert(record.peer_id, incoming);
                PeerUpdate::Joined
            }
            Some(existing) => {
                let is_host = existing.is_host || incoming.is_host;
                let changed = existing.display_name != incoming.display_name
                    || existing.team != incoming.team
                    || existing.is_host != is_host;
                existing.display_name = incoming.display_name;
                existing.team = incoming.team;
                existing.is_host = is_host;
                if changed {
                    PeerUpdate::Updated
                } else {
                    PeerUpdate::Unchanged
                }
            }
        }
    }

    /// Removes a remote member. The local peer cannot be removed.
    pub fn remove(&mut self, id: PeerId) -> Option<Peer> {
        if id == self.local {
            return None;
        }
        self.peers.remove(&id)
    }

    /// Drops every remote member and forgets the lobby.
    pub fn clear_remote(&mut self) {
        let local = self.local;
        self.peers.retain(|id, _| *id == local);
        if let Some(me) = self.peers.get_mut(&local) {
            me.is_host = false;
            me.typing_until = None;
        }
        self.lobby = None;
    }

    /// Elects the lowest remaining peer id if nobody holds the host flag.
    ///
    /// Returns the new host when the election changed anything.
    pub fn elect_host(&mut self) -> Option<PeerId> {
        if self.host_id().is_some() {
            return None;
        }
        let (_, lowest) = self.peers.iter_mut().next()?;
        lowest.is_host = true;
        Some(lowest.id)
    }

    /// Sets or clears a member's typing flag. Returns true if it changed.
    pub fn set_typing(&mut self, id: PeerId, typing: bool, now_ms: u64) -> bool {
        let timeout = self.typing_timeout_ms;
        let Some(peer) = self.peers.get_mut(&id) else {
            return false;
        };
        let was = peer.is_typing(now_ms);
        peer.typing_until = typing.then(|| now_ms.saturating_add(timeout));
        was != typing
    }

    /// Clears expired typing flags and returns the affected peers.
    pub fn expire_typing(&mut self, now_ms: u64) -> Vec<PeerId> {
        let mut expired = Vec::new();
        for peer in self.peers.values_mut() {
            if matches!(peer.typing_until, Some(until) if now_ms >= until) {
                peer.typing_until = None;
                expired.push(peer.id);
            }
        }
        expired
    }

    /// Updates a member's liveness. Returns true if it changed.
    pub fn set_connection(&mut self, id: PeerId, connection: ConnectionState) -> bool {
        match self.peers.get_mut(&id) {
            Some(peer) if peer.connection != connection && id != self.local => {
                peer.connection = connection;
                true
            }
            _ => false,
        }
    }

    /// Changes the local team. Returns true if it changed.
    pub fn set_local_team(&mut self, team: Team) -> bool {
        match self.peers.get_mut(&self.local) {
            Some(me) if me.team != team => {
                me.team = team;
                true
            }
            _ => false,
        }
    }

    /// Names of typing members. The local peer comes first as "You", the
    /// rest follow in peer-id order.
    #[must_use]
    pub fn typing_player_names(&self, now_ms: u64) -> Vec<String> {
        let mut names = Vec::new();
        if self.local_peer().is_some_and(|me| me.is_typing(now_ms)) {
            names.push(LOCAL_TYPING_NAME.to_owned());
        }
        names.extend(
            self.peers
                .values()
                .filter(|p| p.id != self.local && p.is_typing(now_ms))
                .map(|p| p.display_name.clone()),
        );
        names
    }

    /// Read-only copy of the peer set in peer-id order.
    #[must_use]
    pub fn current_peers(&self, now_ms: u64) -> Vec<PeerView> {
        self.peers
            .values()
            .map(|p| PeerView {
                peer_id: p.id,
                display_name: p.display_name.clone(),
                team: p.team,
                is_host: p.is_host,
                is_typing: p.is_typing(now_ms),
                connection: p.connection,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u64, name: &str, is_host: bool) -> PeerRecord {
        PeerRecord { peer_id: PeerId(id), display_name: name.into(), team: Team::Blue, is_host }
    }

    fn lobby() -> LobbySession {
        LobbySession::new(PeerId(5), "Me", Team::Yellow, 3_000)
    }

    #[test]
    fn test_state_machine() {
        let mut lobby = lobby();
        assert!(!lobby.transition(LobbyState::InLobby));
        assert!(lobby.transition(LobbyState::Connecting));
        assert!(lobby.transition(LobbyState::InLobby));
        assert!(!lobby.transition(LobbyState::Connecting));
        assert!(lobby.transition(LobbyState::Leaving));
        assert!(lobby.transition(LobbyState::Disconnected));
        assert_eq!(lobby.state(), LobbyState::Disconnected);
    }

    #[test]
    fn test_upsert_reports_changes() {
        let mut lobby = lobby();
        assert_eq!(lobby.upsert(&record(9, "Ana", false)), PeerUpdate::Joined);
        assert_eq!(lobby.upsert(&record(9, "Ana", false)), PeerUpdate::Unchanged);
        assert_eq!(lobby.upsert(&record(9, "Ana B", false)), PeerUpdate::Updated);
        assert_eq!(lobby.upsert(&record(5, "Impostor", true)), PeerUpdate::Unchanged);
        assert_eq!(lobby.local_peer().unwrap().display_name, "Me");
    }

    #[test]
    fn test_second_host_flag_is_ignored() {
        let mut lobby = lobby();
        lobby.upsert(&record(1, "Host", true));
        lobby.upsert(&record(9, "Liar", true));
        assert_eq!(lobby.host_id(), Some(PeerId(1)));
        assert!(!lobby.peer(PeerId(9)).unwrap().is_host);
    }

    #[test]
    fn test_election_picks_lowest_id() {
        let mut lobby = lobby();
        lobby.upsert(&record(1, "Host", true));
        lobby.upsert(&record(7, "Bo", false));
        lobby.upsert(&record(3, "Cy", false));
        assert_eq!(lobby.elect_host(), None);

        lobby.remove(PeerId(1));
        assert_eq!(lobby.host_id(), None);
        assert_eq!(lobby.elect_host(), Some(PeerId(3)));
        assert_eq!(lobby.host_id(), Some(PeerId(3)));
        assert!(!lobby.is_local_host());

        lobby.remove(PeerId(3));
        assert_eq!(lobby.elect_host(), Some(PeerId(5)));
        assert!(lobby.is_local_host());
    }

    #[test]
    fn test_typing_expires_after_timeout() {
        let mut lobby = lobby();
        lobby.upsert(&record(9, "Ana", false));
        assert!(lobby.set_typing(PeerId(9), true, 1_000));
        assert_eq!(lobby.typing_player_names(3_999), vec!["Ana".to_owned()]);
        assert!(lobby.expire_typing(3_999).is_empty());
        assert_eq!(lobby.expire_typing(4_000), vec![PeerId(9)]);
        assert!(lobby.typing_player_names(4_000).is_empty());
    }

    #[test]
    fn test_typing_names_put_local_first() {
        let mut lobby = lobby();
        lobby.upsert(&record(9, "Zed", false));
        lobby.upsert(&record(2, "Ana", false));
        lobby.set_typing(PeerId(9), true, 0);
        lobby.set_typing(PeerId(2), true, 0);
        lobby.set_typing(PeerId(5), true, 0);
        assert_eq!(lobby.typing_player_names(10), vec!["You", "Ana", "Zed"]);
    }

    #[test]
    fn test_current_peers_ordered_and_local_kept() {
        let mut lobby = lobby();
        lobby.upsert(&record(9, "Ana", false));
        lobby.upsert(&record(2, "Bo", true));
        let ids: Vec<_> = lobby.current_peers(0).iter().map(|p| p.peer_id.0).collect();
        assert_eq!(ids, vec![2, 5, 9]);

        assert!(lobby.remove(PeerId(5)).is_none());
        lobby.clear_remote();
        assert_eq!(lobby.len(), 1);
        assert_eq!(lobby.lobby_id(), None);
    }
}
