//! Joining an existing lobby.
//!
//! ```text
//! joiner                                   host
//!   │ connect(lobby) ───── transport ───>    │
//!   │ JoinRequest{name, team} ──────────>    │ full? ──> JoinRejected
//!   │ <────────── JoinManifest (one frame)   │
//!   │                                        │ PeerState(joiner) ──> everyone
//!   │ EntitySpawn(own player) ──────────>    │
//! ```
//!
//! The manifest carries peers, entities, level objects and the scene epoch in
//! one message, so a late joiner never assembles state from partial deltas.

use crate::config::SessionConfig;
use crate::error::ConnectError;
use crate::events::SessionEvent;
use crate::lobby::{LobbyId, LobbyState, PeerId};
use crate::protocol::{Message, RejectReason};
use crate::transport::{Target, Transport};

use super::{Session, SessionClock, TickLoop};
use crossbeam_channel::Receiver;

/// A join waiting for the host's answer.
pub struct PendingJoin<T> {
    session: Session<T>,
    host: PeerId,
    deadline_ms: u64,
}

/// Result of polling a [`PendingJoin`].
pub enum JoinProgress<T> {
    /// Still waiting.
    Waiting(PendingJoin<T>),
    /// In the lobby.
    Joined(Session<T>),
}

impl<T: Transport> Session<T> {
    /// Starts joining `lobby` without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::LobbyNotFound`] if the transport knows no such lobby.
    pub fn begin_join(
        config: SessionConfig,
        mut transport: T,
        lobby: LobbyId,
        now_ms: u64,
    ) -> Result<PendingJoin<T>, ConnectError> {
        let host = transport.connect(lobby)?;
        let deadline_ms = now_ms.saturating_add(config.join_timeout_ms);
        let mut session = Self::new(config, transport, now_ms);
        session.lobby.set_lobby(lobby);
        session.lobby.transition(LobbyState::Connecting);
        session.join_host = Some(host);

        let (display_name, team) = match session.lobby.local_peer() {
            Some(me) => (me.display_name.clone(), me.team),
            None => (session.config.display_name.clone(), session.config.team),
        };
        session
            .dispatcher
            .enqueue(Target::Peer(host), Message::JoinRequest { display_name, team });
        session.dispatcher.flush(&mut session.transport, now_ms);
        tracing::info!("{} joining {} hosted by {}", session.lobby.local_id(), lobby, host);

        Ok(PendingJoin { session, host, deadline_ms })
    }

    /// Joins `lobby`, blocking for at most the configured join timeout.
    ///
    /// The host must be ticking elsewhere. Times come from `clock`, which the
    /// caller should keep using for later ticks.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::LobbyNotFound`], [`ConnectError::LobbyFull`] or
    /// [`ConnectError::NetworkTimeout`].
    pub fn join(
        config: SessionConfig,
        transport: T,
        lobby: LobbyId,
        clock: &SessionClock,
    ) -> Result<Self, ConnectError> {
        let mut pacing = TickLoop::new(config.tick_rate);
        let mut pending = Self::begin_join(config, transport, lobby, clock.now_ms())?;
        loop {
            pacing.wait_for_next_tick();
            let start = pacing.begin_tick();
            let progress = pending.poll(clock.now_ms())?;
            pacing.end_tick(start);
            match progress {
                JoinProgress::Waiting(next) => pending = next,
                JoinProgress::Joined(session) => return Ok(session),
            }
        }
    }
}

impl<T: Transport> PendingJoin<T> {
    /// Peer being asked for the manifest.
    #[must_use]
    pub const fn host(&self) -> PeerId {
        self.host
    }

    /// Local time after which the join fails.
    #[must_use]
    pub const fn deadline_ms(&self) -> u64 {
        self.deadline_ms
    }

    /// Subscribes to session events before the join completes, so the
    /// manifest's peers and entities are observed too.
    #[must_use]
    pub fn subscribe(&mut self) -> Receiver<SessionEvent> {
        self.session.subscribe()
    }

    /// Ticks the joining session once.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::LobbyFull`] if the host refused,
    /// [`ConnectError::LobbyNotFound`] if the lobby went away and
    /// [`ConnectError::NetworkTimeout`] once the deadline passes.
    pub fn poll(mut self, now_ms: u64) -> Result<JoinProgress<T>, ConnectError> {
        self.session.tick(now_ms);

        if let Some(reason) = self.session.join_rejected.take() {
            tracing::info!("Join refused by {}: {:?}", self.host, reason);
            self.abort();
            return Err(match reason {
                RejectReason::LobbyFull => ConnectError::LobbyFull,
            });
        }
        match self.session.state() {
            LobbyState::InLobby => {
                self.session.join_host = None;
                return Ok(JoinProgress::Joined(self.session));
            }
            LobbyState::Disconnected => return Err(ConnectError::LobbyNotFound),
            LobbyState::Connecting | LobbyState::Leaving => {}
        }
        if now_ms >= self.deadline_ms {
            tracing::warn!("No manifest from {} before the join timeout", self.host);
            self.abort();
            return Err(ConnectError::NetworkTimeout);
        }
        Ok(JoinProgress::Waiting(self))
    }

    /// Gives up on the join.
    pub fn cancel(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        self.session.transport.leave_lobby();
        self.session.dispatcher.discard_outbound();
        self.session.dispatcher.unsubscribe_all();
        self.session.lobby.clear_remote();
        self.session.lobby.transition(LobbyState::Disconnected);
        self.session.events.close();
    }
}
