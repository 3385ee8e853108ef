//! # Session Events
//!
//! Notifications for the presentation collaborators (chat window, player
//! list, indicators, scene loader).
//!
//! ```text
//! ┌─────────────┐  emit   ┌──────────┐ publish (tick end) ┌──────────────┐
//! │   Session   │ ──────> │ EventBus │ ─────────────────> │ subscribers  │
//! └─────────────┘         └──────────┘                    └──────────────┘
//! ```
//!
//! Events raised during a tick are held until the tick ends, so a subscriber
//! never observes a half-applied tick. Closing the bus drops every sender and
//! receivers see a disconnected channel once drained.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::lobby::PeerId;
use crate::registry::{EntityId, EntityKind};
use crate::world::WorldObject;

/// Events in flight per subscriber before new ones are dropped.
pub const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// Why a peer left the lobby.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeaveReason {
    /// Sent a leave notice.
    Left,
    /// Missed too many heartbeats.
    TimedOut,
    /// The transport reported the connection gone.
    Disconnected,
}

/// Why the local session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `leave()` was called.
    Left,
    /// The transport destroyed the lobby.
    SessionLost,
}

/// Something collaborators may want to react to.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    // =========================================================================
    // Lobby
    // =========================================================================
    /// A peer entered the lobby.
    PeerJoined(PeerId),

    /// A peer left the lobby.
    PeerLeft {
        /// Peer that left.
        peer: PeerId,
        /// How we found out.
        reason: LeaveReason,
    },

    /// A peer changed its name or team.
    PeerUpdated(PeerId),

    /// The host role moved.
    HostChanged(PeerId),

    /// Chat line from a remote peer.
    ChatReceived {
        /// Sender.
        sender: PeerId,
        /// Sender's display name at receipt.
        sender_name: String,
        /// Trimmed and truncated text.
        text: String,
    },

    /// A typing flag was set, cleared or expired.
    TypingChanged {
        /// Peer whose flag changed.
        peer: PeerId,
        /// New flag.
        typing: bool,
    },

    // =========================================================================
    // Entities
    // =========================================================================
    /// An entity now exists locally.
    EntitySpawned {
        /// Entity.
        id: EntityId,
        /// Kind.
        kind: EntityKind,
        /// Owner.
        owner: PeerId,
    },

    /// An entity was removed locally.
    EntityDespawned(EntityId),

    /// An entity moved to a new owner after its previous one left.
    OwnershipTransferred {
        /// Entity.
        id: EntityId,
        /// New owner.
        to: PeerId,
    },

    // =========================================================================
    // World
    // =========================================================================
    /// The lobby moved to a scene the local loader must load.
    SceneChangeRequired {
        /// Scene to load.
        scene: String,
    },

    /// The local loader failed. The peer has no world until it reports a load.
    SceneLoadFailed {
        /// Scene that failed.
        scene: String,
    },

    /// A level object changed.
    ObjectChanged(WorldObject),

    /// The local session ended. No further events follow.
    Disconnected(DisconnectReason),
}

/// Fan-out of session events to any number of subscribers.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Vec<Sender<SessionEvent>>,
    pending: Vec<SessionEvent>,
    dropped: u64,
    closed: bool,
}

impl EventBus {
    /// Creates a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber. A closed bus hands out an already disconnected receiver.
    #[must_use]
    pub fn subscribe(&mut self) -> Receiver<SessionEvent> {
        let (tx, rx) = bounded(EVENT_CHANNEL_CAPACITY);
        if !self.closed {
            self.subscribers.push(tx);
        }
        rx
    }

    /// Holds an event until the next [`EventBus::publish`].
    pub fn emit(&mut self, event: SessionEvent) {
        if !self.closed {
            self.pending.push(event);
        }
    }

    /// Events held for the next publish.
    #[must_use]
    pub fn pending(&self) -> &[SessionEvent] {
        &self.pending
    }

    /// Events lost to full subscriber channels.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Delivers held events to every live subscriber.
    ///
    /// A full channel loses the event; a dropped receiver is unsubscribed.
    pub fn publish(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let events = std::mem::take(&mut self.pending);
        let mut dropped = 0;
        self.subscribers.retain(|tx| {
            for event in &events {
                match tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => dropped += 1,
                    Err(TrySendError::Disconnected(_)) => return false,
                }
            }
            true
        });
        if dropped > 0 {
            tracing::warn!("Dropped {} session events on full subscriber channels", dropped);
        }
        self.dropped += dropped;
    }

    /// Publishes what is held, then drops every sender.
    pub fn close(&mut self) {
        self.publish();
        self.subscribers.clear();
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_held_until_publish() {
        let mut bus = EventBus::new();
        let rx = bus.subscribe();
        bus.emit(SessionEvent::PeerJoined(PeerId(2)));
        assert!(rx.try_recv().is_err());

        bus.publish();
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::PeerJoined(PeerId(2)));
    }

    #[test]
    fn test_every_subscriber_gets_a_copy() {
        let mut bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.emit(SessionEvent::HostChanged(PeerId(1)));
        bus.publish();
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_dropped_receiver_is_unsubscribed() {
        let mut bus = EventBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        bus.emit(SessionEvent::PeerJoined(PeerId(3)));
        bus.publish();
        assert_eq!(bus.subscribers.len(), 1);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_close_disconnects_receivers() {
        let mut bus = EventBus::new();
        let rx = bus.subscribe();
        bus.emit(SessionEvent::Disconnected(DisconnectReason::Left));
        bus.close();

        assert_eq!(rx.recv().unwrap(), SessionEvent::Disconnected(DisconnectReason::Left));
        assert!(rx.recv().is_err());
        assert!(bus.subscribe().recv().is_err());
    }
}
