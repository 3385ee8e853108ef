//! # Transport Dispatch
//!
//! The seam between the session and whatever actually moves bytes.
//!
//! ## Data Flow
//!
//! ```text
//!  I/O side (any thread)             tick thread
//!  ┌──────────────┐  push   ┌──────────────┐ drain  ┌────────────┐ route  ┌──────────────┐
//!  │  Transport   │ ──────> │ InboundQueue │ ─────> │ Dispatcher │ ─────> │ per-kind     │
//!  └──────────────┘         └──────────────┘        └────────────┘        │ subscribers  │
//!         ^                                               │               └──────────────┘
//!         └───────────── frames (once per tick) ──────────┘
//! ```
//!
//! The I/O side only ever pushes into the queue; registry state is touched by
//! the tick alone.

mod dispatch;
mod loopback;
mod queue;

pub use dispatch::{DispatchStats, Dispatcher, Envelope};
pub use loopback::{LoopbackNetwork, LoopbackTransport, NetworkConditions};
pub use queue::{Inbound, InboundQueue, QueueStats};

use crate::error::{ConnectError, TransportError};
use crate::lobby::{LobbyId, PeerId};

/// Recipient of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Target {
    /// Every other lobby member.
    Broadcast,
    /// One member.
    Peer(PeerId),
}

/// Delivery class of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Reliability {
    /// Delivered once, in order per sender.
    Reliable,
    /// May be lost, duplicated or reordered.
    Unreliable,
}

/// A lobby-capable message transport.
///
/// Implementations deliver inbound frames and membership notifications into
/// the [`InboundQueue`] returned by [`Transport::inbound`].
pub trait Transport {
    /// Id of the local peer.
    fn local_peer(&self) -> PeerId;

    /// Queue receiving this endpoint's inbound traffic.
    fn inbound(&self) -> InboundQueue;

    /// Creates a lobby hosted by the local peer.
    fn create_lobby(&mut self) -> Result<LobbyId, TransportError>;

    /// Enters an existing lobby and returns its current owner.
    fn connect(&mut self, lobby: LobbyId) -> Result<PeerId, ConnectError>;

    /// Leaves the current lobby. Safe to call when not in one.
    fn leave_lobby(&mut self);

    /// Sends one frame.
    fn send(&mut self, target: Target, frame: &[u8], reliability: Reliability) -> Result<(), TransportError>;
}
