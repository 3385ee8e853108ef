//! # Wingmate Networking - Lobby & Replication
//!
//! Peer-to-peer lobby sessions and owner-authoritative entity replication.
//!
//! ## Architecture
//!
//! - **Lobby**: membership, display names, teams, typing and chat, host election
//! - **Transport**: framed per-tick dispatch over any lobby-capable [`Transport`]
//! - **Registry**: networked entities, ownership and snapshot interpolation
//! - **World**: scene epochs and level object reconciliation
//! - **Session**: the tick that ties them together and emits [`SessionEvent`]s
//!
//! ## Authority Model
//!
//! ```text
//! OWNER                            EVERY OTHER PEER
//!   |                                 |
//!   |--- EntitySnapshot{seq} -------->| <- newer seq from the owner only
//!   |                                 |    interpolated 100 ms behind
//!   |--- EntityDespawn -------------->|
//!   |                                 |
//! ```
//!
//! Each entity has exactly one owner. Only the owner moves it; everyone else
//! renders a delayed, interpolated replica. When an owner leaves, the
//! entity's [`OwnerLossPolicy`] decides whether it is despawned or handed to
//! the host.
//!
//! ## Example
//!
//! ```rust,ignore
//! use wingmate_net::{LoopbackNetwork, Session, SessionClock, SessionConfig};
//!
//! let network = LoopbackNetwork::perfect();
//! let clock = SessionClock::start();
//! let mut host = Session::host(SessionConfig::default(), network.endpoint(1024), clock.now_ms())?;
//!
//! loop {
//!     host.tick(clock.now_ms());
//! }
//! ```

#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod error;
pub mod events;
pub mod lobby;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod simulation;
pub mod transport;
pub mod world;

pub use config::SessionConfig;
pub use error::{ConfigError, ConnectError, DecodeError, SessionError, SessionResult, TransportError};
pub use events::{DisconnectReason, LeaveReason, SessionEvent};
pub use lobby::{LobbyId, LobbyState, PeerId, PeerView};
pub use protocol::{Message, MessageKind};
pub use registry::{EntityId, EntityKind, EntityView, InitialState, OwnerLossPolicy};
pub use session::{JoinProgress, PendingJoin, Session, SessionClock, SessionStats};
pub use simulation::{SimulationConfig, SoakSimulation};
pub use transport::{LoopbackNetwork, LoopbackTransport, NetworkConditions, Target, Transport};
pub use world::{ObjectKind, SceneStatus, WorldObject};
