//! # Session
//!
//! The context object for one lobby membership. It owns one instance of each
//! component and is the only thing that mutates them.
//!
//! ## Tick Order
//!
//! ```text
//! drain InboundQueue ─> Dispatcher::ingest ─> per-kind receivers
//!   membership ─> scene ─> spawn ─> snapshot ─> despawn ─> objects ─> chat ─> typing ─> leave
//! transport notices (disconnect, lobby destroyed)
//! heartbeat timeouts ─> owner loss policy + host election, or teardown if every peer went quiet
//! typing expiry
//! registry tick ─> EntitySnapshot broadcast, heartbeat if idle
//! flush outbound ─> publish events
//! ```
//!
//! Time is always passed in by the caller. Operations between ticks use the
//! time of the last tick.

mod join;
mod tick;

pub use join::{JoinProgress, PendingJoin};
pub use tick::{SessionClock, TickLoop, TickStats};

use crossbeam_channel::Receiver;
use wingmate_shared::{Team, Transform, Vec3};

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::events::{DisconnectReason, EventBus, LeaveReason, SessionEvent};
use crate::lobby::{
    prepare_chat, typing_banner, ConnectionState, LobbyId, LobbySession, LobbyState, PeerId,
    PeerUpdate, PeerView, FALLBACK_DISPLAY_NAME,
};
use crate::protocol::{Manifest, Message, MessageKind, PeerRecord, RejectReason, SnapshotRecord, SpawnRecord};
use crate::registry::{
    EntityId, EntityKind, EntityRegistry, EntityView, InitialState, OwnerLossPolicy, RegistryStats,
    Released, SnapshotOutcome, SpawnOutcome,
};
use crate::transport::{
    DispatchStats, Dispatcher, Envelope, Inbound, InboundQueue, QueueStats, Target, Transport,
};
use crate::world::{ObjectKind, SceneStatus, WorldObject, WorldSync};

/// Diagnostics gathered from every component.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Outbound and inbound dispatch counters.
    pub dispatch: DispatchStats,
    /// Replication counters.
    pub registry: RegistryStats,
    /// Inbound queue counters.
    pub inbound: QueueStats,
    /// Events lost to full subscriber channels.
    pub events_dropped: u64,
}

/// One receiver per message kind the session handles.
struct Routes {
    join_request: Receiver<Envelope>,
    manifest: Receiver<Envelope>,
    rejected: Receiver<Envelope>,
    peer_state: Receiver<Envelope>,
    scene: Receiver<Envelope>,
    spawn: Receiver<Envelope>,
    snapshot: Receiver<Envelope>,
    despawn: Receiver<Envelope>,
    object: Receiver<Envelope>,
    chat: Receiver<Envelope>,
    typing: Receiver<Envelope>,
    leave: Receiver<Envelope>,
    heartbeat: Receiver<Envelope>,
}

impl Routes {
    fn subscribe(dispatcher: &mut Dispatcher) -> Self {
        Self {
            join_request: dispatcher.subscribe(MessageKind::JoinRequest),
            manifest: dispatcher.subscribe(MessageKind::JoinManifest),
            rejected: dispatcher.subscribe(MessageKind::JoinRejected),
            peer_state: dispatcher.subscribe(MessageKind::PeerState),
            scene: dispatcher.subscribe(MessageKind::SceneChange),
            spawn: dispatcher.subscribe(MessageKind::EntitySpawn),
            snapshot: dispatcher.subscribe(MessageKind::EntitySnapshot),
            despawn: dispatcher.subscribe(MessageKind::EntityDespawn),
            object: dispatcher.subscribe(MessageKind::WorldObjectState),
            chat: dispatcher.subscribe(MessageKind::ChatMessage),
            typing: dispatcher.subscribe(MessageKind::TypingState),
            leave: dispatcher.subscribe(MessageKind::LeaveNotice),
            heartbeat: dispatcher.subscribe(MessageKind::Heartbeat),
        }
    }
}

fn take(rx: &Receiver<Envelope>) -> Vec<Envelope> {
    rx.try_iter().collect()
}

/// A lobby membership: peers, entities and world state of the local peer.
pub struct Session<T> {
    config: SessionConfig,
    transport: T,
    inbound: InboundQueue,
    dispatcher: Dispatcher,
    routes: Routes,
    lobby: LobbySession,
    registry: EntityRegistry,
    world: WorldSync,
    events: EventBus,
    local_player: Option<EntityId>,
    join_host: Option<PeerId>,
    join_rejected: Option<RejectReason>,
    now_ms: u64,
}

impl<T: Transport> Session<T> {
    fn new(config: SessionConfig, transport: T, now_ms: u64) -> Self {
        let local = transport.local_peer();
        let inbound = transport.inbound();
        let mut dispatcher = Dispatcher::new(config.heartbeat_interval_ms, config.max_missed_heartbeats);
        let routes = Routes::subscribe(&mut dispatcher);
        let lobby = LobbySession::new(local, &config.display_name, config.team, config.typing_timeout_ms);
        let registry = EntityRegistry::new(local, config.replica_settings());
        let world = WorldSync::new(config.initial_scene.clone());
        Self {
            config,
            transport,
            inbound,
            dispatcher,
            routes,
            lobby,
            registry,
            world,
            events: EventBus::new(),
            local_player: None,
            join_host: None,
            join_rejected: None,
            now_ms,
        }
    }

    /// Creates a lobby hosted by the local peer.
    ///
    /// The host starts in `config.initial_scene`, which it is already in, and
    /// spawns its player right away.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Transport`] if the transport cannot create a lobby.
    pub fn host(config: SessionConfig, mut transport: T, now_ms: u64) -> SessionResult<Self> {
        let lobby = transport.create_lobby()?;
        let mut session = Self::new(config, transport, now_ms);
        session.lobby.set_lobby(lobby);
        session.lobby.transition(LobbyState::Connecting);
        session.lobby.transition(LobbyState::InLobby);
        session.lobby.claim_host();
        session.world.report_loaded();
        tracing::info!(
            "Hosting {} as {} on scene {}",
            lobby,
            session.lobby.local_id(),
            session.world.scene()
        );
        session.spawn_local_player();
        Ok(session)
    }

    // =========================================================================
    // TICK
    // =========================================================================

    /// Runs one tick at local time `now_ms`.
    pub fn tick(&mut self, now_ms: u64) {
        self.now_ms = self.now_ms.max(now_ms);
        let now = self.now_ms;
        if self.lobby.state() == LobbyState::Disconnected {
            return;
        }

        let mut notices = Vec::new();
        for item in self.inbound.drain() {
            match item {
                Inbound::Frame { from, bytes, .. } => {
                    self.dispatcher.ingest(from, &bytes, now);
                }
                notice => notices.push(notice),
            }
        }
        self.process_routes(now);
        if self.lobby.state() == LobbyState::Disconnected {
            return;
        }

        for notice in notices {
            match notice {
                Inbound::PeerDisconnected(peer) => self.peer_gone(peer, LeaveReason::Disconnected),
                Inbound::SessionDestroyed => {
                    tracing::warn!("Transport destroyed the lobby");
                    self.teardown(DisconnectReason::SessionLost);
                }
                Inbound::Frame { .. } => {}
            }
            if self.lobby.state() == LobbyState::Disconnected {
                return;
            }
        }

        let expired = self.dispatcher.poll_timeouts(now);
        if self.lost_connectivity(&expired, now) {
            tracing::warn!("Every peer went quiet; assuming the local connection is gone");
            self.teardown(DisconnectReason::SessionLost);
            return;
        }
        for peer in expired {
            tracing::warn!("{} timed out", peer);
            self.peer_gone(peer, LeaveReason::TimedOut);
            if self.lobby.state() == LobbyState::Disconnected {
                return;
            }
        }
        self.refresh_connections(now);

        for peer in self.lobby.expire_typing(now) {
            self.events.emit(SessionEvent::TypingChanged { peer, typing: false });
        }

        if self.lobby.state() == LobbyState::InLobby {
            for snapshot in self.registry.tick(now) {
                self.dispatcher.broadcast(Message::EntitySnapshot(snapshot));
            }
            if self.dispatcher.pending() == 0 && self.dispatcher.heartbeat_due(now) {
                self.dispatcher.broadcast(Message::Heartbeat);
            }
        }

        self.dispatcher.flush(&mut self.transport, now);
        self.events.publish();
    }

    fn process_routes(&mut self, now: u64) {
        for Envelope { from, message } in take(&self.routes.manifest) {
            if let Message::JoinManifest(manifest) = message {
                self.on_manifest(from, manifest, now);
            }
        }
        for Envelope { from, message } in take(&self.routes.rejected) {
            if let Message::JoinRejected { reason } = message {
                self.on_rejected(from, reason);
            }
        }
        for Envelope { from, message } in take(&self.routes.join_request) {
            if let Message::JoinRequest { display_name, team } = message {
                self.on_join_request(from, display_name, team, now);
            }
        }
        for Envelope { from, message } in take(&self.routes.peer_state) {
            if let Message::PeerState(record) = message {
                self.on_peer_state(from, &record, now);
            }
        }
        for Envelope { from, message } in take(&self.routes.scene) {
            if let Message::SceneChange { scene, epoch } = message {
                self.on_scene_change(from, &scene, epoch);
            }
        }
        for Envelope { from, message } in take(&self.routes.spawn) {
            if let Message::EntitySpawn(spawn) = message {
                self.on_spawn(from, &spawn, now);
            }
        }
        for Envelope { from, message } in take(&self.routes.snapshot) {
            if let Message::EntitySnapshot(snapshot) = message {
                self.on_snapshot(from, &snapshot, now);
            }
        }
        for Envelope { from, message } in take(&self.routes.despawn) {
            if let Message::EntityDespawn { id } = message {
                if self.registry.apply_despawn(from, id, self.lobby.host_id()).is_some() {
                    self.events.emit(SessionEvent::EntityDespawned(id));
                }
            }
        }
        for Envelope { message, .. } in take(&self.routes.object) {
            if let Message::WorldObjectState(object) = message {
                if self.world.apply_object(object) {
                    self.events.emit(SessionEvent::ObjectChanged(object));
                }
            }
        }
        for Envelope { from, message } in take(&self.routes.chat) {
            if let Message::ChatMessage { text } = message {
                self.on_chat(from, &text);
            }
        }
        for Envelope { from, message } in take(&self.routes.typing) {
            if let Message::TypingState { typing } = message {
                if self.lobby.contains(from) && self.lobby.set_typing(from, typing, now) {
                    self.events.emit(SessionEvent::TypingChanged { peer: from, typing });
                }
            }
        }
        for Envelope { from, .. } in take(&self.routes.leave) {
            self.peer_gone(from, LeaveReason::Left);
        }
        // Heartbeats only refresh liveness, which ingest already did.
        let _ = take(&self.routes.heartbeat);
    }

    // =========================================================================
    // INBOUND HANDLERS
    // =========================================================================

    fn on_join_request(&mut self, from: PeerId, display_name: String, team: Team, now: u64) {
        if self.lobby.state() != LobbyState::InLobby || !self.lobby.is_local_host() {
            tracing::debug!("Ignoring join request from {}: not the host", from);
            return;
        }
        if !self.lobby.contains(from) && self.lobby.len() >= self.config.max_peers {
            tracing::info!("Rejecting join from {}: lobby full", from);
            self.dispatcher
                .enqueue(Target::Peer(from), Message::JoinRejected { reason: RejectReason::LobbyFull });
            return;
        }

        let manifest = self.build_manifest(from, now);
        self.dispatcher.enqueue(Target::Peer(from), Message::JoinManifest(manifest));

        let record = PeerRecord { peer_id: from, display_name, team, is_host: false };
        if self.lobby.upsert(&record) == PeerUpdate::Joined {
            self.dispatcher.track_peer(from, now);
            self.events.emit(SessionEvent::PeerJoined(from));
        }
        if let Some(peer) = self.lobby.peer(from) {
            tracing::info!("{} joined as {:?} ({:?})", from, peer.display_name, peer.team);
            self.dispatcher.broadcast(Message::PeerState(peer.to_record()));
        }
    }

    fn build_manifest(&self, joiner: PeerId, now: u64) -> Manifest {
        Manifest {
            lobby: self.lobby.lobby_id().unwrap_or_default(),
            scene: self.world.scene().to_owned(),
            epoch: self.world.epoch(),
            peers: self.lobby.peers().filter(|p| p.id != joiner).map(|p| p.to_record()).collect(),
            entities: self.registry.manifest_entries(now).into_iter().filter(|e| e.owner != joiner).collect(),
            objects: self.world.objects(),
        }
    }

    fn on_manifest(&mut self, from: PeerId, manifest: Manifest, now: u64) {
        if self.lobby.state() != LobbyState::Connecting || self.join_host != Some(from) {
            tracing::debug!("Ignoring manifest from {}", from);
            return;
        }
        self.lobby.set_lobby(manifest.lobby);
        self.lobby.transition(LobbyState::InLobby);

        for record in &manifest.peers {
            if self.lobby.upsert(record) == PeerUpdate::Joined {
                self.dispatcher.track_peer(record.peer_id, now);
                self.events.emit(SessionEvent::PeerJoined(record.peer_id));
            }
        }
        self.world.install(&manifest.scene, manifest.epoch, &manifest.objects);
        for spawn in &manifest.entities {
            self.accept_spawn(spawn, now);
        }
        tracing::info!(
            "Joined {} with {} peers and {} entities on scene {} (epoch {})",
            manifest.lobby,
            manifest.peers.len(),
            manifest.entities.len(),
            manifest.scene,
            manifest.epoch
        );
        self.events.emit(SessionEvent::SceneChangeRequired { scene: manifest.scene });
        self.spawn_local_player();
    }

    fn on_rejected(&mut self, from: PeerId, reason: RejectReason) {
        if self.lobby.state() == LobbyState::Connecting && self.join_host == Some(from) {
            self.join_rejected = Some(reason);
        }
    }

    fn on_peer_state(&mut self, from: PeerId, record: &PeerRecord, now: u64) {
        if record.peer_id != from && self.lobby.host_id() != Some(from) {
            tracing::debug!("Ignoring state of {} sent by {}", record.peer_id, from);
            return;
        }
        match self.lobby.upsert(record) {
            PeerUpdate::Joined => {
                self.dispatcher.track_peer(record.peer_id, now);
                self.events.emit(SessionEvent::PeerJoined(record.peer_id));
            }
            PeerUpdate::Updated => self.events.emit(SessionEvent::PeerUpdated(record.peer_id)),
            PeerUpdate::Unchanged => {}
        }
    }

    fn on_scene_change(&mut self, from: PeerId, scene: &str, epoch: u32) {
        if self.lobby.host_id() != Some(from) {
            tracing::debug!("Ignoring scene change from non-host {}", from);
            return;
        }
        if self.world.begin_scene(scene, epoch) {
            self.enter_scene();
        } else {
            tracing::debug!("Ignoring stale scene change to {} (epoch {})", scene, epoch);
        }
    }

    fn on_spawn(&mut self, from: PeerId, spawn: &SpawnRecord, now: u64) {
        if spawn.owner != from {
            tracing::debug!("Dropping spawn {} sent by non-owner {}", spawn.id, from);
            return;
        }
        self.accept_spawn(spawn, now);
    }

    fn accept_spawn(&mut self, spawn: &SpawnRecord, now: u64) {
        match self.registry.apply_spawn(spawn, self.world.epoch(), now) {
            SpawnOutcome::Created => self.events.emit(SessionEvent::EntitySpawned {
                id: spawn.id,
                kind: spawn.kind,
                owner: spawn.owner,
            }),
            SpawnOutcome::Duplicate => tracing::debug!("Ignoring duplicate spawn {}", spawn.id),
            SpawnOutcome::Rejected => {}
        }
    }

    fn on_snapshot(&mut self, from: PeerId, snapshot: &SnapshotRecord, now: u64) {
        match self.registry.apply_snapshot(from, snapshot, now) {
            SnapshotOutcome::ForeignOwner => {
                tracing::debug!("Dropping snapshot of {} from non-owner {}", snapshot.id, from);
            }
            SnapshotOutcome::Applied | SnapshotOutcome::Stale | SnapshotOutcome::UnknownEntity => {}
        }
    }

    fn on_chat(&mut self, from: PeerId, text: &str) {
        let Some(text) = prepare_chat(text, self.config.max_chat_length) else {
            return;
        };
        let sender_name = self
            .lobby
            .peer(from)
            .map_or_else(|| FALLBACK_DISPLAY_NAME.to_owned(), |p| p.display_name.clone());
        self.events.emit(SessionEvent::ChatReceived { sender: from, sender_name, text });
    }

    /// Removes a peer and applies the owner loss policy to its entities.
    fn peer_gone(&mut self, peer: PeerId, reason: LeaveReason) {
        if peer == self.lobby.local_id() {
            return;
        }
        if self.lobby.state() == LobbyState::Connecting && self.join_host == Some(peer) {
            tracing::warn!("{} went away before answering the join", peer);
            self.teardown(DisconnectReason::SessionLost);
            return;
        }

        let was_host = self.lobby.host_id() == Some(peer);
        let removed = self.lobby.remove(peer);
        self.dispatcher.forget_peer(peer);
        if was_host {
            if let Some(host) = self.lobby.elect_host() {
                tracing::info!("{} left; {} now hosts", peer, host);
                self.events.emit(SessionEvent::HostChanged(host));
            }
        }

        for released in self.registry.release_peer(peer, self.lobby.host_id()) {
            self.events.emit(match released {
                Released::Despawned(id) => SessionEvent::EntityDespawned(id),
                Released::Transferred { id, to } => SessionEvent::OwnershipTransferred { id, to },
            });
        }
        if removed.is_some() {
            tracing::info!("{} left the lobby ({:?})", peer, reason);
            self.events.emit(SessionEvent::PeerLeft { peer, reason });
        }
    }

    /// Returns true when peers just timed out and every other remote peer is
    /// silent too. With two or more remotes that points at the local link
    /// rather than at all of them failing together. A lone remote peer timing
    /// out is indistinguishable from a local loss and is treated as a leave.
    fn lost_connectivity(&self, expired: &[PeerId], now: u64) -> bool {
        if expired.is_empty() || self.lobby.state() != LobbyState::InLobby {
            return false;
        }
        let silent_after = self.config.heartbeat_interval_ms.saturating_mul(2);
        let mut remote = 0_usize;
        for id in self.lobby.remote_ids() {
            remote += 1;
            let alive = !expired.contains(&id)
                && self.dispatcher.silence_ms(id, now).is_some_and(|silence| silence < silent_after);
            if alive {
                return false;
            }
        }
        remote >= 2
    }

    fn refresh_connections(&mut self, now: u64) {
        let silent_after = self.config.heartbeat_interval_ms.saturating_mul(2);
        let remote: Vec<PeerId> = self.lobby.remote_ids().collect();
        for id in remote {
            let state = match self.dispatcher.silence_ms(id, now) {
                Some(silence) if silence >= silent_after => ConnectionState::Silent,
                Some(_) => ConnectionState::Connected,
                None => continue,
            };
            if self.lobby.set_connection(id, state) && state == ConnectionState::Silent {
                tracing::debug!("{} has gone silent", id);
            }
        }
    }

    fn enter_scene(&mut self) {
        for id in self.registry.retain_persistent() {
            self.events.emit(SessionEvent::EntityDespawned(id));
        }
        tracing::info!("Scene change to {} (epoch {})", self.world.scene(), self.world.epoch());
        self.events.emit(SessionEvent::SceneChangeRequired { scene: self.world.scene().to_owned() });
    }

    fn spawn_local_player(&mut self) {
        let state = InitialState::at(Transform::IDENTITY).persistent();
        if let Err(err) = self.spawn_owned(EntityKind::Player, state) {
            tracing::error!("Could not spawn the local player: {}", err);
        }
    }

    fn spawn_owned(&mut self, kind: EntityKind, state: InitialState) -> SessionResult<EntityId> {
        let spawn = self.registry.spawn(kind, state, self.world.epoch(), self.now_ms)?;
        let id = spawn.id;
        if kind == EntityKind::Player {
            self.local_player = Some(id);
        }
        self.events.emit(SessionEvent::EntitySpawned { id, kind, owner: spawn.owner });
        self.dispatcher.broadcast(Message::EntitySpawn(spawn));
        Ok(id)
    }

    /// Drops all lobby state locally and closes the event bus.
    fn teardown(&mut self, reason: DisconnectReason) {
        self.dispatcher.discard_outbound();
        self.transport.leave_lobby();
        for id in self.registry.clear() {
            self.events.emit(SessionEvent::EntityDespawned(id));
        }
        self.world.clear_objects();
        self.lobby.clear_remote();
        self.dispatcher.forget_all();
        self.dispatcher.unsubscribe_all();
        self.local_player = None;
        self.join_host = None;
        self.lobby.transition(LobbyState::Disconnected);
        self.events.emit(SessionEvent::Disconnected(reason));
        self.events.close();
    }

    fn require_in_lobby(&self) -> SessionResult<()> {
        if self.lobby.state() == LobbyState::InLobby {
            Ok(())
        } else {
            Err(SessionError::NotInLobby)
        }
    }

    // =========================================================================
    // LOBBY OPERATIONS
    // =========================================================================

    /// Leaves the lobby.
    ///
    /// Owned entities that die with their owner are despawned for everyone;
    /// the rest are handed over by the receivers. Teardown messages are flushed
    /// before the transport is released.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotInLobby`] if not in a lobby.
    pub fn leave(&mut self) -> SessionResult<()> {
        self.require_in_lobby()?;
        self.lobby.transition(LobbyState::Leaving);

        let owned: Vec<(EntityId, EntityKind)> =
            self.registry.iter().filter(|r| r.is_owned()).map(|r| (r.id, r.kind)).collect();
        for (id, kind) in owned {
            if kind.owner_loss_policy() == OwnerLossPolicy::Despawn && self.registry.despawn(id).is_ok() {
                self.dispatcher.broadcast(Message::EntityDespawn { id });
                self.events.emit(SessionEvent::EntityDespawned(id));
            }
        }
        self.dispatcher.broadcast(Message::LeaveNotice);
        self.dispatcher.flush(&mut self.transport, self.now_ms);
        tracing::info!("{} left {:?}", self.lobby.local_id(), self.lobby.lobby_id());
        self.teardown(DisconnectReason::Left);
        Ok(())
    }

    /// Sets the local typing flag and tells everyone.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotInLobby`] if not in a lobby.
    pub fn set_typing(&mut self, typing: bool) -> SessionResult<()> {
        self.require_in_lobby()?;
        let local = self.lobby.local_id();
        if self.lobby.set_typing(local, typing, self.now_ms) {
            self.events.emit(SessionEvent::TypingChanged { peer: local, typing });
        }
        self.dispatcher.broadcast(Message::TypingState { typing });
        Ok(())
    }

    /// Broadcasts a chat line. Returns false for blank text, which is not sent.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotInLobby`] if not in a lobby.
    pub fn send_chat(&mut self, text: &str) -> SessionResult<bool> {
        self.require_in_lobby()?;
        let Some(text) = prepare_chat(text, self.config.max_chat_length) else {
            return Ok(false);
        };
        self.dispatcher.broadcast(Message::ChatMessage { text });
        Ok(true)
    }

    /// Changes the local team.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotInLobby`] if not in a lobby.
    pub fn set_team(&mut self, team: Team) -> SessionResult<()> {
        self.require_in_lobby()?;
        if self.lobby.set_local_team(team) {
            if let Some(me) = self.lobby.local_peer() {
                self.dispatcher.broadcast(Message::PeerState(me.to_record()));
            }
            self.events.emit(SessionEvent::PeerUpdated(self.lobby.local_id()));
        }
        Ok(())
    }

    // =========================================================================
    // WORLD OPERATIONS
    // =========================================================================

    /// Moves the lobby to another scene. Host only. Returns the new epoch.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotInLobby`] or [`SessionError::NotHost`].
    pub fn request_scene_change(&mut self, scene: &str) -> SessionResult<u32> {
        self.require_in_lobby()?;
        if !self.lobby.is_local_host() {
            return Err(SessionError::NotHost);
        }
        let epoch = self.world.advance_scene(scene);
        self.dispatcher.broadcast(Message::SceneChange { scene: scene.to_owned(), epoch });
        self.enter_scene();
        Ok(epoch)
    }

    /// The scene loader finished.
    pub fn report_scene_loaded(&mut self) {
        self.world.report_loaded();
        tracing::info!("Scene {} loaded", self.world.scene());
    }

    /// The scene loader failed. The peer stays in the lobby without a world.
    pub fn report_scene_load_failed(&mut self) {
        self.world.report_failed();
        tracing::warn!("Scene {} failed to load", self.world.scene());
        self.events.emit(SessionEvent::SceneLoadFailed { scene: self.world.scene().to_owned() });
    }

    /// Changes a level object. Returns the new revision, or `None` when a
    /// collected pickup would revert.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotInLobby`] if not in a lobby.
    pub fn set_object(&mut self, id: u32, kind: ObjectKind, state: u8) -> SessionResult<Option<WorldObject>> {
        self.require_in_lobby()?;
        let changed = self.world.set_object(id, kind, state, self.lobby.local_id());
        if let Some(object) = changed {
            self.dispatcher.broadcast(Message::WorldObjectState(object));
            self.events.emit(SessionEvent::ObjectChanged(object));
        }
        Ok(changed)
    }

    // =========================================================================
    // ENTITY OPERATIONS
    // =========================================================================

    /// Spawns an entity owned by the local peer.
    ///
    /// The local player is spawned on entering the lobby and is the only
    /// [`EntityKind::Player`] the local peer may own.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotInLobby`], [`SessionError::PlayerExists`],
    /// [`SessionError::PayloadTooLarge`], [`SessionError::IdsExhausted`], or
    /// [`SessionError::SceneNotReady`] for a non-persistent entity while the
    /// scene is not loaded.
    pub fn spawn(&mut self, kind: EntityKind, state: InitialState) -> SessionResult<EntityId> {
        self.require_in_lobby()?;
        if kind == EntityKind::Player && self.local_player.is_some() {
            return Err(SessionError::PlayerExists);
        }
        let persistent = state.persistent || kind.is_always_persistent();
        if !persistent && !self.world.is_ready() {
            return Err(SessionError::SceneNotReady);
        }
        self.spawn_owned(kind, state)
    }

    /// Despawns an owned entity for everyone. The local player stays until
    /// [`leave`](Self::leave).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownEntity`], [`SessionError::NotOwner`] or
    /// [`SessionError::LocalPlayer`].
    pub fn despawn(&mut self, id: EntityId) -> SessionResult<()> {
        self.require_in_lobby()?;
        if self.local_player == Some(id) {
            return Err(SessionError::LocalPlayer);
        }
        self.registry.despawn(id)?;
        self.dispatcher.broadcast(Message::EntityDespawn { id });
        self.events.emit(SessionEvent::EntityDespawned(id));
        Ok(())
    }

    /// Writes the state of an owned entity. Sent with the next tick.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownEntity`], [`SessionError::NotOwner`] or
    /// [`SessionError::PayloadTooLarge`].
    pub fn update_owned(
        &mut self,
        id: EntityId,
        transform: Transform,
        velocity: Option<Vec3>,
        payload: Option<Vec<u8>>,
    ) -> SessionResult<()> {
        self.require_in_lobby()?;
        self.registry.update_owned(id, transform, velocity, payload)
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Entities in id order. Empty while the scene is not loaded.
    #[must_use]
    pub fn current_entities(&self) -> Vec<EntityView> {
        if !self.world.is_ready() {
            return Vec::new();
        }
        self.registry.views(|owner| self.lobby.peer(owner).map(|p| p.team))
    }

    /// Remote players on the local peer's team.
    #[must_use]
    pub fn teammate_players(&self) -> Vec<EntityView> {
        let local = self.lobby.local_id();
        let team = self.lobby.local_peer().map(|p| p.team);
        self.current_entities()
            .into_iter()
            .filter(|e| e.kind == EntityKind::Player && e.owner != local && e.team.is_some() && e.team == team)
            .collect()
    }

    /// Peers in id order.
    #[must_use]
    pub fn current_peers(&self) -> Vec<PeerView> {
        self.lobby.current_peers(self.now_ms)
    }

    /// Names of typing peers, the local peer first as "You".
    #[must_use]
    pub fn typing_player_names(&self) -> Vec<String> {
        self.lobby.typing_player_names(self.now_ms)
    }

    /// Summary line for the typing indicator.
    #[must_use]
    pub fn typing_banner(&self) -> Option<String> {
        typing_banner(&self.typing_player_names())
    }

    /// Level objects in id order.
    #[must_use]
    pub fn objects(&self) -> Vec<WorldObject> {
        self.world.objects()
    }

    /// Subscribes to session events, published at the end of each tick.
    #[must_use]
    pub fn subscribe(&mut self) -> Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Diagnostics.
    #[must_use]
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            dispatch: *self.dispatcher.stats(),
            registry: *self.registry.stats(),
            inbound: self.inbound.stats(),
            events_dropped: self.events.dropped(),
        }
    }

    /// Lifecycle state.
    #[must_use]
    pub const fn state(&self) -> LobbyState {
        self.lobby.state()
    }

    /// Local peer id.
    #[must_use]
    pub const fn local_peer_id(&self) -> PeerId {
        self.lobby.local_id()
    }

    /// Lobby id while connected.
    #[must_use]
    pub const fn lobby_id(&self) -> Option<LobbyId> {
        self.lobby.lobby_id()
    }

    /// Current host.
    #[must_use]
    pub fn host_id(&self) -> Option<PeerId> {
        self.lobby.host_id()
    }

    /// Returns true if the local peer hosts the lobby.
    #[must_use]
    pub fn is_host(&self) -> bool {
        self.lobby.is_local_host()
    }

    /// The local player entity.
    #[must_use]
    pub const fn local_player(&self) -> Option<EntityId> {
        self.local_player
    }

    /// Current scene name.
    #[must_use]
    pub fn scene(&self) -> &str {
        self.world.scene()
    }

    /// Current scene epoch.
    #[must_use]
    pub const fn scene_epoch(&self) -> u32 {
        self.world.epoch()
    }

    /// Local scene load status.
    #[must_use]
    pub const fn scene_status(&self) -> SceneStatus {
        self.world.status()
    }

    /// Time of the last tick.
    #[must_use]
    pub const fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The underlying transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }
}
