//! # Entity Registry
//!
//! Maps entity ids to replicated state and enforces single ownership.
//!
//! ## Authority
//!
//! ```text
//!   owner peer                          every other peer
//!   ┌───────────────┐   EntitySnapshot   ┌──────────────────────┐
//!   │ Owned         │ ─────────────────> │ Replica              │
//!   │ update_owned  │   seq n, n+1, ...  │ owner guard          │
//!   │ tick: seq++   │                    │ stale guard (seq)    │
//!   └───────────────┘                    │ interpolation buffer │
//!                                        └──────────────────────┘
//! ```
//!
//! The registry never touches the network. Mutating calls return the records
//! the session must broadcast.

mod entity;
mod interpolation;

pub use entity::{
    Authority, EntityId, EntityKind, EntityRecord, EntityView, InitialState, OwnerLossPolicy,
};
pub use interpolation::{InterpolationBuffer, Sample};

use std::collections::BTreeMap;

use wingmate_shared::{Team, Transform, Vec3};

use crate::error::{SessionError, SessionResult};
use crate::lobby::PeerId;
use crate::protocol::{SnapshotRecord, SpawnRecord, MAX_FIELD_LEN};

/// Interpolation settings applied to every replica.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplicaSettings {
    /// Samples kept per replica.
    pub buffer_len: usize,
    /// How far behind the newest sample replicas render.
    pub delay_ms: u64,
    /// Longest extrapolation past the newest sample.
    pub extrapolation_limit_ms: u64,
}

/// Result of an inbound spawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpawnOutcome {
    /// A new replica was created.
    Created,
    /// The id is already registered; nothing changed.
    Duplicate,
    /// The spawn belongs to an older scene or claims local ownership.
    Rejected,
}

/// Result of an inbound snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// Pushed into the replica's buffer.
    Applied,
    /// Sequence not greater than the last applied one.
    Stale,
    /// Sender is not the recorded owner.
    ForeignOwner,
    /// No such entity.
    UnknownEntity,
}

/// What happened to an entity whose owner went away.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Released {
    /// Removed locally.
    Despawned(EntityId),
    /// Now owned by `to`.
    Transferred {
        /// Entity.
        id: EntityId,
        /// New owner.
        to: PeerId,
    },
}

/// Diagnostics counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Snapshots pushed into a replica buffer.
    pub snapshots_applied: u64,
    /// Snapshots dropped for a non-increasing sequence.
    pub stale_snapshots: u64,
    /// Snapshots dropped because the sender was not the owner.
    pub foreign_owner_snapshots: u64,
    /// Snapshots or despawns for ids nobody registered.
    pub unknown_entity: u64,
    /// Spawns for already-registered ids.
    pub duplicate_spawns: u64,
    /// Spawns from an older scene epoch or claiming local ownership.
    pub rejected_spawns: u64,
    /// Despawns not sent by the owner.
    pub foreign_despawns: u64,
    /// Despawns held until the sender inherits the entity.
    pub deferred_despawns: u64,
}

/// All entities known to the local peer.
#[derive(Debug)]
pub struct EntityRegistry {
    local: PeerId,
    next_serial: u32,
    entities: BTreeMap<EntityId, EntityRecord>,
    /// Host despawns of transferable replicas whose owner has not been
    /// released here yet, keyed by entity with the sending host.
    deferred_despawns: BTreeMap<EntityId, PeerId>,
    settings: ReplicaSettings,
    stats: RegistryStats,
}

impl EntityRegistry {
    /// Creates an empty registry for `local`.
    #[must_use]
    pub fn new(local: PeerId, settings: ReplicaSettings) -> Self {
        Self {
            local,
            next_serial: 0,
            entities: BTreeMap::new(),
            deferred_despawns: BTreeMap::new(),
            settings,
            stats: RegistryStats::default(),
        }
    }

    /// Number of registered entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Looks up an entity.
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<&EntityRecord> {
        self.entities.get(&id)
    }

    /// Iterates entities in id order.
    pub fn iter(&self) -> impl Iterator<Item = &EntityRecord> {
        self.entities.values()
    }

    /// Diagnostics counters.
    #[must_use]
    pub const fn stats(&self) -> &RegistryStats {
        &self.stats
    }

    fn new_buffer(&self, seed: Sample) -> InterpolationBuffer {
        let mut buffer = InterpolationBuffer::new(
            self.settings.buffer_len,
            self.settings.delay_ms,
            self.settings.extrapolation_limit_ms,
        );
        buffer.push(seed);
        buffer
    }

    /// Registers a locally owned entity and returns its spawn record.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::PayloadTooLarge`] if the payload cannot be
    /// encoded, or [`SessionError::IdsExhausted`] once the serial space is used up.
    pub fn spawn(
        &mut self,
        kind: EntityKind,
        state: InitialState,
        epoch: u32,
        now_ms: u64,
    ) -> SessionResult<SpawnRecord> {
        check_payload(&state.payload)?;
        let serial = self.next_serial;
        self.next_serial = serial.checked_add(1).ok_or(SessionError::IdsExhausted)?;
        let id = EntityId::new(self.local, serial);

        let record = EntityRecord {
            id,
            kind,
            owner: self.local,
            persistent: state.persistent || kind.is_always_persistent(),
            epoch,
            transform: state.transform,
            velocity: state.velocity,
            payload: state.payload,
            authority: Authority::Owned { next_seq: 1 },
        };
        let spawn = spawn_record(&record, now_ms);
        tracing::debug!("Spawned {:?} {}", kind, id);
        self.entities.insert(id, record);
        Ok(spawn)
    }

    /// Creates a replica from a remote spawn record.
    ///
    /// Non-persistent spawns from an older scene epoch are rejected. Known ids
    /// are ignored so a manifest followed by a live spawn yields one entity.
    pub fn apply_spawn(&mut self, spawn: &SpawnRecord, local_epoch: u32, now_ms: u64) -> SpawnOutcome {
        if self.entities.contains_key(&spawn.id) {
            self.stats.duplicate_spawns += 1;
            return SpawnOutcome::Duplicate;
        }
        if spawn.owner == self.local || (!spawn.persistent && spawn.epoch < local_epoch) {
            tracing::debug!("Rejected spawn {} (epoch {} < {})", spawn.id, spawn.epoch, local_epoch);
            self.stats.rejected_spawns += 1;
            return SpawnOutcome::Rejected;
        }

        let buffer = self.new_buffer(Sample {
            timestamp_ms: spawn.timestamp_ms,
            received_ms: now_ms,
            transform: spawn.transform,
            velocity: spawn.velocity,
        });
        self.entities.insert(
            spawn.id,
            EntityRecord {
                id: spawn.id,
                kind: spawn.kind,
                owner: spawn.owner,
                persistent: spawn.persistent,
                epoch: spawn.epoch,
                transform: spawn.transform,
                velocity: spawn.velocity,
                payload: spawn.payload.clone(),
                authority: Authority::Replica { buffer, last_seq: Some(spawn.seq) },
            },
        );
        SpawnOutcome::Created
    }

    /// Applies a remote snapshot to a replica.
    pub fn apply_snapshot(&mut self, from: PeerId, snapshot: &SnapshotRecord, now_ms: u64) -> SnapshotOutcome {
        let Some(record) = self.entities.get_mut(&snapshot.id) else {
            self.stats.unknown_entity += 1;
            return SnapshotOutcome::UnknownEntity;
        };
        if record.owner != from {
            self.stats.foreign_owner_snapshots += 1;
            return SnapshotOutcome::ForeignOwner;
        }
        let Authority::Replica { buffer, last_seq } = &mut record.authority else {
            self.stats.foreign_owner_snapshots += 1;
            return SnapshotOutcome::ForeignOwner;
        };
        if last_seq.is_some_and(|last| snapshot.seq <= last) {
            self.stats.stale_snapshots += 1;
            return SnapshotOutcome::Stale;
        }

        *last_seq = Some(snapshot.seq);
        buffer.push(Sample {
            timestamp_ms: snapshot.timestamp_ms,
            received_ms: now_ms,
            transform: snapshot.transform,
            velocity: snapshot.velocity,
        });
        record.velocity = snapshot.velocity;
        record.payload.clone_from(&snapshot.payload);
        self.stats.snapshots_applied += 1;
        SnapshotOutcome::Applied
    }

    /// Writes the authoritative state of an owned entity.
    ///
    /// `payload` of `None` keeps the current kind-specific state.
    pub fn update_owned(
        &mut self,
        id: EntityId,
        transform: Transform,
        velocity: Option<Vec3>,
        payload: Option<Vec<u8>>,
    ) -> SessionResult<()> {
        let record = self.entities.get_mut(&id).ok_or(SessionError::UnknownEntity(id))?;
        if !record.is_owned() {
            return Err(SessionError::NotOwner(id));
        }
        if let Some(payload) = &payload {
            check_payload(payload)?;
        }
        record.transform = transform;
        record.velocity = velocity;
        if let Some(payload) = payload {
            record.payload = payload;
        }
        Ok(())
    }

    /// Removes an owned entity. The caller broadcasts the despawn.
    pub fn despawn(&mut self, id: EntityId) -> SessionResult<EntityRecord> {
        let record = self.entities.get(&id).ok_or(SessionError::UnknownEntity(id))?;
        if !record.is_owned() {
            return Err(SessionError::NotOwner(id));
        }
        self.entities.remove(&id).ok_or(SessionError::UnknownEntity(id))
    }

    /// Removes a replica on its owner's request.
    ///
    /// `host` is the current host. A host may detect an owner's timeout before
    /// the local peer does, then despawn the entity it inherited. Such a
    /// despawn of a transferable replica is held and applied once the same
    /// transfer happens here.
    pub fn apply_despawn(&mut self, from: PeerId, id: EntityId, host: Option<PeerId>) -> Option<EntityRecord> {
        match self.entities.get(&id) {
            None => {
                self.stats.unknown_entity += 1;
                None
            }
            Some(record)
                if !record.is_owned()
                    && record.owner != from
                    && host == Some(from)
                    && record.kind.owner_loss_policy() == OwnerLossPolicy::TransferToHost =>
            {
                tracing::debug!("Holding despawn of {} from host {} until {} is released", id, from, record.owner);
                self.deferred_despawns.insert(id, from);
                self.stats.deferred_despawns += 1;
                None
            }
            Some(record) if record.owner != from || record.is_owned() => {
                self.stats.foreign_despawns += 1;
                None
            }
            Some(_) => {
                self.deferred_despawns.remove(&id);
                self.entities.remove(&id)
            }
        }
    }

    /// Applies the owner loss policy to everything `peer` owned.
    ///
    /// `host` is the host after any election. Transferred replicas drop their
    /// sequence watermark and history and hold the last rendered transform
    /// until the new owner's first snapshot. If the local peer is the new
    /// owner, the replica becomes owned. A held despawn from the heir removes
    /// the entity instead.
    pub fn release_peer(&mut self, peer: PeerId, host: Option<PeerId>) -> Vec<Released> {
        let owned: Vec<EntityId> = self
            .entities
            .values()
            .filter(|r| r.owner == peer)
            .map(|r| r.id)
            .collect();

        let mut released = Vec::with_capacity(owned.len());
        for id in owned {
            let Some(record) = self.entities.get_mut(&id) else { continue };
            let heir = match (record.kind.owner_loss_policy(), host) {
                (OwnerLossPolicy::TransferToHost, Some(h)) if h != peer => Some(h),
                _ => None,
            };
            let deferred = self.deferred_despawns.remove(&id);
            let Some(to) = heir.filter(|h| deferred != Some(*h)) else {
                self.entities.remove(&id);
                released.push(Released::Despawned(id));
                continue;
            };

            let next_seq = match &record.authority {
                Authority::Replica { last_seq, .. } => last_seq.map_or(1, |s| s.saturating_add(1)),
                Authority::Owned { next_seq } => *next_seq,
            };
            record.owner = to;
            if to == self.local {
                record.authority = Authority::Owned { next_seq };
            } else if let Authority::Replica { buffer, last_seq } = &mut record.authority {
                *last_seq = None;
                buffer.clear();
                record.velocity = None;
            }
            tracing::info!("Entity {} transferred from {} to {}", id, peer, to);
            released.push(Released::Transferred { id, to });
        }
        released
    }

    /// Drops every non-persistent entity. Returns the removed ids.
    pub fn retain_persistent(&mut self) -> Vec<EntityId> {
        let doomed: Vec<EntityId> = self.entities.values().filter(|r| !r.persistent).map(|r| r.id).collect();
        for id in &doomed {
            self.entities.remove(id);
            self.deferred_despawns.remove(id);
        }
        doomed
    }

    /// Drops everything. Returns the removed ids.
    pub fn clear(&mut self) -> Vec<EntityId> {
        let ids = self.entities.keys().copied().collect();
        self.entities.clear();
        self.deferred_despawns.clear();
        ids
    }

    /// Advances one tick.
    ///
    /// Owned entities emit a snapshot with the next sequence number. Replicas
    /// re-sample their interpolation buffer.
    pub fn tick(&mut self, now_ms: u64) -> Vec<SnapshotRecord> {
        let mut snapshots = Vec::new();
        for record in self.entities.values_mut() {
            match &mut record.authority {
                Authority::Owned { next_seq } => {
                    snapshots.push(SnapshotRecord {
                        id: record.id,
                        seq: *next_seq,
                        timestamp_ms: now_ms,
                        transform: record.transform,
                        velocity: record.velocity,
                        payload: record.payload.clone(),
                    });
                    *next_seq = next_seq.saturating_add(1);
                }
                Authority::Replica { buffer, .. } => {
                    if let Some(transform) = buffer.sample(now_ms) {
                        record.transform = transform;
                    }
                }
            }
        }
        snapshots
    }

    /// Spawn records of every entity with its latest state, for a manifest.
    #[must_use]
    pub fn manifest_entries(&self, now_ms: u64) -> Vec<SpawnRecord> {
        self.entities.values().map(|r| spawn_record(r, now_ms)).collect()
    }

    /// Read-only copies in id order. `team_of` resolves the owner's team.
    #[must_use]
    pub fn views(&self, team_of: impl Fn(PeerId) -> Option<Team>) -> Vec<EntityView> {
        self.entities
            .values()
            .map(|r| EntityView {
                id: r.id,
                kind: r.kind,
                owner: r.owner,
                team: team_of(r.owner),
                transform: r.transform,
                velocity: r.velocity,
                payload: r.payload.clone(),
                persistent: r.persistent,
            })
            .collect()
    }
}

fn check_payload(payload: &[u8]) -> SessionResult<()> {
    if payload.len() > MAX_FIELD_LEN {
        return Err(SessionError::PayloadTooLarge { len: payload.len() });
    }
    Ok(())
}

/// Latest known state of a record as a spawn message.
///
/// Replicas report their newest received sample rather than the rendered
/// transform so a late joiner starts from real owner data.
fn spawn_record(record: &EntityRecord, now_ms: u64) -> SpawnRecord {
    let (seq, timestamp_ms, transform) = match &record.authority {
        Authority::Owned { next_seq } => (next_seq.saturating_sub(1), now_ms, record.transform),
        Authority::Replica { buffer, last_seq } => match buffer.newest() {
            Some(s) => (last_seq.unwrap_or(0), s.timestamp_ms, s.transform),
            None => (last_seq.unwrap_or(0), now_ms, record.transform),
        },
    };
    SpawnRecord {
        id: record.id,
        kind: record.kind,
        owner: record.owner,
        persistent: record.persistent,
        epoch: record.epoch,
        seq,
        timestamp_ms,
        transform,
        velocity: record.velocity,
        payload: record.payload.clone(),
    }
}
