//! # World Sync
//!
//! Keeps every peer on the same scene and reconciles level objects.
//!
//! Scene changes come only from the host and carry a strictly increasing
//! epoch. A peer whose scene failed to load stays in the lobby with no world
//! until it reports a successful load.
//!
//! Level objects (doors, pickups) change rarely and any peer may touch them,
//! so they use last-writer-wins on `(revision, author)` instead of ownership.

use std::collections::BTreeMap;

use crate::lobby::PeerId;

/// Kind of level object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjectKind {
    /// State 0 is closed, anything else open.
    Door = 0,
    /// State 0 is available, anything else collected.
    Pickup = 1,
}

impl ObjectKind {
    /// Parses a wire discriminant.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Door),
            1 => Some(Self::Pickup),
            _ => None,
        }
    }

    /// Wire discriminant.
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }
}

/// A level-scoped object keyed by a level-defined id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorldObject {
    /// Level-defined id.
    pub id: u32,
    /// Door or pickup.
    pub kind: ObjectKind,
    /// Kind-specific state byte.
    pub state: u8,
    /// Bumped on every change.
    pub revision: u32,
    /// Peer that made this revision.
    pub author: PeerId,
}

impl WorldObject {
    /// Returns true for a pickup somebody already took.
    #[must_use]
    pub const fn is_collected(&self) -> bool {
        matches!(self.kind, ObjectKind::Pickup) && self.state != 0
    }

    /// Returns true if `other` should replace `self`.
    #[must_use]
    pub fn is_superseded_by(&self, other: &Self) -> bool {
        if self.is_collected() && !other.is_collected() {
            return false;
        }
        (other.revision, other.author) > (self.revision, self.author)
    }
}

/// Local scene load status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SceneStatus {
    /// Waiting for the scene loader.
    Loading,
    /// Scene ready; entities may exist.
    Loaded,
    /// Loader failed; no world until a later successful load.
    Failed,
}

/// Scene and level object state of one peer.
#[derive(Debug)]
pub struct WorldSync {
    scene: String,
    epoch: u32,
    status: SceneStatus,
    objects: BTreeMap<u32, WorldObject>,
}

impl WorldSync {
    /// Starts at epoch 0 on `scene`, waiting for the loader.
    #[must_use]
    pub fn new(scene: impl Into<String>) -> Self {
        Self { scene: scene.into(), epoch: 0, status: SceneStatus::Loading, objects: BTreeMap::new() }
    }

    /// Current scene name.
    #[must_use]
    pub fn scene(&self) -> &str {
        &self.scene
    }

    /// Current scene epoch.
    #[inline]
    #[must_use]
    pub const fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Current load status.
    #[inline]
    #[must_use]
    pub const fn status(&self) -> SceneStatus {
        self.status
    }

    /// Returns true if the local world exists.
    #[inline]
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self.status, SceneStatus::Loaded)
    }

    /// Enters a new scene. Returns false for an epoch that is not newer.
    pub fn begin_scene(&mut self, scene: &str, epoch: u32) -> bool {
        if epoch <= self.epoch {
            return false;
        }
        self.scene.clear();
        self.scene.push_str(scene);
        self.epoch = epoch;
        self.status = SceneStatus::Loading;
        self.objects.clear();
        true
    }

    /// Host side of a scene change: bumps the epoch and returns it.
    pub fn advance_scene(&mut self, scene: &str) -> u32 {
        let next = self.epoch.saturating_add(1);
        self.begin_scene(scene, next);
        next
    }

    /// Adopts the scene from a join manifest, whatever the local epoch.
    pub fn install(&mut self, scene: &str, epoch: u32, objects: &[WorldObject]) {
        self.scene.clear();
        self.scene.push_str(scene);
        self.epoch = epoch;
        self.status = SceneStatus::Loading;
        self.objects = objects.iter().map(|o| (o.id, *o)).collect();
    }

    /// The scene loader finished.
    pub fn report_loaded(&mut self) {
        self.status = SceneStatus::Loaded;
    }

    /// The scene loader failed.
    pub fn report_failed(&mut self) {
        self.status = SceneStatus::Failed;
    }

    /// Merges a remote object state. Returns true if it was adopted.
    pub fn apply_object(&mut self, incoming: WorldObject) -> bool {
        match self.objects.get_mut(&incoming.id) {
            Some(current) if !current.is_superseded_by(&incoming) => false,
            Some(current) => {
                *current = incoming;
                true
            }
            None => {
                self.objects.insert(incoming.id, incoming);
                true
            }
        }
    }

    /// Local change to an object. Returns the new revision to broadcast, or
    /// `None` when a collected pickup would revert.
    pub fn set_object(&mut self, id: u32, kind: ObjectKind, state: u8, author: PeerId) -> Option<WorldObject> {
        let revision = self.objects.get(&id).map_or(1, |o| o.revision.saturating_add(1));
        let next = WorldObject { id, kind, state, revision, author };
        self.apply_object(next).then_some(next)
    }

    /// Looks up an object.
    #[must_use]
    pub fn object(&self, id: u32) -> Option<&WorldObject> {
        self.objects.get(&id)
    }

    /// All objects in id order.
    #[must_use]
    pub fn objects(&self) -> Vec<WorldObject> {
        self.objects.values().copied().collect()
    }

    /// Forgets every object.
    pub fn clear_objects(&mut self) {
        self.objects.clear();
    }
}
