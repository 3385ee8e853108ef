//! # Lobby Soak Simulation
//!
//! Runs a host and several guests over a lossy [`LoopbackNetwork`] with every
//! peer moving its own player and a few enemies, then measures how closely
//! replicas track their owners.
//!
//! All peers share one simulated clock, so replica error is measured against
//! the owner's true position at the same instant.

use std::collections::HashMap;
use std::time::Instant;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use wingmate_shared::{Team, Transform, Vec3};

use crate::config::SessionConfig;
use crate::error::{ConnectError, SessionError};
use crate::lobby::PeerId;
use crate::registry::{EntityId, EntityKind, InitialState};
use crate::session::{JoinProgress, Session};
use crate::transport::{LoopbackNetwork, LoopbackTransport, NetworkConditions};

/// Movement speed of every simulated entity, units per second.
const MOVE_SPEED: f32 = 5.0;

/// Replica error is sampled every this many ticks.
const ERROR_SAMPLE_INTERVAL: u64 = 10;

/// Errors setting up a simulation.
#[derive(Error, Debug)]
pub enum SimulationError {
    /// The host could not create its lobby.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A guest could not join.
    #[error(transparent)]
    Connect(#[from] ConnectError),
}

/// Configuration for a soak run.
#[derive(Clone, Debug)]
pub struct SimulationConfig {
    /// Guests besides the host.
    pub guest_count: usize,
    /// Ticks per second.
    pub tick_rate: u32,
    /// Simulated duration.
    pub duration_secs: u32,
    /// Impairments applied once everyone has joined.
    pub network: NetworkConditions,
    /// Side of the square entities wander in.
    pub arena_size: f32,
    /// Enemies spawned by every peer.
    pub enemies_per_peer: usize,
    /// RNG seed for movement and the network.
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            guest_count: 3,
            tick_rate: 60,
            duration_secs: 30,
            network: NetworkConditions::AVERAGE,
            arena_size: 100.0,
            enemies_per_peer: 2,
            seed: 42,
        }
    }
}

/// Statistics from a soak run.
#[derive(Clone, Debug, Default)]
pub struct SoakStats {
    /// Ticks executed.
    pub total_ticks: u64,
    /// Peers in the lobby, host included.
    pub peers: usize,
    /// Entities in the lobby.
    pub entities: usize,
    /// Average distance between a replica and its owner's position.
    pub avg_replica_error: f32,
    /// Largest such distance.
    pub max_replica_error: f32,
    /// Replica positions measured.
    pub error_samples: u64,
    /// Snapshots dropped for an old sequence number.
    pub stale_snapshots: u64,
    /// Snapshots replaced by a newer one before sending.
    pub coalesced_snapshots: u64,
    /// Frames handed to the network.
    pub frames_sent: u64,
    /// Unreliable frames the network lost.
    pub frames_dropped: u64,
    /// Samples where two peers both claimed to own one entity.
    pub ownership_violations: u64,
    /// Samples where a peer was missing an entity.
    pub missing_replicas: u64,
    /// Average time to tick every peer once.
    pub avg_tick_us: u64,
    /// Slowest such tick.
    pub max_tick_us: u64,
}

/// An entity moved by its owning peer.
#[derive(Clone, Debug)]
struct Mover {
    id: EntityId,
    position: Vec3,
    target: Vec3,
}

impl Mover {
    fn step(&mut self, dt: f32, rng: &mut ChaCha8Rng, half: f32) -> Vec3 {
        let offset = self.target - self.position;
        let distance = offset.length();
        if distance < 1.0 {
            self.target = random_point(rng, half);
            return Vec3::ZERO;
        }
        let velocity = offset * (MOVE_SPEED / distance);
        self.position = self.position + velocity * dt;
        velocity
    }
}

fn random_point(rng: &mut ChaCha8Rng, half: f32) -> Vec3 {
    Vec3::new(rng.gen_range(-half..half), 0.0, rng.gen_range(-half..half))
}

struct SimPeer {
    session: Session<LoopbackTransport>,
    movers: Vec<Mover>,
}

/// Soak run over a loopback lobby.
pub struct SoakSimulation {
    config: SimulationConfig,
    network: LoopbackNetwork,
    peers: Vec<SimPeer>,
    rng: ChaCha8Rng,
    now_ms: u64,
    current_tick: u64,
    error_sum: f64,
    stats: SoakStats,
}

impl SoakSimulation {
    /// Hosts a lobby, joins every guest over a clean network and spawns the
    /// moving entities.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError`] if the lobby cannot be set up.
    pub fn new(config: SimulationConfig) -> Result<Self, SimulationError> {
        let network = LoopbackNetwork::new(NetworkConditions::PERFECT, config.seed);
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let half = config.arena_size / 2.0;

        let mut host_config = SessionConfig::named("Host", Team::Yellow);
        host_config.tick_rate = config.tick_rate;
        let host = Session::host(host_config.clone(), network.endpoint(host_config.inbound_queue_capacity), 0)?;
        let lobby = host.lobby_id().ok_or(SessionError::NotInLobby)?;

        let mut peers = vec![SimPeer { session: host, movers: Vec::new() }];
        let mut now_ms = 0;
        for i in 0..config.guest_count {
            let team = Team::ALL[(i + 1) % Team::COUNT];
            let mut guest_config = SessionConfig::named(format!("Guest {}", i + 1), team);
            guest_config.tick_rate = config.tick_rate;
            let endpoint = network.endpoint(guest_config.inbound_queue_capacity);
            let mut pending = Session::begin_join(guest_config, endpoint, lobby, now_ms)?;
            let session = loop {
                now_ms += host_config.tick_interval_ms();
                for peer in &mut peers {
                    peer.session.tick(now_ms);
                }
                match pending.poll(now_ms)? {
                    JoinProgress::Waiting(next) => pending = next,
                    JoinProgress::Joined(session) => break session,
                }
            };
            peers.push(SimPeer { session, movers: Vec::new() });
        }

        for peer in &mut peers {
            peer.session.report_scene_loaded();
            if let Some(id) = peer.session.local_player() {
                let position = random_point(&mut rng, half);
                peer.movers.push(Mover { id, position, target: random_point(&mut rng, half) });
            }
            for _ in 0..config.enemies_per_peer {
                let position = random_point(&mut rng, half);
                let id = peer.session.spawn(EntityKind::Enemy, InitialState::at(Transform::at(position)))?;
                peer.movers.push(Mover { id, position, target: random_point(&mut rng, half) });
            }
        }
        network.set_conditions(config.network);

        let entities = peers.iter().map(|p| p.movers.len()).sum();
        let stats = SoakStats { peers: peers.len(), entities, ..SoakStats::default() };
        tracing::info!("Soak lobby ready: {} peers, {} entities", stats.peers, stats.entities);

        Ok(Self { config, network, peers, rng, now_ms, current_tick: 0, error_sum: 0.0, stats })
    }

    /// Runs one tick of every peer. Returns false once the run is complete.
    pub fn tick(&mut self) -> bool {
        let total_ticks = u64::from(self.config.duration_secs) * u64::from(self.config.tick_rate);
        if self.current_tick >= total_ticks {
            return false;
        }

        let interval_ms = 1000 / u64::from(self.config.tick_rate.max(1));
        #[allow(clippy::cast_precision_loss)]
        let dt = interval_ms as f32 / 1000.0;
        let half = self.config.arena_size / 2.0;
        self.now_ms += interval_ms;

        let start = Instant::now();
        for peer in &mut self.peers {
            for mover in &mut peer.movers {
                let velocity = mover.step(dt, &mut self.rng, half);
                if let Err(err) =
                    peer.session.update_owned(mover.id, Transform::at(mover.position), Some(velocity), None)
                {
                    tracing::warn!("Soak update of {} failed: {}", mover.id, err);
                }
            }
            peer.session.tick(self.now_ms);
        }
        let tick_us = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);

        self.current_tick += 1;
        self.stats.total_ticks += 1;
        self.stats.max_tick_us = self.stats.max_tick_us.max(tick_us);
        self.stats.avg_tick_us = if self.stats.total_ticks == 1 {
            tick_us
        } else {
            (self.stats.avg_tick_us * 15 + tick_us) / 16
        };

        if self.current_tick % ERROR_SAMPLE_INTERVAL == 0 {
            self.sample_replicas();
        }
        true
    }

    fn sample_replicas(&mut self) {
        let truth: HashMap<EntityId, Vec3> = self
            .peers
            .iter()
            .flat_map(|p| p.movers.iter().map(|m| (m.id, m.position)))
            .collect();

        let mut claims: HashMap<EntityId, u32> = HashMap::new();
        for peer in &self.peers {
            let local = peer.session.local_peer_id();
            let views = peer.session.current_entities();
            let missing = truth.keys().filter(|id| !views.iter().any(|v| v.id == **id)).count();
            self.stats.missing_replicas += missing as u64;

            for view in views {
                if view.owner == local {
                    *claims.entry(view.id).or_default() += 1;
                    continue;
                }
                if let Some(position) = truth.get(&view.id) {
                    let error = view.transform.position.distance(*position);
                    self.error_sum += f64::from(error);
                    self.stats.error_samples += 1;
                    self.stats.max_replica_error = self.stats.max_replica_error.max(error);
                }
            }
        }
        self.stats.ownership_violations += claims.values().filter(|c| **c > 1).count() as u64;
        if self.stats.error_samples > 0 {
            #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
            let avg = (self.error_sum / self.stats.error_samples as f64) as f32;
            self.stats.avg_replica_error = avg;
        }
    }

    /// Runs to completion.
    pub fn run(&mut self) -> SoakStats {
        while self.tick() {}
        self.stats()
    }

    /// Statistics so far, with network and session counters folded in.
    #[must_use]
    pub fn stats(&self) -> SoakStats {
        let mut stats = self.stats.clone();
        stats.stale_snapshots = 0;
        stats.coalesced_snapshots = 0;
        stats.frames_sent = 0;
        for peer in &self.peers {
            let session = peer.session.stats();
            stats.stale_snapshots += session.registry.stale_snapshots;
            stats.coalesced_snapshots += session.dispatch.coalesced;
            stats.frames_sent += session.dispatch.frames_sent;
        }
        stats.frames_dropped = self.network.stats().dropped;
        stats
    }

    /// Ticks executed.
    #[must_use]
    pub const fn current_tick(&self) -> u64 {
        self.current_tick
    }

    /// Total ticks in the run.
    #[must_use]
    pub fn total_ticks(&self) -> u64 {
        u64::from(self.config.duration_secs) * u64::from(self.config.tick_rate)
    }

    /// Peer ids in join order.
    #[must_use]
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.iter().map(|p| p.session.local_peer_id()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small(network: NetworkConditions) -> SimulationConfig {
        SimulationConfig { guest_count: 2, duration_secs: 2, network, ..SimulationConfig::default() }
    }

    #[test]
    fn test_simulation_creation() {
        let sim = SoakSimulation::new(small(NetworkConditions::PERFECT)).unwrap();
        let stats = sim.stats();
        assert_eq!(stats.peers, 3);
        assert_eq!(stats.entities, 9);
        assert_eq!(sim.peer_ids().len(), 3);
    }

    #[test]
    fn test_perfect_network_tracks_closely() {
        let mut sim = SoakSimulation::new(small(NetworkConditions::PERFECT)).unwrap();
        let stats = sim.run();

        assert_eq!(stats.total_ticks, sim.total_ticks());
        assert_eq!(stats.ownership_violations, 0);
        assert_eq!(stats.missing_replicas, 0);
        assert_eq!(stats.frames_dropped, 0);
        assert!(stats.error_samples > 0);
        // Replicas render 100 ms behind at 5 units/s.
        assert!(stats.avg_replica_error < 1.0, "replica error too high: {}", stats.avg_replica_error);
    }

    #[test]
    fn test_lossy_network_keeps_ownership() {
        let mut sim = SoakSimulation::new(small(NetworkConditions::POOR)).unwrap();
        let stats = sim.run();

        assert_eq!(stats.ownership_violations, 0);
        assert_eq!(stats.missing_replicas, 0);
        assert!(stats.frames_dropped > 0);
        assert!(stats.avg_replica_error < 2.0, "replica error too high: {}", stats.avg_replica_error);
    }
}
