//! # Loopback Transport
//!
//! In-memory lobby network for tests and soak runs. Every endpoint owns an
//! [`InboundQueue`]; sending pushes straight into the recipients' queues.
//!
//! Unreliable frames go through [`NetworkConditions`] with a seeded RNG, so a
//! run with the same seed and the same call order is reproducible.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::{Inbound, InboundQueue, Reliability, Target, Transport};
use crate::error::{ConnectError, TransportError};
use crate::lobby::{LobbyId, PeerId};

/// Impairments applied to unreliable frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NetworkConditions {
    /// Packet loss percentage (0-100).
    pub packet_loss_percent: u8,
    /// Duplicate packet percentage (0-100).
    pub duplicate_percent: u8,
    /// Out-of-order percentage (0-100).
    pub out_of_order_percent: u8,
}

impl NetworkConditions {
    /// Nothing lost, duplicated or reordered.
    pub const PERFECT: Self = Self { packet_loss_percent: 0, duplicate_percent: 0, out_of_order_percent: 0 };

    /// Average home connection.
    pub const AVERAGE: Self = Self { packet_loss_percent: 1, duplicate_percent: 1, out_of_order_percent: 2 };

    /// Congested wifi.
    pub const POOR: Self = Self { packet_loss_percent: 5, duplicate_percent: 2, out_of_order_percent: 5 };

    /// Returns true if the frame should be dropped.
    #[must_use]
    pub fn should_drop(&self, roll: u8) -> bool {
        roll < self.packet_loss_percent
    }

    /// Returns true if the frame should be delivered twice.
    #[must_use]
    pub fn should_duplicate(&self, roll: u8) -> bool {
        roll < self.duplicate_percent
    }

    /// Returns true if the frame should be held back behind the next one.
    #[must_use]
    pub fn should_reorder(&self, roll: u8) -> bool {
        roll < self.out_of_order_percent
    }
}

impl Default for NetworkConditions {
    fn default() -> Self {
        Self::PERFECT
    }
}

/// Delivery counters for the whole hub.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopbackStats {
    /// Frames pushed into a recipient queue.
    pub delivered: u64,
    /// Unreliable frames lost.
    pub dropped: u64,
    /// Unreliable frames delivered twice.
    pub duplicated: u64,
    /// Unreliable frames held back behind a later one.
    pub reordered: u64,
}

#[derive(Debug)]
struct LobbyEntry {
    owner: PeerId,
    members: BTreeSet<PeerId>,
}

#[derive(Debug)]
struct Hub {
    next_peer: u64,
    next_lobby: u64,
    endpoints: HashMap<PeerId, InboundQueue>,
    lobbies: BTreeMap<LobbyId, LobbyEntry>,
    membership: HashMap<PeerId, LobbyId>,
    held: HashMap<PeerId, Vec<Inbound>>,
    conditions: NetworkConditions,
    rng: ChaCha8Rng,
    stats: LoopbackStats,
}

impl Hub {
    fn roll(&mut self) -> u8 {
        self.rng.gen_range(0..100)
    }

    fn detach(&mut self, peer: PeerId, notify: bool) {
        let Some(lobby) = self.membership.remove(&peer) else { return };
        self.held.remove(&peer);
        let Some(entry) = self.lobbies.get_mut(&lobby) else { return };
        entry.members.remove(&peer);
        if entry.members.is_empty() {
            self.lobbies.remove(&lobby);
            return;
        }
        if entry.owner == peer {
            if let Some(next) = entry.members.first() {
                entry.owner = *next;
            }
        }
        if notify {
            let members: Vec<PeerId> = entry.members.iter().copied().collect();
            for member in members {
                if let Some(queue) = self.endpoints.get(&member) {
                    queue.push(Inbound::PeerDisconnected(peer));
                }
            }
        }
    }

    fn deliver(&mut self, to: PeerId, item: Inbound) {
        if let Some(queue) = self.endpoints.get(&to) {
            queue.push(item);
            self.stats.delivered += 1;
        }
    }

    fn deliver_unreliable(&mut self, to: PeerId, item: Inbound) {
        let conditions = self.conditions;
        if conditions.should_drop(self.roll()) {
            self.stats.dropped += 1;
            return;
        }
        if conditions.should_reorder(self.roll()) {
            self.stats.reordered += 1;
            self.held.entry(to).or_default().push(item);
            return;
        }
        let duplicate = conditions.should_duplicate(self.roll());
        if duplicate {
            self.stats.duplicated += 1;
            self.deliver(to, item.clone());
        }
        self.deliver(to, item);
        self.release_held(to);
    }

    fn release_held(&mut self, to: PeerId) {
        if let Some(held) = self.held.remove(&to) {
            for item in held {
                self.deliver(to, item);
            }
        }
    }
}

/// Shared in-memory network. Cloning yields another handle to the same hub.
#[derive(Clone, Debug)]
pub struct LoopbackNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl LoopbackNetwork {
    /// Creates a network with the given impairments and RNG seed.
    #[must_use]
    pub fn new(conditions: NetworkConditions, seed: u64) -> Self {
        Self {
            hub: Arc::new(Mutex::new(Hub {
                next_peer: 1,
                next_lobby: 1,
                endpoints: HashMap::new(),
                lobbies: BTreeMap::new(),
                membership: HashMap::new(),
                held: HashMap::new(),
                conditions,
                rng: ChaCha8Rng::seed_from_u64(seed),
                stats: LoopbackStats::default(),
            })),
        }
    }

    /// A lossless network.
    #[must_use]
    pub fn perfect() -> Self {
        Self::new(NetworkConditions::PERFECT, 0)
    }

    /// Creates an endpoint with a fresh peer id. Ids increase from 1.
    #[must_use]
    pub fn endpoint(&self, inbound_capacity: usize) -> LoopbackTransport {
        let mut hub = self.hub.lock();
        let local = PeerId(hub.next_peer);
        hub.next_peer += 1;
        let inbound = InboundQueue::new(inbound_capacity);
        hub.endpoints.insert(local, inbound.clone());
        LoopbackTransport { network: self.clone(), local, inbound }
    }

    /// Replaces the impairments.
    pub fn set_conditions(&self, conditions: NetworkConditions) {
        self.hub.lock().conditions = conditions;
    }

    /// Cuts a peer off without telling anyone, like a crashed process.
    /// The others notice through heartbeat timeout.
    pub fn sever(&self, peer: PeerId) {
        let mut hub = self.hub.lock();
        hub.detach(peer, false);
        hub.endpoints.remove(&peer);
        tracing::debug!("Loopback severed {}", peer);
    }

    /// Destroys a lobby and tells every member.
    pub fn destroy_lobby(&self, lobby: LobbyId) {
        let mut hub = self.hub.lock();
        let Some(entry) = hub.lobbies.remove(&lobby) else { return };
        for member in entry.members {
            hub.membership.remove(&member);
            hub.held.remove(&member);
            if let Some(queue) = hub.endpoints.get(&member) {
                queue.push(Inbound::SessionDestroyed);
            }
        }
    }

    /// Delivers every held-back frame.
    pub fn release_held(&self) {
        let mut hub = self.hub.lock();
        let peers: Vec<PeerId> = hub.held.keys().copied().collect();
        for peer in peers {
            hub.release_held(peer);
        }
    }

    /// Members of a lobby in id order.
    #[must_use]
    pub fn lobby_members(&self, lobby: LobbyId) -> Vec<PeerId> {
        self.hub
            .lock()
            .lobbies
            .get(&lobby)
            .map(|e| e.members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Delivery counters.
    #[must_use]
    pub fn stats(&self) -> LoopbackStats {
        self.hub.lock().stats
    }
}

/// One endpoint of a [`LoopbackNetwork`].
#[derive(Debug)]
pub struct LoopbackTransport {
    network: LoopbackNetwork,
    local: PeerId,
    inbound: InboundQueue,
}

impl LoopbackTransport {
    /// The network this endpoint lives on.
    #[must_use]
    pub fn network(&self) -> &LoopbackNetwork {
        &self.network
    }
}

impl Transport for LoopbackTransport {
    fn local_peer(&self) -> PeerId {
        self.local
    }

    fn inbound(&self) -> InboundQueue {
        self.inbound.clone()
    }

    fn create_lobby(&mut self) -> Result<LobbyId, TransportError> {
        let mut hub = self.network.hub.lock();
        if !hub.endpoints.contains_key(&self.local) {
            return Err(TransportError::Closed);
        }
        if hub.membership.contains_key(&self.local) {
            return Err(TransportError::LobbyExists);
        }
        let lobby = LobbyId(hub.next_lobby);
        hub.next_lobby += 1;
        hub.lobbies.insert(lobby, LobbyEntry { owner: self.local, members: BTreeSet::from([self.local]) });
        hub.membership.insert(self.local, lobby);
        Ok(lobby)
    }

    fn connect(&mut self, lobby: LobbyId) -> Result<PeerId, ConnectError> {
        let mut hub = self.network.hub.lock();
        if !hub.endpoints.contains_key(&self.local) {
            return Err(ConnectError::NetworkTimeout);
        }
        let local = self.local;
        let entry = hub.lobbies.get_mut(&lobby).ok_or(ConnectError::LobbyNotFound)?;
        entry.members.insert(local);
        let owner = entry.owner;
        hub.membership.insert(local, lobby);
        Ok(owner)
    }

    fn leave_lobby(&mut self) {
        self.network.hub.lock().detach(self.local, true);
    }

    fn send(&mut self, target: Target, frame: &[u8], reliability: Reliability) -> Result<(), TransportError> {
        let mut hub = self.network.hub.lock();
        let lobby = *hub.membership.get(&self.local).ok_or(TransportError::Closed)?;
        let members = &hub.lobbies.get(&lobby).ok_or(TransportError::Closed)?.members;

        let recipients: Vec<PeerId> = match target {
            Target::Broadcast => members.iter().copied().filter(|p| *p != self.local).collect(),
            Target::Peer(peer) if members.contains(&peer) && peer != self.local => vec![peer],
            Target::Peer(peer) => return Err(TransportError::UnknownPeer(peer)),
        };

        for to in recipients {
            let item = Inbound::frame(self.local, frame.to_vec());
            match reliability {
                Reliability::Reliable => hub.deliver(to, item),
                Reliability::Unreliable => hub.deliver_unreliable(to, item),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain_frames(t: &LoopbackTransport) -> usize {
        t.inbound()
            .drain()
            .into_iter()
            .filter(|i| matches!(i, Inbound::Frame { .. }))
            .count()
    }

    #[test]
    fn test_connect_to_missing_lobby() {
        let net = LoopbackNetwork::perfect();
        let mut guest = net.endpoint(16);
        assert_eq!(guest.connect(LobbyId(9)), Err(ConnectError::LobbyNotFound));
    }

    #[test]
    fn test_broadcast_reaches_everyone_else() {
        let net = LoopbackNetwork::perfect();
        let mut host = net.endpoint(16);
        let mut a = net.endpoint(16);
        let mut b = net.endpoint(16);
        let lobby = host.create_lobby().unwrap();
        assert_eq!(a.connect(lobby), Ok(host.local_peer()));
        assert_eq!(b.connect(lobby), Ok(host.local_peer()));

        host.send(Target::Broadcast, &[1], Reliability::Reliable).unwrap();
        assert_eq!(drain_frames(&a), 1);
        assert_eq!(drain_frames(&b), 1);
        assert_eq!(drain_frames(&host), 0);
        assert_eq!(
            host.send(Target::Peer(PeerId(77)), &[1], Reliability::Reliable),
            Err(TransportError::UnknownPeer(PeerId(77)))
        );
        assert_eq!(host.create_lobby(), Err(TransportError::LobbyExists));
    }

    #[test]
    fn test_leave_notifies_and_moves_ownership() {
        let net = LoopbackNetwork::perfect();
        let mut host = net.endpoint(16);
        let mut a = net.endpoint(16);
        let mut b = net.endpoint(16);
        let lobby = host.create_lobby().unwrap();
        a.connect(lobby).unwrap();
        b.connect(lobby).unwrap();

        host.leave_lobby();
        assert_eq!(a.inbound().drain(), vec![Inbound::PeerDisconnected(host.local_peer())]);
        assert_eq!(net.lobby_members(lobby), vec![a.local_peer(), b.local_peer()]);

        let mut c = net.endpoint(16);
        assert_eq!(c.connect(lobby), Ok(a.local_peer()));
        assert_eq!(host.send(Target::Broadcast, &[1], Reliability::Reliable), Err(TransportError::Closed));
    }

    #[test]
    fn test_sever_is_silent() {
        let net = LoopbackNetwork::perfect();
        let mut host = net.endpoint(16);
        let mut a = net.endpoint(16);
        let lobby = host.create_lobby().unwrap();
        a.connect(lobby).unwrap();

        net.sever(a.local_peer());
        assert!(host.inbound().is_empty());
        assert_eq!(a.send(Target::Broadcast, &[1], Reliability::Reliable), Err(TransportError::Closed));
    }

    #[test]
    fn test_destroy_lobby_notifies_members() {
        let net = LoopbackNetwork::perfect();
        let mut host = net.endpoint(16);
        let mut a = net.endpoint(16);
        let lobby = host.create_lobby().unwrap();
        a.connect(lobby).unwrap();

        net.destroy_lobby(lobby);
        assert_eq!(a.inbound().drain(), vec![Inbound::SessionDestroyed]);
        assert_eq!(host.inbound().drain(), vec![Inbound::SessionDestroyed]);
        assert_eq!(a.connect(lobby), Err(ConnectError::LobbyNotFound));
    }

    #[test]
    fn test_impairments_only_touch_unreliable_frames() {
        let conditions = NetworkConditions { packet_loss_percent: 100, duplicate_percent: 0, out_of_order_percent: 0 };
        let net = LoopbackNetwork::new(conditions, 7);
        let mut host = net.endpoint(64);
        let mut a = net.endpoint(64);
        let lobby = host.create_lobby().unwrap();
        a.connect(lobby).unwrap();

        for _ in 0..10 {
            host.send(Target::Broadcast, &[1], Reliability::Unreliable).unwrap();
            host.send(Target::Broadcast, &[2], Reliability::Reliable).unwrap();
        }
        assert_eq!(drain_frames(&a), 10);
        assert_eq!(net.stats().dropped, 10);
    }

    #[test]
    fn test_reordered_frames_arrive_after_the_next_one() {
        let conditions = NetworkConditions { packet_loss_percent: 0, duplicate_percent: 0, out_of_order_percent: 100 };
        let net = LoopbackNetwork::new(conditions, 1);
        let mut host = net.endpoint(64);
        let mut a = net.endpoint(64);
        let lobby = host.create_lobby().unwrap();
        a.connect(lobby).unwrap();

        host.send(Target::Broadcast, &[1], Reliability::Unreliable).unwrap();
        assert!(a.inbound().is_empty());
        net.set_conditions(NetworkConditions::PERFECT);
        host.send(Target::Broadcast, &[2], Reliability::Unreliable).unwrap();

        let order: Vec<u8> = a
            .inbound()
            .drain()
            .into_iter()
            .filter_map(|i| match i {
                Inbound::Frame { bytes, .. } => bytes.first().copied(),
                _ => None,
            })
            .collect();
        assert_eq!(order, vec![2, 1]);
    }
}
