//! Per-tick batching, inbound routing and peer liveness.

use std::collections::{HashMap, HashSet};

use crossbeam_channel::{unbounded, Receiver, Sender};

use super::{Reliability, Target, Transport};
use crate::lobby::PeerId;
use crate::protocol::{decode_frame, encode_message, FrameEncoder, Message, MessageKind};
use crate::error::DecodeError;

/// A routed inbound message.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    /// Sender.
    pub from: PeerId,
    /// Decoded message.
    pub message: Message,
}

/// Dispatch counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Frames handed to the transport.
    pub frames_sent: u64,
    /// Messages handed to the transport.
    pub messages_sent: u64,
    /// Frames the transport refused.
    pub send_errors: u64,
    /// Outbound messages that could not be encoded.
    pub encode_errors: u64,
    /// Snapshots replaced by a newer one before flushing.
    pub coalesced: u64,
    /// Frames received.
    pub frames_received: u64,
    /// Frames or messages that failed to decode.
    pub malformed: u64,
    /// Messages of an unknown kind.
    pub unknown_kind: u64,
    /// Decoded messages with no subscriber.
    pub unrouted: u64,
}

/// Outbound batching and inbound routing for one peer.
pub struct Dispatcher {
    outbound: Vec<(Target, Message)>,
    routes: Vec<Vec<Sender<Envelope>>>,
    last_heard: HashMap<PeerId, u64>,
    last_sent_ms: Option<u64>,
    heartbeat_interval_ms: u64,
    timeout_ms: u64,
    stats: DispatchStats,
}

impl Dispatcher {
    /// Creates a dispatcher. A peer silent for `heartbeat_interval_ms *
    /// max_missed_heartbeats` times out.
    #[must_use]
    pub fn new(heartbeat_interval_ms: u64, max_missed_heartbeats: u32) -> Self {
        Self {
            outbound: Vec::new(),
            routes: (0..MessageKind::COUNT).map(|_| Vec::new()).collect(),
            last_heard: HashMap::new(),
            last_sent_ms: None,
            heartbeat_interval_ms,
            timeout_ms: heartbeat_interval_ms.saturating_mul(u64::from(max_missed_heartbeats.max(1))),
            stats: DispatchStats::default(),
        }
    }

    /// Counters.
    #[must_use]
    pub const fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Messages waiting for the next flush.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.outbound.len()
    }

    // =========================================================================
    // OUTBOUND
    // =========================================================================

    /// Queues a message for the next flush.
    pub fn enqueue(&mut self, target: Target, message: Message) {
        self.outbound.push((target, message));
    }

    /// Queues a message for every other member.
    pub fn broadcast(&mut self, message: Message) {
        self.enqueue(Target::Broadcast, message);
    }

    /// Drops everything queued.
    pub fn discard_outbound(&mut self) {
        self.outbound.clear();
    }

    /// Returns true if nothing was sent for a heartbeat interval.
    #[must_use]
    pub fn heartbeat_due(&self, now_ms: u64) -> bool {
        self.last_sent_ms
            .map_or(true, |sent| now_ms.saturating_sub(sent) >= self.heartbeat_interval_ms)
    }

    /// Sends everything queued since the last flush.
    ///
    /// Snapshots for the same entity and target collapse into the newest.
    /// Messages are grouped per target and reliability class, keeping enqueue
    /// order inside each group. Returns the number of frames sent.
    pub fn flush<T: Transport + ?Sized>(&mut self, transport: &mut T, now_ms: u64) -> usize {
        if self.outbound.is_empty() {
            return 0;
        }
        let queued = std::mem::take(&mut self.outbound);

        // Newest snapshot wins: walk backwards, keep the first seen per key.
        let mut seen = HashSet::new();
        let mut keep = vec![true; queued.len()];
        for (i, (target, message)) in queued.iter().enumerate().rev() {
            if let Message::EntitySnapshot(snapshot) = message {
                if !seen.insert((*target, snapshot.id)) {
                    keep[i] = false;
                    self.stats.coalesced += 1;
                }
            }
        }

        let mut groups: Vec<((Target, Reliability), Vec<Vec<u8>>)> = Vec::new();
        for ((target, message), keep) in queued.into_iter().zip(keep) {
            if !keep {
                continue;
            }
            let Some(encoded) = encode_message(&message) else {
                tracing::warn!("Dropping unencodable {:?} message", message.kind());
                self.stats.encode_errors += 1;
                continue;
            };
            let class = if message.is_critical() { Reliability::Reliable } else { Reliability::Unreliable };
            match groups.iter_mut().find(|(key, _)| *key == (target, class)) {
                Some((_, list)) => list.push(encoded),
                None => groups.push(((target, class), vec![encoded])),
            }
        }

        let mut frames = 0;
        for ((target, class), messages) in groups {
            let critical = class == Reliability::Reliable;
            let mut encoder = FrameEncoder::new();
            for encoded in messages {
                if !encoder.fits(&encoded) {
                    frames += self.send_frame(transport, target, class, encoder);
                    encoder = FrameEncoder::new();
                }
                encoder.push_encoded(&encoded, critical);
            }
            if !encoder.is_empty() {
                frames += self.send_frame(transport, target, class, encoder);
            }
        }
        self.last_sent_ms = Some(now_ms);
        frames
    }

    fn send_frame<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        target: Target,
        class: Reliability,
        encoder: FrameEncoder,
    ) -> usize {
        let count = u64::from(encoder.message_count());
        match transport.send(target, &encoder.finish(), class) {
            Ok(()) => {
                self.stats.frames_sent += 1;
                self.stats.messages_sent += count;
                1
            }
            Err(err) => {
                tracing::debug!("Send to {:?} failed: {}", target, err);
                self.stats.send_errors += 1;
                0
            }
        }
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    /// Registers a subscriber for one message kind.
    ///
    /// Every subscriber of a kind receives its own copy. Dropping the
    /// receiver unsubscribes it on the next routed message.
    #[must_use]
    pub fn subscribe(&mut self, kind: MessageKind) -> Receiver<Envelope> {
        let (tx, rx) = unbounded();
        self.routes[kind.index()].push(tx);
        rx
    }

    /// Drops every subscriber sender. Receivers observe disconnection once drained.
    pub fn unsubscribe_all(&mut self) {
        for senders in &mut self.routes {
            senders.clear();
        }
    }

    /// Decodes a frame and routes each message to its subscribers.
    ///
    /// Returns the number of messages routed. Bad frames and messages are
    /// counted and dropped. The sender counts as heard only if at least one
    /// message decodes.
    pub fn ingest(&mut self, from: PeerId, bytes: &[u8], now_ms: u64) -> usize {
        self.stats.frames_received += 1;

        let frame = match decode_frame(bytes) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::debug!("Dropping malformed frame from {}: {}", from, err);
                self.stats.malformed += 1;
                return 0;
            }
        };

        let mut routed = 0;
        let mut decoded = false;
        for message in frame.messages {
            match message {
                Ok(message) => {
                    decoded = true;
                    routed += usize::from(self.route(from, message));
                }
                Err(DecodeError::UnknownKind(kind)) => {
                    tracing::debug!("Dropping unknown message kind {} from {}", kind, from);
                    self.stats.unknown_kind += 1;
                }
                Err(err) => {
                    tracing::debug!("Dropping malformed message from {}: {}", from, err);
                    self.stats.malformed += 1;
                }
            }
        }
        if decoded {
            self.heard(from, now_ms);
        }
        routed
    }

    fn route(&mut self, from: PeerId, message: Message) -> bool {
        let senders = &mut self.routes[message.kind().index()];
        let envelope = Envelope { from, message };
        senders.retain(|tx| tx.send(envelope.clone()).is_ok());
        if senders.is_empty() {
            self.stats.unrouted += 1;
            return false;
        }
        true
    }

    // =========================================================================
    // LIVENESS
    // =========================================================================

    /// Starts tracking a peer as if just heard from.
    pub fn track_peer(&mut self, peer: PeerId, now_ms: u64) {
        self.last_heard.insert(peer, now_ms);
    }

    /// Stops tracking a peer.
    pub fn forget_peer(&mut self, peer: PeerId) {
        self.last_heard.remove(&peer);
    }

    /// Stops tracking everyone.
    pub fn forget_all(&mut self) {
        self.last_heard.clear();
    }

    /// Refreshes a tracked peer.
    pub fn heard(&mut self, peer: PeerId, now_ms: u64) {
        if let Some(last) = self.last_heard.get_mut(&peer) {
            *last = (*last).max(now_ms);
        }
    }

    /// Time since a tracked peer was last heard.
    #[must_use]
    pub fn silence_ms(&self, peer: PeerId, now_ms: u64) -> Option<u64> {
        self.last_heard.get(&peer).map(|last| now_ms.saturating_sub(*last))
    }

    /// Removes and returns peers silent for the full timeout, in id order.
    pub fn poll_timeouts(&mut self, now_ms: u64) -> Vec<PeerId> {
        let timeout = self.timeout_ms;
        let mut expired: Vec<PeerId> = self
            .last_heard
            .iter()
            .filter(|(_, last)| now_ms.saturating_sub(**last) >= timeout)
            .map(|(peer, _)| *peer)
            .collect();
        expired.sort_unstable();
        for peer in &expired {
            self.last_heard.remove(peer);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConnectError, TransportError};
    use crate::lobby::LobbyId;
    use crate::protocol::SnapshotRecord;
    use crate::registry::EntityId;
    use crate::transport::InboundQueue;
    use wingmate_shared::Transform;

    #[derive(Default)]
    struct Recorder {
        sent: Vec<(Target, Vec<u8>, Reliability)>,
    }

    impl Transport for Recorder {
        fn local_peer(&self) -> PeerId {
            PeerId(1)
        }
        fn inbound(&self) -> InboundQueue {
            InboundQueue::new(8)
        }
        fn create_lobby(&mut self) -> Result<LobbyId, TransportError> {
            Ok(LobbyId(1))
        }
        fn connect(&mut self, _lobby: LobbyId) -> Result<PeerId, ConnectError> {
            Err(ConnectError::LobbyNotFound)
        }
        fn leave_lobby(&mut self) {}
        fn send(&mut self, target: Target, frame: &[u8], reliability: Reliability) -> Result<(), TransportError> {
            self.sent.push((target, frame.to_vec(), reliability));
            Ok(())
        }
    }

    fn snapshot(serial: u32, seq: u32) -> Message {
        Message::EntitySnapshot(SnapshotRecord {
            id: EntityId::new(PeerId(1), serial),
            seq,
            timestamp_ms: u64::from(seq),
            transform: Transform::IDENTITY,
            velocity: None,
            payload: Vec::new(),
        })
    }

    #[test]
    fn test_snapshots_coalesce_to_latest() {
        let mut dispatcher = Dispatcher::new(500, 6);
        let mut transport = Recorder::default();
        dispatcher.broadcast(snapshot(0, 1));
        dispatcher.broadcast(snapshot(1, 1));
        dispatcher.broadcast(snapshot(0, 2));
        dispatcher.broadcast(snapshot(0, 3));

        assert_eq!(dispatcher.flush(&mut transport, 0), 1);
        assert_eq!(dispatcher.stats().coalesced, 2);

        let (_, bytes, class) = &transport.sent[0];
        assert_eq!(*class, Reliability::Unreliable);
        let frame = decode_frame(bytes).unwrap();
        let messages: Vec<_> = frame.messages.into_iter().map(Result::unwrap).collect();
        assert_eq!(messages, vec![snapshot(1, 1), snapshot(0, 3)]);
    }

    #[test]
    fn test_batches_split_by_target_and_class() {
        let mut dispatcher = Dispatcher::new(500, 6);
        let mut transport = Recorder::default();
        dispatcher.broadcast(Message::ChatMessage { text: "a".into() });
        dispatcher.broadcast(snapshot(0, 1));
        dispatcher.enqueue(Target::Peer(PeerId(2)), Message::LeaveNotice);
        dispatcher.broadcast(Message::ChatMessage { text: "b".into() });

        assert_eq!(dispatcher.flush(&mut transport, 0), 3);
        let reliable_broadcast = transport
            .sent
            .iter()
            .find(|(t, _, c)| *t == Target::Broadcast && *c == Reliability::Reliable)
            .unwrap();
        let frame = decode_frame(&reliable_broadcast.1).unwrap();
        assert!(frame.critical);
        assert_eq!(frame.messages.len(), 2);
        assert_eq!(dispatcher.pending(), 0);
    }

    #[test]
    fn test_routing_counts_unrouted_and_malformed() {
        let mut dispatcher = Dispatcher::new(500, 6);
        let chat = dispatcher.subscribe(MessageKind::ChatMessage);

        let mut frame = FrameEncoder::new();
        frame.push(&Message::ChatMessage { text: "hi".into() });
        frame.push(&Message::Heartbeat);
        frame.push_encoded(&[1, 0, 0, 0, 99], false);
        assert_eq!(dispatcher.ingest(PeerId(2), &frame.finish(), 0), 1);
        dispatcher.ingest(PeerId(2), &[1, 2, 3], 0);

        let got = chat.try_recv().unwrap();
        assert_eq!(got.from, PeerId(2));
        assert_eq!(got.message, Message::ChatMessage { text: "hi".into() });
        let stats = dispatcher.stats();
        assert_eq!(stats.unrouted, 1);
        assert_eq!(stats.unknown_kind, 1);
        assert_eq!(stats.malformed, 1);
    }

    #[test]
    fn test_unsubscribe_disconnects_receivers() {
        let mut dispatcher = Dispatcher::new(500, 6);
        let rx = dispatcher.subscribe(MessageKind::Heartbeat);
        dispatcher.unsubscribe_all();
        assert!(rx.recv().is_err());
    }

    #[test]
    fn test_timeout_after_missed_heartbeats() {
        let mut dispatcher = Dispatcher::new(500, 6);
        dispatcher.track_peer(PeerId(2), 0);
        dispatcher.track_peer(PeerId(3), 0);

        let mut frame = FrameEncoder::new();
        frame.push(&Message::Heartbeat);
        dispatcher.ingest(PeerId(3), &frame.finish(), 2_000);

        assert!(dispatcher.poll_timeouts(2_999).is_empty());
        assert_eq!(dispatcher.poll_timeouts(3_000), vec![PeerId(2)]);
        assert_eq!(dispatcher.poll_timeouts(5_000), vec![PeerId(3)]);
        assert_eq!(dispatcher.silence_ms(PeerId(3), 5_000), None);
    }

    #[test]
    fn test_garbage_does_not_keep_peer_alive() {
        let mut dispatcher = Dispatcher::new(500, 6);
        dispatcher.track_peer(PeerId(2), 0);

        dispatcher.ingest(PeerId(2), &[1, 2, 3], 2_000);
        let mut frame = FrameEncoder::new();
        frame.push_encoded(&[1, 0, 0, 0, 99], false);
        dispatcher.ingest(PeerId(2), &frame.finish(), 2_500);
        assert_eq!(dispatcher.silence_ms(PeerId(2), 2_500), Some(2_500));
        assert_eq!(dispatcher.poll_timeouts(3_000), vec![PeerId(2)]);

        dispatcher.track_peer(PeerId(3), 3_000);
        let mut frame = FrameEncoder::new();
        frame.push_encoded(&[1, 0, 0, 0, 99], false);
        frame.push(&Message::Heartbeat);
        dispatcher.ingest(PeerId(3), &frame.finish(), 3_400);
        assert_eq!(dispatcher.silence_ms(PeerId(3), 3_400), Some(0));
    }

    #[test]
    fn test_heartbeat_due_after_idle_interval() {
        let mut dispatcher = Dispatcher::new(500, 6);
        let mut transport = Recorder::default();
        assert!(dispatcher.heartbeat_due(0));
        dispatcher.broadcast(Message::Heartbeat);
        dispatcher.flush(&mut transport, 100);
        assert!(!dispatcher.heartbeat_due(599));
        assert!(dispatcher.heartbeat_due(600));
    }
}
