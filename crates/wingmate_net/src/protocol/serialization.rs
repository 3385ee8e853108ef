//! # Message Serialization
//!
//! Little-endian writer and reader plus the frame codec.
//!
//! ## Frame Layout
//!
//! ```text
//! ┌───────┬───────┬──────────┬──────────────────────────────────────────┐
//! │ magic │ flags │ count u16│ count x [len u32][kind u8][body ...]      │
//! └───────┴───────┴──────────┴──────────────────────────────────────────┘
//! ```
//!
//! `len` covers the kind byte and the body, so a receiver can skip a message
//! it cannot decode and keep reading the rest of the frame.

use bytemuck::{bytes_of, Pod};
use wingmate_shared::{Team, Transform, Vec3};

use super::messages::{
    Manifest, Message, MessageKind, PeerRecord, RejectReason, SnapshotRecord, SpawnRecord,
};
use crate::error::{DecodeError, DecodeResult};
use crate::lobby::{LobbyId, PeerId};
use crate::registry::{EntityId, EntityKind};
use crate::world::{ObjectKind, WorldObject};

/// First byte of every frame.
pub const FRAME_MAGIC: u8 = 0xA7;

/// Magic, flags and message count.
pub const FRAME_HEADER_SIZE: usize = 4;

/// A frame holding more than one message is closed before it grows past this.
/// A single larger message still travels alone.
pub const FRAME_SPLIT_SIZE: usize = 1200;

/// Flag bit set when the frame holds at least one critical message.
pub const FLAG_CRITICAL: u8 = 0b0000_0001;

/// Longest byte string or payload a length-prefixed field can carry.
pub const MAX_FIELD_LEN: usize = u16::MAX as usize;

const MESSAGE_PREFIX_SIZE: usize = 4;

/// Growable little-endian writer.
#[derive(Debug, Default)]
pub struct MessageWriter {
    buffer: Vec<u8>,
}

impl MessageWriter {
    /// Creates an empty writer.
    #[must_use]
    pub const fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Creates an empty writer with room for `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { buffer: Vec::with_capacity(capacity) }
    }

    /// Returns the number of bytes written.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if no bytes have been written.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Returns the written data.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Consumes the writer.
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }

    /// Writes a single byte.
    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Writes a bool as one byte.
    #[inline]
    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    /// Writes a u16 in little-endian format.
    #[inline]
    pub fn write_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a u32 in little-endian format.
    #[inline]
    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a u64 in little-endian format.
    #[inline]
    pub fn write_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a f32 in little-endian format.
    #[inline]
    pub fn write_f32(&mut self, value: f32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a Pod type directly.
    #[inline]
    pub fn write_pod<T: Pod>(&mut self, value: &T) {
        self.buffer.extend_from_slice(bytes_of(value));
    }

    /// Writes a u16 length prefix followed by the bytes.
    ///
    /// Returns false and writes nothing if the slice is too long.
    pub fn write_bytes(&mut self, value: &[u8]) -> bool {
        let Ok(len) = u16::try_from(value.len()) else {
            return false;
        };
        self.write_u16(len);
        self.buffer.extend_from_slice(value);
        true
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn write_str(&mut self, value: &str) -> bool {
        self.write_bytes(value.as_bytes())
    }

    fn patch_u32(&mut self, at: usize, value: u32) {
        self.buffer[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn truncate(&mut self, len: usize) {
        self.buffer.truncate(len);
    }
}

/// Little-endian reader over a borrowed buffer.
pub struct MessageReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> MessageReader<'a> {
    /// Creates a reader at the start of `buffer`.
    #[must_use]
    pub const fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    /// Returns the number of bytes remaining.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    /// Takes the next `len` bytes.
    pub fn take(&mut self, len: usize) -> DecodeResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(DecodeError::Truncated);
        }
        let slice = &self.buffer[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> DecodeResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Reads a single byte.
    #[inline]
    pub fn read_u8(&mut self) -> DecodeResult<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    /// Reads a bool, rejecting anything but 0 and 1.
    pub fn read_bool(&mut self, field: &'static str) -> DecodeResult<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(DecodeError::InvalidField { field }),
        }
    }

    /// Reads a u16 in little-endian format.
    #[inline]
    pub fn read_u16(&mut self) -> DecodeResult<u16> {
        self.take_array().map(u16::from_le_bytes)
    }

    /// Reads a u32 in little-endian format.
    #[inline]
    pub fn read_u32(&mut self) -> DecodeResult<u32> {
        self.take_array().map(u32::from_le_bytes)
    }

    /// Reads a u64 in little-endian format.
    #[inline]
    pub fn read_u64(&mut self) -> DecodeResult<u64> {
        self.take_array().map(u64::from_le_bytes)
    }

    /// Reads a f32 in little-endian format.
    #[inline]
    pub fn read_f32(&mut self) -> DecodeResult<f32> {
        self.take_array().map(f32::from_le_bytes)
    }

    /// Reads a Pod type directly.
    pub fn read_pod<T: Pod>(&mut self) -> DecodeResult<T> {
        let slice = self.take(std::mem::size_of::<T>())?;
        bytemuck::try_pod_read_unaligned(slice).map_err(|_| DecodeError::Truncated)
    }

    /// Reads a u16 length prefix and that many bytes.
    pub fn read_bytes(&mut self) -> DecodeResult<Vec<u8>> {
        let len = usize::from(self.read_u16()?);
        Ok(self.take(len)?.to_vec())
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_str(&mut self, field: &'static str) -> DecodeResult<String> {
        String::from_utf8(self.read_bytes()?).map_err(|_| DecodeError::InvalidUtf8 { field })
    }
}

// =============================================================================
// FIELD CODECS
// =============================================================================

fn write_entity_id(writer: &mut MessageWriter, id: EntityId) {
    writer.write_u64(id.origin.0);
    writer.write_u32(id.serial);
}

fn read_entity_id(reader: &mut MessageReader<'_>) -> DecodeResult<EntityId> {
    let origin = PeerId(reader.read_u64()?);
    let serial = reader.read_u32()?;
    Ok(EntityId::new(origin, serial))
}

fn read_team(reader: &mut MessageReader<'_>) -> DecodeResult<Team> {
    Team::from_u8(reader.read_u8()?).ok_or(DecodeError::InvalidField { field: "team" })
}

fn read_transform(reader: &mut MessageReader<'_>) -> DecodeResult<Transform> {
    let transform: Transform = reader.read_pod()?;
    if !transform.is_finite() {
        return Err(DecodeError::InvalidField { field: "transform" });
    }
    Ok(transform)
}

fn write_velocity(writer: &mut MessageWriter, velocity: Option<Vec3>) {
    match velocity {
        Some(v) => {
            writer.write_u8(1);
            writer.write_pod(&v);
        }
        None => writer.write_u8(0),
    }
}

fn read_velocity(reader: &mut MessageReader<'_>) -> DecodeResult<Option<Vec3>> {
    if !reader.read_bool("velocity flag")? {
        return Ok(None);
    }
    let v: Vec3 = reader.read_pod()?;
    if !v.is_finite() {
        return Err(DecodeError::InvalidField { field: "velocity" });
    }
    Ok(Some(v))
}

fn write_peer(writer: &mut MessageWriter, peer: &PeerRecord) -> bool {
    writer.write_u64(peer.peer_id.0);
    let ok = writer.write_str(&peer.display_name);
    writer.write_u8(peer.team.to_u8());
    writer.write_bool(peer.is_host);
    ok
}

fn read_peer(reader: &mut MessageReader<'_>) -> DecodeResult<PeerRecord> {
    Ok(PeerRecord {
        peer_id: PeerId(reader.read_u64()?),
        display_name: reader.read_str("display name")?,
        team: read_team(reader)?,
        is_host: reader.read_bool("is_host")?,
    })
}

fn write_spawn(writer: &mut MessageWriter, spawn: &SpawnRecord) -> bool {
    write_entity_id(writer, spawn.id);
    writer.write_u8(spawn.kind.to_u8());
    writer.write_u64(spawn.owner.0);
    writer.write_bool(spawn.persistent);
    writer.write_u32(spawn.epoch);
    writer.write_u32(spawn.seq);
    writer.write_u64(spawn.timestamp_ms);
    writer.write_pod(&spawn.transform);
    write_velocity(writer, spawn.velocity);
    writer.write_bytes(&spawn.payload)
}

fn read_spawn(reader: &mut MessageReader<'_>) -> DecodeResult<SpawnRecord> {
    let id = read_entity_id(reader)?;
    let kind = EntityKind::from_u8(reader.read_u8()?)
        .ok_or(DecodeError::InvalidField { field: "entity kind" })?;
    Ok(SpawnRecord {
        id,
        kind,
        owner: PeerId(reader.read_u64()?),
        persistent: reader.read_bool("persistent")?,
        epoch: reader.read_u32()?,
        seq: reader.read_u32()?,
        timestamp_ms: reader.read_u64()?,
        transform: read_transform(reader)?,
        velocity: read_velocity(reader)?,
        payload: reader.read_bytes()?,
    })
}

fn write_object(writer: &mut MessageWriter, object: &WorldObject) {
    writer.write_u32(object.id);
    writer.write_u8(object.kind.to_u8());
    writer.write_u8(object.state);
    writer.write_u32(object.revision);
    writer.write_u64(object.author.0);
}

fn read_object(reader: &mut MessageReader<'_>) -> DecodeResult<WorldObject> {
    let id = reader.read_u32()?;
    let kind = ObjectKind::from_u8(reader.read_u8()?)
        .ok_or(DecodeError::InvalidField { field: "object kind" })?;
    Ok(WorldObject {
        id,
        kind,
        state: reader.read_u8()?,
        revision: reader.read_u32()?,
        author: PeerId(reader.read_u64()?),
    })
}

/// Writes a count prefix, refusing lists longer than `u32::MAX`.
fn write_count(writer: &mut MessageWriter, len: usize) -> bool {
    let Ok(len) = u32::try_from(len) else {
        return false;
    };
    writer.write_u32(len);
    true
}

/// Reads a count prefix and caps the allocation at what the buffer could hold.
fn read_list<T>(
    reader: &mut MessageReader<'_>,
    mut read_one: impl FnMut(&mut MessageReader<'_>) -> DecodeResult<T>,
) -> DecodeResult<Vec<T>> {
    let count = reader.read_u32()? as usize;
    let mut out = Vec::with_capacity(count.min(reader.remaining()));
    for _ in 0..count {
        out.push(read_one(reader)?);
    }
    Ok(out)
}

// =============================================================================
// MESSAGES
// =============================================================================

fn write_body(writer: &mut MessageWriter, message: &Message) -> bool {
    match message {
        Message::JoinRequest { display_name, team } => {
            let ok = writer.write_str(display_name);
            writer.write_u8(team.to_u8());
            ok
        }
        Message::JoinManifest(manifest) => {
            writer.write_u64(manifest.lobby.0);
            let mut ok = writer.write_str(&manifest.scene);
            writer.write_u32(manifest.epoch);
            ok &= write_count(writer, manifest.peers.len());
            for peer in &manifest.peers {
                ok &= write_peer(writer, peer);
            }
            ok &= write_count(writer, manifest.entities.len());
            for spawn in &manifest.entities {
                ok &= write_spawn(writer, spawn);
            }
            ok &= write_count(writer, manifest.objects.len());
            for object in &manifest.objects {
                write_object(writer, object);
            }
            ok
        }
        Message::JoinRejected { reason } => {
            writer.write_u8(*reason as u8);
            true
        }
        Message::LeaveNotice | Message::Heartbeat => true,
        Message::PeerState(peer) => write_peer(writer, peer),
        Message::EntitySpawn(spawn) => write_spawn(writer, spawn),
        Message::EntitySnapshot(snapshot) => {
            write_entity_id(writer, snapshot.id);
            writer.write_u32(snapshot.seq);
            writer.write_u64(snapshot.timestamp_ms);
            writer.write_pod(&snapshot.transform);
            write_velocity(writer, snapshot.velocity);
            writer.write_bytes(&snapshot.payload)
        }
        Message::EntityDespawn { id } => {
            write_entity_id(writer, *id);
            true
        }
        Message::ChatMessage { text } => writer.write_str(text),
        Message::TypingState { typing } => {
            writer.write_bool(*typing);
            true
        }
        Message::SceneChange { scene, epoch } => {
            let ok = writer.write_str(scene);
            writer.write_u32(*epoch);
            ok
        }
        Message::WorldObjectState(object) => {
            write_object(writer, object);
            true
        }
    }
}

fn read_body(kind: MessageKind, reader: &mut MessageReader<'_>) -> DecodeResult<Message> {
    Ok(match kind {
        MessageKind::JoinRequest => Message::JoinRequest {
            display_name: reader.read_str("display name")?,
            team: read_team(reader)?,
        },
        MessageKind::JoinManifest => Message::JoinManifest(Manifest {
            lobby: LobbyId(reader.read_u64()?),
            scene: reader.read_str("scene")?,
            epoch: reader.read_u32()?,
            peers: read_list(reader, read_peer)?,
            entities: read_list(reader, read_spawn)?,
            objects: read_list(reader, read_object)?,
        }),
        MessageKind::JoinRejected => Message::JoinRejected {
            reason: RejectReason::from_u8(reader.read_u8()?)
                .ok_or(DecodeError::InvalidField { field: "reject reason" })?,
        },
        MessageKind::LeaveNotice => Message::LeaveNotice,
        MessageKind::PeerState => Message::PeerState(read_peer(reader)?),
        MessageKind::EntitySpawn => Message::EntitySpawn(read_spawn(reader)?),
        MessageKind::EntitySnapshot => Message::EntitySnapshot(SnapshotRecord {
            id: read_entity_id(reader)?,
            seq: reader.read_u32()?,
            timestamp_ms: reader.read_u64()?,
            transform: read_transform(reader)?,
            velocity: read_velocity(reader)?,
            payload: reader.read_bytes()?,
        }),
        MessageKind::EntityDespawn => Message::EntityDespawn { id: read_entity_id(reader)? },
        MessageKind::ChatMessage => Message::ChatMessage { text: reader.read_str("chat text")? },
        MessageKind::TypingState => Message::TypingState { typing: reader.read_bool("typing")? },
        MessageKind::SceneChange => Message::SceneChange {
            scene: reader.read_str("scene")?,
            epoch: reader.read_u32()?,
        },
        MessageKind::WorldObjectState => Message::WorldObjectState(read_object(reader)?),
        MessageKind::Heartbeat => Message::Heartbeat,
    })
}

/// Encodes one message with its length prefix.
///
/// Returns `None` if a string or payload exceeds its length prefix.
#[must_use]
pub fn encode_message(message: &Message) -> Option<Vec<u8>> {
    let mut writer = MessageWriter::with_capacity(64);
    if append_message(&mut writer, message) {
        Some(writer.into_inner())
    } else {
        None
    }
}

fn append_message(writer: &mut MessageWriter, message: &Message) -> bool {
    let start = writer.len();
    writer.write_u32(0);
    writer.write_u8(message.kind() as u8);
    if !write_body(writer, message) {
        writer.truncate(start);
        return false;
    }
    let Ok(len) = u32::try_from(writer.len() - start - MESSAGE_PREFIX_SIZE) else {
        writer.truncate(start);
        return false;
    };
    writer.patch_u32(start, len);
    true
}

/// Decodes one message from its kind byte onward.
pub fn decode_message(bytes: &[u8]) -> DecodeResult<Message> {
    let mut reader = MessageReader::new(bytes);
    let kind_byte = reader.read_u8()?;
    let kind = MessageKind::from_u8(kind_byte).ok_or(DecodeError::UnknownKind(kind_byte))?;
    let message = read_body(kind, &mut reader)?;
    match reader.remaining() {
        0 => Ok(message),
        extra => Err(DecodeError::TrailingBytes(extra)),
    }
}

// =============================================================================
// FRAMES
// =============================================================================

/// Packs already-encoded messages into one frame.
#[derive(Debug)]
pub struct FrameEncoder {
    writer: MessageWriter,
    count: u16,
    critical: bool,
}

impl FrameEncoder {
    /// Starts an empty frame.
    #[must_use]
    pub fn new() -> Self {
        let mut writer = MessageWriter::with_capacity(FRAME_SPLIT_SIZE);
        writer.write_u8(FRAME_MAGIC);
        writer.write_u8(0);
        writer.write_u16(0);
        Self { writer, count: 0, critical: false }
    }

    /// Number of messages in the frame.
    #[inline]
    #[must_use]
    pub const fn message_count(&self) -> u16 {
        self.count
    }

    /// Returns true if no message has been added.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Returns true if the frame holds a critical message.
    #[inline]
    #[must_use]
    pub const fn is_critical(&self) -> bool {
        self.critical
    }

    /// Returns true if `encoded` can join this frame without splitting.
    #[must_use]
    pub fn fits(&self, encoded: &[u8]) -> bool {
        self.count < u16::MAX
            && (self.is_empty() || self.writer.len() + encoded.len() <= FRAME_SPLIT_SIZE)
    }

    /// Appends a message produced by [`encode_message`].
    pub fn push_encoded(&mut self, encoded: &[u8], critical: bool) {
        self.writer.buffer.extend_from_slice(encoded);
        self.count += 1;
        self.critical |= critical;
    }

    /// Encodes and appends a message. Returns false if it cannot be encoded.
    pub fn push(&mut self, message: &Message) -> bool {
        if !append_message(&mut self.writer, message) {
            return false;
        }
        self.count += 1;
        self.critical |= message.is_critical();
        true
    }

    /// Finalizes the header and returns the frame bytes.
    #[must_use]
    pub fn finish(mut self) -> Vec<u8> {
        self.writer.buffer[1] = if self.critical { FLAG_CRITICAL } else { 0 };
        self.writer.buffer[2..4].copy_from_slice(&self.count.to_le_bytes());
        self.writer.into_inner()
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// A frame split into its messages. Each message decodes independently.
#[derive(Debug)]
pub struct DecodedFrame {
    /// Header flag: the sender marked this frame critical.
    pub critical: bool,
    /// One entry per message, in frame order.
    pub messages: Vec<DecodeResult<Message>>,
}

/// Reads the critical flag from a frame header without decoding it.
#[must_use]
pub fn frame_is_critical(bytes: &[u8]) -> bool {
    bytes.len() >= FRAME_HEADER_SIZE && bytes[0] == FRAME_MAGIC && bytes[1] & FLAG_CRITICAL != 0
}

/// Splits a frame into messages.
///
/// A bad header rejects the whole frame. A message whose length prefix runs
/// past the end yields one `Truncated` entry and ends the frame.
pub fn decode_frame(bytes: &[u8]) -> DecodeResult<DecodedFrame> {
    let mut reader = MessageReader::new(bytes);
    let magic = reader.read_u8()?;
    if magic != FRAME_MAGIC {
        return Err(DecodeError::BadMagic(magic));
    }
    let flags = reader.read_u8()?;
    let count = reader.read_u16()?;

    let mut messages = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let body = reader.read_u32().and_then(|len| reader.take(len as usize));
        match body {
            Ok(body) => messages.push(decode_message(body)),
            Err(err) => {
                messages.push(Err(err));
                break;
            }
        }
    }

    Ok(DecodedFrame { critical: flags & FLAG_CRITICAL != 0, messages })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wingmate_shared::Quaternion;

    fn sample_spawn() -> SpawnRecord {
        SpawnRecord {
            id: EntityId::new(PeerId(7), 3),
            kind: EntityKind::Enemy,
            owner: PeerId(7),
            persistent: false,
            epoch: 2,
            seq: 11,
            timestamp_ms: 1_500,
            transform: Transform::new(Vec3::new(1.0, 2.0, 3.0), Quaternion::from_yaw(0.5), 1.0),
            velocity: Some(Vec3::new(0.0, 0.0, 4.0)),
            payload: vec![9, 8, 7],
        }
    }

    fn single(message: &Message) -> Message {
        let mut frame = FrameEncoder::new();
        assert!(frame.push(message));
        let decoded = decode_frame(&frame.finish()).unwrap();
        assert_eq!(decoded.messages.len(), 1);
        decoded.messages.into_iter().next().unwrap().unwrap()
    }

    #[test]
    fn test_manifest_survives_the_wire() {
        let manifest = Manifest {
            lobby: LobbyId(42),
            scene: "Level_02".into(),
            epoch: 2,
            peers: vec![PeerRecord {
                peer_id: PeerId(7),
                display_name: "Ana".into(),
                team: Team::Pink,
                is_host: true,
            }],
            entities: vec![sample_spawn()],
            objects: vec![WorldObject {
                id: 5,
                kind: ObjectKind::Pickup,
                state: 1,
                revision: 3,
                author: PeerId(7),
            }],
        };
        let message = Message::JoinManifest(manifest);
        assert_eq!(single(&message), message);
    }

    #[test]
    fn test_snapshot_without_velocity() {
        let message = Message::EntitySnapshot(SnapshotRecord {
            id: EntityId::new(PeerId(1), 0),
            seq: 4,
            timestamp_ms: 99,
            transform: Transform::IDENTITY,
            velocity: None,
            payload: Vec::new(),
        });
        assert_eq!(single(&message), message);
    }

    #[test]
    fn test_critical_flag_follows_contents() {
        let mut frame = FrameEncoder::new();
        assert!(frame.push(&Message::Heartbeat));
        assert!(frame.push(&Message::TypingState { typing: true }));
        let bytes = frame.finish();
        assert!(!frame_is_critical(&bytes));

        let mut frame = FrameEncoder::new();
        assert!(frame.push(&Message::Heartbeat));
        assert!(frame.push(&Message::LeaveNotice));
        let bytes = frame.finish();
        assert!(frame_is_critical(&bytes));
        assert!(decode_frame(&bytes).unwrap().critical);
    }

    #[test]
    fn test_unknown_kind_only_drops_that_message() {
        let mut frame = FrameEncoder::new();
        assert!(frame.push(&Message::ChatMessage { text: "one".into() }));
        frame.push_encoded(&[1, 0, 0, 0, 200], false);
        assert!(frame.push(&Message::ChatMessage { text: "two".into() }));

        let decoded = decode_frame(&frame.finish()).unwrap();
        assert_eq!(decoded.messages.len(), 3);
        assert_eq!(decoded.messages[1], Err(DecodeError::UnknownKind(200)));
        assert_eq!(
            decoded.messages[2],
            Ok(Message::ChatMessage { text: "two".into() })
        );
    }

    #[test]
    fn test_bad_magic_rejects_frame() {
        assert_eq!(decode_frame(&[0x00, 0, 0, 0]).unwrap_err(), DecodeError::BadMagic(0));
        assert_eq!(decode_frame(&[FRAME_MAGIC]).unwrap_err(), DecodeError::Truncated);
    }

    #[test]
    fn test_truncated_message_ends_frame() {
        let mut frame = FrameEncoder::new();
        assert!(frame.push(&Message::LeaveNotice));
        assert!(frame.push(&Message::ChatMessage { text: "cut short".into() }));
        let mut bytes = frame.finish();
        bytes.truncate(bytes.len() - 3);

        let decoded = decode_frame(&bytes).unwrap();
        assert_eq!(decoded.messages[0], Ok(Message::LeaveNotice));
        assert_eq!(decoded.messages[1], Err(DecodeError::Truncated));
    }

    #[test]
    fn test_non_finite_transform_is_rejected() {
        let mut spawn = sample_spawn();
        spawn.transform.position.x = f32::NAN;
        let encoded = encode_message(&Message::EntitySpawn(spawn)).unwrap();
        assert_eq!(
            decode_message(&encoded[MESSAGE_PREFIX_SIZE..]),
            Err(DecodeError::InvalidField { field: "transform" })
        );
    }

    #[test]
    fn test_trailing_bytes_are_rejected() {
        let mut encoded = encode_message(&Message::Heartbeat).unwrap();
        encoded.push(0);
        assert_eq!(
            decode_message(&encoded[MESSAGE_PREFIX_SIZE..]),
            Err(DecodeError::TrailingBytes(1))
        );
    }

    #[test]
    fn test_oversized_payload_is_refused() {
        let mut spawn = sample_spawn();
        spawn.payload = vec![0; usize::from(u16::MAX) + 1];
        assert!(encode_message(&Message::EntitySpawn(spawn.clone())).is_none());

        let mut frame = FrameEncoder::new();
        assert!(!frame.push(&Message::EntitySpawn(spawn)));
        assert!(frame.is_empty());
        assert_eq!(frame.finish().len(), FRAME_HEADER_SIZE);
    }

    #[test]
    fn test_frame_splits_past_threshold() {
        let big = encode_message(&Message::ChatMessage { text: "x".repeat(1000) }).unwrap();
        let mut frame = FrameEncoder::new();
        assert!(frame.fits(&big));
        frame.push_encoded(&big, true);
        assert!(!frame.fits(&big));
    }
}
