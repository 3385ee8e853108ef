//! # Lobby Protocol
//!
//! Logical messages and their binary framing.
//!
//! ## Frame Structure
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (4 bytes)                                             │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Magic (1) │ Flags (1) │ Count (2)                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Messages (variable, split near 1200 bytes)                   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Frames holding a critical message travel on the reliable channel. Snapshot,
//! typing and heartbeat frames travel unreliable and may be lost or reordered.

mod messages;
mod serialization;

pub use messages::{
    Manifest, Message, MessageKind, PeerRecord, RejectReason, SnapshotRecord, SpawnRecord,
};
pub use serialization::{
    decode_frame, decode_message, encode_message, frame_is_critical, DecodedFrame, FrameEncoder,
    MessageReader, MessageWriter, FLAG_CRITICAL, FRAME_HEADER_SIZE, FRAME_MAGIC, FRAME_SPLIT_SIZE,
    MAX_FIELD_LEN,
};
