//! # Wingmate Shared
//!
//! Plain data used by every peer in a lobby and by the presentation
//! collaborators that sit on top of the replication core.
//!
//! ## CRITICAL RULE
//!
//! This crate must NEVER depend on:
//! - the networking core (`wingmate_net`)
//! - any rendering, windowing or engine crate
//!
//! If a type needs a socket or a session to make sense, it does not belong here.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod constants;
pub mod math;
pub mod team;

pub use constants::{
    DEFAULT_TICK_RATE, EXTRAPOLATION_LIMIT_MS, MAX_CHAT_LENGTH, MAX_DISPLAY_NAME_LENGTH,
    MAX_PEERS, TYPING_TIMEOUT_MS,
};
pub use math::{Quaternion, Transform, Vec3};
pub use team::{Rgb, Team, TeamData};
