//! # Protocol Constants
//!
//! Values every peer must agree on. Per-session tunables live in
//! `wingmate_net::SessionConfig`; these are the defaults it starts from and the
//! hard limits receivers enforce on untrusted input.

// =============================================================================
// SIMULATION
// =============================================================================

/// Default simulation tick rate (updates per second).
pub const DEFAULT_TICK_RATE: u32 = 60;

/// Maximum peers in one lobby, host included.
pub const MAX_PEERS: usize = 8;

// =============================================================================
// LOBBY
// =============================================================================

/// Chat messages longer than this many characters are truncated.
pub const MAX_CHAT_LENGTH: usize = 128;

/// Display names longer than this many characters are truncated.
pub const MAX_DISPLAY_NAME_LENGTH: usize = 32;

/// Receivers clear a peer's typing flag this long after its last update.
pub const TYPING_TIMEOUT_MS: u64 = 3_000;

/// How many typing names the banner lists before "and others".
pub const TYPING_BANNER_NAMES: usize = 3;

// =============================================================================
// REPLICATION
// =============================================================================

/// Replicas render this far behind the newest received sample.
pub const INTERPOLATION_DELAY_MS: u64 = 100;

/// Replicas extrapolate past their newest sample for at most this long.
pub const EXTRAPOLATION_LIMIT_MS: u64 = 250;

/// Samples kept per replica. Never less than two.
pub const INTERPOLATION_BUFFER_LEN: usize = 16;

// =============================================================================
// LIVENESS
// =============================================================================

/// Interval between heartbeats sent by an otherwise idle peer.
pub const HEARTBEAT_INTERVAL_MS: u64 = 500;

/// Consecutive missed heartbeats before a peer is declared timed out.
pub const MAX_MISSED_HEARTBEATS: u32 = 6;

/// How long a join waits for the host's manifest.
pub const JOIN_TIMEOUT_MS: u64 = 5_000;
