//! Core types for distributed coordination.
//!
//! This module defines rank identities, message tags with their fixed kind
//! nibbles, and the error taxonomy shared by every component. All errors
//! here are fatal by policy: none is retried or recovered locally, they
//! propagate to process termination with a descriptive log line.

use mosaic_core::error::GridError;
use mosaic_core::types::{Dir, Tick};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A process's integer identity in the distributed group.
///
/// Rank 0 is the master; every other rank is a slave. The role is derived
/// from the rank, never configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct Rank(pub u32);

/// The master rank.
pub const MASTER: Rank = Rank(0);

impl Rank {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    pub fn is_master(&self) -> bool {
        *self == MASTER
    }
}

impl std::fmt::Display for Rank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rank-{}", self.0)
    }
}

/// Data-kind nibble of a message tag. The ranges are fixed constants of the
/// wire discipline, not configurable per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Kind {
    /// Grid border slices exchanged every tick.
    Grid = 1,
    /// Agent records crossing chunk boundaries or scattered at setup.
    Agent = 2,
    /// Setup-protocol traffic (space, grids, agents, static state).
    Setup = 3,
    /// Control commands (e.g. stop).
    Cmd = 4,
    /// Anything else.
    Other = 5,
}

impl Kind {
    pub fn from_nibble(nibble: u8) -> Option<Kind> {
        match nibble {
            1 => Some(Kind::Grid),
            2 => Some(Kind::Agent),
            3 => Some(Kind::Setup),
            4 => Some(Kind::Cmd),
            5 => Some(Kind::Other),
            _ => None,
        }
    }
}

/// Bits 0..4 of a tag: the direction code (1..9) or a per-kind channel code.
const CODE_MASK: u32 = 0x0000_000F;
/// Bits 4..8: the data-kind nibble.
const KIND_SHIFT: u32 = 4;
const KIND_MASK: u32 = 0x0000_00F0;
/// Bits 8..32 are reserved for tick disambiguation and are not set by the
/// border-exchange path.
const TICK_SHIFT: u32 = 8;

/// An integer attached to every message, routing it to the correct logical
/// channel: `direction-code | kind-nibble | reserved tick bits`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag(pub u32);

impl Tag {
    /// Build a tag from a kind and a 4-bit code (a direction code for
    /// [`Kind::Grid`], a phase code for [`Kind::Setup`], a command code for
    /// [`Kind::Cmd`]).
    pub fn new(kind: Kind, code: u8) -> Self {
        debug_assert!(code <= 0x0F);
        Self((code as u32 & CODE_MASK) | ((kind as u32) << KIND_SHIFT))
    }

    pub fn grid(direction_code: u8) -> Self {
        Self::new(Kind::Grid, direction_code)
    }

    pub fn agent(code: u8) -> Self {
        Self::new(Kind::Agent, code)
    }

    pub fn setup(phase_code: u8) -> Self {
        Self::new(Kind::Setup, phase_code)
    }

    pub fn cmd(command_code: u8) -> Self {
        Self::new(Kind::Cmd, command_code)
    }

    /// Stamp the reserved upper bits with a tick number. Kept for future
    /// tick disambiguation; no current sender sets these bits.
    pub fn with_tick(self, tick: Tick) -> Self {
        let low = self.0 & (CODE_MASK | KIND_MASK);
        Self(low | (((tick as u32) & 0x00FF_FFFF) << TICK_SHIFT))
    }

    pub fn code(&self) -> u8 {
        (self.0 & CODE_MASK) as u8
    }

    pub fn kind(&self) -> Option<Kind> {
        Kind::from_nibble(((self.0 & KIND_MASK) >> KIND_SHIFT) as u8)
    }

    pub fn tick_bits(&self) -> u32 {
        self.0 >> TICK_SHIFT
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind() {
            Some(kind) => write!(f, "{:?}/{}", kind, self.code()),
            None => write!(f, "tag({:#x})", self.0),
        }
    }
}

/// A send/receive failure. Fatal at tick granularity: a failure during the
/// border exchange invalidates that tick's halo consistency guarantee, so
/// the policy is fail-fast rather than silently continuing with stale data.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("send to {dest} failed (tag {tag}): {reason}")]
    SendFailed { dest: Rank, tag: Tag, reason: String },

    #[error("receive from {src} failed (tag {tag}): {reason}")]
    ReceiveFailed { src: Rank, tag: Tag, reason: String },

    #[error("receive channel from {src} (tag {tag}) already has a pending receiver")]
    ReceiverBusy { src: Rank, tag: Tag },

    #[error("wire version mismatch: got {got}, expected {expected}")]
    VersionMismatch { got: u16, expected: u16 },

    #[error("envelope from {src} carries tag {got}, expected {expected}")]
    TagMismatch { src: Rank, got: Tag, expected: Tag },

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("border exchange with {neighbor} failed (direction {dir}, kind {kind:?}): {source}")]
    Exchange {
        neighbor: Rank,
        dir: Dir,
        kind: Kind,
        #[source]
        source: Box<TransportError>,
    },
}

/// A failure during the setup protocol. Fatal: setup never retries or
/// resumes from a partial state; the process must be restarted externally.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("invalid model descriptor: {0}")]
    Descriptor(String),

    #[error("transport failure during setup: {0}")]
    Transport(#[from] TransportError),

    #[error("grid construction failed: {0}")]
    Grid(#[from] GridError),

    #[error("static state capture failed: {0}")]
    Replicate(#[from] ReplicateError),

    #[error("model setup routine failed: {0}")]
    Model(String),
}

/// A failure replicating the flat static state. The replicator deliberately
/// supports only flat scalars and named grid references, never arbitrary
/// object graphs.
#[derive(Error, Debug)]
pub enum ReplicateError {
    #[error("state entry {name}: unsupported kind byte {kind:#04x}; only flat primitives and grid references replicate")]
    UnsupportedKind { name: String, kind: u8 },

    #[error("state entry {entry}: grid reference {grid:?} does not resolve against the local grid registry")]
    UnresolvedGrid { entry: String, grid: String },

    #[error("state entry {name} is not declared in the schema")]
    UndeclaredEntry { name: String },

    #[error("state entry {name}: captured {got:?} value does not match declared {want:?} kind")]
    KindMismatch {
        name: String,
        got: mosaic_core::model::StateKind,
        want: mosaic_core::model::StateKind,
    },

    #[error("state wire data truncated while reading {0}")]
    Truncated(&'static str),
}

/// Raised by watchdog expiry: no reset arrived within the armed timeout.
#[derive(Error, Debug, Clone, Copy)]
#[error("liveness timeout: no watchdog reset within {timeout_ms} ms")]
pub struct LivenessTimeout {
    pub timeout_ms: u64,
}

/// Umbrella error for distributed operations.
#[derive(Error, Debug)]
pub enum DistError {
    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Replicate(#[from] ReplicateError),

    #[error(transparent)]
    Liveness(#[from] LivenessTimeout),

    #[error(transparent)]
    Grid(#[from] GridError),

    #[error("context not ready: {0}")]
    NotReady(&'static str),

    #[error("exchange worker task failed: {0}")]
    Join(String),
}

/// Result type for distributed operations.
pub type DistResult<T> = Result<T, DistError>;
