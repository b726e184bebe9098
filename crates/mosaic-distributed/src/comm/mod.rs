//! Rank-addressed messaging primitives.
//!
//! [`CommChannel`] is the abstraction every other component builds on:
//! point-to-point send/receive plus broadcast and scatter collectives, all
//! addressed by `(rank, tag)`. Calls block the calling task until complete
//! or failed; failures surface as [`TransportError`](crate::types::TransportError).
//!
//! Payloads travel inside a versioned [`Envelope`] so receivers validate
//! wire compatibility instead of trusting type identity.

mod memory;
mod wire;

pub use memory::{MemoryChannel, MemoryRouter};
pub use wire::{decode_payload, encode_payload, Envelope, WIRE_VERSION};

use crate::types::{Rank, Tag, TransportError};
use async_trait::async_trait;

/// Point-to-point and collective messaging addressed by `(rank, tag)`.
///
/// Collective semantics follow the usual root convention: on `broadcast`
/// the root passes `Some(payload)` and every rank (root included) gets the
/// payload back; on `scatter` the root passes one payload per destination
/// rank and every rank gets its own portion. Every call blocks until all
/// participating ranks have received their portion.
#[async_trait]
pub trait CommChannel: Send + Sync {
    /// This endpoint's rank.
    fn rank(&self) -> Rank;

    /// Number of ranks in the process group.
    fn world_size(&self) -> u32;

    /// Send `payload` to `dest` on the logical channel `tag`.
    async fn send(&self, dest: Rank, tag: Tag, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Block until a payload arrives from `src` on `tag`.
    async fn receive(&self, src: Rank, tag: Tag) -> Result<Vec<u8>, TransportError>;

    /// Non-blocking probe: a payload from `src` on `tag` if one is queued.
    ///
    /// Used by tick drivers to notice control commands between ticks
    /// without stalling the loop.
    fn try_receive(&self, src: Rank, tag: Tag) -> Result<Option<Vec<u8>>, TransportError>;

    /// Broadcast from `root` to every rank; returns the payload everywhere.
    async fn broadcast(
        &self,
        root: Rank,
        tag: Tag,
        payload: Option<Vec<u8>>,
    ) -> Result<Vec<u8>, TransportError>;

    /// Scatter one payload per rank from `root`; returns the local portion.
    async fn scatter(
        &self,
        root: Rank,
        tag: Tag,
        parts: Option<Vec<Vec<u8>>>,
    ) -> Result<Vec<u8>, TransportError>;
}
