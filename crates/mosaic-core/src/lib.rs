//! # Mosaic Core
//!
//! Shared domain types for the mosaic distributed simulation: the global
//! space and its per-rank chunks, scalar grids with halo borders, agent
//! records, and the model descriptor consumed once at setup.

pub mod error;
pub mod grid;
pub mod model;
pub mod space;
pub mod types;

pub use error::GridError;
pub use grid::{BorderSlice, Grid, GridRegistry};
pub use model::{
    AgentPlacement, GridSpec, ModelDescriptor, StateEntry, StateKind, StateSchema, StateValue,
};
pub use space::{Chunk, SpaceBounds};
pub use types::{AgentId, AgentRecord, Dir, Position, Tick, DIRECTIONS};
