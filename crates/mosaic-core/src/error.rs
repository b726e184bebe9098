//! Error types for mosaic-core operations.

use crate::types::Dir;
use thiserror::Error;

/// Errors raised by grid storage and halo band operations.
#[derive(Error, Debug, Clone)]
pub enum GridError {
    #[error("unknown grid: {0}")]
    UnknownGrid(String),

    #[error("grid {grid}: slice does not fit halo side {dir}: got {got_width}x{got_height}, expected {want_width}x{want_height}")]
    SliceMismatch {
        grid: String,
        dir: Dir,
        got_width: u32,
        got_height: u32,
        want_width: u32,
        want_height: u32,
    },

    #[error("grid {name}: {got} cells supplied, expected {want} for {width}x{height} interior plus halo")]
    CellCountMismatch {
        name: String,
        got: usize,
        want: usize,
        width: u32,
        height: u32,
    },

    #[error("grid {0} already registered")]
    DuplicateGrid(String),
}
