//! Shared types used across all mosaic crates.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an agent in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

/// A position in the global space, in cell units.
///
/// Agents live at continuous positions; the cell containing a position is
/// `(x.floor(), y.floor())`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Position) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// A mobile agent assigned to the rank whose chunk contains its position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: AgentId,
    /// Model-defined species name (e.g. "wolf", "grass").
    pub species: String,
    pub position: Position,
}

impl AgentRecord {
    pub fn new(species: impl Into<String>, position: Position) -> Self {
        Self {
            id: AgentId::new(),
            species: species.into(),
            position,
        }
    }
}

/// A direction vector in the 3x3 neighborhood, each component in {-1, 0, 1}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dir {
    pub dx: i8,
    pub dy: i8,
}

impl Dir {
    pub const fn new(dx: i8, dy: i8) -> Self {
        Self { dx, dy }
    }

    /// The direction pointing back at the sender.
    pub const fn opposite(&self) -> Dir {
        Dir {
            dx: -self.dx,
            dy: -self.dy,
        }
    }

    pub const fn is_center(&self) -> bool {
        self.dx == 0 && self.dy == 0
    }
}

impl std::fmt::Display for Dir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.dx, self.dy)
    }
}

/// The eight non-center directions of the 3x3 neighborhood, row-major.
pub const DIRECTIONS: [Dir; 8] = [
    Dir::new(-1, -1),
    Dir::new(0, -1),
    Dir::new(1, -1),
    Dir::new(-1, 0),
    Dir::new(1, 0),
    Dir::new(-1, 1),
    Dir::new(0, 1),
    Dir::new(1, 1),
];

/// The current tick of the simulation.
pub type Tick = u64;
