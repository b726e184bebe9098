//! The model descriptor consumed once at setup.
//!
//! The descriptor is an immutable snapshot produced by the (external)
//! configuration layer: global space bounds, the grids to create, initial
//! agent placements, and the flat static-state schema. The schema is an
//! explicit, statically declared list of `(name, kind)` entries — there is
//! no runtime introspection of model fields anywhere in the system.

use crate::space::SpaceBounds;
use crate::types::Position;
use serde::{Deserialize, Serialize};

/// Declaration of one grid: its name and cell dimensions.
///
/// Dimensions must match the space bounds; setup validates this and refuses
/// descriptors where they differ, since grids and space share one lattice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridSpec {
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Initial value of every cell.
    pub initial: f64,
}

impl GridSpec {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            initial: 0.0,
        }
    }

    pub fn with_initial(mut self, initial: f64) -> Self {
        self.initial = initial;
        self
    }
}

/// An agent to place at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPlacement {
    pub species: String,
    pub position: Position,
}

impl AgentPlacement {
    pub fn new(species: impl Into<String>, position: Position) -> Self {
        Self {
            species: species.into(),
            position,
        }
    }
}

/// The kind of a static-state entry.
///
/// Only flat scalars and named grid references are supported; anything else
/// is a programming/config error surfaced at replication time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateKind {
    Primitive,
    GridReference,
}

/// One entry of the static-state schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEntry {
    pub name: String,
    pub kind: StateKind,
}

impl StateEntry {
    pub fn primitive(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: StateKind::Primitive,
        }
    }

    pub fn grid_reference(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: StateKind::GridReference,
        }
    }
}

/// The flat static-state schema declared at model registration time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateSchema {
    pub entries: Vec<StateEntry>,
}

impl StateSchema {
    pub fn new(entries: Vec<StateEntry>) -> Self {
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&StateEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

/// A captured static-state value, ready for replication.
///
/// `GridRef` carries only the grid's name; each receiver resolves it against
/// its own grid registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StateValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    GridRef(String),
}

impl StateValue {
    pub fn kind(&self) -> StateKind {
        match self {
            StateValue::GridRef(_) => StateKind::GridReference,
            _ => StateKind::Primitive,
        }
    }
}

/// Immutable model snapshot built once at setup by the configuration layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub space: SpaceBounds,
    pub grids: Vec<GridSpec>,
    pub agents: Vec<AgentPlacement>,
    pub state_schema: StateSchema,
}

impl ModelDescriptor {
    pub fn new(space: SpaceBounds) -> Self {
        Self {
            space,
            grids: Vec::new(),
            agents: Vec::new(),
            state_schema: StateSchema::default(),
        }
    }

    pub fn with_grid(mut self, spec: GridSpec) -> Self {
        self.grids.push(spec);
        self
    }

    pub fn with_agent(mut self, placement: AgentPlacement) -> Self {
        self.agents.push(placement);
        self
    }

    pub fn with_state_schema(mut self, schema: StateSchema) -> Self {
        self.state_schema = schema;
        self
    }
}
