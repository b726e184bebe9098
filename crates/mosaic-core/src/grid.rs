//! Named 2D scalar fields with halo borders.
//!
//! A [`Grid`] stores its rank's interior cells plus a depth-1 halo band on
//! every side. The halo is a local copy of neighboring chunks' boundary
//! cells, refreshed once per tick by the border exchange so stencil reads
//! never need a remote call. [`BorderSlice`] is the band of interior cells
//! that travels to a neighbor; its size is O(perimeter), never O(area).

use crate::error::GridError;
use crate::types::Dir;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Depth of the halo band on every side, in cells.
pub const HALO_DEPTH: u32 = 1;

/// A named 2D scalar field over one chunk, with a depth-1 halo.
///
/// Storage is row-major over `(width + 2) x (height + 2)` cells; interior
/// coordinates run `0..width` / `0..height`, halo coordinates are `-1` and
/// `width` / `height`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grid {
    name: String,
    width: u32,
    height: u32,
    cells: Vec<f64>,
}

impl Grid {
    /// Create a grid with every cell (halo included) set to `fill`.
    pub fn new(name: impl Into<String>, width: u32, height: u32, fill: f64) -> Self {
        let stride = (width + 2) as usize;
        let rows = (height + 2) as usize;
        Self {
            name: name.into(),
            width,
            height,
            cells: vec![fill; stride * rows],
        }
    }

    /// Reconstruct a grid from wire data (interior plus halo, row-major).
    pub fn from_cells(
        name: impl Into<String>,
        width: u32,
        height: u32,
        cells: Vec<f64>,
    ) -> Result<Self, GridError> {
        let name = name.into();
        let want = ((width + 2) * (height + 2)) as usize;
        if cells.len() != want {
            return Err(GridError::CellCountMismatch {
                name,
                got: cells.len(),
                want,
                width,
                height,
            });
        }
        Ok(Self {
            name,
            width,
            height,
            cells,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Interior width in cells.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Interior height in cells.
    pub fn height(&self) -> u32 {
        self.height
    }

    fn index(&self, x: i64, y: i64) -> usize {
        debug_assert!(x >= -1 && x <= self.width as i64);
        debug_assert!(y >= -1 && y <= self.height as i64);
        ((y + 1) as usize) * (self.width + 2) as usize + (x + 1) as usize
    }

    /// Read a cell. Halo cells are addressed with `-1` and `width`/`height`.
    pub fn get(&self, x: i64, y: i64) -> f64 {
        self.cells[self.index(x, y)]
    }

    /// Write an interior cell.
    pub fn set(&mut self, x: u32, y: u32, value: f64) {
        debug_assert!(x < self.width && y < self.height);
        let idx = self.index(x as i64, y as i64);
        self.cells[idx] = value;
    }

    /// Read-only view of the full cell storage (interior plus halo),
    /// row-major, for the rendering/data-collection pipeline.
    pub fn data(&self) -> &[f64] {
        &self.cells
    }

    /// The interior cell ranges of the band nearest the `dir` edge.
    fn border_ranges(&self, dir: Dir) -> (std::ops::Range<i64>, std::ops::Range<i64>) {
        let xs = match dir.dx {
            -1 => 0..HALO_DEPTH as i64,
            1 => (self.width - HALO_DEPTH) as i64..self.width as i64,
            _ => 0..self.width as i64,
        };
        let ys = match dir.dy {
            -1 => 0..HALO_DEPTH as i64,
            1 => (self.height - HALO_DEPTH) as i64..self.height as i64,
            _ => 0..self.height as i64,
        };
        (xs, ys)
    }

    /// The halo cell ranges on the `dir` side.
    fn halo_ranges(&self, dir: Dir) -> (std::ops::Range<i64>, std::ops::Range<i64>) {
        let xs = match dir.dx {
            -1 => -(HALO_DEPTH as i64)..0,
            1 => self.width as i64..(self.width + HALO_DEPTH) as i64,
            _ => 0..self.width as i64,
        };
        let ys = match dir.dy {
            -1 => -(HALO_DEPTH as i64)..0,
            1 => self.height as i64..(self.height + HALO_DEPTH) as i64,
            _ => 0..self.height as i64,
        };
        (xs, ys)
    }

    /// Extract the outgoing border band nearest the `dir` edge.
    pub fn extract_border(&self, dir: Dir) -> BorderSlice {
        let (xs, ys) = self.border_ranges(dir);
        let slice_width = (xs.end - xs.start) as u32;
        let slice_height = (ys.end - ys.start) as u32;
        let mut cells = Vec::with_capacity((slice_width * slice_height) as usize);
        for y in ys {
            for x in xs.clone() {
                cells.push(self.get(x, y));
            }
        }
        BorderSlice {
            grid: self.name.clone(),
            dir,
            width: slice_width,
            height: slice_height,
            cells,
        }
    }

    /// Write `slice` into the halo band on the `side` edge, overwriting the
    /// stale halo values from the prior tick.
    ///
    /// `side` is the local direction toward the neighbor the data came from;
    /// `slice.dir` records the sender's direction and is not consulted here.
    pub fn apply_halo(&mut self, side: Dir, slice: &BorderSlice) -> Result<(), GridError> {
        let (xs, ys) = self.halo_ranges(side);
        let want_width = (xs.end - xs.start) as u32;
        let want_height = (ys.end - ys.start) as u32;
        if slice.width != want_width || slice.height != want_height {
            return Err(GridError::SliceMismatch {
                grid: self.name.clone(),
                dir: side,
                got_width: slice.width,
                got_height: slice.height,
                want_width,
                want_height,
            });
        }
        let mut src = slice.cells.iter();
        for y in ys {
            for x in xs.clone() {
                let idx = self.index(x, y);
                self.cells[idx] = *src.next().expect("slice length checked above");
            }
        }
        Ok(())
    }

    /// Fill the halo on the `side` edge from this grid's own opposite border
    /// band. Used when a wrapped axis has a single chunk and the rank is its
    /// own neighbor; the result must match a true two-rank wrap.
    pub fn wrap_halo(&mut self, side: Dir) -> Result<(), GridError> {
        let slice = self.extract_border(side.opposite());
        self.apply_halo(side, &slice)
    }
}

/// A rectangular band of cells extracted from a grid's interior, tagged with
/// the direction it is traveling. Ephemeral: created and consumed within a
/// single tick's exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BorderSlice {
    /// Name of the grid this band came from.
    pub grid: String,
    /// The sender's direction toward the receiver.
    pub dir: Dir,
    pub width: u32,
    pub height: u32,
    /// Row-major band cells, `width * height` of them.
    pub cells: Vec<f64>,
}

impl BorderSlice {
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }
}

/// All grids registered on one rank, keyed by name.
///
/// Iteration order is the name order, so every rank bundles slices
/// identically without coordination.
#[derive(Debug, Default)]
pub struct GridRegistry {
    grids: BTreeMap<String, Grid>,
}

impl GridRegistry {
    pub fn new() -> Self {
        Self {
            grids: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, grid: Grid) -> Result<(), GridError> {
        if self.grids.contains_key(grid.name()) {
            return Err(GridError::DuplicateGrid(grid.name().to_string()));
        }
        self.grids.insert(grid.name().to_string(), grid);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Grid> {
        self.grids.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Grid> {
        self.grids.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.grids.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.grids.keys().map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Grid> {
        self.grids.values()
    }

    pub fn len(&self) -> usize {
        self.grids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grids.is_empty()
    }

    /// Extract the `dir` border band of every grid, in name order.
    pub fn extract_all(&self, dir: Dir) -> Vec<BorderSlice> {
        self.grids.values().map(|g| g.extract_border(dir)).collect()
    }

    /// Wrap every grid's halo on the `side` edge from its own opposite
    /// border band (single-chunk wrapped axis).
    pub fn wrap_all(&mut self, side: Dir) -> Result<(), GridError> {
        for grid in self.grids.values_mut() {
            grid.wrap_halo(side)?;
        }
        Ok(())
    }

    /// Apply received slices to the halo band on the `side` edge, matching
    /// each slice to its grid by name.
    pub fn apply_all(&mut self, side: Dir, slices: &[BorderSlice]) -> Result<(), GridError> {
        for slice in slices {
            let grid = self
                .grids
                .get_mut(&slice.grid)
                .ok_or_else(|| GridError::UnknownGrid(slice.grid.clone()))?;
            grid.apply_halo(side, slice)?;
        }
        Ok(())
    }
}
