//! Rank topology: the logical 2D grid of ranks over the global space.
//!
//! The process group of `world_size` ranks is arranged into a `rows x cols`
//! logical grid (cols >= rows, as close to square as the rank count allows).
//! Neighbor lookups apply per-axis wrap from the space; tag arithmetic pairs
//! a sender's outbound tag with the receiver's inbound tag without any
//! rendezvous handshake.

use crate::types::Rank;
use mosaic_core::space::{Chunk, SpaceBounds};
use mosaic_core::types::{Dir, DIRECTIONS};

/// Direction code (1..9) a sender attaches when sending toward `dir`.
pub fn send_tag(dir: Dir) -> u8 {
    ((dir.dy as i32 + 1) * 3 + (dir.dx as i32 + 1) + 1) as u8
}

/// Direction code the receiver listens on for traffic arriving from `dir`.
///
/// Contract: `send_tag(d) == recv_tag(-d)` for every offset, which is what
/// lets both sides of an exchange pick their tags independently.
pub fn recv_tag(dir: Dir) -> u8 {
    ((1 - dir.dy as i32) * 3 + (1 - dir.dx as i32) + 1) as u8
}

/// The logical arrangement of ranks over the 2D space.
#[derive(Debug, Clone)]
pub struct RankTopology {
    world_size: u32,
    rows: u32,
    cols: u32,
    wrap_x: bool,
    wrap_y: bool,
}

impl RankTopology {
    /// Arrange `world_size` ranks over `space`.
    ///
    /// rows is the largest divisor of `world_size` not exceeding its square
    /// root, cols the cofactor, so the grid is as square as possible and
    /// always exact. Wrap flags come from the space.
    ///
    /// # Panics
    ///
    /// Panics if `world_size` is 0.
    pub fn new(world_size: u32, space: &SpaceBounds) -> Self {
        assert!(world_size > 0, "world size must be greater than 0");
        let mut rows = 1;
        let mut d = 1;
        while d * d <= world_size {
            if world_size % d == 0 {
                rows = d;
            }
            d += 1;
        }
        Self {
            world_size,
            rows,
            cols: world_size / rows,
            wrap_x: space.wrap_x,
            wrap_y: space.wrap_y,
        }
    }

    pub fn world_size(&self) -> u32 {
        self.world_size
    }

    /// Chunk columns along the x axis.
    pub fn cols(&self) -> u32 {
        self.cols
    }

    /// Chunk rows along the y axis.
    pub fn rows(&self) -> u32 {
        self.rows
    }

    /// The (col, row) coordinates of a rank in the logical grid.
    pub fn coords(&self, rank: Rank) -> (u32, u32) {
        debug_assert!(rank.0 < self.world_size);
        (rank.0 % self.cols, rank.0 / self.cols)
    }

    pub fn rank_at(&self, col: u32, row: u32) -> Rank {
        debug_assert!(col < self.cols && row < self.rows);
        Rank(row * self.cols + col)
    }

    fn shift(index: u32, delta: i8, len: u32, wrap: bool) -> Option<u32> {
        let shifted = index as i64 + delta as i64;
        if (0..len as i64).contains(&shifted) {
            Some(shifted as u32)
        } else if wrap {
            Some(shifted.rem_euclid(len as i64) as u32)
        } else {
            None
        }
    }

    /// The rank at offset `dir` from `rank`, applying wrap per axis.
    ///
    /// Returns `None` off-grid on a non-wrapped axis. On a wrapped axis with
    /// a single chunk the lookup resolves to `rank` itself; callers handle
    /// that as a local self-exchange.
    pub fn neighbor(&self, rank: Rank, dir: Dir) -> Option<Rank> {
        let (col, row) = self.coords(rank);
        let col = Self::shift(col, dir.dx, self.cols, self.wrap_x)?;
        let row = Self::shift(row, dir.dy, self.rows, self.wrap_y)?;
        Some(self.rank_at(col, row))
    }

    /// The directions a rank visits during an exchange round.
    ///
    /// An axis with exactly one chunk and no wrap contributes no offsets at
    /// all — both sender and receiver sides skip it, so the halo on that
    /// side is never refreshed and never read as neighbor data.
    pub fn active_directions(&self) -> Vec<Dir> {
        DIRECTIONS
            .iter()
            .copied()
            .filter(|d| {
                (d.dx == 0 || self.cols > 1 || self.wrap_x)
                    && (d.dy == 0 || self.rows > 1 || self.wrap_y)
            })
            .collect()
    }

    /// Partition `space` into one chunk per rank, indexed by rank.
    ///
    /// Each rank-grid column gets `width / cols` cells (the last column
    /// absorbs the remainder), likewise for rows, so the chunks tile the
    /// space exactly.
    pub fn partition(&self, space: &SpaceBounds) -> Vec<Chunk> {
        let col_width = space.width / self.cols;
        let row_height = space.height / self.rows;
        (0..self.world_size)
            .map(|r| {
                let (col, row) = self.coords(Rank(r));
                let x_min = col * col_width;
                let x_max = if col == self.cols - 1 {
                    space.width
                } else {
                    (col + 1) * col_width
                };
                let y_min = row * row_height;
                let y_max = if row == self.rows - 1 {
                    space.height
                } else {
                    (row + 1) * row_height
                };
                Chunk::new(x_min, x_max, y_min, y_max).with_wrap(space.wrap_x, space.wrap_y)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space(wrap_x: bool, wrap_y: bool) -> SpaceBounds {
        SpaceBounds::new(24, 24).with_wrap(wrap_x, wrap_y)
    }

    #[test]
    fn test_factorization() {
        let topo = RankTopology::new(6, &space(false, false));
        assert_eq!((topo.rows(), topo.cols()), (2, 3));

        let topo = RankTopology::new(7, &space(false, false));
        assert_eq!((topo.rows(), topo.cols()), (1, 7));

        let topo = RankTopology::new(16, &space(false, false));
        assert_eq!((topo.rows(), topo.cols()), (4, 4));

        let topo = RankTopology::new(1, &space(false, false));
        assert_eq!((topo.rows(), topo.cols()), (1, 1));
    }

    #[test]
    fn test_tag_pairing() {
        for dir in DIRECTIONS {
            assert_eq!(send_tag(dir), recv_tag(dir.opposite()), "dir {}", dir);
        }
        // The concrete case: east-bound send pairs with a west-side receive.
        assert_eq!(send_tag(Dir::new(1, 0)), recv_tag(Dir::new(-1, 0)));
        // Codes stay within 1..=9.
        for dir in DIRECTIONS {
            assert!((1..=9).contains(&send_tag(dir)));
            assert!((1..=9).contains(&recv_tag(dir)));
        }
    }

    #[test]
    fn test_neighbor_symmetry() {
        // neighbor(neighbor(r, d), -d) == r whenever both lookups resolve.
        for (wrap_x, wrap_y) in [(false, false), (true, false), (false, true), (true, true)] {
            for world in [1u32, 2, 4, 6, 12] {
                let topo = RankTopology::new(world, &space(wrap_x, wrap_y));
                for r in 0..world {
                    for dir in DIRECTIONS {
                        if let Some(n) = topo.neighbor(Rank(r), dir) {
                            let back = topo.neighbor(n, dir.opposite());
                            assert_eq!(back, Some(Rank(r)), "world={} r={} dir={}", world, r, dir);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_non_wrapped_edges_have_no_neighbor() {
        let topo = RankTopology::new(4, &space(false, false)); // 2x2
        assert_eq!(topo.neighbor(Rank(0), Dir::new(-1, 0)), None);
        assert_eq!(topo.neighbor(Rank(0), Dir::new(0, -1)), None);
        assert_eq!(topo.neighbor(Rank(0), Dir::new(1, 0)), Some(Rank(1)));
        assert_eq!(topo.neighbor(Rank(0), Dir::new(0, 1)), Some(Rank(2)));
        assert_eq!(topo.neighbor(Rank(0), Dir::new(1, 1)), Some(Rank(3)));
    }

    #[test]
    fn test_wrapped_edges_wrap() {
        let topo = RankTopology::new(4, &space(true, true)); // 2x2 torus
        assert_eq!(topo.neighbor(Rank(0), Dir::new(-1, 0)), Some(Rank(1)));
        assert_eq!(topo.neighbor(Rank(0), Dir::new(0, -1)), Some(Rank(2)));
        assert_eq!(topo.neighbor(Rank(0), Dir::new(-1, -1)), Some(Rank(3)));
    }

    #[test]
    fn test_single_chunk_wrapped_axis_is_self() {
        let topo = RankTopology::new(1, &space(true, false));
        assert_eq!(topo.neighbor(Rank(0), Dir::new(1, 0)), Some(Rank(0)));
        assert_eq!(topo.neighbor(Rank(0), Dir::new(-1, 0)), Some(Rank(0)));
        assert_eq!(topo.neighbor(Rank(0), Dir::new(0, 1)), None);
    }

    #[test]
    fn test_active_directions_skip_single_axis() {
        // One chunk per axis, nothing wrapped: no directions at all.
        let topo = RankTopology::new(1, &space(false, false));
        assert!(topo.active_directions().is_empty());

        // Single chunk, x wrapped: only pure-x offsets are visited.
        let topo = RankTopology::new(1, &space(true, false));
        let dirs = topo.active_directions();
        assert_eq!(dirs, vec![Dir::new(-1, 0), Dir::new(1, 0)]);

        // 1xN column of chunks, no wrap: pure-y offsets only.
        let topo = RankTopology::new(3, &SpaceBounds::new(4, 24));
        // 3 ranks factor to 1x3 (cols=3) over x; force a tall layout instead
        // by checking the rows=1 case on the y axis.
        assert_eq!(topo.rows(), 1);
        let dirs = topo.active_directions();
        assert!(dirs.iter().all(|d| d.dy == 0));
        assert_eq!(dirs, vec![Dir::new(-1, 0), Dir::new(1, 0)]);

        // Full grid: all eight directions.
        let topo = RankTopology::new(4, &space(false, false));
        assert_eq!(topo.active_directions().len(), 8);
    }

    #[test]
    fn test_partition_tiles_exactly() {
        for world in [1u32, 2, 3, 4, 6, 9] {
            let sp = SpaceBounds::new(25, 17).with_wrap(true, false);
            let topo = RankTopology::new(world, &sp);
            let chunks = topo.partition(&sp);
            assert_eq!(chunks.len(), world as usize);
            assert!(
                Chunk::tiles_exactly(&sp, &chunks),
                "world={} chunks={:?}",
                world,
                chunks
            );
            for chunk in &chunks {
                assert!(chunk.wrap_x);
                assert!(!chunk.wrap_y);
            }
        }
    }

    #[test]
    fn test_partition_remainder_goes_last() {
        let sp = SpaceBounds::new(10, 4);
        let topo = RankTopology::new(3, &sp); // 1x3
        let chunks = topo.partition(&sp);
        assert_eq!(chunks[0].width(), 3);
        assert_eq!(chunks[1].width(), 3);
        assert_eq!(chunks[2].width(), 4);
    }
}
