/// Grid-based spatial index over the static obstacle set.
///
/// Divides the arena into cells and records which obstacles overlap each cell
/// (after padding), so a point test only looks at the handful of rectangles
/// sharing its cell instead of every obstacle on the map.

use serde::{Deserialize, Serialize};

use super::config::MAX_GRID_CELLS_PER_SIDE;
use super::unit::Vec2;

/// Smallest edge length of a grid cell in arena units.
const CELL_SIZE: f64 = 64.0;

/// Axis-aligned obstacle rectangle. Immutable once the simulation starts.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Obstacle {
    pub const fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Obstacle { x, y, w, h }
    }

    pub fn contains(&self, p: Vec2, padding: f64) -> bool {
        p.x >= self.x - padding
            && p.x <= self.x + self.w + padding
            && p.y >= self.y - padding
            && p.y <= self.y + self.h + padding
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(self.x + self.w / 2.0, self.y + self.h / 2.0)
    }
}

/// Bounding box in arena units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub min: Vec2,
    pub max: Vec2,
}

impl Bounds {
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }

    pub fn of_segment(a: Vec2, b: Vec2) -> Bounds {
        Bounds {
            min: Vec2::new(a.x.min(b.x), a.y.min(b.y)),
            max: Vec2::new(a.x.max(b.x), a.y.max(b.y)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpatialIndex {
    /// Number of cells in X direction.
    pub cols: usize,
    /// Number of cells in Y direction.
    pub rows: usize,
    /// Edge length of one cell; larger than `CELL_SIZE` on huge arenas.
    cell_size: f64,
    obstacles: Vec<Obstacle>,
    /// Flat array of obstacle indices per cell, indexed by row * cols + col.
    cells: Vec<Vec<usize>>,
    /// Largest padding any query may use; obstacles are bucketed with it.
    max_padding: f64,
    /// Union of all padded obstacles, None when there are no obstacles.
    bounds: Option<Bounds>,
}

impl SpatialIndex {
    pub fn new(map_size: f64, obstacles: Vec<Obstacle>, max_padding: f64) -> Self {
        let cell_size = (map_size / MAX_GRID_CELLS_PER_SIDE as f64).max(CELL_SIZE);
        let cols = ((map_size / cell_size).ceil() as usize).clamp(1, MAX_GRID_CELLS_PER_SIDE);
        let rows = cols;
        let mut index = SpatialIndex {
            cols,
            rows,
            cell_size,
            obstacles: Vec::with_capacity(obstacles.len()),
            cells: vec![Vec::new(); cols * rows],
            max_padding: max_padding.max(0.0),
            bounds: None,
        };
        for obstacle in obstacles {
            index.insert(obstacle);
        }
        index
    }

    fn insert(&mut self, obstacle: Obstacle) {
        let pad = self.max_padding;
        let min = Vec2::new(obstacle.x - pad, obstacle.y - pad);
        let max = Vec2::new(obstacle.x + obstacle.w + pad, obstacle.y + obstacle.h + pad);

        let idx = self.obstacles.len();
        self.obstacles.push(obstacle);

        let (c0, r0) = self.cell_coords(min);
        let (c1, r1) = self.cell_coords(max);
        for row in r0..=r1 {
            for col in c0..=c1 {
                self.cells[row * self.cols + col].push(idx);
            }
        }

        self.bounds = Some(match self.bounds {
            None => Bounds { min, max },
            Some(b) => Bounds {
                min: Vec2::new(b.min.x.min(min.x), b.min.y.min(min.y)),
                max: Vec2::new(b.max.x.max(max.x), b.max.y.max(max.y)),
            },
        });
    }

    pub fn obstacles(&self) -> &[Obstacle] {
        &self.obstacles
    }

    pub fn is_empty(&self) -> bool {
        self.obstacles.is_empty()
    }

    /// Padded bounding box of every obstacle.
    pub fn bounds(&self) -> Option<Bounds> {
        self.bounds
    }

    /// Whether `p` lies inside any obstacle grown by `padding`.
    pub fn contains(&self, p: Vec2, padding: f64) -> bool {
        debug_assert!(padding <= self.max_padding, "query padding exceeds index padding");
        let (col, row) = self.cell_coords(p);
        self.cells[row * self.cols + col]
            .iter()
            .any(|&i| self.obstacles[i].contains(p, padding))
    }

    /// Convert arena coordinates to cell coordinates, clamped to grid bounds.
    fn cell_coords(&self, p: Vec2) -> (usize, usize) {
        let col = ((p.x / self.cell_size).floor() as i64).clamp(0, self.cols as i64 - 1) as usize;
        let row = ((p.y / self.cell_size).floor() as i64).clamp(0, self.rows as i64 - 1) as usize;
        (col, row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_index_dimensions() {
        let index = SpatialIndex::new(640.0, vec![], 4.0);
        assert_eq!(index.cols, 10);
        assert_eq!(index.rows, 10);
        assert!(index.is_empty());
        assert!(index.bounds().is_none());
    }

    #[test]
    fn test_huge_arena_grid_is_capped() {
        let index = SpatialIndex::new(1e9, vec![Obstacle::new(5e8, 5e8, 100.0, 100.0)], 4.0);
        assert_eq!(index.cols, MAX_GRID_CELLS_PER_SIDE);
        assert_eq!(index.rows, MAX_GRID_CELLS_PER_SIDE);
        assert!(index.contains(Vec2::new(5e8 + 50.0, 5e8 + 50.0), 0.0));
        assert!(!index.contains(Vec2::new(1.0, 1.0), 0.0));

        let index = SpatialIndex::new(f64::INFINITY, vec![], 4.0);
        assert!(index.cols >= 1 && index.cols <= MAX_GRID_CELLS_PER_SIDE);
    }

    #[test]
    fn test_contains_with_padding() {
        let index = SpatialIndex::new(400.0, vec![Obstacle::new(100.0, 100.0, 50.0, 20.0)], 5.0);
        assert!(index.contains(Vec2::new(120.0, 110.0), 0.0));
        assert!(!index.contains(Vec2::new(97.0, 110.0), 0.0));
        assert!(index.contains(Vec2::new(97.0, 110.0), 5.0));
        assert!(!index.contains(Vec2::new(90.0, 110.0), 5.0));
    }

    #[test]
    fn test_obstacle_spanning_cells() {
        // Crosses several 64-unit cells in both axes.
        let index = SpatialIndex::new(512.0, vec![Obstacle::new(30.0, 30.0, 300.0, 200.0)], 0.0);
        assert!(index.contains(Vec2::new(35.0, 35.0), 0.0));
        assert!(index.contains(Vec2::new(320.0, 220.0), 0.0));
        assert!(index.contains(Vec2::new(200.0, 130.0), 0.0));
        assert!(!index.contains(Vec2::new(340.0, 130.0), 0.0));
    }

    #[test]
    fn test_points_outside_arena_clamp() {
        let index = SpatialIndex::new(256.0, vec![Obstacle::new(240.0, 0.0, 40.0, 40.0)], 0.0);
        // Obstacle pokes out of the arena; a point past the edge still finds it.
        assert!(index.contains(Vec2::new(270.0, 10.0), 0.0));
        assert!(!index.contains(Vec2::new(-50.0, -50.0), 0.0));
    }

    #[test]
    fn test_bounds_union() {
        let index = SpatialIndex::new(
            500.0,
            vec![
                Obstacle::new(10.0, 20.0, 10.0, 10.0),
                Obstacle::new(200.0, 300.0, 50.0, 5.0),
            ],
            2.0,
        );
        let b = index.bounds().unwrap();
        assert_eq!(b.min, Vec2::new(8.0, 18.0));
        assert_eq!(b.max, Vec2::new(252.0, 307.0));
    }
}
