// Collision-aware movement and line-of-sight queries over the obstacle index.

use super::config::*;
use super::spatial::{Bounds, Obstacle, SpatialIndex};
use super::unit::Vec2;

/// Movement and visibility queries for one arena.
///
/// Line of sight is approximated by sampling points along the segment rather
/// than exact rectangle intersection. An obstacle thinner than the sample
/// spacing can slip between two samples; with the coarse rectangles used for
/// cover that is an accepted approximation.
#[derive(Debug, Clone)]
pub struct PhysicsEngine {
    index: SpatialIndex,
    map_size: f64,
    collision_padding: f64,
    los_padding: f64,
}

impl PhysicsEngine {
    pub fn new(map_size: f64, obstacles: Vec<Obstacle>) -> Self {
        Self::with_padding(map_size, obstacles, COLLISION_PADDING, LOS_PADDING)
    }

    pub fn with_padding(
        map_size: f64,
        obstacles: Vec<Obstacle>,
        collision_padding: f64,
        los_padding: f64,
    ) -> Self {
        let max_padding = collision_padding.max(los_padding);
        PhysicsEngine {
            index: SpatialIndex::new(map_size, obstacles, max_padding),
            map_size,
            collision_padding,
            los_padding,
        }
    }

    pub fn map_size(&self) -> f64 {
        self.map_size
    }

    pub fn obstacles(&self) -> &[Obstacle] {
        self.index.obstacles()
    }

    /// True if any sampled interior point of `p1 -> p2` lies inside a
    /// LOS-padded obstacle. Zero-length segments are never blocked.
    pub fn segment_blocked(&self, p1: Vec2, p2: Vec2) -> bool {
        let length = p1.distance(p2);
        if length <= f64::EPSILON {
            return false;
        }
        let Some(bounds) = self.index.bounds() else {
            return false;
        };
        if !bounds.intersects(&Bounds::of_segment(p1, p2)) {
            return false;
        }

        let samples = ((length / LOS_SAMPLE_SPACING).ceil() as usize).max(MIN_LOS_SAMPLES);
        (1..=samples).any(|i| {
            let t = i as f64 / (samples + 1) as f64;
            self.index.contains(p1.lerp(p2, t), self.los_padding)
        })
    }

    pub fn has_line_of_sight(&self, from: Vec2, to: Vec2) -> bool {
        !self.segment_blocked(from, to)
    }

    /// Point-in-any-padded-obstacle test used to block movement.
    pub fn is_colliding(&self, p: Vec2) -> bool {
        self.index.contains(p, self.collision_padding)
    }

    pub fn in_arena(&self, p: Vec2) -> bool {
        p.x >= 0.0 && p.y >= 0.0 && p.x <= self.map_size && p.y <= self.map_size
    }

    pub fn clamp_to_arena(&self, p: Vec2) -> Vec2 {
        Vec2::new(p.x.clamp(0.0, self.map_size), p.y.clamp(0.0, self.map_size))
    }

    fn walkable(&self, p: Vec2) -> bool {
        self.in_arena(p) && !self.is_colliding(p)
    }

    /// Advance `position` up to `step` units towards `target`.
    ///
    /// If the straight step is blocked, slide along the wall by trying the X
    /// component alone, then the Y component alone. If both are blocked the
    /// unit stays put for this tick.
    pub fn step_towards(&self, position: Vec2, target: Vec2, step: f64) -> Vec2 {
        let distance = position.distance(target);
        if distance <= f64::EPSILON || step <= 0.0 {
            return position;
        }
        let next = if distance <= step {
            target
        } else {
            position.lerp(target, step / distance)
        };

        if self.walkable(next) {
            return next;
        }
        let x_only = Vec2::new(next.x, position.y);
        if self.walkable(x_only) {
            return x_only;
        }
        let y_only = Vec2::new(position.x, next.y);
        if self.walkable(y_only) {
            return y_only;
        }
        position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wall_engine() -> PhysicsEngine {
        // Vertical wall between x=190 and x=210, y=100..300
        PhysicsEngine::new(400.0, vec![Obstacle::new(190.0, 100.0, 20.0, 200.0)])
    }

    #[test]
    fn test_zero_length_segment_not_blocked() {
        let engine = wall_engine();
        let inside = Vec2::new(200.0, 200.0);
        assert!(engine.is_colliding(inside));
        assert!(!engine.segment_blocked(inside, inside));
    }

    #[test]
    fn test_segment_far_from_obstacles_not_blocked() {
        let engine = wall_engine();
        assert!(!engine.segment_blocked(Vec2::new(10.0, 10.0), Vec2::new(390.0, 20.0)));
    }

    #[test]
    fn test_segment_through_wall_blocked() {
        let engine = wall_engine();
        assert!(engine.segment_blocked(Vec2::new(100.0, 200.0), Vec2::new(300.0, 200.0)));
        assert!(!engine.has_line_of_sight(Vec2::new(100.0, 200.0), Vec2::new(300.0, 200.0)));
    }

    #[test]
    fn test_segment_passing_wall_end_clear() {
        let engine = wall_engine();
        assert!(!engine.segment_blocked(Vec2::new(100.0, 50.0), Vec2::new(300.0, 50.0)));
    }

    #[test]
    fn test_no_obstacles_never_blocked() {
        let engine = PhysicsEngine::new(400.0, vec![]);
        assert!(!engine.segment_blocked(Vec2::new(0.0, 0.0), Vec2::new(400.0, 400.0)));
    }

    #[test]
    fn test_step_towards_open_ground() {
        let engine = PhysicsEngine::new(400.0, vec![]);
        let next = engine.step_towards(Vec2::new(0.0, 0.0), Vec2::new(100.0, 0.0), 10.0);
        assert!((next.x - 10.0).abs() < 1e-9);
        assert_eq!(next.y, 0.0);
    }

    #[test]
    fn test_step_towards_snaps_to_close_target() {
        let engine = PhysicsEngine::new(400.0, vec![]);
        let target = Vec2::new(3.0, 4.0);
        assert_eq!(engine.step_towards(Vec2::new(0.0, 0.0), target, 10.0), target);
    }

    #[test]
    fn test_step_slides_along_wall() {
        let engine = wall_engine();
        // Just left of the padded wall, heading diagonally into it.
        let start = Vec2::new(182.0, 150.0);
        let next = engine.step_towards(start, Vec2::new(300.0, 260.0), 5.0);
        assert_ne!(next, start);
        assert!(!engine.is_colliding(next));
        // X is blocked, so the unit slid along Y only.
        assert_eq!(next.x, start.x);
        assert!(next.y > start.y);
    }

    #[test]
    fn test_step_fully_blocked_stays() {
        // Corner pocket: walls right and below.
        let engine = PhysicsEngine::new(
            400.0,
            vec![
                Obstacle::new(110.0, 0.0, 20.0, 200.0),
                Obstacle::new(0.0, 110.0, 200.0, 20.0),
            ],
        );
        let start = Vec2::new(102.0, 102.0);
        let next = engine.step_towards(start, Vec2::new(200.0, 200.0), 5.0);
        assert_eq!(next, start);
    }

    #[test]
    fn test_step_never_leaves_arena() {
        let engine = PhysicsEngine::new(100.0, vec![]);
        let next = engine.step_towards(Vec2::new(99.0, 50.0), Vec2::new(150.0, 50.0), 10.0);
        assert!(engine.in_arena(next));
    }

    #[test]
    fn test_clamp_to_arena() {
        let engine = PhysicsEngine::new(100.0, vec![]);
        assert_eq!(engine.clamp_to_arena(Vec2::new(-5.0, 250.0)), Vec2::new(0.0, 100.0));
    }
}
