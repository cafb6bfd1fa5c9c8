//! Axis-aligned collision primitives and tank movement

use std::f32::consts::FRAC_1_SQRT_2;

use super::arena::Arena;
use super::InputSnapshot;

/// Axis-aligned rectangle, `(x, y)` is the top-left corner
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Strict overlap; rectangles that only touch edges do not overlap
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.x < other.x + other.width
            && self.x + self.width > other.x
            && self.y < other.y + other.height
            && self.y + self.height > other.y
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Squared distance from a point to the closest point of the rectangle
    pub fn distance_sq_to(&self, px: f32, py: f32) -> f32 {
        let closest_x = px.clamp(self.x, self.x + self.width);
        let closest_y = py.clamp(self.y, self.y + self.height);
        let dx = px - closest_x;
        let dy = py - closest_y;
        dx * dx + dy * dy
    }

    /// Circle-rectangle overlap
    pub fn overlaps_circle(&self, cx: f32, cy: f32, radius: f32) -> bool {
        self.distance_sq_to(cx, cy) < radius * radius
    }
}

/// Movement and collision helpers used by the combat simulator
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Unit-or-zero movement direction for the pressed keys.
    ///
    /// Opposite keys cancel out; diagonals are normalized so diagonal speed
    /// equals axis speed.
    pub fn move_direction(input: &InputSnapshot) -> (f32, f32) {
        let mut dx = 0.0;
        let mut dy = 0.0;
        if input.left {
            dx -= 1.0;
        }
        if input.right {
            dx += 1.0;
        }
        if input.up {
            dy -= 1.0;
        }
        if input.down {
            dy += 1.0;
        }
        if dx != 0.0 && dy != 0.0 {
            dx *= FRAC_1_SQRT_2;
            dy *= FRAC_1_SQRT_2;
        }
        (dx, dy)
    }

    /// Move a tank by `(dx, dy)` with axis-separated collision resolution.
    ///
    /// The x component is applied first and dropped if it causes an overlap
    /// with a wall or with one of `others` (the hitboxes of the other living
    /// tanks), then the y component the same way. Both are clamped to the
    /// arena bounds. Returns the new top-left corner.
    pub fn move_tank(
        arena: &Arena,
        others: &[Rect],
        x: f32,
        y: f32,
        dx: f32,
        dy: f32,
    ) -> (f32, f32) {
        let mut nx = x;
        let mut ny = y;

        if dx != 0.0 {
            let (cx, _) = arena.clamp_tank(x + dx, ny);
            if !Self::blocked(arena, others, (nx, ny), (cx, ny)) {
                nx = cx;
            }
        }

        if dy != 0.0 {
            let (_, cy) = arena.clamp_tank(nx, y + dy);
            if !Self::blocked(arena, others, (nx, ny), (nx, cy)) {
                ny = cy;
            }
        }

        (nx, ny)
    }

    /// A step is blocked by walls, and by tanks it was not already touching
    /// so overlapping spawns can still drive apart
    fn blocked(arena: &Arena, others: &[Rect], from: (f32, f32), to: (f32, f32)) -> bool {
        if arena.tank_hits_wall(to.0, to.1) {
            return true;
        }
        let current = arena.tank_rect(from.0, from.1);
        let next = arena.tank_rect(to.0, to.1);
        others
            .iter()
            .any(|other| next.overlaps(other) && !current.overlaps(other))
    }

    /// Heading from a tank's center towards the aim point
    pub fn aim_rotation(center_x: f32, center_y: f32, aim_x: f32, aim_y: f32) -> f32 {
        (aim_y - center_y).atan2(aim_x - center_x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(up: bool, down: bool, left: bool, right: bool) -> InputSnapshot {
        InputSnapshot {
            up,
            down,
            left,
            right,
            ..Default::default()
        }
    }

    #[test]
    fn test_rect_overlap_excludes_touching_edges() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(10.0, 0.0, 10.0, 10.0);
        let c = Rect::new(9.0, 9.0, 10.0, 10.0);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
    }

    #[test]
    fn test_circle_overlap() {
        let r = Rect::new(0.0, 0.0, 10.0, 10.0);
        assert!(r.overlaps_circle(12.0, 5.0, 3.0));
        assert!(!r.overlaps_circle(14.0, 5.0, 3.0));
        assert!(r.overlaps_circle(5.0, 5.0, 1.0));
    }

    #[test]
    fn test_diagonal_is_normalized() {
        let (dx, dy) = PhysicsSystem::move_direction(&input(true, false, false, true));
        let len = (dx * dx + dy * dy).sqrt();
        assert!((len - 1.0).abs() < 1e-5);
        assert!(dx > 0.0 && dy < 0.0);
    }

    #[test]
    fn test_opposite_keys_cancel() {
        assert_eq!(
            PhysicsSystem::move_direction(&input(true, true, true, true)),
            (0.0, 0.0)
        );
    }

    #[test]
    fn test_wall_blocks_only_offending_axis() {
        let arena = Arena::default();
        // Just left of the central block (350..450 x 250..350), moving right and down
        let (x, y) = PhysicsSystem::move_tank(&arena, &[], 305.0, 260.0, 10.0, 5.0);
        assert_eq!(x, 305.0);
        assert_eq!(y, 265.0);
    }

    #[test]
    fn test_movement_clamped_to_bounds() {
        let arena = Arena::standard(crate::game::arena::ArenaRules::default());
        let arena = Arena {
            walls: Vec::new(),
            ..arena
        };
        let (x, y) = PhysicsSystem::move_tank(&arena, &[], 5.0, 5.0, -20.0, -20.0);
        assert_eq!((x, y), (0.0, 0.0));
    }

    #[test]
    fn test_other_tank_blocks_only_offending_axis() {
        let arena = Arena {
            walls: Vec::new(),
            ..Arena::default()
        };
        // 40px hulls; the other tank sits directly to the right
        let other = arena.tank_rect(145.0, 100.0);
        let (x, y) = PhysicsSystem::move_tank(&arena, &[other], 100.0, 100.0, 10.0, 5.0);
        assert_eq!((x, y), (100.0, 105.0));
    }

    #[test]
    fn test_overlapping_tanks_can_separate() {
        let arena = Arena {
            walls: Vec::new(),
            ..Arena::default()
        };
        let other = arena.tank_rect(110.0, 100.0);
        let (x, _) = PhysicsSystem::move_tank(&arena, &[other], 100.0, 100.0, -10.0, 0.0);
        assert_eq!(x, 90.0);
    }
}
