//! Arena layout and simulation constants

use serde::{Deserialize, Serialize};

use super::physics::Rect;

/// Simulation constants shared by every session.
///
/// Every field has a documented default so a rules file only needs to name
/// the values it changes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ArenaRules {
    /// Arena width in pixels
    pub width: f32,
    /// Arena height in pixels
    pub height: f32,
    /// Side length of the square tank hitbox
    pub tank_size: f32,
    /// Tank movement speed (pixels per second)
    pub move_speed: f32,
    /// Starting and maximum health
    pub max_health: f32,
    /// Seconds between shots
    pub fire_cooldown: f32,
    /// Projectile speed (pixels per second)
    pub projectile_speed: f32,
    /// Projectile hitbox radius
    pub projectile_radius: f32,
    /// Projectile lifetime in seconds
    pub projectile_ttl: f32,
    /// Damage per projectile hit
    pub damage: f32,
}

impl Default for ArenaRules {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 600.0,
            tank_size: 40.0,
            move_speed: 150.0,
            max_health: 100.0,
            fire_cooldown: 0.5,
            projectile_speed: 400.0,
            projectile_radius: 5.0,
            projectile_ttl: 3.0,
            damage: 25.0,
        }
    }
}

/// Static wall rectangle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Wall {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Wall {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }
}

/// Tank colors, assigned in seat order
pub const TANK_COLORS: [&str; 4] = ["#FF6B6B", "#4ECDC4", "#45B7D1", "#FFA07A"];

/// Thickness of the border walls
const BORDER: f32 = 10.0;

/// Minimum distance between a random spawn and any other tank
pub const MIN_SPAWN_DISTANCE: f32 = 200.0;

/// The arena every session is played in. Immutable once built.
#[derive(Debug, Clone)]
pub struct Arena {
    pub rules: ArenaRules,
    pub walls: Vec<Wall>,
    /// Preferred spawn points (top-left corner of the tank), far apart
    pub spawn_points: Vec<(f32, f32)>,
}

impl Arena {
    /// Standard layout: border walls, four bars and a central block
    pub fn standard(rules: ArenaRules) -> Self {
        let w = rules.width;
        let h = rules.height;

        let mut walls = vec![
            Wall::new(0.0, 0.0, w, BORDER),
            Wall::new(0.0, h - BORDER, w, BORDER),
            Wall::new(0.0, 0.0, BORDER, h),
            Wall::new(w - BORDER, 0.0, BORDER, h),
        ];

        // Interior obstacles, laid out relative to the 800x600 reference map
        let sx = w / 800.0;
        let sy = h / 600.0;
        for (x, y, bw, bh) in [
            (200.0, 150.0, 100.0, 20.0),
            (500.0, 150.0, 100.0, 20.0),
            (200.0, 430.0, 100.0, 20.0),
            (500.0, 430.0, 100.0, 20.0),
            (350.0, 250.0, 100.0, 100.0),
        ] {
            walls.push(Wall::new(x * sx, y * sy, bw * sx, bh * sy));
        }

        let margin = 60.0;
        let far = 100.0;
        let spawn_points = vec![
            (margin, margin),
            (w - far, margin),
            (margin, h - far),
            (w - far, h - far),
        ];

        Self {
            rules,
            walls,
            spawn_points,
        }
    }

    /// Center of the arena
    pub fn center(&self) -> (f32, f32) {
        (self.rules.width / 2.0, self.rules.height / 2.0)
    }

    /// Hitbox of a tank whose top-left corner is at `(x, y)`
    pub fn tank_rect(&self, x: f32, y: f32) -> Rect {
        Rect::new(x, y, self.rules.tank_size, self.rules.tank_size)
    }

    /// Whether a tank at `(x, y)` would overlap any wall
    pub fn tank_hits_wall(&self, x: f32, y: f32) -> bool {
        let rect = self.tank_rect(x, y);
        self.walls.iter().any(|wall| rect.overlaps(&wall.rect()))
    }

    /// Clamp a tank's top-left corner so the hitbox stays inside the arena
    pub fn clamp_tank(&self, x: f32, y: f32) -> (f32, f32) {
        let max_x = (self.rules.width - self.rules.tank_size).max(0.0);
        let max_y = (self.rules.height - self.rules.tank_size).max(0.0);
        (x.clamp(0.0, max_x), y.clamp(0.0, max_y))
    }

    /// Whether a point lies inside the arena bounds
    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        (0.0..=self.rules.width).contains(&x) && (0.0..=self.rules.height).contains(&y)
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::standard(ArenaRules::default())
    }
}
