//! Combat simulator - movement, firing, projectiles, damage
//!
//! `CombatSystem::step` is a pure function of the previous battlefield, the
//! arena and the latest inputs. Tanks are processed in id order and hits in
//! projectile id order, so the result never depends on map iteration order.

use std::collections::HashMap;

use super::arena::{Arena, ArenaRules};
use super::physics::{PhysicsSystem, Rect};
use super::{InputSnapshot, PlayerId, TankId};

/// Cooldowns within this margin of zero count as elapsed
const COOLDOWN_EPSILON: f32 = 1e-4;

/// Authoritative tank state
#[derive(Debug, Clone, PartialEq)]
pub struct Tank {
    pub id: TankId,
    pub player_id: PlayerId,
    pub display_name: String,
    pub color: String,

    /// Top-left corner of the hitbox
    pub x: f32,
    pub y: f32,
    pub rotation: f32,

    pub health: f32,
    pub alive: bool,
    pub kills: u32,
    /// Damage landed on other tanks this match
    pub damage_dealt: f32,
    pub fire_cooldown: f32,
}

impl Tank {
    pub fn new(
        id: TankId,
        player_id: PlayerId,
        display_name: String,
        color: String,
        x: f32,
        y: f32,
        rules: &ArenaRules,
    ) -> Self {
        Self {
            id,
            player_id,
            display_name,
            color,
            x,
            y,
            rotation: 0.0,
            health: rules.max_health,
            alive: true,
            kills: 0,
            damage_dealt: 0.0,
            fire_cooldown: 0.0,
        }
    }

    pub fn hitbox(&self, rules: &ArenaRules) -> Rect {
        Rect::new(self.x, self.y, rules.tank_size, rules.tank_size)
    }

    pub fn center(&self, rules: &ArenaRules) -> (f32, f32) {
        self.hitbox(rules).center()
    }
}

/// Active projectile
#[derive(Debug, Clone, PartialEq)]
pub struct Projectile {
    pub id: u64,
    pub owner_id: TankId,
    /// Center of the projectile
    pub x: f32,
    pub y: f32,
    /// Unit direction of travel
    pub dir_x: f32,
    pub dir_y: f32,
    pub speed: f32,
    pub radius: f32,
    /// Remaining lifetime in seconds
    pub ttl: f32,
}

impl Projectile {
    /// Spawn a projectile at the tank's muzzle, travelling along its heading
    pub fn fire(id: u64, tank: &Tank, rules: &ArenaRules) -> Self {
        let (cx, cy) = tank.center(rules);
        let dir_x = tank.rotation.cos();
        let dir_y = tank.rotation.sin();
        let muzzle = rules.tank_size / 2.0 + rules.projectile_radius;

        Self {
            id,
            owner_id: tank.id,
            x: cx + dir_x * muzzle,
            y: cy + dir_y * muzzle,
            dir_x,
            dir_y,
            speed: rules.projectile_speed,
            radius: rules.projectile_radius,
            ttl: rules.projectile_ttl,
        }
    }

    /// Move and age the projectile, returns false once its ttl has run out
    pub fn advance(&mut self, dt: f32) -> bool {
        self.x += self.dir_x * self.speed * dt;
        self.y += self.dir_y * self.speed * dt;
        self.ttl -= dt;
        self.ttl > 0.0
    }
}

/// Mutable part of a session's world
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Battlefield {
    pub tanks: HashMap<TankId, Tank>,
    pub projectiles: Vec<Projectile>,
    pub next_projectile_id: u64,
}

impl Battlefield {
    pub fn alive_count(&self) -> usize {
        self.tanks.values().filter(|t| t.alive).count()
    }

    /// Tank ids in a stable order
    pub fn sorted_tank_ids(&self) -> Vec<TankId> {
        let mut ids: Vec<TankId> = self.tanks.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// Things that happened during a tick
#[derive(Debug, Clone, PartialEq)]
pub enum CombatEvent {
    Fired {
        tank_id: TankId,
        projectile_id: u64,
    },
    Hit {
        projectile_id: u64,
        shooter_id: TankId,
        target_id: TankId,
        damage: f32,
    },
    Eliminated {
        tank_id: TankId,
        /// Shooter credited with the kill, if still seated
        killer_id: Option<TankId>,
    },
}

/// Projectile/tank contact found during the projectile phase
#[derive(Debug, Clone, Copy)]
struct PendingHit {
    projectile_id: u64,
    shooter_id: TankId,
    target_id: TankId,
}

/// Combat system for managing weapons and damage
pub struct CombatSystem;

impl CombatSystem {
    /// Check if a tank can fire (cooldown check)
    pub fn can_fire(fire_cooldown: f32) -> bool {
        fire_cooldown <= COOLDOWN_EPSILON
    }

    /// Update fire cooldown
    pub fn update_cooldown(cooldown: f32, dt: f32) -> f32 {
        (cooldown - dt).max(0.0)
    }

    /// Apply damage to health, returns (new_health, is_dead)
    pub fn apply_damage(current_health: f32, damage: f32) -> (f32, bool) {
        let new_health = (current_health - damage).max(0.0);
        (new_health, new_health <= 0.0)
    }

    /// Advance the battlefield by one tick
    pub fn step(
        field: &Battlefield,
        arena: &Arena,
        inputs: &HashMap<TankId, InputSnapshot>,
        dt: f32,
    ) -> (Battlefield, Vec<CombatEvent>) {
        let rules = &arena.rules;
        let mut next = field.clone();
        let mut events = Vec::new();
        let tank_ids = next.sorted_tank_ids();

        // Tanks: move, aim, fire
        let mut spawned = Vec::new();
        for id in &tank_ids {
            // Tanks earlier in id order have already moved this tick
            let others: Vec<Rect> = next
                .tanks
                .values()
                .filter(|t| t.alive && t.id != *id)
                .map(|t| t.hitbox(rules))
                .collect();

            let Some(tank) = next.tanks.get_mut(id) else {
                continue;
            };
            if !tank.alive {
                continue;
            }

            let Some(input) = inputs.get(id) else {
                tank.fire_cooldown = Self::update_cooldown(tank.fire_cooldown, dt);
                continue;
            };

            let (dir_x, dir_y) = PhysicsSystem::move_direction(input);
            let distance = rules.move_speed * dt;
            let (x, y) = PhysicsSystem::move_tank(
                arena,
                &others,
                tank.x,
                tank.y,
                dir_x * distance,
                dir_y * distance,
            );
            tank.x = x;
            tank.y = y;

            let (cx, cy) = tank.center(rules);
            tank.rotation = PhysicsSystem::aim_rotation(cx, cy, input.mouse_x, input.mouse_y);

            if input.shoot && Self::can_fire(tank.fire_cooldown) {
                let projectile = Projectile::fire(next.next_projectile_id, tank, rules);
                next.next_projectile_id += 1;
                events.push(CombatEvent::Fired {
                    tank_id: tank.id,
                    projectile_id: projectile.id,
                });
                spawned.push(projectile);
                tank.fire_cooldown = rules.fire_cooldown;
            } else {
                tank.fire_cooldown = Self::update_cooldown(tank.fire_cooldown, dt);
            }
        }
        next.projectiles.extend(spawned);

        // Projectiles: targets are the tanks alive when this phase begins
        let targets: Vec<(TankId, Rect)> = tank_ids
            .iter()
            .filter_map(|id| next.tanks.get(id))
            .filter(|t| t.alive)
            .map(|t| (t.id, t.hitbox(rules)))
            .collect();

        let mut hits = Vec::new();
        next.projectiles.retain_mut(|projectile| {
            if !projectile.advance(dt) || !arena.contains_point(projectile.x, projectile.y) {
                return false;
            }

            if let Some(target_id) = Self::nearest_target(projectile, &targets) {
                hits.push(PendingHit {
                    projectile_id: projectile.id,
                    shooter_id: projectile.owner_id,
                    target_id,
                });
                return false;
            }

            !arena
                .walls
                .iter()
                .any(|wall| wall.rect().overlaps_circle(projectile.x, projectile.y, projectile.radius))
        });

        // Damage, in projectile order
        hits.sort_unstable_by_key(|hit| hit.projectile_id);
        for hit in hits {
            let Some(target) = next.tanks.get_mut(&hit.target_id) else {
                continue;
            };
            // A tank killed earlier in this tick still absorbs the projectile
            if !target.alive {
                continue;
            }

            let (health, killed) = Self::apply_damage(target.health, rules.damage);
            target.health = health;
            if killed {
                target.alive = false;
            }
            if let Some(shooter) = next.tanks.get_mut(&hit.shooter_id) {
                shooter.damage_dealt += rules.damage;
            }
            events.push(CombatEvent::Hit {
                projectile_id: hit.projectile_id,
                shooter_id: hit.shooter_id,
                target_id: hit.target_id,
                damage: rules.damage,
            });

            if killed {
                let killer_id = next.tanks.get_mut(&hit.shooter_id).map(|shooter| {
                    shooter.kills += 1;
                    shooter.id
                });
                events.push(CombatEvent::Eliminated {
                    tank_id: hit.target_id,
                    killer_id,
                });
            }
        }

        (next, events)
    }

    /// Closest overlapping tank other than the owner, ties broken by id
    fn nearest_target(projectile: &Projectile, targets: &[(TankId, Rect)]) -> Option<TankId> {
        targets
            .iter()
            .filter(|(id, _)| *id != projectile.owner_id)
            .filter(|(_, rect)| rect.overlaps_circle(projectile.x, projectile.y, projectile.radius))
            .map(|(id, rect)| {
                let (cx, cy) = rect.center();
                let dist_sq = (cx - projectile.x).powi(2) + (cy - projectile.y).powi(2);
                (*id, dist_sq)
            })
            .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)))
            .map(|(id, _)| id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::arena::Wall;
    use uuid::Uuid;

    const DT: f32 = 0.05;

    fn open_arena() -> Arena {
        Arena {
            walls: Vec::new(),
            ..Arena::default()
        }
    }

    fn tank_at(x: f32, y: f32) -> Tank {
        let id = Uuid::new_v4();
        Tank::new(
            id,
            id.to_string(),
            "tank".to_string(),
            "#FFFFFF".to_string(),
            x,
            y,
            &ArenaRules::default(),
        )
    }

    fn field_with(tanks: Vec<Tank>) -> Battlefield {
        Battlefield {
            tanks: tanks.into_iter().map(|t| (t.id, t)).collect(),
            ..Default::default()
        }
    }

    fn fire_at(x: f32, y: f32) -> InputSnapshot {
        InputSnapshot {
            shoot: true,
            mouse_x: x,
            mouse_y: y,
            ..Default::default()
        }
    }

    #[test]
    fn test_move_speed_and_diagonal() {
        let arena = open_arena();
        let tank = tank_at(100.0, 100.0);
        let id = tank.id;
        let field = field_with(vec![tank]);

        let input = InputSnapshot {
            down: true,
            right: true,
            mouse_x: 500.0,
            mouse_y: 120.0,
            ..Default::default()
        };
        let (next, _) = CombatSystem::step(&field, &arena, &HashMap::from([(id, input)]), DT);
        let moved = &next.tanks[&id];
        let dist = ((moved.x - 100.0).powi(2) + (moved.y - 100.0).powi(2)).sqrt();
        assert!((dist - arena.rules.move_speed * DT).abs() < 1e-3);
    }

    #[test]
    fn test_rotation_follows_aim() {
        let arena = open_arena();
        let tank = tank_at(100.0, 100.0);
        let id = tank.id;
        let field = field_with(vec![tank]);

        // Center is (120, 120); aim straight down
        let input = InputSnapshot {
            mouse_x: 120.0,
            mouse_y: 400.0,
            ..Default::default()
        };
        let (next, _) = CombatSystem::step(&field, &arena, &HashMap::from([(id, input)]), DT);
        assert!((next.tanks[&id].rotation - std::f32::consts::FRAC_PI_2).abs() < 1e-5);
    }

    #[test]
    fn test_tank_without_input_keeps_state() {
        let arena = open_arena();
        let mut tank = tank_at(100.0, 100.0);
        tank.rotation = 1.0;
        tank.fire_cooldown = 0.3;
        let id = tank.id;
        let field = field_with(vec![tank]);

        let (next, events) = CombatSystem::step(&field, &arena, &HashMap::new(), DT);
        let t = &next.tanks[&id];
        assert_eq!((t.x, t.y, t.rotation), (100.0, 100.0, 1.0));
        assert!((t.fire_cooldown - 0.25).abs() < 1e-5);
        assert!(events.is_empty());
    }

    #[test]
    fn test_fire_respects_cooldown() {
        let arena = open_arena();
        let tank = tank_at(100.0, 100.0);
        let id = tank.id;
        let mut field = field_with(vec![tank]);
        let inputs = HashMap::from([(id, fire_at(700.0, 120.0))]);

        let mut shots = 0;
        // 0.5s cooldown at 20 Hz: shots on tick 0 and tick 11
        for _ in 0..12 {
            let (next, events) = CombatSystem::step(&field, &arena, &inputs, DT);
            shots += events
                .iter()
                .filter(|e| matches!(e, CombatEvent::Fired { .. }))
                .count();
            field = next;
        }
        assert_eq!(shots, 2);
        assert_eq!(field.next_projectile_id, 2);
    }

    #[test]
    fn test_projectile_spawns_at_muzzle() {
        let arena = open_arena();
        let tank = tank_at(100.0, 100.0);
        let id = tank.id;
        let field = field_with(vec![tank]);

        let (next, _) =
            CombatSystem::step(&field, &arena, &HashMap::from([(id, fire_at(700.0, 120.0))]), DT);
        let p = &next.projectiles[0];
        // Muzzle at 120 + 25, then one tick of travel
        let expected_x = 145.0 + arena.rules.projectile_speed * DT;
        assert!((p.x - expected_x).abs() < 1e-3);
        assert!((p.y - 120.0).abs() < 1e-3);
        assert_eq!(p.owner_id, id);
    }

    #[test]
    fn test_projectile_destroyed_by_wall() {
        let mut arena = open_arena();
        arena.walls.push(Wall::new(200.0, 0.0, 20.0, 600.0));
        let field = Battlefield {
            projectiles: vec![Projectile {
                id: 0,
                owner_id: Uuid::new_v4(),
                x: 185.0,
                y: 300.0,
                dir_x: 1.0,
                dir_y: 0.0,
                speed: 400.0,
                radius: 5.0,
                ttl: 3.0,
            }],
            next_projectile_id: 1,
            ..Default::default()
        };

        let (next, _) = CombatSystem::step(&field, &arena, &HashMap::new(), DT);
        assert!(next.projectiles.is_empty());
    }

    #[test]
    fn test_projectile_expires() {
        let arena = open_arena();
        let field = Battlefield {
            projectiles: vec![Projectile {
                id: 0,
                owner_id: Uuid::new_v4(),
                x: 400.0,
                y: 300.0,
                dir_x: 0.0,
                dir_y: 1.0,
                speed: 1.0,
                radius: 5.0,
                ttl: 0.04,
            }],
            next_projectile_id: 1,
            ..Default::default()
        };

        let (next, _) = CombatSystem::step(&field, &arena, &HashMap::new(), DT);
        assert!(next.projectiles.is_empty());
    }

    #[test]
    fn test_owner_is_never_hit() {
        let arena = open_arena();
        let tank = tank_at(100.0, 100.0);
        let id = tank.id;
        let mut field = field_with(vec![tank]);
        field.projectiles.push(Projectile {
            id: 0,
            owner_id: id,
            x: 120.0,
            y: 120.0,
            dir_x: 1.0,
            dir_y: 0.0,
            speed: 0.0,
            radius: 5.0,
            ttl: 3.0,
        });

        let (next, events) = CombatSystem::step(&field, &arena, &HashMap::new(), DT);
        assert_eq!(next.tanks[&id].health, arena.rules.max_health);
        assert_eq!(next.projectiles.len(), 1);
        assert!(events.is_empty());
    }

    #[test]
    fn test_kill_credits_shooter_once() {
        let arena = open_arena();
        let shooter = tank_at(100.0, 100.0);
        let mut target = tank_at(300.0, 100.0);
        target.health = arena.rules.damage;
        let (shooter_id, target_id) = (shooter.id, target.id);
        let mut field = field_with(vec![shooter, target]);

        // Two projectiles already overlapping the target
        for id in 0..2 {
            field.projectiles.push(Projectile {
                id,
                owner_id: shooter_id,
                x: 300.0,
                y: 120.0,
                dir_x: 0.0,
                dir_y: 0.0,
                speed: 0.0,
                radius: 5.0,
                ttl: 3.0,
            });
        }
        field.next_projectile_id = 2;

        let (next, events) = CombatSystem::step(&field, &arena, &HashMap::new(), DT);
        let target = &next.tanks[&target_id];
        assert_eq!(target.health, 0.0);
        assert!(!target.alive);
        assert_eq!(next.tanks[&shooter_id].kills, 1);
        // Only the first projectile landed, the second was absorbed
        assert_eq!(next.tanks[&shooter_id].damage_dealt, arena.rules.damage);
        assert!(next.projectiles.is_empty());

        let eliminations: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, CombatEvent::Eliminated { .. }))
            .collect();
        assert_eq!(
            eliminations,
            vec![&CombatEvent::Eliminated {
                tank_id: target_id,
                killer_id: Some(shooter_id)
            }]
        );
    }

    #[test]
    fn test_tanks_block_each_other() {
        let arena = open_arena();
        let mover = tank_at(100.0, 100.0);
        let wall = tank_at(145.0, 100.0);
        let (mover_id, wall_id) = (mover.id, wall.id);
        let field = field_with(vec![mover, wall]);

        let input = InputSnapshot {
            right: true,
            down: true,
            mouse_x: 500.0,
            mouse_y: 120.0,
            ..Default::default()
        };
        let (next, _) =
            CombatSystem::step(&field, &arena, &HashMap::from([(mover_id, input)]), DT);

        // Sideways is blocked by the other hull, downward is free
        let moved = &next.tanks[&mover_id];
        assert_eq!(moved.x, 100.0);
        assert!(moved.y > 100.0);
        assert!(!moved
            .hitbox(&arena.rules)
            .overlaps(&next.tanks[&wall_id].hitbox(&arena.rules)));
    }

    #[test]
    fn test_dead_tank_is_not_an_obstacle() {
        let arena = open_arena();
        let mover = tank_at(100.0, 100.0);
        let mut wreck = tank_at(145.0, 100.0);
        wreck.alive = false;
        wreck.health = 0.0;
        let mover_id = mover.id;
        let field = field_with(vec![mover, wreck]);

        let input = InputSnapshot {
            right: true,
            ..Default::default()
        };
        let (next, _) =
            CombatSystem::step(&field, &arena, &HashMap::from([(mover_id, input)]), DT);
        assert!(next.tanks[&mover_id].x > 100.0);
    }

    #[test]
    fn test_dead_tank_does_not_act() {
        let arena = open_arena();
        let mut tank = tank_at(100.0, 100.0);
        tank.alive = false;
        tank.health = 0.0;
        let id = tank.id;
        let field = field_with(vec![tank]);

        let input = InputSnapshot {
            right: true,
            ..fire_at(500.0, 120.0)
        };
        let (next, events) = CombatSystem::step(&field, &arena, &HashMap::from([(id, input)]), DT);
        assert_eq!(next.tanks[&id].x, 100.0);
        assert!(events.is_empty());
    }

    #[test]
    fn test_outcome_independent_of_insertion_order() {
        let arena = Arena::default();
        let tanks: Vec<Tank> = [(60.0, 60.0), (160.0, 60.0), (260.0, 60.0)]
            .into_iter()
            .map(|(x, y)| tank_at(x, y))
            .collect();
        let inputs: HashMap<TankId, InputSnapshot> = tanks
            .iter()
            .map(|t| (t.id, fire_at(700.0, t.y + 20.0)))
            .collect();

        let forward = field_with(tanks.clone());
        let mut reversed_tanks = tanks.clone();
        reversed_tanks.reverse();
        let reversed = field_with(reversed_tanks);

        let mut a = forward;
        let mut b = reversed;
        for _ in 0..40 {
            a = CombatSystem::step(&a, &arena, &inputs, DT).0;
            b = CombatSystem::step(&b, &arena, &inputs, DT).0;
        }
        assert_eq!(a, b);
        for tank in a.tanks.values() {
            assert!(tank.health >= 0.0 && tank.health <= arena.rules.max_health);
        }
    }
}
