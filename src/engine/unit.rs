use serde::{Deserialize, Serialize};

use super::config::*;

/// A point or direction in arena coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const fn new(x: f64, y: f64) -> Self {
        Vec2 { x, y }
    }

    pub fn distance(self, other: Vec2) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }

    pub fn distance_sq(self, other: Vec2) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        dx * dx + dy * dy
    }

    pub fn lerp(self, other: Vec2, t: f64) -> Vec2 {
        Vec2::new(
            self.x + (other.x - self.x) * t,
            self.y + (other.y - self.y) * t,
        )
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Team {
    Blue,
    Red,
}

impl Team {
    pub const ALL: [Team; 2] = [Team::Blue, Team::Red];

    pub fn opponent(self) -> Team {
        match self {
            Team::Blue => Team::Red,
            Team::Red => Team::Blue,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Team::Blue => "BLUE",
            Team::Red => "RED",
        }
    }
}

impl std::fmt::Display for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Capability class of a unit. Indexes the per-role stat tables in `config`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Leader,
    Assault,
    Heavy,
    Sniper,
    Scout,
    Medic,
}

impl Role {
    fn index(self) -> usize {
        match self {
            Role::Leader => ROLE_LEADER,
            Role::Assault => ROLE_ASSAULT,
            Role::Heavy => ROLE_HEAVY,
            Role::Sniper => ROLE_SNIPER,
            Role::Scout => ROLE_SCOUT,
            Role::Medic => ROLE_MEDIC,
        }
    }

    pub fn max_health(self) -> i32 {
        MAX_HEALTH[self.index()]
    }

    pub fn speed(self) -> f64 {
        MOVE_SPEED[self.index()]
    }

    pub fn weapon(self) -> Weapon {
        let i = self.index();
        Weapon {
            range: WEAPON_RANGE[i],
            damage: WEAPON_DAMAGE[i],
            cooldown_ms: WEAPON_COOLDOWN_MS[i],
            accuracy: WEAPON_ACCURACY[i],
            suppression: WEAPON_SUPPRESSION[i],
        }
    }

    pub fn can_heal(self) -> bool {
        matches!(self, Role::Medic)
    }
}

/// Weapon profile derived from a unit's role.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Weapon {
    pub range: f64,
    pub damage: i32,
    pub cooldown_ms: u64,
    pub accuracy: f64,
    pub suppression: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UnitStatus {
    Alive,
    Dead,
}

#[derive(Clone, Debug, Serialize)]
pub struct Unit {
    pub id: String,
    pub team: Team,
    pub role: Role,
    pub position: Vec2,
    pub current_target: Option<Vec2>,
    pub health: i32,
    pub max_health: i32,
    pub suppression: f64,
    pub last_fired_at: Option<u64>,
    pub status: UnitStatus,
    pub kill_count: u32,
}

impl Unit {
    pub fn new(id: impl Into<String>, team: Team, role: Role, position: Vec2) -> Self {
        let max_health = role.max_health();
        Unit {
            id: id.into(),
            team,
            role,
            position,
            current_target: None,
            health: max_health,
            max_health,
            suppression: 0.0,
            last_fired_at: None,
            status: UnitStatus::Alive,
            kill_count: 0,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.status == UnitStatus::Alive
    }

    /// Apply damage, clamping at zero. Returns true only for the call that
    /// moved the unit from ALIVE to DEAD, so callers can credit exactly one kill.
    pub fn apply_damage(&mut self, amount: i32) -> bool {
        if !self.is_alive() || amount <= 0 {
            return false;
        }
        self.health = (self.health - amount).max(0);
        if self.health == 0 {
            self.status = UnitStatus::Dead;
            self.current_target = None;
            self.suppression = 0.0;
            return true;
        }
        false
    }

    /// Restore health up to `max_health`. Dead units stay dead.
    pub fn heal(&mut self, amount: i32) -> i32 {
        if !self.is_alive() || amount <= 0 {
            return 0;
        }
        let before = self.health;
        self.health = (self.health + amount).min(self.max_health);
        self.health - before
    }

    pub fn add_suppression(&mut self, amount: f64) {
        if self.is_alive() {
            self.suppression = (self.suppression + amount).clamp(0.0, MAX_SUPPRESSION);
        }
    }

    pub fn decay_suppression(&mut self, amount: f64) {
        self.suppression = (self.suppression - amount).max(0.0);
    }

    /// Weapon cooldown, stretched while suppressed.
    pub fn effective_cooldown_ms(&self) -> u64 {
        let base = self.role.weapon().cooldown_ms as f64;
        let factor = 1.0 + (self.suppression / MAX_SUPPRESSION) * SUPPRESSED_COOLDOWN_FACTOR;
        (base * factor).round() as u64
    }

    /// Hit probability after the suppression penalty.
    pub fn effective_accuracy(&self) -> f64 {
        let accuracy = self.role.weapon().accuracy;
        accuracy * (1.0 - (self.suppression / MAX_SUPPRESSION) * SUPPRESSED_ACCURACY_PENALTY)
    }

    pub fn ready_to_fire(&self, now_ms: u64) -> bool {
        match self.last_fired_at {
            None => true,
            Some(t) => now_ms.saturating_sub(t) >= self.effective_cooldown_ms(),
        }
    }

    pub fn is_critical(&self) -> bool {
        (self.health as f64) < self.max_health as f64 * CRITICAL_HEALTH_FRACTION
    }
}
