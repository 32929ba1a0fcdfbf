// Reflex combat: autonomous target acquisition and shot resolution, run every
// reflex tick without waiting on the decision service.

use std::collections::BTreeMap;

use rand::Rng;

use super::battlefield::{BattleEvent, Battlefield};
use super::config::*;
use super::physics::PhysicsEngine;
use super::unit::{Role, Unit};
use crate::metrics;

/// Aggregate of one reflex pass, for logging and tests.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReflexReport {
    pub shots: u32,
    pub hits: u32,
    pub heals: u32,
    /// (victim id, killer id) in the order deaths happened.
    pub kills: Vec<(String, String)>,
}

/// Stateless resolver; all mutable state lives in the `Battlefield`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CombatReflexEngine;

impl CombatReflexEngine {
    pub fn new() -> Self {
        CombatReflexEngine
    }

    /// Run one reflex pass at the battlefield's current clock.
    ///
    /// Units act in ascending id order and every shot is applied before the
    /// next unit acts, so a unit killed earlier in the pass never fires and
    /// a death is credited exactly once.
    pub fn tick<R: Rng + ?Sized>(&self, field: &mut Battlefield, rng: &mut R) -> ReflexReport {
        let now = field.elapsed_ms;
        let mut report = ReflexReport::default();
        let ids: Vec<String> = field.units.keys().cloned().collect();

        for id in &ids {
            let Some(actor) = field.units.get(id) else {
                continue;
            };
            if !actor.is_alive() || !actor.ready_to_fire(now) {
                continue;
            }

            if actor.role.can_heal() {
                if let Some(patient) = select_heal_target(&field.units, &field.physics, actor) {
                    self.resolve_heal(field, id, &patient, now);
                    report.heals += 1;
                    continue;
                }
            }

            let Some(target_id) = select_target(&field.units, &field.physics, actor) else {
                continue;
            };
            report.shots += 1;
            if let Some(kill) = self.resolve_shot(field, id, &target_id, now, rng, &mut report) {
                report.kills.push(kill);
            }
        }

        for unit in field.units.values_mut() {
            unit.decay_suppression(SUPPRESSION_DECAY_PER_TICK);
        }

        report
    }

    fn resolve_shot<R: Rng + ?Sized>(
        &self,
        field: &mut Battlefield,
        shooter_id: &str,
        target_id: &str,
        now: u64,
        rng: &mut R,
        report: &mut ReflexReport,
    ) -> Option<(String, String)> {
        let (weapon, accuracy, from) = {
            let shooter = field.units.get(shooter_id)?;
            (shooter.role.weapon(), shooter.effective_accuracy(), shooter.position)
        };

        let hit = rng.gen::<f64>() < accuracy;
        let crit = hit && rng.gen::<f64>() < CRIT_CHANCE;

        let target = field.units.get_mut(target_id)?;
        let to = target.position;
        target.add_suppression(weapon.suppression);
        let mut killed = false;
        if hit {
            report.hits += 1;
            let damage = if crit { weapon.damage * CRIT_MULTIPLIER } else { weapon.damage };
            killed = target.apply_damage(damage);
        }
        let role = target.role;

        if let Some(shooter) = field.units.get_mut(shooter_id) {
            shooter.last_fired_at = Some(now);
            if killed {
                shooter.kill_count += 1;
            }
        }

        field.push_event(BattleEvent::Shot {
            from,
            to,
            hit,
            crit,
            at_ms: now,
        });

        if killed {
            tracing::info!(victim = target_id, killer = shooter_id, "Unit killed");
            metrics::KILLS_TOTAL.with_label_values(&[role_label(role)]).inc();
            field.push_event(BattleEvent::Kill {
                unit_id: target_id.to_string(),
                killer_id: shooter_id.to_string(),
                at_ms: now,
            });
            return Some((target_id.to_string(), shooter_id.to_string()));
        }
        None
    }

    fn resolve_heal(&self, field: &mut Battlefield, medic_id: &str, patient_id: &str, now: u64) {
        let from = match field.units.get_mut(medic_id) {
            Some(medic) => {
                medic.last_fired_at = Some(now);
                medic.position
            }
            None => return,
        };
        if let Some(patient) = field.units.get_mut(patient_id) {
            let restored = patient.heal(MEDIC_HEAL_AMOUNT);
            let to = patient.position;
            field.push_event(BattleEvent::Heal {
                from,
                to,
                amount: restored,
                at_ms: now,
            });
        }
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::Leader => "leader",
        Role::Assault => "assault",
        Role::Heavy => "heavy",
        Role::Sniper => "sniper",
        Role::Scout => "scout",
        Role::Medic => "medic",
    }
}

/// Nearest living enemy within weapon range and line of sight.
/// Exact distance ties go to the lowest unit id.
pub fn select_target(
    units: &BTreeMap<String, Unit>,
    physics: &PhysicsEngine,
    shooter: &Unit,
) -> Option<String> {
    let range_sq = shooter.role.weapon().range.powi(2);
    let mut best: Option<(&str, f64)> = None;

    // BTreeMap iterates in id order, so a strict `<` keeps the lowest id on ties.
    for candidate in units.values() {
        if candidate.team == shooter.team || !candidate.is_alive() {
            continue;
        }
        let dist_sq = shooter.position.distance_sq(candidate.position);
        if dist_sq > range_sq {
            continue;
        }
        if best.is_some_and(|(_, d)| dist_sq >= d) {
            continue;
        }
        if physics.segment_blocked(shooter.position, candidate.position) {
            continue;
        }
        best = Some((candidate.id.as_str(), dist_sq));
    }

    best.map(|(id, _)| id.to_string())
}

/// Most wounded living ally (not the medic itself) within range and sight.
pub fn select_heal_target(
    units: &BTreeMap<String, Unit>,
    physics: &PhysicsEngine,
    medic: &Unit,
) -> Option<String> {
    let range_sq = medic.role.weapon().range.powi(2);
    let mut best: Option<(&str, i32)> = None;

    for ally in units.values() {
        if ally.team != medic.team || ally.id == medic.id || !ally.is_alive() {
            continue;
        }
        let missing = ally.max_health - ally.health;
        if missing <= 0 || best.is_some_and(|(_, m)| missing <= m) {
            continue;
        }
        if medic.position.distance_sq(ally.position) > range_sq
            || physics.segment_blocked(medic.position, ally.position)
        {
            continue;
        }
        best = Some((ally.id.as_str(), missing));
    }

    best.map(|(id, _)| id.to_string())
}

/// Ids of living enemies within `sight` that the observer has line of sight to.
pub fn visible_enemies(
    units: &BTreeMap<String, Unit>,
    physics: &PhysicsEngine,
    observer: &Unit,
    sight: f64,
) -> Vec<String> {
    let sight_sq = sight * sight;
    units
        .values()
        .filter(|u| u.team != observer.team && u.is_alive())
        .filter(|u| observer.position.distance_sq(u.position) <= sight_sq)
        .filter(|u| physics.has_line_of_sight(observer.position, u.position))
        .map(|u| u.id.clone())
        .collect()
}
