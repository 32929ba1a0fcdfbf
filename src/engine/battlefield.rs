// The shared simulation store: units, obstacles, short-lived combat events and
// the decision log. All three loops mutate it under a single lock.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use super::combat::visible_enemies;
use super::config::*;
use super::physics::PhysicsEngine;
use super::snapshot::{AliveCounts, BattleSnapshot, DecisionRequest, HostileContact, SquadMember};
use super::spatial::Obstacle;
use super::unit::{Team, Unit, Vec2};
use crate::dispatch::action::{Action, DecisionResponse};
use crate::metrics;

/// Combat events kept briefly for rendering tracers and kill notices.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BattleEvent {
    Shot {
        from: Vec2,
        to: Vec2,
        hit: bool,
        crit: bool,
        at_ms: u64,
    },
    Kill {
        unit_id: String,
        killer_id: String,
        at_ms: u64,
    },
    Heal {
        from: Vec2,
        to: Vec2,
        amount: i32,
        at_ms: u64,
    },
}

impl BattleEvent {
    pub fn at_ms(&self) -> u64 {
        match self {
            BattleEvent::Shot { at_ms, .. }
            | BattleEvent::Kill { at_ms, .. }
            | BattleEvent::Heal { at_ms, .. } => *at_ms,
        }
    }

    fn ttl_ms(&self) -> u64 {
        match self {
            BattleEvent::Kill { .. } => KILL_EVENT_TTL_MS,
            _ => TRACER_TTL_MS,
        }
    }
}

/// One accepted decision action, kept for the on-screen log.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DecisionLogEntry {
    /// RFC 3339 wall-clock time the action was applied.
    pub timestamp: String,
    pub team: Team,
    pub unit_id: String,
    pub action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
}

/// Outcome of reconciling one decision response.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ApplyReport {
    /// MOVE actions that set a new `current_target`.
    pub applied: usize,
    /// ATTACK/HEAL actions accepted as informational only.
    pub informational: usize,
    /// Actions discarded as stale or foreign.
    pub dropped: usize,
}

#[derive(Debug, Clone)]
pub struct Battlefield {
    pub units: BTreeMap<String, Unit>,
    pub physics: PhysicsEngine,
    /// Simulation clock, advanced only by the physics tick.
    pub elapsed_ms: u64,
    events: Vec<BattleEvent>,
    decision_log: VecDeque<DecisionLogEntry>,
}

impl Battlefield {
    pub fn new(map_size: f64, obstacles: Vec<Obstacle>, units: Vec<Unit>) -> Self {
        Battlefield {
            units: units.into_iter().map(|u| (u.id.clone(), u)).collect(),
            physics: PhysicsEngine::new(map_size, obstacles),
            elapsed_ms: 0,
            events: Vec::new(),
            decision_log: VecDeque::with_capacity(DECISION_LOG_CAPACITY),
        }
    }

    pub fn map_size(&self) -> f64 {
        self.physics.map_size()
    }

    pub fn push_event(&mut self, event: BattleEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[BattleEvent] {
        &self.events
    }

    pub fn decision_log(&self) -> impl Iterator<Item = &DecisionLogEntry> {
        self.decision_log.iter()
    }

    /// Advance the clock by `dt_ms` and move every living unit towards its
    /// MOVE target. Reached targets are cleared. Returns how many units moved.
    pub fn physics_tick(&mut self, dt_ms: u64) -> usize {
        self.elapsed_ms += dt_ms;
        let dt_secs = dt_ms as f64 / 1000.0;
        let mut moved = 0;

        for unit in self.units.values_mut() {
            if !unit.is_alive() {
                continue;
            }
            let Some(target) = unit.current_target else {
                continue;
            };
            let next = self
                .physics
                .step_towards(unit.position, target, unit.role.speed() * dt_secs);
            if next != unit.position {
                unit.position = next;
                moved += 1;
            }
            if unit.position.distance(target) <= ARRIVAL_EPSILON {
                unit.current_target = None;
            }
        }

        let now = self.elapsed_ms;
        self.events
            .retain(|e| now.saturating_sub(e.at_ms()) < e.ttl_ms());
        moved
    }

    pub fn alive_count(&self, team: Team) -> usize {
        self.units
            .values()
            .filter(|u| u.team == team && u.is_alive())
            .count()
    }

    /// The only team with survivors, once the other has none.
    pub fn winner(&self) -> Option<Team> {
        let blue = self.alive_count(Team::Blue);
        let red = self.alive_count(Team::Red);
        match (blue, red) {
            (b, 0) if b > 0 => Some(Team::Blue),
            (0, r) if r > 0 => Some(Team::Red),
            _ => None,
        }
    }

    /// Build the fog-of-war limited situation report for one team.
    ///
    /// The squad order is shuffled so the model does not always favour the
    /// same unit; hostiles are limited to enemies some squad member can see.
    pub fn decision_request<R: Rng + ?Sized>(&self, team: Team, rng: &mut R) -> DecisionRequest {
        let mut squad: Vec<&Unit> = self
            .units
            .values()
            .filter(|u| u.team == team && u.is_alive())
            .collect();
        squad.shuffle(rng);
        squad.truncate(MAX_SQUAD_IN_PAYLOAD);

        let mut seen: BTreeSet<String> = BTreeSet::new();
        let my_squad: Vec<SquadMember> = squad
            .into_iter()
            .map(|u| {
                let visible = visible_enemies(&self.units, &self.physics, u, SIGHT_RANGE);
                seen.extend(visible.iter().cloned());
                SquadMember::from_unit(u, visible)
            })
            .collect();

        let known_hostiles = seen
            .iter()
            .filter_map(|id| self.units.get(id))
            .map(HostileContact::from_unit)
            .collect();

        let nearby_cover = self
            .physics
            .obstacles()
            .iter()
            .take(MAX_COVER_POINTS)
            .map(|o| {
                let c = o.center();
                Vec2::new(c.x.round(), c.y.round())
            })
            .collect();

        DecisionRequest {
            team,
            map_size: self.map_size(),
            my_squad,
            known_hostiles,
            nearby_cover,
        }
    }

    /// Merge a decision into unit state.
    ///
    /// An action applies only if its unit still exists, is alive, belongs to
    /// `team` and was part of the request the decision answers. MOVE sets
    /// `current_target` (clamped to the arena); ATTACK and HEAL are logged
    /// but never change health, which stays with the reflex engine.
    pub fn apply_decision(
        &mut self,
        team: Team,
        request: &DecisionRequest,
        response: &DecisionResponse,
    ) -> ApplyReport {
        let mut report = ApplyReport::default();

        for action in &response.actions {
            let unit_id = action.unit_id();
            let reason = match self.units.get(unit_id) {
                None => Some("unknown"),
                Some(_) if !request.contains(unit_id) => Some("not_in_snapshot"),
                Some(u) if u.team != team => Some("wrong_team"),
                Some(u) if !u.is_alive() => Some("dead"),
                Some(_) => None,
            };
            if let Some(reason) = reason {
                tracing::debug!(team = %team, unit = unit_id, reason, "Dropped stale action");
                metrics::ACTIONS_DROPPED_TOTAL.with_label_values(&[reason]).inc();
                report.dropped += 1;
                continue;
            }

            match action {
                Action::Move { target, .. } => {
                    let clamped = self.physics.clamp_to_arena(*target);
                    if let Some(unit) = self.units.get_mut(unit_id) {
                        unit.current_target = Some(clamped);
                    }
                    report.applied += 1;
                }
                Action::Attack { .. } | Action::Heal { .. } => {
                    report.informational += 1;
                }
            }
            metrics::ACTIONS_APPLIED_TOTAL
                .with_label_values(&[action.kind()])
                .inc();
            self.log_decision(team, action);
        }

        report
    }

    fn log_decision(&mut self, team: Team, action: &Action) {
        if self.decision_log.len() >= DECISION_LOG_CAPACITY {
            self.decision_log.pop_front();
        }
        self.decision_log.push_back(DecisionLogEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            team,
            unit_id: action.unit_id().to_string(),
            action: action.kind(),
            thought: action.thought().map(str::to_string),
        });
    }

    pub fn snapshot(&self, running: bool) -> BattleSnapshot {
        BattleSnapshot {
            elapsed_ms: self.elapsed_ms,
            map_size: self.map_size(),
            running,
            obstacles: self.physics.obstacles().to_vec(),
            units: self.units.values().cloned().collect(),
            events: self.events.clone(),
            decision_log: self.decision_log.iter().cloned().collect(),
            alive: AliveCounts {
                blue: self.alive_count(Team::Blue),
                red: self.alive_count(Team::Red),
            },
            winner: self.winner(),
        }
    }
}
