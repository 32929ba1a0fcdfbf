// Serializable views of the battlefield: the per-team decision payload and
// the full snapshot streamed to clients.

use std::collections::BTreeSet;

use serde::Serialize;

use super::battlefield::{BattleEvent, DecisionLogEntry};
use super::spatial::Obstacle;
use super::unit::{Role, Team, Unit, Vec2};

/// One squad member as the decision service sees it.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SquadMember {
    pub id: String,
    pub role: Role,
    pub pos: Vec2,
    pub hp: i32,
    pub suppression: f64,
    /// `CRITICAL` below the critical health fraction, otherwise `OK`.
    pub status: &'static str,
    /// Enemies this unit currently has line of sight to.
    pub visible_enemies: Vec<String>,
}

/// An enemy spotted by at least one squad member.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HostileContact {
    pub id: String,
    pub role: Role,
    pub pos: Vec2,
    pub hp: i32,
    pub suppression: f64,
}

/// Immutable per-team situation report, built fresh each decision tick.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRequest {
    pub team: Team,
    pub map_size: f64,
    pub my_squad: Vec<SquadMember>,
    pub known_hostiles: Vec<HostileContact>,
    pub nearby_cover: Vec<Vec2>,
}

impl DecisionRequest {
    /// Whether `unit_id` was part of this team's squad when the request was built.
    pub fn contains(&self, unit_id: &str) -> bool {
        self.my_squad.iter().any(|m| m.id == unit_id)
    }

    pub fn squad_ids(&self) -> BTreeSet<&str> {
        self.my_squad.iter().map(|m| m.id.as_str()).collect()
    }

    /// JSON user payload sent to the decision service.
    pub fn to_payload(&self) -> String {
        #[derive(Serialize)]
        struct Payload<'a> {
            my_squad: &'a [SquadMember],
            known_hostiles: &'a [HostileContact],
            nearby_cover: &'a [Vec2],
        }
        serde_json::to_string(&Payload {
            my_squad: &self.my_squad,
            known_hostiles: &self.known_hostiles,
            nearby_cover: &self.nearby_cover,
        })
        .unwrap_or_else(|_| "{}".to_string())
    }
}

impl SquadMember {
    pub fn from_unit(unit: &Unit, visible_enemies: Vec<String>) -> Self {
        SquadMember {
            id: unit.id.clone(),
            role: unit.role,
            pos: unit.position,
            hp: unit.health,
            suppression: unit.suppression,
            status: if unit.is_critical() { "CRITICAL" } else { "OK" },
            visible_enemies,
        }
    }
}

impl HostileContact {
    pub fn from_unit(unit: &Unit) -> Self {
        HostileContact {
            id: unit.id.clone(),
            role: unit.role,
            pos: unit.position,
            hp: unit.health,
            suppression: unit.suppression,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct AliveCounts {
    pub blue: usize,
    pub red: usize,
}

/// Everything a client needs to render one frame.
#[derive(Debug, Clone, Serialize)]
pub struct BattleSnapshot {
    pub elapsed_ms: u64,
    pub map_size: f64,
    pub running: bool,
    pub obstacles: Vec<Obstacle>,
    pub units: Vec<Unit>,
    pub events: Vec<BattleEvent>,
    pub decision_log: Vec<DecisionLogEntry>,
    pub alive: AliveCounts,
    pub winner: Option<Team>,
}
