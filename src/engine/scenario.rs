// Scenario definitions injected at reset: arena size, obstacles and the
// starting roster. Loaded from JSON or built from the default layout.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::battlefield::Battlefield;
use super::config::{DEFAULT_MAP_SIZE, MAX_MAP_SIZE};
use super::spatial::Obstacle;
use super::unit::{Role, Team, Unit, Vec2};
use crate::error::SimError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitSpec {
    pub id: String,
    pub team: Team,
    pub role: Role,
    pub position: Vec2,
    /// Starting health; defaults to the role maximum.
    #[serde(default)]
    pub health: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioConfig {
    pub map_size: f64,
    #[serde(default)]
    pub obstacles: Vec<Obstacle>,
    pub units: Vec<UnitSpec>,
}

impl Default for ScenarioConfig {
    /// Two six-unit squads on opposite edges with a scatter of cover between them.
    fn default() -> Self {
        const ROLES: [Role; 6] = [
            Role::Leader,
            Role::Assault,
            Role::Heavy,
            Role::Sniper,
            Role::Scout,
            Role::Medic,
        ];
        let size = DEFAULT_MAP_SIZE;
        let mut units = Vec::with_capacity(ROLES.len() * 2);
        for (i, role) in ROLES.iter().enumerate() {
            let y = 150.0 + i as f64 * 100.0;
            units.push(UnitSpec {
                id: format!("b{}", i + 1),
                team: Team::Blue,
                role: *role,
                position: Vec2::new(60.0, y),
                health: None,
            });
            units.push(UnitSpec {
                id: format!("r{}", i + 1),
                team: Team::Red,
                role: *role,
                position: Vec2::new(size - 60.0, y),
                health: None,
            });
        }

        ScenarioConfig {
            map_size: size,
            obstacles: vec![
                Obstacle::new(200.0, 120.0, 60.0, 120.0),
                Obstacle::new(540.0, 120.0, 60.0, 120.0),
                Obstacle::new(370.0, 330.0, 60.0, 140.0),
                Obstacle::new(200.0, 560.0, 60.0, 120.0),
                Obstacle::new(540.0, 560.0, 60.0, 120.0),
                Obstacle::new(300.0, 40.0, 200.0, 30.0),
                Obstacle::new(300.0, 730.0, 200.0, 30.0),
            ],
            units,
        }
    }
}

impl ScenarioConfig {
    pub fn from_json(json: &str) -> Result<Self, SimError> {
        let scenario: ScenarioConfig = serde_json::from_str(json)
            .map_err(|e| SimError::InvalidScenario(format!("bad JSON: {e}")))?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn load(path: &Path) -> Result<Self, SimError> {
        let contents = std::fs::read_to_string(path).map_err(|e| SimError::ScenarioLoad {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json(&contents)
    }

    /// Reject scenarios the engine cannot run: a non-positive arena,
    /// duplicate or blank ids, out-of-bounds units, bad obstacles.
    pub fn validate(&self) -> Result<(), SimError> {
        if !self.map_size.is_finite() || self.map_size <= 0.0 {
            return Err(SimError::InvalidScenario(format!(
                "map size must be positive, got {}",
                self.map_size
            )));
        }
        if self.map_size > MAX_MAP_SIZE {
            return Err(SimError::InvalidScenario(format!(
                "map size {} exceeds the maximum of {}",
                self.map_size, MAX_MAP_SIZE
            )));
        }

        for o in &self.obstacles {
            let finite = [o.x, o.y, o.w, o.h].iter().all(|v| v.is_finite());
            if !finite || o.w <= 0.0 || o.h <= 0.0 {
                return Err(SimError::InvalidScenario(format!(
                    "obstacle {o:?} must have finite coordinates and positive size"
                )));
            }
        }

        let mut ids = HashSet::new();
        for u in &self.units {
            if u.id.trim().is_empty() {
                return Err(SimError::InvalidScenario("unit id must not be empty".into()));
            }
            if !ids.insert(u.id.as_str()) {
                return Err(SimError::InvalidScenario(format!("duplicate unit id {}", u.id)));
            }
            let p = u.position;
            if !p.is_finite() || p.x < 0.0 || p.y < 0.0 || p.x > self.map_size || p.y > self.map_size
            {
                return Err(SimError::InvalidScenario(format!(
                    "unit {} is outside the arena",
                    u.id
                )));
            }
            if let Some(hp) = u.health {
                if hp <= 0 || hp > u.role.max_health() {
                    return Err(SimError::InvalidScenario(format!(
                        "unit {} health {} outside 1..={}",
                        u.id,
                        hp,
                        u.role.max_health()
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Battlefield {
    pub fn from_scenario(scenario: &ScenarioConfig) -> Result<Self, SimError> {
        scenario.validate()?;
        let units = scenario
            .units
            .iter()
            .map(|spec| {
                let mut unit = Unit::new(spec.id.clone(), spec.team, spec.role, spec.position);
                if let Some(hp) = spec.health {
                    unit.health = hp;
                }
                unit
            })
            .collect();
        Ok(Battlefield::new(
            scenario.map_size,
            scenario.obstacles.clone(),
            units,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_scenario_is_valid() {
        let scenario = ScenarioConfig::default();
        assert!(scenario.validate().is_ok());
        let field = Battlefield::from_scenario(&scenario).unwrap();
        assert_eq!(field.alive_count(Team::Blue), 6);
        assert_eq!(field.alive_count(Team::Red), 6);
        for unit in field.units.values() {
            assert!(!field.physics.is_colliding(unit.position), "{} spawns in cover", unit.id);
        }
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "mapSize": 400,
            "obstacles": [{"x": 190, "y": 100, "w": 20, "h": 200}],
            "units": [
                {"id": "a", "team": "BLUE", "role": "HEAVY", "position": {"x": 50, "y": 200}},
                {"id": "b", "team": "RED", "role": "SCOUT", "position": {"x": 350, "y": 200}, "health": 10}
            ]
        }"#;
        let scenario = ScenarioConfig::from_json(json).unwrap();
        let field = Battlefield::from_scenario(&scenario).unwrap();
        assert_eq!(field.units["b"].health, 10);
        assert_eq!(field.physics.obstacles().len(), 1);
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let mut scenario = ScenarioConfig::default();
        scenario.units[1].id = scenario.units[0].id.clone();
        assert!(matches!(scenario.validate(), Err(SimError::InvalidScenario(_))));
    }

    #[test]
    fn test_rejects_out_of_bounds_and_bad_arena() {
        let mut scenario = ScenarioConfig::default();
        scenario.units[0].position = Vec2::new(-1.0, 10.0);
        assert!(scenario.validate().is_err());

        let mut scenario = ScenarioConfig::default();
        scenario.map_size = 0.0;
        assert!(scenario.validate().is_err());
    }

    #[test]
    fn test_rejects_oversized_arena() {
        let json = r#"{"mapSize": 1e9, "units": [
            {"id": "a", "team": "BLUE", "role": "SCOUT", "position": {"x": 10, "y": 10}}
        ]}"#;
        assert!(matches!(
            ScenarioConfig::from_json(json),
            Err(SimError::InvalidScenario(_))
        ));

        let scenario = ScenarioConfig {
            map_size: MAX_MAP_SIZE * 2.0,
            ..ScenarioConfig::default()
        };
        assert!(Battlefield::from_scenario(&scenario).is_err());

        let scenario = ScenarioConfig {
            map_size: MAX_MAP_SIZE,
            ..ScenarioConfig::default()
        };
        assert!(Battlefield::from_scenario(&scenario).is_ok());
    }

    #[test]
    fn test_load_missing_file() {
        let err = ScenarioConfig::load(Path::new("/nonexistent/scenario.json")).unwrap_err();
        assert!(matches!(err, SimError::ScenarioLoad { .. }));
    }
}
