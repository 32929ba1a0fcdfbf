// Simulation constants. Distances are arena units, times are milliseconds.

// Unit roles
pub const ROLE_LEADER: usize = 0;
pub const ROLE_ASSAULT: usize = 1;
pub const ROLE_HEAVY: usize = 2;
pub const ROLE_SNIPER: usize = 3;
pub const ROLE_SCOUT: usize = 4;
pub const ROLE_MEDIC: usize = 5;

pub const ROLE_COUNT: usize = 6;

// Max health per role [leader, assault, heavy, sniper, scout, medic]
pub const MAX_HEALTH: [i32; ROLE_COUNT] = [1000, 900, 1400, 700, 650, 800];

// Movement speed (units per second)
pub const MOVE_SPEED: [f64; ROLE_COUNT] = [55.0, 65.0, 38.0, 45.0, 85.0, 60.0];

// Weapon range
pub const WEAPON_RANGE: [f64; ROLE_COUNT] = [220.0, 180.0, 240.0, 420.0, 160.0, 140.0];

// Damage per hit
pub const WEAPON_DAMAGE: [i32; ROLE_COUNT] = [70, 60, 45, 220, 40, 25];

// Time between shots while unsuppressed
pub const WEAPON_COOLDOWN_MS: [u64; ROLE_COUNT] = [900, 600, 250, 2400, 500, 1000];

// Base hit probability
pub const WEAPON_ACCURACY: [f64; ROLE_COUNT] = [0.55, 0.5, 0.35, 0.8, 0.45, 0.4];

// Suppression added to the target per shot, hit or miss
pub const WEAPON_SUPPRESSION: [f64; ROLE_COUNT] = [6.0, 8.0, 14.0, 20.0, 5.0, 3.0];

// Health restored per medic action
pub const MEDIC_HEAL_AMOUNT: i32 = 60;

pub const CRIT_CHANCE: f64 = 0.1;
pub const CRIT_MULTIPLIER: i32 = 2;

pub const MAX_SUPPRESSION: f64 = 100.0;
pub const SUPPRESSION_DECAY_PER_TICK: f64 = 1.5;
// At full suppression accuracy is halved and cooldown doubled
pub const SUPPRESSED_ACCURACY_PENALTY: f64 = 0.5;
pub const SUPPRESSED_COOLDOWN_FACTOR: f64 = 1.0;

// Obstacle padding used for movement and line of sight respectively
pub const COLLISION_PADDING: f64 = 6.0;
pub const LOS_PADDING: f64 = 2.0;

// Line-of-sight sampling
pub const MIN_LOS_SAMPLES: usize = 8;
pub const LOS_SAMPLE_SPACING: f64 = 10.0;

// Distance at which a MOVE target counts as reached
pub const ARRIVAL_EPSILON: f64 = 1.5;

// Below this fraction of max health a unit is reported as CRITICAL
pub const CRITICAL_HEALTH_FRACTION: f64 = 0.4;

// Decision payload caps
pub const MAX_COVER_POINTS: usize = 8;
pub const MAX_SQUAD_IN_PAYLOAD: usize = 16;

// Shot tracers live this long before the physics tick prunes them
pub const TRACER_TTL_MS: u64 = 400;

// Decision log ring size
pub const DECISION_LOG_CAPACITY: usize = 50;

// Default loop periods
pub const PHYSICS_PERIOD_MS: u64 = 16;
pub const REFLEX_PERIOD_MS: u64 = 100;
pub const DECISION_PERIOD_MS: u64 = 3000;
pub const MAX_DECISION_BACKOFF_FACTOR: u32 = 8;

// Broadcast a snapshot every N physics ticks
pub const SNAPSHOT_EVERY_PHYSICS_TICKS: u64 = 3;

// Default arena edge length
pub const DEFAULT_MAP_SIZE: f64 = 800.0;

// Largest arena a scenario or game tick may request
pub const MAX_MAP_SIZE: f64 = 10_000.0;

// Spatial grid never exceeds this many cells per side; cells grow instead
pub const MAX_GRID_CELLS_PER_SIDE: usize = 256;

// How far a unit can spot enemies for the decision payload
pub const SIGHT_RANGE: f64 = 450.0;

// Kill notices outlive shot tracers so clients can show a feed
pub const KILL_EVENT_TTL_MS: u64 = 3000;
