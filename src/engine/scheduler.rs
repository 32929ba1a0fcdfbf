// Simulation scheduler: owns the battlefield and runs the physics, reflex and
// decision loops as cooperative tokio tasks, merging decision results back
// into unit state and broadcasting snapshots to subscribers.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::MissedTickBehavior;

use super::battlefield::Battlefield;
use super::combat::CombatReflexEngine;
use super::config::*;
use super::scenario::ScenarioConfig;
use super::snapshot::{AliveCounts, BattleSnapshot, DecisionRequest};
use super::unit::Team;
use crate::dispatch::prompt::system_prompt;
use crate::dispatch::{DecisionDispatcher, DecisionResponse};
use crate::error::{DispatchError, SimError};
use crate::metrics;

/// Messages broadcast to WebSocket clients.
#[derive(Clone, Serialize, Debug)]
#[serde(tag = "type")]
pub enum SimMessage {
    #[serde(rename = "snapshot")]
    Snapshot(BattleSnapshot),
    /// One side has been wiped out; the loops stop after this.
    #[serde(rename = "battle_end")]
    BattleEnd { winner: Team, elapsed_ms: u64 },
}

/// Loop periods.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub physics_period: Duration,
    pub reflex_period: Duration,
    pub decision_period: Duration,
    /// Broadcast a snapshot every this many physics ticks.
    pub snapshot_every: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            physics_period: Duration::from_millis(PHYSICS_PERIOD_MS),
            reflex_period: Duration::from_millis(REFLEX_PERIOD_MS),
            decision_period: Duration::from_millis(DECISION_PERIOD_MS),
            snapshot_every: SNAPSHOT_EVERY_PHYSICS_TICKS,
        }
    }
}

/// What `dispatch_team` did for one team.
#[derive(Debug)]
pub enum DispatchOutcome {
    Dispatched(JoinHandle<()>),
    /// A request for this team is still awaiting the provider.
    InFlight,
    /// Recent failures pushed the next request back.
    BackingOff,
    /// The team has no living units.
    NoUnits,
    NotRunning,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct TeamInFlight {
    pub blue: bool,
    pub red: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimStatus {
    pub running: bool,
    pub epoch: u64,
    pub elapsed_ms: u64,
    pub alive: AliveCounts,
    pub winner: Option<Team>,
    pub in_flight: TeamInFlight,
    pub dispatch_keys: usize,
}

/// Per-team decision bookkeeping.
#[derive(Debug, Default)]
struct TeamState {
    in_flight: AtomicBool,
    failures: AtomicU32,
    resume_at: Mutex<Option<Instant>>,
}

/// Holds a team's in-flight flag; dropping it (including when the owning
/// task is aborted) clears the flag.
struct InFlightGuard {
    state: Arc<TeamState>,
}

impl InFlightGuard {
    fn try_acquire(state: &Arc<TeamState>) -> Option<Self> {
        state
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        metrics::DECISIONS_IN_FLIGHT.inc();
        Some(InFlightGuard {
            state: state.clone(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.state.in_flight.store(false, Ordering::Release);
        metrics::DECISIONS_IN_FLIGHT.dec();
    }
}

/// Runs one simulation. Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct SimulationScheduler {
    field: Arc<Mutex<Battlefield>>,
    scenario: Arc<Mutex<ScenarioConfig>>,
    dispatcher: Arc<DecisionDispatcher>,
    reflex: CombatReflexEngine,
    config: SchedulerConfig,
    running: Arc<AtomicBool>,
    /// Bumped on every start and pause; results from an older epoch are discarded.
    epoch: Arc<AtomicU64>,
    tasks: Arc<Mutex<Vec<AbortHandle>>>,
    teams: Arc<[Arc<TeamState>; 2]>,
    physics_ticks: Arc<AtomicU64>,
    broadcast_tx: broadcast::Sender<String>,
}

impl SimulationScheduler {
    pub fn new(
        scenario: ScenarioConfig,
        dispatcher: Arc<DecisionDispatcher>,
        config: SchedulerConfig,
    ) -> Result<Self, SimError> {
        let field = Battlefield::from_scenario(&scenario)?;
        let (tx, _) = broadcast::channel(256);
        Ok(Self {
            field: Arc::new(Mutex::new(field)),
            scenario: Arc::new(Mutex::new(scenario)),
            dispatcher,
            reflex: CombatReflexEngine::new(),
            config,
            running: Arc::new(AtomicBool::new(false)),
            epoch: Arc::new(AtomicU64::new(0)),
            tasks: Arc::new(Mutex::new(Vec::new())),
            teams: Arc::new([Arc::default(), Arc::default()]),
            physics_ticks: Arc::new(AtomicU64::new(0)),
            broadcast_tx: tx,
        })
    }

    /// Subscribe to simulation messages. Returns a receiver that yields JSON strings.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.broadcast_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn dispatcher(&self) -> &DecisionDispatcher {
        &self.dispatcher
    }

    fn team_state(&self, team: Team) -> &Arc<TeamState> {
        match team {
            Team::Blue => &self.teams[0],
            Team::Red => &self.teams[1],
        }
    }

    /// Spawn the three loops.
    pub fn start(&self) -> Result<(), SimError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(SimError::AlreadyRunning);
        }
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        metrics::SIMULATION_RUNNING.set(1);
        tracing::info!(epoch, "Simulation started");

        let loops = [
            tokio::spawn(self.clone().physics_loop(epoch)),
            tokio::spawn(self.clone().reflex_loop(epoch)),
            tokio::spawn(self.clone().decision_loop(epoch)),
        ];
        let mut tasks = self.tasks.lock().unwrap();
        tasks.retain(|h| !h.is_finished());
        tasks.extend(loops.iter().map(|h| h.abort_handle()));
        Ok(())
    }

    /// Stop the loops and cancel in-flight decisions. Results that still
    /// arrive are discarded by the epoch check.
    pub fn pause(&self) -> Result<(), SimError> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Err(SimError::NotRunning);
        }
        self.halt();
        tracing::info!(epoch = self.epoch(), "Simulation paused");
        Ok(())
    }

    fn halt(&self) {
        self.running.store(false, Ordering::Release);
        self.epoch.fetch_add(1, Ordering::AcqRel);
        metrics::SIMULATION_RUNNING.set(0);
        let handles: Vec<AbortHandle> = self.tasks.lock().unwrap().drain(..).collect();
        for h in handles {
            h.abort();
        }
    }

    /// Stop everything and rebuild the battlefield from `scenario`, or from
    /// the last scenario when None.
    pub fn reset(&self, scenario: Option<ScenarioConfig>) -> Result<(), SimError> {
        let scenario = match scenario {
            Some(s) => s,
            None => self.scenario.lock().unwrap().clone(),
        };
        let field = Battlefield::from_scenario(&scenario)?;

        if self.is_running() {
            self.halt();
        } else {
            // Invalidate any straggling decision from a previous run.
            self.epoch.fetch_add(1, Ordering::AcqRel);
        }
        *self.field.lock().unwrap() = field;
        *self.scenario.lock().unwrap() = scenario;
        self.physics_ticks.store(0, Ordering::Release);
        for state in self.teams.iter() {
            state.failures.store(0, Ordering::Release);
            *state.resume_at.lock().unwrap() = None;
        }
        tracing::info!(epoch = self.epoch(), "Simulation reset");
        self.broadcast_snapshot();
        Ok(())
    }

    pub fn snapshot(&self) -> BattleSnapshot {
        let running = self.is_running();
        self.field.lock().unwrap().snapshot(running)
    }

    pub fn status(&self) -> SimStatus {
        let field = self.field.lock().unwrap();
        SimStatus {
            running: self.is_running(),
            epoch: self.epoch(),
            elapsed_ms: field.elapsed_ms,
            alive: AliveCounts {
                blue: field.alive_count(Team::Blue),
                red: field.alive_count(Team::Red),
            },
            winner: field.winner(),
            in_flight: TeamInFlight {
                blue: self.team_state(Team::Blue).in_flight.load(Ordering::Acquire),
                red: self.team_state(Team::Red).in_flight.load(Ordering::Acquire),
            },
            dispatch_keys: self.dispatcher.pool().len(),
        }
    }

    /// Run `f` against the battlefield under the store lock.
    pub fn with_field<T>(&self, f: impl FnOnce(&mut Battlefield) -> T) -> T {
        let mut field = self.field.lock().unwrap();
        f(&mut field)
    }

    // ── Ticks ────────────────────────────────────────────────────────

    /// One physics tick. Returns the winner once a side is wiped out.
    pub fn physics_step(&self, dt_ms: u64) -> Option<Team> {
        let started = Instant::now();
        let (winner, snapshot) = {
            let mut field = self.field.lock().unwrap();
            field.physics_tick(dt_ms);
            let tick = self.physics_ticks.fetch_add(1, Ordering::AcqRel) + 1;
            let snapshot = (tick % self.config.snapshot_every.max(1) == 0)
                .then(|| field.snapshot(self.is_running()));
            (field.winner(), snapshot)
        };
        let elapsed = started.elapsed();
        metrics::PHYSICS_TICK_DURATION_MS.observe(elapsed.as_secs_f64() * 1000.0);
        if elapsed > self.config.physics_period {
            tracing::warn!(elapsed_ms = elapsed.as_millis() as u64, "Physics tick over budget");
        }
        if let Some(snapshot) = snapshot {
            self.send(&SimMessage::Snapshot(snapshot));
        }
        winner
    }

    /// One reflex pass over every unit.
    pub fn reflex_step(&self) {
        let started = Instant::now();
        let report = {
            let mut field = self.field.lock().unwrap();
            let mut rng = rand::thread_rng();
            self.reflex.tick(&mut field, &mut rng)
        };
        let elapsed = started.elapsed();
        metrics::REFLEX_TICK_DURATION_MS.observe(elapsed.as_secs_f64() * 1000.0);
        if elapsed > self.config.reflex_period {
            tracing::warn!(elapsed_ms = elapsed.as_millis() as u64, "Reflex tick over budget");
        }
        if report.shots > 0 || report.heals > 0 {
            tracing::trace!(
                shots = report.shots,
                hits = report.hits,
                heals = report.heals,
                kills = report.kills.len(),
                "Reflex pass"
            );
        }
    }

    /// Issue a decision request for `team` unless one is already in flight
    /// or the team is backing off after failures.
    pub fn dispatch_team(&self, team: Team) -> DispatchOutcome {
        if !self.is_running() {
            return DispatchOutcome::NotRunning;
        }
        let state = self.team_state(team).clone();
        if let Some(resume_at) = *state.resume_at.lock().unwrap() {
            if Instant::now() < resume_at {
                return DispatchOutcome::BackingOff;
            }
        }
        let Some(guard) = InFlightGuard::try_acquire(&state) else {
            return DispatchOutcome::InFlight;
        };

        let (epoch, request) = {
            let field = self.field.lock().unwrap();
            let mut rng = rand::thread_rng();
            (self.epoch(), field.decision_request(team, &mut rng))
        };
        if request.my_squad.is_empty() {
            return DispatchOutcome::NoUnits;
        }

        let this = self.clone();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            let prompt = system_prompt(team, request.map_size);
            let payload = request.to_payload();
            let tier = this.dispatcher.tier_for(team);
            let started = Instant::now();
            let result = this
                .dispatcher
                .request_decision(tier, &prompt, &payload)
                .await;
            metrics::DECISION_LATENCY_SECONDS.observe(started.elapsed().as_secs_f64());
            this.apply_result(team, epoch, &request, result);
        });

        self.track_dispatch(&handle, epoch);
        DispatchOutcome::Dispatched(handle)
    }

    /// Register a team task for abort on pause. A pause that landed after the
    /// running check has already drained `tasks`, so the task is aborted here.
    fn track_dispatch(&self, handle: &JoinHandle<()>, epoch: u64) {
        {
            let mut tasks = self.tasks.lock().unwrap();
            tasks.retain(|h| !h.is_finished());
            tasks.push(handle.abort_handle());
        }
        if !self.still_current(epoch) {
            handle.abort();
        }
    }

    fn apply_result(
        &self,
        team: Team,
        epoch: u64,
        request: &DecisionRequest,
        result: Result<DecisionResponse, DispatchError>,
    ) {
        let mut field = self.field.lock().unwrap();
        if !self.is_running() || self.epoch() != epoch {
            tracing::debug!(team = %team, epoch, "Discarding decision from a stale run");
            metrics::DECISION_REQUESTS_TOTAL
                .with_label_values(&[team.label(), "stale"])
                .inc();
            return;
        }

        let state = self.team_state(team);
        match result {
            Ok(response) => {
                let report = field.apply_decision(team, request, &response);
                state.failures.store(0, Ordering::Release);
                *state.resume_at.lock().unwrap() = None;
                metrics::DECISION_REQUESTS_TOTAL
                    .with_label_values(&[team.label(), "ok"])
                    .inc();
                tracing::debug!(
                    team = %team,
                    applied = report.applied,
                    informational = report.informational,
                    dropped = report.dropped,
                    "Decision applied"
                );
            }
            Err(e) => {
                let failures = state.failures.fetch_add(1, Ordering::AcqRel) + 1;
                let factor = backoff_factor(failures);
                let delay = self.config.decision_period * factor;
                *state.resume_at.lock().unwrap() = Some(Instant::now() + delay);
                let outcome = if matches!(e, DispatchError::RateLimited) {
                    "rate_limited"
                } else {
                    "error"
                };
                metrics::DECISION_REQUESTS_TOTAL
                    .with_label_values(&[team.label(), outcome])
                    .inc();
                tracing::warn!(
                    team = %team,
                    error = %e,
                    failures,
                    backoff_ms = delay.as_millis() as u64,
                    "Decision failed, holding current orders"
                );
            }
        }
    }

    fn send(&self, msg: &SimMessage) {
        match serde_json::to_string(msg) {
            // No receivers is fine.
            Ok(json) => {
                let _ = self.broadcast_tx.send(json);
            }
            Err(e) => tracing::error!("failed to serialize sim message: {}", e),
        }
    }

    fn broadcast_snapshot(&self) {
        let snapshot = self.snapshot();
        self.send(&SimMessage::Snapshot(snapshot));
    }

    // ── Loops ────────────────────────────────────────────────────────

    fn still_current(&self, epoch: u64) -> bool {
        self.is_running() && self.epoch() == epoch
    }

    async fn physics_loop(self, epoch: u64) {
        let dt_ms = self.config.physics_period.as_millis() as u64;
        let mut interval = tokio::time::interval(self.config.physics_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if !self.still_current(epoch) {
                break;
            }
            if let Some(winner) = self.physics_step(dt_ms) {
                let elapsed_ms = self.field.lock().unwrap().elapsed_ms;
                tracing::info!(winner = %winner, elapsed_ms, "Battle over");
                self.send(&SimMessage::BattleEnd { winner, elapsed_ms });
                if self.running.swap(false, Ordering::AcqRel) {
                    self.halt();
                }
                break;
            }
        }
    }

    async fn reflex_loop(self, epoch: u64) {
        let mut interval = tokio::time::interval(self.config.reflex_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if !self.still_current(epoch) {
                break;
            }
            self.reflex_step();
        }
    }

    async fn decision_loop(self, epoch: u64) {
        // First round one full period after start.
        let period = self.config.decision_period;
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        if !self.dispatcher.has_credentials() {
            tracing::warn!("No decision keys configured; units will hold position");
        }
        loop {
            interval.tick().await;
            if !self.still_current(epoch) {
                break;
            }
            for team in Team::ALL {
                match self.dispatch_team(team) {
                    DispatchOutcome::Dispatched(_) => {}
                    DispatchOutcome::InFlight => {
                        tracing::debug!(team = %team, "Previous decision still in flight, skipping");
                        metrics::DECISION_REQUESTS_TOTAL
                            .with_label_values(&[team.label(), "skipped"])
                            .inc();
                    }
                    DispatchOutcome::BackingOff => {
                        tracing::debug!(team = %team, "Backing off decision requests");
                    }
                    DispatchOutcome::NoUnits | DispatchOutcome::NotRunning => {}
                }
            }
        }
    }
}

/// `2^failures`, capped at `MAX_DECISION_BACKOFF_FACTOR`.
fn backoff_factor(failures: u32) -> u32 {
    1u32.checked_shl(failures.min(31))
        .unwrap_or(u32::MAX)
        .min(MAX_DECISION_BACKOFF_FACTOR)
}
