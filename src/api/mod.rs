// HTTP API routes: simulation control, snapshots and the one-shot decision tick.

pub mod ws;

use axum::{
    body::Bytes,
    extract::{Json, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::dispatch::prompt::system_prompt;
use crate::dispatch::{Action, DecisionDispatcher};
use crate::engine::battlefield::Battlefield;
use crate::engine::scenario::{ScenarioConfig, UnitSpec};
use crate::engine::scheduler::SimulationScheduler;
use crate::engine::snapshot::DecisionRequest;
use crate::engine::spatial::Obstacle;
use crate::engine::unit::{Role, Team, Vec2};
use crate::error::{DispatchError, SimError};
use crate::metrics;

// ── Request types ─────────────────────────────────────────────────────

/// Battlefield posted by a client that runs its own simulation.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameTickRequest {
    pub units: Vec<GameTickUnit>,
    #[serde(default)]
    pub obstacles: Vec<Obstacle>,
    pub map_size: f64,
}

#[derive(Deserialize)]
pub struct GameTickUnit {
    pub id: String,
    pub team: Team,
    pub role: Role,
    #[serde(alias = "position")]
    pub pos: Vec2,
    #[serde(default)]
    pub hp: Option<i32>,
    #[serde(default)]
    pub suppression: Option<f64>,
}

// ── Shared application state ─────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub scheduler: SimulationScheduler,
    pub dispatcher: Arc<DecisionDispatcher>,
}

// ── Error helper ──────────────────────────────────────────────────────

fn json_error(status: StatusCode, msg: &str) -> impl IntoResponse {
    (status, Json(json!({ "error": msg })))
}

fn sim_error(e: SimError) -> axum::response::Response {
    let status = match e {
        SimError::AlreadyRunning => StatusCode::CONFLICT,
        SimError::NotRunning | SimError::InvalidScenario(_) => StatusCode::BAD_REQUEST,
        SimError::ScenarioLoad { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    json_error(status, &e.to_string()).into_response()
}

// ── Router ────────────────────────────────────────────────────────────

pub fn router(scheduler: SimulationScheduler, dispatcher: Arc<DecisionDispatcher>) -> Router {
    let state = AppState {
        scheduler,
        dispatcher,
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        // Simulation control
        .route("/api/sim/start", post(start_sim))
        .route("/api/sim/pause", post(pause_sim))
        .route("/api/sim/reset", post(reset_sim))
        .route("/api/sim/status", get(sim_status))
        .route("/api/sim/snapshot", get(sim_snapshot))
        // Stateless decision round
        .route("/api/game-tick", post(game_tick))
        // WebSocket
        .route("/ws/sim", get(ws::ws_sim))
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "skirmish-backend" }))
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    )
}

// ── Simulation handlers ───────────────────────────────────────────────

async fn start_sim(State(state): State<AppState>) -> impl IntoResponse {
    match state.scheduler.start() {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "running",
                "message": "Simulation started. Connect to /ws/sim for live updates."
            })),
        )
            .into_response(),
        Err(e) => sim_error(e),
    }
}

async fn pause_sim(State(state): State<AppState>) -> impl IntoResponse {
    match state.scheduler.pause() {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "paused" }))).into_response(),
        Err(e) => sim_error(e),
    }
}

/// Reset to the posted scenario, or to the current one when the body is empty.
async fn reset_sim(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let scenario = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        match std::str::from_utf8(&body)
            .map_err(|e| SimError::InvalidScenario(e.to_string()))
            .and_then(ScenarioConfig::from_json)
        {
            Ok(s) => Some(s),
            Err(e) => return sim_error(e),
        }
    };
    match state.scheduler.reset(scenario) {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "reset" }))).into_response(),
        Err(e) => sim_error(e),
    }
}

async fn sim_status(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.scheduler.status())).into_response()
}

async fn sim_snapshot(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.scheduler.snapshot())).into_response()
}

// ── Game tick ─────────────────────────────────────────────────────────

impl GameTickRequest {
    /// Living units become a scenario; dead ones carry no information.
    fn into_scenario(self) -> (ScenarioConfig, Vec<(String, f64)>) {
        let mut suppression = Vec::new();
        let units = self
            .units
            .into_iter()
            .filter(|u| u.hp.map_or(true, |hp| hp > 0))
            .map(|u| {
                if let Some(s) = u.suppression {
                    suppression.push((u.id.clone(), s));
                }
                UnitSpec {
                    health: u.hp.map(|hp| hp.min(u.role.max_health())),
                    id: u.id,
                    team: u.team,
                    role: u.role,
                    position: u.pos,
                }
            })
            .collect();
        let scenario = ScenarioConfig {
            map_size: self.map_size,
            obstacles: self.obstacles,
            units,
        };
        (scenario, suppression)
    }
}

/// One decision round for both teams of a client-side battlefield.
///
/// Both requests run concurrently. Actions are concatenated; the status is
/// 429 if either team was rate limited.
async fn game_tick(
    State(state): State<AppState>,
    Json(req): Json<GameTickRequest>,
) -> impl IntoResponse {
    let (scenario, suppression) = req.into_scenario();
    let mut field = match Battlefield::from_scenario(&scenario) {
        Ok(f) => f,
        Err(e) => return sim_error(e),
    };
    for (id, s) in suppression {
        if let Some(unit) = field.units.get_mut(&id) {
            unit.add_suppression(s);
        }
    }

    let (blue, red) = {
        let mut rng = rand::thread_rng();
        (
            field.decision_request(Team::Blue, &mut rng),
            field.decision_request(Team::Red, &mut rng),
        )
    };

    let (blue_result, red_result) = futures::join!(
        decide(&state.dispatcher, &blue),
        decide(&state.dispatcher, &red)
    );

    let mut actions: Vec<Action> = Vec::new();
    let mut rate_limited = false;
    for (request, result) in [(&blue, blue_result), (&red, red_result)] {
        match result {
            Ok(mut batch) => {
                // Only the team's own squad may be commanded.
                batch.retain(|a| request.contains(a.unit_id()));
                actions.extend(batch);
            }
            Err(DispatchError::RateLimited) => rate_limited = true,
            Err(e) => tracing::warn!(team = %request.team, error = %e, "Game tick decision failed"),
        }
    }

    let status = if rate_limited {
        StatusCode::TOO_MANY_REQUESTS
    } else {
        StatusCode::OK
    };
    (status, Json(json!({ "actions": actions }))).into_response()
}

async fn decide(
    dispatcher: &DecisionDispatcher,
    request: &DecisionRequest,
) -> Result<Vec<Action>, DispatchError> {
    if request.my_squad.is_empty() {
        return Ok(Vec::new());
    }
    let prompt = system_prompt(request.team, request.map_size);
    let tier = dispatcher.tier_for(request.team);
    let response = dispatcher
        .request_decision(tier, &prompt, &request.to_payload())
        .await?;
    Ok(response.actions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::transport::{DecisionTransport, ProviderReply, ProviderRequest};
    use crate::dispatch::{DispatcherConfig, KeyPool};
    use crate::engine::scheduler::SchedulerConfig;
    use axum::body::Body;
    use axum::http::Request;
    use futures::future::BoxFuture;
    use tower::ServiceExt;

    /// Always answers with the same status and body.
    struct FixedTransport {
        status: u16,
        body: String,
    }

    impl DecisionTransport for FixedTransport {
        fn post<'a>(
            &'a self,
            _request: ProviderRequest<'a>,
        ) -> BoxFuture<'a, Result<ProviderReply, DispatchError>> {
            Box::pin(async move {
                Ok(ProviderReply {
                    status: self.status,
                    body: self.body.clone(),
                })
            })
        }
    }

    fn app(status: u16, content: &str) -> Router {
        let body = json!({"choices": [{"message": {"content": content}}]}).to_string();
        let dispatcher = Arc::new(DecisionDispatcher::with_transport(
            DispatcherConfig::default(),
            KeyPool::new(["k1", "k2", "k3"]),
            Arc::new(FixedTransport { status, body }),
        ));
        let scheduler = SimulationScheduler::new(
            ScenarioConfig::default(),
            dispatcher.clone(),
            SchedulerConfig {
                decision_period: std::time::Duration::from_secs(3600),
                ..SchedulerConfig::default()
            },
        )
        .unwrap();
        router(scheduler, dispatcher)
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    const TICK_BODY: &str = r#"{
        "mapSize": 800,
        "obstacles": [],
        "units": [
            {"id": "b1", "team": "BLUE", "role": "LEADER", "pos": {"x": 100, "y": 100}, "hp": 900},
            {"id": "r1", "team": "RED", "role": "SCOUT", "pos": {"x": 300, "y": 100}, "hp": 300},
            {"id": "r2", "team": "RED", "role": "HEAVY", "pos": {"x": 500, "y": 500}, "hp": 0}
        ]
    }"#;

    #[tokio::test]
    async fn test_health() {
        let resp = app(200, "{}")
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_start_pause_conflicts() {
        let app = app(200, "{}");
        let resp = app.clone().oneshot(post("/api/sim/pause", "")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app.clone().oneshot(post("/api/sim/start", "")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = app.clone().oneshot(post("/api/sim/start", "")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = app
            .clone()
            .oneshot(Request::get("/api/sim/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["running"], true);

        let resp = app.oneshot(post("/api/sim/pause", "")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_reset_with_scenario_and_invalid_scenario() {
        let app = app(200, "{}");
        let scenario = r#"{"mapSize": 400, "units": [
            {"id": "a", "team": "BLUE", "role": "HEAVY", "position": {"x": 50, "y": 200}},
            {"id": "b", "team": "RED", "role": "SCOUT", "position": {"x": 350, "y": 200}}
        ]}"#;
        let resp = app.clone().oneshot(post("/api/sim/reset", scenario)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .clone()
            .oneshot(Request::get("/api/sim/snapshot").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let snap = body_json(resp).await;
        assert_eq!(snap["map_size"], 400.0);
        assert_eq!(snap["units"].as_array().unwrap().len(), 2);

        let resp = app
            .oneshot(post("/api/sim/reset", r#"{"mapSize": -5, "units": []}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_game_tick_filters_foreign_actions() {
        // Both teams receive the same reply; each keeps only its own unit.
        let content = r#"{"actions":[
            {"unitId":"b1","type":"MOVE","target":{"x":10,"y":10}},
            {"unitId":"r1","type":"MOVE","target":{"x":20,"y":20}},
            {"unitId":"r2","type":"MOVE","target":{"x":30,"y":30}}
        ]}"#;
        let resp = app(200, content).oneshot(post("/api/game-tick", TICK_BODY)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        let ids: Vec<&str> = body["actions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["unitId"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["b1", "r1"]);
    }

    #[tokio::test]
    async fn test_game_tick_rate_limited() {
        let resp = app(429, "").oneshot(post("/api/game-tick", TICK_BODY)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body_json(resp).await["actions"], json!([]));
    }

    #[tokio::test]
    async fn test_oversized_arena_is_rejected() {
        let app = app(200, "{}");
        let body = r#"{"mapSize": 1e9, "units": [
            {"id": "b1", "team": "BLUE", "role": "LEADER", "pos": {"x": 100, "y": 100}}
        ]}"#;
        let resp = app.clone().oneshot(post("/api/game-tick", body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .clone()
            .oneshot(post("/api/sim/reset", r#"{"mapSize": 1e20, "units": []}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        // The server is still serving afterwards.
        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        metrics::register_metrics();
        let resp = app(200, "{}")
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
