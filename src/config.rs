// Application configuration, loaded from environment variables and CLI flags.

use std::path::PathBuf;
use std::time::Duration;

use crate::dispatch::{DispatcherConfig, PremiumProvider, ProviderConfig};
use crate::engine::scheduler::SchedulerConfig;
use crate::engine::unit::Team;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Pooled credentials for the standard provider.
    pub decision_keys: Vec<String>,
    pub dispatcher: DispatcherConfig,
    pub scheduler: SchedulerConfig,
    /// Scenario JSON loaded at startup and on reset; the built-in layout when unset.
    pub scenario_path: Option<PathBuf>,
    /// Directory containing pre-built frontend files to serve.
    pub static_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables and CLI arguments.
    ///
    /// Environment variables:
    /// - `PORT` - HTTP server port (default: 3000)
    /// - `DECISION_KEYS` - comma separated provider keys (falls back to `SILICON_KEYS`)
    /// - `DECISION_ENDPOINT`, `DECISION_MODEL` - standard provider
    /// - `PREMIUM_ENDPOINT`, `PREMIUM_MODEL`, `PREMIUM_KEY` - optional dedicated provider
    /// - `PREMIUM_TEAMS` - teams routed to the premium provider, e.g. `BLUE`
    /// - `KEY_COOLDOWN_MS` (6100), `DECISION_TIMEOUT_MS` (20000), `DECISION_MAX_RETRIES` (2)
    /// - `DECISION_PERIOD_MS` (3000), `REFLEX_PERIOD_MS` (100), `PHYSICS_PERIOD_MS` (16)
    /// - `SCENARIO_PATH` - scenario JSON file
    /// - `STATIC_DIR` - Path to frontend dist directory for static file serving
    ///
    /// CLI flags:
    /// - `--port <PORT>` - Override the port
    /// - `--scenario <PATH>` - Override the scenario file
    pub fn load() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_sources(&args, |name| std::env::var(name).ok())
    }

    /// Build a config from explicit arguments and an environment lookup.
    pub fn from_sources(args: &[String], env: impl Fn(&str) -> Option<String>) -> Self {
        // Port: CLI flag --port takes precedence, then env var, then default
        let port = Self::parse_cli_value(args, "--port")
            .and_then(|v| v.parse().ok())
            .or_else(|| env("PORT").and_then(|v| v.parse().ok()))
            .unwrap_or(3000);

        let decision_keys = env("DECISION_KEYS")
            .filter(|v| !v.trim().is_empty())
            .or_else(|| env("SILICON_KEYS"))
            .map(|v| parse_key_list(&v))
            .unwrap_or_default();

        let defaults = DispatcherConfig::default();
        let standard = ProviderConfig {
            endpoint: env("DECISION_ENDPOINT").unwrap_or(defaults.standard.endpoint.clone()),
            model: env("DECISION_MODEL").unwrap_or(defaults.standard.model.clone()),
        };

        let premium = match (env("PREMIUM_ENDPOINT"), env("PREMIUM_KEY")) {
            (Some(endpoint), Some(api_key)) if !api_key.trim().is_empty() => Some(PremiumProvider {
                provider: ProviderConfig {
                    endpoint,
                    model: env("PREMIUM_MODEL").unwrap_or_else(|| standard.model.clone()),
                },
                api_key: api_key.trim().to_string(),
            }),
            _ => None,
        };
        let premium_teams = env("PREMIUM_TEAMS")
            .map(|v| parse_team_list(&v))
            .unwrap_or_default();

        let dispatcher = DispatcherConfig {
            standard,
            premium,
            premium_teams,
            key_cooldown: env_duration_ms(&env, "KEY_COOLDOWN_MS", defaults.key_cooldown),
            request_timeout: env_duration_ms(&env, "DECISION_TIMEOUT_MS", defaults.request_timeout),
            max_retries: env("DECISION_MAX_RETRIES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_retries),
            ..defaults
        };

        let sched_defaults = SchedulerConfig::default();
        let scheduler = SchedulerConfig {
            physics_period: env_duration_ms(&env, "PHYSICS_PERIOD_MS", sched_defaults.physics_period),
            reflex_period: env_duration_ms(&env, "REFLEX_PERIOD_MS", sched_defaults.reflex_period),
            decision_period: env_duration_ms(
                &env,
                "DECISION_PERIOD_MS",
                sched_defaults.decision_period,
            ),
            ..sched_defaults
        };

        let scenario_path = Self::parse_cli_value(args, "--scenario")
            .or_else(|| env("SCENARIO_PATH"))
            .map(PathBuf::from);

        let static_dir = env("STATIC_DIR").map(PathBuf::from);

        Config {
            port,
            decision_keys,
            dispatcher,
            scheduler,
            scenario_path,
            static_dir,
        }
    }

    /// Parse a CLI flag value like `--port 8080`.
    fn parse_cli_value(args: &[String], flag: &str) -> Option<String> {
        args.windows(2).find_map(|pair| {
            if pair[0] == flag {
                Some(pair[1].clone())
            } else {
                None
            }
        })
    }
}

/// Split a comma separated key list, dropping blanks.
pub fn parse_key_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_team_list(raw: &str) -> Vec<Team> {
    raw.split(',')
        .filter_map(|t| match t.trim().to_ascii_uppercase().as_str() {
            "BLUE" => Some(Team::Blue),
            "RED" => Some(Team::Red),
            "" => None,
            other => {
                tracing::warn!("Ignoring unknown team '{}' in PREMIUM_TEAMS", other);
                None
            }
        })
        .collect()
}

/// Millisecond duration from the environment. Zero and garbage fall back to the default.
fn env_duration_ms(env: &impl Fn(&str) -> Option<String>, name: &str, default: Duration) -> Duration {
    env(name)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|&ms| ms > 0)
        .map(Duration::from_millis)
        .unwrap_or(default)
}
