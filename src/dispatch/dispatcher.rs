// Rate-aware decision dispatcher: key selection, provider routing, bounded
// retry with failover, and response validation.

use std::sync::Arc;
use std::time::Duration;

use super::action::{ChatCompletionRequest, ChatCompletionResponse, DecisionResponse, Tier};
use super::key_pool::{redact, KeyPool};
use super::repair::parse_decision_response;
use super::transport::{DecisionTransport, HttpTransport, ProviderRequest};
use crate::engine::unit::Team;
use crate::error::DispatchError;
use crate::metrics;

pub const DEFAULT_ENDPOINT: &str = "https://api.siliconflow.cn/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "Qwen/Qwen2.5-7B-Instruct";

/// An OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub endpoint: String,
    pub model: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

/// Dedicated provider with its own fixed credential.
#[derive(Clone, PartialEq)]
pub struct PremiumProvider {
    pub provider: ProviderConfig,
    pub api_key: String,
}

impl std::fmt::Debug for PremiumProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PremiumProvider")
            .field("provider", &self.provider)
            .field("api_key", &redact(&self.api_key))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub standard: ProviderConfig,
    pub premium: Option<PremiumProvider>,
    /// Teams routed through the premium provider first.
    pub premium_teams: Vec<Team>,
    pub key_cooldown: Duration,
    pub request_timeout: Duration,
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_response_bytes: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            standard: ProviderConfig::default(),
            premium: None,
            premium_teams: Vec::new(),
            key_cooldown: Duration::from_millis(6100),
            request_timeout: Duration::from_secs(20),
            max_retries: 2,
            temperature: 0.7,
            max_tokens: 512,
            max_response_bytes: 256 * 1024,
        }
    }
}

impl DispatcherConfig {
    pub fn tier_for(&self, team: Team) -> Tier {
        if self.premium.is_some() && self.premium_teams.contains(&team) {
            Tier::Premium
        } else {
            Tier::Standard
        }
    }
}

/// Issues decision requests. Owns the key pool; never touches simulation state.
pub struct DecisionDispatcher {
    config: DispatcherConfig,
    pool: KeyPool,
    transport: Arc<dyn DecisionTransport>,
}

impl DecisionDispatcher {
    pub fn new(config: DispatcherConfig, pool: KeyPool) -> Self {
        Self::with_transport(config, pool, Arc::new(HttpTransport::new()))
    }

    pub fn with_transport(
        config: DispatcherConfig,
        pool: KeyPool,
        transport: Arc<dyn DecisionTransport>,
    ) -> Self {
        DecisionDispatcher {
            config,
            pool,
            transport,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn pool(&self) -> &KeyPool {
        &self.pool
    }

    /// Whether any credential is configured at all.
    pub fn has_credentials(&self) -> bool {
        !self.pool.is_empty() || self.config.premium.is_some()
    }

    pub fn tier_for(&self, team: Team) -> Tier {
        self.config.tier_for(team)
    }

    /// Send one decision request and return the validated actions.
    ///
    /// Premium requests try the dedicated provider first and fall over to
    /// the pool. Rate limits, 5xx, timeouts and transport errors move on to
    /// a different key for up to `max_retries` extra attempts; any other
    /// failure is returned at once.
    pub async fn request_decision(
        &self,
        tier: Tier,
        system_prompt: &str,
        user_payload: &str,
    ) -> Result<DecisionResponse, DispatchError> {
        let attempts = 1 + self.config.max_retries;
        let mut tried: Vec<String> = Vec::new();
        let mut rate_limited = false;
        let mut last_err: Option<DispatchError> = None;

        for attempt in 0..attempts {
            let premium = match (&self.config.premium, tier) {
                (Some(p), Tier::Premium) if attempt == 0 => Some(p),
                _ => None,
            };
            let (provider, key, label) = match premium {
                Some(p) => (&p.provider, p.api_key.clone(), "premium"),
                None => match self.pool.acquire_excluding(self.config.key_cooldown, &tried) {
                    Some(key) => {
                        tried.push(key.clone());
                        (&self.config.standard, key, "standard")
                    }
                    None => break,
                },
            };

            match self.attempt(provider, &key, system_prompt, user_payload).await {
                Ok(response) => {
                    metrics::DISPATCH_ATTEMPTS_TOTAL
                        .with_label_values(&[label, "ok"])
                        .inc();
                    return Ok(response);
                }
                Err(e) => {
                    metrics::DISPATCH_ATTEMPTS_TOTAL
                        .with_label_values(&[label, e.label()])
                        .inc();
                    if matches!(e, DispatchError::RateLimited) {
                        rate_limited = true;
                    }
                    if !e.is_retryable() {
                        tracing::warn!(provider = label, error = %e, "Decision request failed");
                        return Err(e);
                    }
                    tracing::warn!(
                        provider = label,
                        key = %redact(&key),
                        attempt = attempt + 1,
                        of = attempts,
                        error = %e,
                        "Decision attempt failed, failing over"
                    );
                    last_err = Some(e);
                }
            }
        }

        if rate_limited {
            Err(DispatchError::RateLimited)
        } else {
            Err(last_err.unwrap_or(DispatchError::NoKeys))
        }
    }

    async fn attempt(
        &self,
        provider: &ProviderConfig,
        api_key: &str,
        system_prompt: &str,
        user_payload: &str,
    ) -> Result<DecisionResponse, DispatchError> {
        let body = ChatCompletionRequest::new(
            &provider.model,
            system_prompt,
            user_payload,
            self.config.temperature,
            self.config.max_tokens,
        );
        let request = ProviderRequest {
            endpoint: &provider.endpoint,
            api_key,
            body: &body,
            timeout: self.config.request_timeout,
            max_response_bytes: self.config.max_response_bytes,
        };

        let reply = tokio::time::timeout(self.config.request_timeout, self.transport.post(request))
            .await
            .map_err(|_| DispatchError::Timeout(self.config.request_timeout))??;

        match reply.status {
            200..=299 => {}
            429 => return Err(DispatchError::RateLimited),
            500..=599 => return Err(DispatchError::Upstream { status: reply.status }),
            status => return Err(DispatchError::Rejected { status }),
        }

        let envelope: ChatCompletionResponse = serde_json::from_str(&reply.body)
            .map_err(|e| DispatchError::MalformedEnvelope(e.to_string()))?;
        let content = envelope
            .first_content()
            .ok_or_else(|| DispatchError::MalformedEnvelope("no message content".into()))?;
        parse_decision_response(content).ok_or(DispatchError::Unparseable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::transport::ProviderReply;
    use futures::future::BoxFuture;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const GOOD_BODY: &str = r#"{"choices":[{"message":{"content":"```json\n{\"actions\":[{\"unitId\":\"b1\",\"type\":\"MOVE\",\"target\":{\"x\":10,\"y\":20}}]}\n```"}}]}"#;

    enum Step {
        Reply(u16, &'static str),
        Fail(DispatchError),
        Hang,
    }

    /// Replays a fixed script and records (endpoint, key) per call.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Step>>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedTransport {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(ScriptedTransport {
                script: Mutex::new(steps.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl DecisionTransport for ScriptedTransport {
        fn post<'a>(
            &'a self,
            request: ProviderRequest<'a>,
        ) -> BoxFuture<'a, Result<ProviderReply, DispatchError>> {
            self.calls
                .lock()
                .unwrap()
                .push((request.endpoint.to_string(), request.api_key.to_string()));
            let step = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Step::Reply(500, ""));
            Box::pin(async move {
                match step {
                    Step::Reply(status, body) => Ok(ProviderReply {
                        status,
                        body: body.to_string(),
                    }),
                    Step::Fail(e) => Err(e),
                    Step::Hang => {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Err(DispatchError::Transport("unreachable".into()))
                    }
                }
            })
        }
    }

    fn dispatcher(
        keys: &[&str],
        premium: bool,
        transport: Arc<ScriptedTransport>,
    ) -> DecisionDispatcher {
        let mut config = DispatcherConfig {
            request_timeout: Duration::from_millis(200),
            ..DispatcherConfig::default()
        };
        if premium {
            config.premium = Some(PremiumProvider {
                provider: ProviderConfig {
                    endpoint: "https://premium.test/v1".into(),
                    model: "big".into(),
                },
                api_key: "premium-key".into(),
            });
            config.premium_teams = vec![Team::Blue];
        }
        DecisionDispatcher::with_transport(config, KeyPool::new(keys.iter().copied()), transport)
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let transport = ScriptedTransport::new(vec![Step::Reply(200, GOOD_BODY)]);
        let d = dispatcher(&["k1"], false, transport.clone());
        let resp = d.request_decision(Tier::Standard, "sys", "{}").await.unwrap();
        assert_eq!(resp.actions.len(), 1);
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_429_fails_over_to_different_key() {
        let transport = ScriptedTransport::new(vec![Step::Reply(429, ""), Step::Reply(200, GOOD_BODY)]);
        let d = dispatcher(&["k1", "k2"], false, transport.clone());
        let resp = d.request_decision(Tier::Standard, "sys", "{}").await.unwrap();
        assert_eq!(resp.actions[0].unit_id(), "b1");
        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert_ne!(calls[0].1, calls[1].1);
    }

    #[tokio::test]
    async fn test_all_rate_limited_reports_rate_limited() {
        let transport = ScriptedTransport::new(vec![
            Step::Reply(429, ""),
            Step::Reply(503, ""),
            Step::Reply(429, ""),
        ]);
        let d = dispatcher(&["k1", "k2", "k3"], false, transport.clone());
        let err = d.request_decision(Tier::Standard, "sys", "{}").await.unwrap_err();
        assert!(matches!(err, DispatchError::RateLimited));
        assert_eq!(transport.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_5xx_exhausted_returns_last_error() {
        let transport = ScriptedTransport::new(vec![
            Step::Reply(500, ""),
            Step::Fail(DispatchError::Transport("reset".into())),
            Step::Reply(502, ""),
        ]);
        let d = dispatcher(&["k1", "k2"], false, transport);
        let err = d.request_decision(Tier::Standard, "sys", "{}").await.unwrap_err();
        assert!(matches!(err, DispatchError::Upstream { status: 502 }));
    }

    #[tokio::test]
    async fn test_4xx_not_retried() {
        let transport = ScriptedTransport::new(vec![Step::Reply(401, ""), Step::Reply(200, GOOD_BODY)]);
        let d = dispatcher(&["k1", "k2"], false, transport.clone());
        let err = d.request_decision(Tier::Standard, "sys", "{}").await.unwrap_err();
        assert!(matches!(err, DispatchError::Rejected { status: 401 }));
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_premium_first_then_pool() {
        let transport = ScriptedTransport::new(vec![Step::Reply(503, ""), Step::Reply(200, GOOD_BODY)]);
        let d = dispatcher(&["pool-key"], true, transport.clone());
        assert_eq!(d.tier_for(Team::Blue), Tier::Premium);
        assert_eq!(d.tier_for(Team::Red), Tier::Standard);

        d.request_decision(Tier::Premium, "sys", "{}").await.unwrap();
        let calls = transport.calls();
        assert_eq!(calls[0], ("https://premium.test/v1".to_string(), "premium-key".to_string()));
        assert_eq!(calls[1], (DEFAULT_ENDPOINT.to_string(), "pool-key".to_string()));
    }

    #[tokio::test]
    async fn test_premium_without_pool_keeps_premium_error() {
        let transport = ScriptedTransport::new(vec![Step::Reply(503, "")]);
        let d = dispatcher(&[], true, transport);
        let err = d.request_decision(Tier::Premium, "sys", "{}").await.unwrap_err();
        assert!(matches!(err, DispatchError::Upstream { status: 503 }));
    }

    #[tokio::test]
    async fn test_no_keys() {
        let transport = ScriptedTransport::new(vec![]);
        let d = dispatcher(&[], false, transport.clone());
        assert!(!d.has_credentials());
        let err = d.request_decision(Tier::Standard, "sys", "{}").await.unwrap_err();
        assert!(matches!(err, DispatchError::NoKeys));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_is_retried() {
        let transport = ScriptedTransport::new(vec![Step::Hang, Step::Reply(200, GOOD_BODY)]);
        let d = dispatcher(&["k1", "k2"], false, transport.clone());
        let resp = d.request_decision(Tier::Standard, "sys", "{}").await.unwrap();
        assert_eq!(resp.actions.len(), 1);
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_garbage_content_is_unparseable() {
        let body = r#"{"choices":[{"message":{"content":"I refuse."}}]}"#;
        let transport = ScriptedTransport::new(vec![Step::Reply(200, body)]);
        let d = dispatcher(&["k1"], false, transport);
        let err = d.request_decision(Tier::Standard, "sys", "{}").await.unwrap_err();
        assert!(matches!(err, DispatchError::Unparseable));
    }

    #[tokio::test]
    async fn test_bad_envelope() {
        let transport = ScriptedTransport::new(vec![Step::Reply(200, "<html>")]);
        let d = dispatcher(&["k1"], false, transport);
        let err = d.request_decision(Tier::Standard, "sys", "{}").await.unwrap_err();
        assert!(matches!(err, DispatchError::MalformedEnvelope(_)));
    }
}
