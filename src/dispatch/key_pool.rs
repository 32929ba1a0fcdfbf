// In-memory credential pool that spreads decision requests across API keys.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;

use crate::metrics;

/// One credential and when it was last handed out.
#[derive(Clone)]
pub struct DispatchKey {
    credential: String,
    last_used_at: Option<Instant>,
}

impl DispatchKey {
    fn new(credential: String) -> Self {
        DispatchKey {
            credential,
            last_used_at: None,
        }
    }

    /// Never-used keys are always cool.
    fn is_cool(&self, now: Instant, cooldown: Duration) -> bool {
        match self.last_used_at {
            None => true,
            Some(t) => now.saturating_duration_since(t) > cooldown,
        }
    }
}

impl std::fmt::Debug for DispatchKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchKey")
            .field("credential", &redact(&self.credential))
            .field("last_used_at", &self.last_used_at)
            .finish()
    }
}

/// Show only the last four characters of a credential.
pub fn redact(credential: &str) -> String {
    let tail: String = credential
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("***{tail}")
}

/// Thread-safe pool of interchangeable credentials.
///
/// Selection and stamping happen in one critical section, so two concurrent
/// callers can never both receive the same cool key.
#[derive(Debug, Clone)]
pub struct KeyPool {
    inner: Arc<Mutex<Vec<DispatchKey>>>,
}

impl KeyPool {
    /// Build a pool from raw credentials. Blank entries and duplicates are skipped.
    pub fn new<I, S>(credentials: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keys: Vec<DispatchKey> = Vec::new();
        for raw in credentials {
            let key = raw.as_ref().trim();
            if key.is_empty() || keys.iter().any(|k| k.credential == key) {
                continue;
            }
            keys.push(DispatchKey::new(key.to_string()));
        }
        Self {
            inner: Arc::new(Mutex::new(keys)),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pick a cool key, or force the least recently used one.
    /// Returns None only when the pool is empty.
    pub fn acquire(&self, cooldown: Duration) -> Option<String> {
        self.acquire_at(Instant::now(), cooldown, &[])
    }

    /// Like `acquire`, but skip keys already tried during a failover sequence.
    /// If every key has been tried the exclusion is ignored.
    pub fn acquire_excluding(&self, cooldown: Duration, exclude: &[String]) -> Option<String> {
        self.acquire_at(Instant::now(), cooldown, exclude)
    }

    /// Selection with an explicit clock.
    ///
    /// Availability wins over the upstream rate limit: when every candidate is
    /// still cooling down, the one with the oldest `last_used_at` is stamped
    /// and returned anyway, accepting a possible 429 rather than stalling the
    /// simulation.
    pub fn acquire_at(
        &self,
        now: Instant,
        cooldown: Duration,
        exclude: &[String],
    ) -> Option<String> {
        let mut keys = self.inner.lock().unwrap();
        if keys.is_empty() {
            return None;
        }

        let mut candidates: Vec<usize> = (0..keys.len())
            .filter(|&i| !exclude.contains(&keys[i].credential))
            .collect();
        if candidates.is_empty() {
            candidates = (0..keys.len()).collect();
        }
        candidates.shuffle(&mut rand::thread_rng());

        if let Some(&i) = candidates.iter().find(|&&i| keys[i].is_cool(now, cooldown)) {
            keys[i].last_used_at = Some(now);
            return Some(keys[i].credential.clone());
        }

        // None < Some, so never-used keys would have been picked above; here
        // every candidate has a timestamp and we take the oldest.
        let oldest = candidates
            .iter()
            .copied()
            .min_by_key(|&i| keys[i].last_used_at)?;
        tracing::warn!(
            key = %redact(&keys[oldest].credential),
            pool_size = keys.len(),
            "All keys busy, forcing oldest key"
        );
        metrics::KEY_FORCED_FALLBACK_TOTAL.inc();
        keys[oldest].last_used_at = Some(now);
        Some(keys[oldest].credential.clone())
    }

    /// `last_used_at` for a credential (for testing/diagnostics).
    pub fn last_used(&self, credential: &str) -> Option<Instant> {
        let keys = self.inner.lock().unwrap();
        keys.iter()
            .find(|k| k.credential == credential)
            .and_then(|k| k.last_used_at)
    }
}

impl Default for KeyPool {
    fn default() -> Self {
        Self::new(Vec::<String>::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_millis(6100);

    #[test]
    fn test_empty_pool_returns_none() {
        let pool = KeyPool::default();
        assert!(pool.is_empty());
        assert!(pool.acquire(COOLDOWN).is_none());
    }

    #[test]
    fn test_blank_and_duplicate_keys_skipped() {
        let pool = KeyPool::new(["a", " ", "b", "a", " c "]);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_cool_keys_used_before_warm() {
        let pool = KeyPool::new(["k1", "k2", "k3"]);
        let now = Instant::now();
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(pool.acquire_at(now, COOLDOWN, &[]).unwrap());
        }
        seen.sort();
        assert_eq!(seen, vec!["k1", "k2", "k3"]);
    }

    #[test]
    fn test_all_warm_forces_oldest() {
        let pool = KeyPool::new(["k1", "k2"]);
        let t0 = Instant::now();
        let first = pool.acquire_at(t0, COOLDOWN, &[]).unwrap();
        let second = pool.acquire_at(t0 + Duration::from_millis(10), COOLDOWN, &[]).unwrap();
        assert_ne!(first, second);

        // Both inside the cooldown window: the oldest (first) is forced.
        let t2 = t0 + Duration::from_millis(20);
        let forced = pool.acquire_at(t2, COOLDOWN, &[]).unwrap();
        assert_eq!(forced, first);
        assert_eq!(pool.last_used(&forced), Some(t2));
    }

    #[test]
    fn test_key_cools_down_after_window() {
        let pool = KeyPool::new(["only"]);
        let t0 = Instant::now();
        pool.acquire_at(t0, COOLDOWN, &[]).unwrap();
        let later = t0 + COOLDOWN + Duration::from_millis(1);
        assert_eq!(pool.acquire_at(later, COOLDOWN, &[]).as_deref(), Some("only"));
    }

    #[test]
    fn test_never_returns_warm_key_while_cool_one_exists() {
        let pool = KeyPool::new(["k1", "k2", "k3", "k4"]);
        let t0 = Instant::now();
        let warm = pool.acquire_at(t0, COOLDOWN, &[]).unwrap();
        for step in 1..=3 {
            let now = t0 + Duration::from_millis(step);
            let key = pool.acquire_at(now, COOLDOWN, &[]).unwrap();
            assert_ne!(key, warm);
        }
    }

    #[test]
    fn test_exclusion_skips_tried_keys() {
        let pool = KeyPool::new(["k1", "k2"]);
        let now = Instant::now();
        let key = pool
            .acquire_at(now, COOLDOWN, &["k1".to_string()])
            .unwrap();
        assert_eq!(key, "k2");
    }

    #[test]
    fn test_exclusion_of_everything_falls_back() {
        let pool = KeyPool::new(["k1"]);
        let now = Instant::now();
        let key = pool.acquire_at(now, COOLDOWN, &["k1".to_string()]);
        assert_eq!(key.as_deref(), Some("k1"));
    }

    #[test]
    fn test_concurrent_acquirers_get_distinct_cool_keys() {
        let pool = KeyPool::new((0..8).map(|i| format!("key-{i}")));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || pool.acquire(COOLDOWN).unwrap())
            })
            .collect();
        let mut keys: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 8);
    }

    #[test]
    fn test_debug_redacts_credential() {
        let key = DispatchKey::new("sk-secret-1234".to_string());
        let debug = format!("{key:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("***1234"));
    }
}
