use crate::auth::{InMemoryRevocations, TokenRevocations};
use crate::config::Config;
use crate::store::{InMemoryStore, QuizStore};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Fixed one-minute window counter per `scope:key`.
#[derive(Debug, Default)]
pub struct RateLimiter {
    hits: DashMap<String, (u32, Instant)>,
}

impl RateLimiter {
    pub fn check(&self, scope: &str, key: &str, limit_per_minute: u32) -> bool {
        let now = Instant::now();
        let full_key = format!("{scope}:{key}");
        let mut entry = self.hits.entry(full_key).or_insert((0, now));
        if now.duration_since(entry.1) > Duration::from_secs(60) {
            *entry = (1, now);
            true
        } else if entry.0 >= limit_per_minute {
            false
        } else {
            entry.0 += 1;
            true
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn QuizStore>,
    pub revocations: Arc<dyn TokenRevocations>,
    pub rate_limiter: Arc<RateLimiter>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: Arc<dyn QuizStore>, revocations: Arc<dyn TokenRevocations>, config: Config) -> Self {
        Self {
            store,
            revocations,
            rate_limiter: Arc::new(RateLimiter::default()),
            config: Arc::new(config),
        }
    }

    /// In-memory store, optionally backed by the configured snapshot file.
    pub fn in_memory(config: Config) -> Self {
        let store = InMemoryStore::new(config.local_state_path.as_deref());
        Self::new(Arc::new(store), Arc::new(InMemoryRevocations::new()), config)
    }

    /// Periodically evicts revocations whose tokens have expired.
    pub fn spawn_revocation_sweep(&self) -> tokio::task::JoinHandle<()> {
        let revocations = self.revocations.clone();
        let period = Duration::from_secs(self.config.revocation_sweep_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let evicted = revocations.evict_expired(Utc::now().timestamp());
                if evicted > 0 {
                    debug!(evicted, "expired token revocations evicted");
                }
            }
        })
    }
}
