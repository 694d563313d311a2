use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use dashmap::DashMap;

use crate::models::Id;

/// Sliding window in-memory rate limiter (process local).
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    store: Arc<DashMap<String, VecDeque<Instant>>>,
    pub enabled: bool,
}

impl InMemoryRateLimiter {
    pub fn new(enabled: bool) -> Self {
        Self { store: Arc::new(DashMap::new()), enabled }
    }

    /// Returns true if allowed, false if limited.
    pub fn check(&self, key: &str, limit: usize, window: Duration) -> bool {
        if !self.enabled { return true; }
        let now = Instant::now();
        let mut entry = self.store.entry(key.to_string()).or_default();
        while let Some(front) = entry.front() {
            if now.duration_since(*front) >= window { entry.pop_front(); } else { break; }
        }
        if entry.len() < limit {
            entry.push_back(now);
            true
        } else {
            false
        }
    }
}

/// Write actions that are throttled per user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LimitedAction {
    Question,
    Answer,
    Report,
    Vote,
}

impl LimitedAction {
    fn key(self) -> &'static str {
        match self {
            LimitedAction::Question => "question",
            LimitedAction::Answer => "answer",
            LimitedAction::Report => "report",
            LimitedAction::Vote => "vote",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limit {
    pub max: usize,
    pub window: Duration,
}

/// Per-action limits, from `RL_<ACTION>_LIMIT` / `RL_<ACTION>_WINDOW` (seconds).
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub question: Limit,
    pub answer: Limit,
    pub report: Limit,
    pub vote: Limit,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            question: Limit { max: 5, window: Duration::from_secs(300) },
            answer: Limit { max: 20, window: Duration::from_secs(300) },
            report: Limit { max: 10, window: Duration::from_secs(3600) },
            vote: Limit { max: 60, window: Duration::from_secs(60) },
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        fn limit_env(action: &str, default: Limit) -> Limit {
            let var = |suffix: &str| std::env::var(format!("RL_{action}_{suffix}")).ok();
            Limit {
                max: var("LIMIT").and_then(|v| v.parse().ok()).unwrap_or(default.max),
                window: var("WINDOW").and_then(|v| v.parse().ok()).map(Duration::from_secs).unwrap_or(default.window),
            }
        }
        let d = Self::default();
        Self {
            question: limit_env("QUESTION", d.question),
            answer: limit_env("ANSWER", d.answer),
            report: limit_env("REPORT", d.report),
            vote: limit_env("VOTE", d.vote),
        }
    }

    pub fn limit_for(&self, action: LimitedAction) -> Limit {
        match action {
            LimitedAction::Question => self.question,
            LimitedAction::Answer => self.answer,
            LimitedAction::Report => self.report,
            LimitedAction::Vote => self.vote,
        }
    }
}

/// High level guard used by handlers.
#[derive(Clone)]
pub struct RateLimiterFacade {
    pub limiter: InMemoryRateLimiter,
    pub cfg: RateLimitConfig,
}

impl RateLimiterFacade {
    pub fn new(limiter: InMemoryRateLimiter, cfg: RateLimitConfig) -> Self { Self { limiter, cfg } }

    pub fn allow(&self, action: LimitedAction, user_id: Id) -> bool {
        let Limit { max, window } = self.cfg.limit_for(action);
        self.limiter.check(&format!("{}:{user_id}", action.key()), max, window)
    }
}
