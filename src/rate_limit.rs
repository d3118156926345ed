//! Sliding-window rate limiting.
//!
//! Each action class keeps per-user timestamps of recent actions. An action
//! is admitted while fewer than the configured maximum fall inside the
//! window; a denied action is not recorded and so cannot extend its own
//! penalty. State is in memory only and resets on restart.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::config::{RateLimitConfig, RateRule};
use crate::{FilegateError, Result};

/// Classes of user actions with independent limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionClass {
    /// Commands and chat messages.
    Message,
    /// File registrations, direct or by URL.
    Upload,
    /// Download-link resolutions.
    Download,
    /// Broadcast deliveries, counted against the sending admin per recipient.
    Broadcast,
}

/// Sliding-window limiter for one action class.
#[derive(Debug)]
pub struct ActionRateLimiter {
    max_actions: u32,
    window: Duration,
    history: RwLock<HashMap<i64, Vec<Instant>>>,
}

impl ActionRateLimiter {
    pub fn new(rule: RateRule) -> Self {
        Self {
            max_actions: rule.max_actions,
            window: Duration::from_secs(rule.window_secs),
            history: RwLock::new(HashMap::new()),
        }
    }

    /// Admit and record the action, or report how long to wait.
    ///
    /// The wait is the time until the oldest in-window action leaves the
    /// window, at which point one slot frees up.
    pub fn check_and_record(&self, user_id: i64) -> std::result::Result<(), Duration> {
        let now = Instant::now();
        let mut history = match self.history.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let timestamps = history.entry(user_id).or_default();
        timestamps.retain(|&t| now.duration_since(t) < self.window);

        if timestamps.len() >= self.max_actions as usize {
            let oldest = timestamps.iter().min().copied().unwrap_or(now);
            let retry_after = self.window.saturating_sub(now.duration_since(oldest));
            return Err(retry_after);
        }

        timestamps.push(now);
        Ok(())
    }

    /// Slots left for a user right now.
    pub fn remaining(&self, user_id: i64) -> u32 {
        let now = Instant::now();
        let history = match self.history.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let used = history
            .get(&user_id)
            .map(|ts| {
                ts.iter()
                    .filter(|&&t| now.duration_since(t) < self.window)
                    .count()
            })
            .unwrap_or(0);
        self.max_actions.saturating_sub(used as u32)
    }

    /// Drop users whose entire history has aged out.
    pub fn prune(&self) {
        let now = Instant::now();
        let mut history = match self.history.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for timestamps in history.values_mut() {
            timestamps.retain(|&t| now.duration_since(t) < self.window);
        }
        history.retain(|_, timestamps| !timestamps.is_empty());
    }
}

/// One limiter per action class.
#[derive(Debug)]
pub struct RateLimiters {
    message: ActionRateLimiter,
    upload: ActionRateLimiter,
    download: ActionRateLimiter,
    broadcast: ActionRateLimiter,
}

impl RateLimiters {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            message: ActionRateLimiter::new(config.message),
            upload: ActionRateLimiter::new(config.upload),
            download: ActionRateLimiter::new(config.download),
            broadcast: ActionRateLimiter::new(config.broadcast),
        }
    }

    fn limiter(&self, class: ActionClass) -> &ActionRateLimiter {
        match class {
            ActionClass::Message => &self.message,
            ActionClass::Upload => &self.upload,
            ActionClass::Download => &self.download,
            ActionClass::Broadcast => &self.broadcast,
        }
    }

    /// Admit and record an action, or fail with `RateLimited`.
    pub fn check(&self, class: ActionClass, user_id: i64) -> Result<()> {
        self.limiter(class)
            .check_and_record(user_id)
            .map_err(|retry_after| FilegateError::RateLimited { retry_after })
    }

    /// Slots left in one class for a user.
    pub fn remaining(&self, class: ActionClass, user_id: i64) -> u32 {
        self.limiter(class).remaining(user_id)
    }

    /// Age out stale per-user state across all classes.
    pub fn prune(&self) {
        self.message.prune();
        self.upload.prune();
        self.download.prune();
        self.broadcast.prune();
    }
}

impl Default for RateLimiters {
    fn default() -> Self {
        Self::new(&RateLimitConfig::default())
    }
}
