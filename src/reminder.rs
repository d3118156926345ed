//! Subscription expiry reminders.
//!
//! A background task that notifies paid users shortly before their
//! subscription lapses. Each user is reminded once per subscription term;
//! the flag is cleared when a new term is granted. A failed delivery is not
//! marked, so it is retried on the next pass.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::db::{SettingsRepository, UserRepository, UserUpdate, SETTING_REMINDER_DAYS};
use crate::Result;

/// Default days-before-expiry at which the reminder fires.
const DEFAULT_REMINDER_DAYS: i64 = 3;

/// Outbound notification channel.
///
/// Implemented by the messenger integration; tests substitute their own.
pub trait Notifier {
    fn notify(
        &self,
        external_id: i64,
        message: &str,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Notifier that only writes to the log.
///
/// Stands in when no messenger integration is wired up; deliveries always
/// succeed, so reminders are still marked sent.
#[derive(Debug, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn notify(&self, external_id: i64, message: &str) -> Result<()> {
        info!("Notification for user {}: {}", external_id, message);
        Ok(())
    }
}

/// Periodic reminder worker.
pub struct ReminderService {
    pool: SqlitePool,
    interval_secs: u64,
}

impl ReminderService {
    pub fn new(pool: SqlitePool, interval_secs: u64) -> Self {
        Self {
            pool,
            interval_secs,
        }
    }

    /// Run the reminder loop until the task is dropped.
    pub async fn run<N: Notifier>(self, notifier: N) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Reminder service running every {}s", self.interval_secs);

        loop {
            ticker.tick().await;
            match self.remind_once(&notifier, Utc::now()).await {
                Ok(0) => debug!("Reminder pass: nobody to remind"),
                Ok(n) => info!("Reminder pass: {} users reminded", n),
                Err(e) => warn!("Reminder pass failed: {}", e),
            }
        }
    }

    /// One reminder pass at the given time. Returns how many were sent.
    pub async fn remind_once<N: Notifier>(
        &self,
        notifier: &N,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let days = SettingsRepository::new(&self.pool)
            .get_i64(SETTING_REMINDER_DAYS, DEFAULT_REMINDER_DAYS)
            .await?;

        let users = UserRepository::new(&self.pool);
        let mut sent = 0;

        for user in users.list_expiring(now, days).await? {
            let expires = user.subscription_expires_at.as_deref().unwrap_or("soon");
            let message = format!(
                "Your {} subscription ends on {}. Renew to keep registering files.",
                user.tier, expires
            );

            match notifier.notify(user.external_id, &message).await {
                Ok(()) => {
                    users
                        .update(
                            user.id,
                            &UserUpdate {
                                reminder_sent: Some(true),
                                ..Default::default()
                            },
                        )
                        .await?;
                    sent += 1;
                }
                Err(e) => {
                    // Left unmarked, so the next pass tries again.
                    warn!("Reminder to user {} failed: {}", user.id, e);
                }
            }
        }

        Ok(sent)
    }
}
