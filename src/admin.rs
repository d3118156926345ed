//! Administrative operations.
//!
//! Moderation (block/unblock), subscription grants, runtime settings,
//! global pause, and broadcast delivery. Every moderation action leaves an
//! audit entry; repeating one is a no-op and leaves no second entry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::db::{
    SettingsRepository, SubscriptionTier, User, UserRepository,
};
use crate::file::{FileRecord, FileRepository};
use crate::rate_limit::{ActionClass, RateLimiters};
use crate::reminder::Notifier;
use crate::{FilegateError, Result};

/// Settings key persisting the pause flag across restarts.
const SETTING_PAUSED: &str = "paused";

/// Global accept/refuse switch for non-admin traffic.
///
/// Cheap to clone and share; the front end checks it before dispatching any
/// non-admin command.
#[derive(Debug, Clone, Default)]
pub struct PauseToggle(Arc<AtomicBool>);

impl PauseToggle {
    pub fn new(paused: bool) -> Self {
        Self(Arc::new(AtomicBool::new(paused)))
    }

    pub fn is_paused(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn set(&self, paused: bool) {
        self.0.store(paused, Ordering::Relaxed);
    }
}

/// Outcome of a broadcast run.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Recipients that could not be reached, with the failure text.
    pub failures: Vec<(i64, String)>,
}

impl BroadcastReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.failures.len()
    }
}

/// Service for administrator commands.
pub struct AdminService {
    pool: SqlitePool,
    limiters: Arc<RateLimiters>,
    pause: PauseToggle,
}

impl AdminService {
    pub fn new(pool: SqlitePool, limiters: Arc<RateLimiters>, pause: PauseToggle) -> Self {
        Self {
            pool,
            limiters,
            pause,
        }
    }

    fn users(&self) -> UserRepository<'_> {
        UserRepository::new(&self.pool)
    }

    fn files(&self) -> FileRepository<'_> {
        FileRepository::new(&self.pool)
    }

    fn settings(&self) -> SettingsRepository<'_> {
        SettingsRepository::new(&self.pool)
    }

    /// Whether an external identity has administrator rights.
    pub async fn is_admin(&self, external_id: i64) -> Result<bool> {
        Ok(self.settings().admin_ids().await?.contains(&external_id))
    }

    /// Block a user. Returns true if the state changed.
    pub async fn block_user(
        &self,
        admin: &User,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let target = self
            .users()
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| FilegateError::NotFound("user".to_string()))?;

        let changed = self.users().block(target.id, now).await?;
        if changed {
            self.files()
                .record_audit(None, Some(admin.id), "user_blocked", Some(&target.id.to_string()))
                .await?;
            info!("User {} blocked by admin {}", target.id, admin.id);
        }
        Ok(changed)
    }

    /// Unblock a user. Returns true if the state changed.
    pub async fn unblock_user(&self, admin: &User, user_id: i64) -> Result<bool> {
        let target = self
            .users()
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| FilegateError::NotFound("user".to_string()))?;

        let changed = self.users().unblock(target.id).await?;
        if changed {
            self.files()
                .record_audit(
                    None,
                    Some(admin.id),
                    "user_unblocked",
                    Some(&target.id.to_string()),
                )
                .await?;
            info!("User {} unblocked by admin {}", target.id, admin.id);
        }
        Ok(changed)
    }

    /// Grant or change a subscription.
    pub async fn grant_subscription(
        &self,
        admin: &User,
        user_id: i64,
        tier: SubscriptionTier,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<User> {
        let updated = self
            .users()
            .set_subscription(user_id, tier, expires_at)
            .await?
            .ok_or_else(|| FilegateError::NotFound("user".to_string()))?;

        self.files()
            .record_audit(
                None,
                Some(admin.id),
                "subscription_granted",
                Some(&format!("user {} -> {}", user_id, tier)),
            )
            .await?;
        info!(
            "Admin {} set user {} to tier {}",
            admin.id, user_id, tier
        );
        Ok(updated)
    }

    /// Search users by name fragment or external ID.
    pub async fn search_users(&self, pattern: &str, limit: i64) -> Result<Vec<User>> {
        self.users().search(pattern, limit).await
    }

    /// Search live files by name fragment, across all owners.
    pub async fn search_files(&self, pattern: &str, limit: i64) -> Result<Vec<FileRecord>> {
        self.files().search(pattern, limit).await
    }

    /// Write a runtime setting.
    pub async fn update_setting(&self, admin: &User, name: &str, value: &str) -> Result<()> {
        self.settings().set(name, value).await?;
        self.files()
            .record_audit(None, Some(admin.id), "setting_updated", Some(name))
            .await?;
        Ok(())
    }

    /// All runtime settings.
    pub async fn list_settings(&self) -> Result<Vec<(String, String)>> {
        self.settings().all().await
    }

    /// Pause or resume non-admin traffic. Persisted across restarts.
    pub async fn set_paused(&self, admin: &User, paused: bool) -> Result<()> {
        self.pause.set(paused);
        self.settings()
            .set(SETTING_PAUSED, if paused { "1" } else { "0" })
            .await?;
        self.files()
            .record_audit(
                None,
                Some(admin.id),
                if paused { "paused" } else { "resumed" },
                None,
            )
            .await?;
        info!(
            "Service {} by admin {}",
            if paused { "paused" } else { "resumed" },
            admin.id
        );
        Ok(())
    }

    pub fn pause_toggle(&self) -> PauseToggle {
        self.pause.clone()
    }

    /// Restore the persisted pause flag, e.g. at startup.
    pub async fn load_paused(&self) -> Result<bool> {
        let paused = self
            .settings()
            .get(SETTING_PAUSED)
            .await?
            .is_some_and(|v| v == "1");
        self.pause.set(paused);
        Ok(paused)
    }

    /// Deliver a message to every active, unblocked user.
    ///
    /// Deliveries are throttled against the sending admin's broadcast
    /// budget; when the window is full the run waits instead of dropping
    /// recipients. Individual failures are collected, never fatal.
    pub async fn broadcast<N: Notifier>(
        &self,
        admin: &User,
        notifier: &N,
        message: &str,
    ) -> Result<BroadcastReport> {
        let recipients = self.users().list_active().await?;
        let mut report = BroadcastReport::default();

        for recipient in &recipients {
            loop {
                match self.limiters.check(ActionClass::Broadcast, admin.id) {
                    Ok(()) => break,
                    Err(FilegateError::RateLimited { retry_after }) => {
                        tokio::time::sleep(retry_after).await;
                    }
                    Err(e) => return Err(e),
                }
            }

            match notifier.notify(recipient.external_id, message).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!("Broadcast to user {} failed: {}", recipient.id, e);
                    report.failures.push((recipient.id, e.to_string()));
                }
            }
        }

        self.files()
            .record_audit(
                None,
                Some(admin.id),
                "broadcast",
                Some(&format!(
                    "{} delivered, {} failed",
                    report.delivered,
                    report.failures.len()
                )),
            )
            .await?;
        info!(
            "Broadcast by admin {}: {}/{} delivered",
            admin.id,
            report.delivered,
            report.attempted()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::db::{Database, SETTING_ADMIN_IDS};
    use std::sync::Mutex;

    struct StubNotifier {
        sent: Mutex<Vec<i64>>,
        fail_for: Option<i64>,
    }

    impl StubNotifier {
        fn new(fail_for: Option<i64>) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail_for,
            }
        }
    }

    impl Notifier for StubNotifier {
        async fn notify(&self, external_id: i64, _message: &str) -> Result<()> {
            if self.fail_for == Some(external_id) {
                return Err(FilegateError::Fetch("unreachable".to_string()));
            }
            self.sent.lock().unwrap().push(external_id);
            Ok(())
        }
    }

    async fn setup() -> (Database, AdminService, User) {
        let db = Database::open_in_memory().await.unwrap();
        let limiters = Arc::new(RateLimiters::new(&RateLimitConfig::default()));
        let service = AdminService::new(db.pool().clone(), limiters, PauseToggle::default());
        let admin = UserRepository::new(db.pool())
            .get_or_create(9000, Some("op"))
            .await
            .unwrap();
        (db, service, admin)
    }

    #[tokio::test]
    async fn test_is_admin_from_settings() {
        let (db, service, _admin) = setup().await;

        assert!(!service.is_admin(9000).await.unwrap());
        SettingsRepository::new(db.pool())
            .set(SETTING_ADMIN_IDS, "9000,9001")
            .await
            .unwrap();
        assert!(service.is_admin(9000).await.unwrap());
        assert!(!service.is_admin(1234).await.unwrap());
    }

    #[tokio::test]
    async fn test_block_unblock_audited_once() {
        let (db, service, admin) = setup().await;
        let target = UserRepository::new(db.pool())
            .get_or_create(1001, None)
            .await
            .unwrap();
        let now = Utc::now();

        assert!(service.block_user(&admin, target.id, now).await.unwrap());
        assert!(!service.block_user(&admin, target.id, now).await.unwrap());
        assert!(service.unblock_user(&admin, target.id).await.unwrap());
        assert!(!service.unblock_user(&admin, target.id).await.unwrap());

        let actions: Vec<String> = sqlx::query_scalar(
            "SELECT action FROM audit_log ORDER BY id",
        )
        .fetch_all(db.pool())
        .await
        .unwrap();
        assert_eq!(actions, vec!["user_blocked", "user_unblocked"]);
    }

    #[tokio::test]
    async fn test_block_missing_user() {
        let (_db, service, admin) = setup().await;
        let err = service
            .block_user(&admin, 999, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, FilegateError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_pause_persists() {
        let (db, service, admin) = setup().await;

        assert!(!service.pause_toggle().is_paused());
        service.set_paused(&admin, true).await.unwrap();
        assert!(service.pause_toggle().is_paused());

        // A fresh service over the same database restores the flag
        let limiters = Arc::new(RateLimiters::new(&RateLimitConfig::default()));
        let restarted =
            AdminService::new(db.pool().clone(), limiters, PauseToggle::default());
        assert!(!restarted.pause_toggle().is_paused());
        assert!(restarted.load_paused().await.unwrap());
        assert!(restarted.pause_toggle().is_paused());
    }

    #[tokio::test]
    async fn test_broadcast_collects_failures() {
        let (db, service, admin) = setup().await;
        let users = UserRepository::new(db.pool());
        users.get_or_create(1001, None).await.unwrap();
        users.get_or_create(1002, None).await.unwrap();
        let blocked = users.get_or_create(1003, None).await.unwrap();
        users.block(blocked.id, Utc::now()).await.unwrap();

        let notifier = StubNotifier::new(Some(1002));
        let report = service
            .broadcast(&admin, &notifier, "maintenance tonight")
            .await
            .unwrap();

        // admin (9000) and the two unblocked users are recipients; 1003 is
        // blocked and skipped entirely
        assert_eq!(report.attempted(), 3);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failures.len(), 1);
        let sent = notifier.sent.lock().unwrap();
        assert!(sent.contains(&1001));
        assert!(!sent.contains(&1002));
        assert!(!sent.contains(&1003));
    }

    #[tokio::test]
    async fn test_grant_subscription_audits() {
        let (db, service, admin) = setup().await;
        let target = UserRepository::new(db.pool())
            .get_or_create(1001, None)
            .await
            .unwrap();

        let updated = service
            .grant_subscription(&admin, target.id, SubscriptionTier::Premium, None)
            .await
            .unwrap();
        assert_eq!(updated.tier(), SubscriptionTier::Premium);

        let actions: Vec<String> =
            sqlx::query_scalar("SELECT action FROM audit_log ORDER BY id")
                .fetch_all(db.pool())
                .await
                .unwrap();
        assert_eq!(actions, vec!["subscription_granted"]);
    }

    #[tokio::test]
    async fn test_update_and_list_settings() {
        let (_db, service, admin) = setup().await;

        service
            .update_setting(&admin, "download_domain", "files.example.com")
            .await
            .unwrap();
        let all = service.list_settings().await.unwrap();
        assert!(all
            .iter()
            .any(|(k, v)| k == "download_domain" && v == "files.example.com"));
    }
}
