//! Subscription gate.
//!
//! Every authenticated action passes through here. Registrations check, in
//! order: moderation state, required channel membership, subscription
//! currency (with lazy downgrade), and tier quota. Downloads check
//! moderation state and subscription currency; only anonymous link
//! resolution bypasses the gate.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::info;

use crate::config::{SubscriptionConfig, TierQuota};
use crate::db::{SubscriptionTier, User, UserRepository, UserUpdate};
use crate::file::FileRepository;
use crate::{FilegateError, Result};

/// External membership oracle.
///
/// Answers whether a user belongs to the required channel. Implemented by
/// the messenger integration; tests substitute their own.
pub trait MembershipChecker {
    fn is_member(
        &self,
        external_id: i64,
        channel: &str,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;
}

/// Checker for deployments without a channel requirement.
#[derive(Debug, Clone, Copy)]
pub struct NoChannelChecker;

impl MembershipChecker for NoChannelChecker {
    async fn is_member(&self, _external_id: i64, _channel: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Access decisions for registrations and downloads.
pub struct SubscriptionGate<'a> {
    pool: &'a SqlitePool,
    config: &'a SubscriptionConfig,
}

impl<'a> SubscriptionGate<'a> {
    pub fn new(pool: &'a SqlitePool, config: &'a SubscriptionConfig) -> Self {
        Self { pool, config }
    }

    /// Quota applying to a tier.
    pub fn quota_for(&self, tier: SubscriptionTier) -> TierQuota {
        match tier {
            SubscriptionTier::Premium => self.config.premium,
            SubscriptionTier::Standard => self.config.standard,
            SubscriptionTier::Trial | SubscriptionTier::Expired => self.config.trial,
        }
    }

    /// Admit or reject a registration of `size_bytes` at `now`.
    ///
    /// A lapsed trial or paid subscription is downgraded to the expired
    /// tier here, on first contact after the deadline; no background job
    /// watches subscriptions. Returns the user as stored after any
    /// downgrade.
    pub async fn authorize_registration(
        &self,
        user: &User,
        size_bytes: i64,
        now: DateTime<Utc>,
    ) -> Result<User> {
        let user = self.authorize_action(user, now).await?;

        let quota = self.quota_for(user.tier());
        let usage = FileRepository::new(self.pool).owner_usage(user.id).await?;

        if usage.file_count + 1 > quota.max_files {
            return Err(FilegateError::QuotaExceeded(format!(
                "file limit {} reached",
                quota.max_files
            )));
        }
        if usage.total_bytes + size_bytes > quota.max_storage_bytes() {
            return Err(FilegateError::QuotaExceeded(format!(
                "storage limit {} MB reached",
                quota.max_storage_mb
            )));
        }

        Ok(user)
    }

    /// Admit or reject a download at `now`.
    ///
    /// Same checks as registration minus the quota: a blocked or lapsed
    /// user is denied every action class. Returns the user as stored after
    /// any downgrade.
    pub async fn authorize_download(&self, user: &User, now: DateTime<Utc>) -> Result<User> {
        self.authorize_action(user, now).await
    }

    /// Checks shared by every authenticated action class.
    async fn authorize_action(&self, user: &User, now: DateTime<Utc>) -> Result<User> {
        if user.is_blocked {
            return Err(FilegateError::UserBlocked(user.external_id));
        }

        let user = self.downgrade_if_lapsed(user, now).await?;
        if !user.tier().is_entitled() {
            return Err(FilegateError::SubscriptionExpired);
        }
        Ok(user)
    }

    /// Reject a blocked user without touching subscription state.
    ///
    /// Used before anything that would act on a user's behalf, such as the
    /// membership oracle lookup.
    pub fn ensure_not_blocked(&self, user: &User) -> Result<()> {
        if user.is_blocked {
            return Err(FilegateError::UserBlocked(user.external_id));
        }
        Ok(())
    }

    /// Enforce channel membership when a channel is required.
    ///
    /// Fails closed: an oracle error counts as "not a member".
    pub async fn ensure_member<C: MembershipChecker>(
        &self,
        checker: &C,
        required_channel: Option<&str>,
        external_id: i64,
    ) -> Result<()> {
        let Some(channel) = required_channel else {
            return Ok(());
        };

        match checker.is_member(external_id, channel).await {
            Ok(true) => Ok(()),
            Ok(false) | Err(_) => Err(FilegateError::ChannelMembershipRequired),
        }
    }

    /// Downgrade a user whose trial or paid subscription has lapsed.
    async fn downgrade_if_lapsed(&self, user: &User, now: DateTime<Utc>) -> Result<User> {
        if user.tier() == SubscriptionTier::Expired
            || user.is_current(now, self.config.trial_days)
        {
            return Ok(user.clone());
        }

        info!(
            "Subscription lapsed for user {} ({}), downgrading",
            user.id,
            user.tier()
        );

        let repo = UserRepository::new(self.pool);
        let update = UserUpdate {
            tier: Some(SubscriptionTier::Expired),
            ..Default::default()
        };
        let updated = repo
            .update(user.id, &update)
            .await?
            .ok_or_else(|| FilegateError::NotFound("user".to_string()))?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SubscriptionConfig;
    use crate::db::Database;
    use crate::file::{FileRepository, NewFileRecord};
    use chrono::{Duration, TimeZone};

    struct FixedChecker(bool);

    impl MembershipChecker for FixedChecker {
        async fn is_member(&self, _external_id: i64, _channel: &str) -> Result<bool> {
            Ok(self.0)
        }
    }

    struct FailingChecker;

    impl MembershipChecker for FailingChecker {
        async fn is_member(&self, _external_id: i64, _channel: &str) -> Result<bool> {
            Err(FilegateError::Fetch("oracle unreachable".to_string()))
        }
    }

    fn config() -> SubscriptionConfig {
        SubscriptionConfig::default()
    }

    async fn setup() -> (Database, User) {
        let db = Database::open_in_memory().await.unwrap();
        let user = UserRepository::new(db.pool())
            .get_or_create(1001, Some("alice"))
            .await
            .unwrap();
        (db, user)
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[tokio::test]
    async fn test_fresh_trial_user_is_admitted() {
        let (db, user) = setup().await;
        let config = config();
        let gate = SubscriptionGate::new(db.pool(), &config);

        let admitted = gate
            .authorize_registration(&user, 1024, now())
            .await
            .unwrap();
        assert_eq!(admitted.tier(), SubscriptionTier::Trial);
    }

    #[tokio::test]
    async fn test_blocked_user_is_rejected_everywhere() {
        let (db, user) = setup().await;
        let config = config();
        let gate = SubscriptionGate::new(db.pool(), &config);

        UserRepository::new(db.pool())
            .block(user.id, now())
            .await
            .unwrap();
        let user = UserRepository::new(db.pool())
            .get_by_id(user.id)
            .await
            .unwrap()
            .unwrap();

        let err = gate
            .authorize_registration(&user, 1, now())
            .await
            .unwrap_err();
        assert!(matches!(err, FilegateError::UserBlocked(1001)));
        assert!(gate.authorize_download(&user, now()).await.is_err());
        assert!(gate.ensure_not_blocked(&user).is_err());
    }

    #[tokio::test]
    async fn test_trial_expiry_downgrades_lazily() {
        let (db, user) = setup().await;
        let config = config();
        let gate = SubscriptionGate::new(db.pool(), &config);

        let after_trial = now() + Duration::days(config.trial_days + 1);
        let err = gate
            .authorize_registration(&user, 1, after_trial)
            .await
            .unwrap_err();
        assert!(matches!(err, FilegateError::SubscriptionExpired));

        // The downgrade is persisted
        let stored = UserRepository::new(db.pool())
            .get_by_id(user.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.tier(), SubscriptionTier::Expired);

        // Every action class is denied, downloads included
        assert!(matches!(
            gate.authorize_download(&stored, after_trial)
                .await
                .unwrap_err(),
            FilegateError::SubscriptionExpired
        ));
    }

    #[tokio::test]
    async fn test_download_denied_while_lapsed_and_restored_by_grant() {
        let (db, user) = setup().await;
        let config = config();
        let gate = SubscriptionGate::new(db.pool(), &config);
        let repo = UserRepository::new(db.pool());
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();

        repo.set_subscription(user.id, SubscriptionTier::Standard, Some(t0 + Duration::days(10)))
            .await
            .unwrap();
        let user = repo.get_by_id(user.id).await.unwrap().unwrap();

        assert!(gate
            .authorize_download(&user, t0 + Duration::days(9))
            .await
            .is_ok());

        // The lapse denies downloads and persists the downgrade, even when
        // the caller holds a stale row
        assert!(matches!(
            gate.authorize_download(&user, t0 + Duration::days(11))
                .await
                .unwrap_err(),
            FilegateError::SubscriptionExpired
        ));
        let stored = repo.get_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.tier(), SubscriptionTier::Expired);

        repo.set_subscription(user.id, SubscriptionTier::Standard, Some(t0 + Duration::days(40)))
            .await
            .unwrap();
        let restored = repo.get_by_id(user.id).await.unwrap().unwrap();
        assert!(gate
            .authorize_download(&restored, t0 + Duration::days(12))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_paid_expiry_downgrades_and_grant_restores() {
        let (db, user) = setup().await;
        let config = config();
        let gate = SubscriptionGate::new(db.pool(), &config);
        let repo = UserRepository::new(db.pool());
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();

        repo.set_subscription(user.id, SubscriptionTier::Standard, Some(t0 + Duration::days(30)))
            .await
            .unwrap();
        let user = repo.get_by_id(user.id).await.unwrap().unwrap();

        // Current while inside the window
        assert!(gate
            .authorize_registration(&user, 1, t0 + Duration::days(29))
            .await
            .is_ok());

        // Lapsed afterwards
        let err = gate
            .authorize_registration(&user, 1, t0 + Duration::days(31))
            .await
            .unwrap_err();
        assert!(matches!(err, FilegateError::SubscriptionExpired));

        // A new grant restores registration rights
        repo.set_subscription(user.id, SubscriptionTier::Premium, Some(t0 + Duration::days(90)))
            .await
            .unwrap();
        let restored = repo.get_by_id(user.id).await.unwrap().unwrap();
        assert!(gate
            .authorize_registration(&restored, 1, t0 + Duration::days(32))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_quota_counts_and_bytes() {
        let (db, user) = setup().await;
        let mut config = config();
        config.trial.max_files = 2;
        config.trial.max_storage_mb = 1;
        let gate = SubscriptionGate::new(db.pool(), &config);
        let files = FileRepository::new(db.pool());
        let far = Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap();

        files
            .create(&NewFileRecord {
                owner_id: user.id,
                original_name: "a.bin".to_string(),
                size_bytes: 512 * 1024,
                stored_name: "aa.bin".to_string(),
                content_hash: None,
                source_url: None,
                expires_at: far,
            })
            .await
            .unwrap();

        // Second file fits by count but a large one busts the byte cap
        let err = gate
            .authorize_registration(&user, 600 * 1024, now())
            .await
            .unwrap_err();
        assert!(matches!(err, FilegateError::QuotaExceeded(_)));

        // A small one fits
        assert!(gate.authorize_registration(&user, 1024, now()).await.is_ok());

        files
            .create(&NewFileRecord {
                owner_id: user.id,
                original_name: "b.bin".to_string(),
                size_bytes: 1024,
                stored_name: "bb.bin".to_string(),
                content_hash: None,
                source_url: None,
                expires_at: far,
            })
            .await
            .unwrap();

        // Third file busts the count cap
        let err = gate.authorize_registration(&user, 1, now()).await.unwrap_err();
        assert!(matches!(err, FilegateError::QuotaExceeded(_)));
    }

    #[tokio::test]
    async fn test_membership_is_fail_closed() {
        let (db, _user) = setup().await;
        let config = config();
        let gate = SubscriptionGate::new(db.pool(), &config);

        // No channel configured: always passes
        assert!(gate
            .ensure_member(&FailingChecker, None, 1001)
            .await
            .is_ok());

        // Member passes, non-member and oracle failure are both rejected
        assert!(gate
            .ensure_member(&FixedChecker(true), Some("@chan"), 1001)
            .await
            .is_ok());
        assert!(matches!(
            gate.ensure_member(&FixedChecker(false), Some("@chan"), 1001)
                .await
                .unwrap_err(),
            FilegateError::ChannelMembershipRequired
        ));
        assert!(matches!(
            gate.ensure_member(&FailingChecker, Some("@chan"), 1001)
                .await
                .unwrap_err(),
            FilegateError::ChannelMembershipRequired
        ));
    }
}
