//! User repository.
//!
//! CRUD operations and moderation state transitions for users.

use chrono::{DateTime, Duration, Utc};
use sqlx::{QueryBuilder, SqlitePool};

use super::user::{NewUser, SubscriptionTier, User, UserUpdate};
use crate::datetime;
use crate::{FilegateError, Result};

/// Repository for user CRUD operations.
pub struct UserRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UserRepository<'a> {
    /// Create a new UserRepository with the given database pool reference.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new user in the database.
    ///
    /// Returns the created user with the assigned ID.
    pub async fn create(&self, new_user: &NewUser) -> Result<User> {
        let result = sqlx::query(
            "INSERT INTO users (external_id, display_name) VALUES (?, ?)",
        )
        .bind(new_user.external_id)
        .bind(&new_user.display_name)
        .execute(self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.get_by_id(id)
            .await?
            .ok_or_else(|| FilegateError::NotFound("user".to_string()))
    }

    /// Get a user by internal ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        let result = sqlx::query_as::<_, User>(
            "SELECT id, external_id, display_name, tier, subscription_expires_at,
                    is_blocked, blocked_at, trial_started_at, upload_count,
                    download_count, is_active, reminder_sent, created_at, updated_at
             FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(result)
    }

    /// Get a user by their identity in the fronting client.
    pub async fn get_by_external_id(&self, external_id: i64) -> Result<Option<User>> {
        let result = sqlx::query_as::<_, User>(
            "SELECT id, external_id, display_name, tier, subscription_expires_at,
                    is_blocked, blocked_at, trial_started_at, upload_count,
                    download_count, is_active, reminder_sent, created_at, updated_at
             FROM users WHERE external_id = ?",
        )
        .bind(external_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(result)
    }

    /// Look up a user by external ID, creating them on first contact.
    ///
    /// Creation starts the trial clock. An existing user's display name is
    /// refreshed if the client now reports a different one.
    pub async fn get_or_create(
        &self,
        external_id: i64,
        display_name: Option<&str>,
    ) -> Result<User> {
        if let Some(user) = self.get_by_external_id(external_id).await? {
            if let Some(name) = display_name {
                if user.display_name.as_deref() != Some(name) {
                    let update = UserUpdate {
                        display_name: Some(name.to_string()),
                        ..Default::default()
                    };
                    if let Some(updated) = self.update(user.id, &update).await? {
                        return Ok(updated);
                    }
                }
            }
            return Ok(user);
        }

        self.create(&NewUser {
            external_id,
            display_name: display_name.map(str::to_string),
        })
        .await
    }

    /// Update a user by ID.
    ///
    /// Only fields that are set in the update will be modified.
    /// Returns the updated user, or None if not found.
    pub async fn update(&self, id: i64, update: &UserUpdate) -> Result<Option<User>> {
        if update.is_empty() {
            return self.get_by_id(id).await;
        }

        let mut query: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new("UPDATE users SET ");
        let mut separated = query.separated(", ");

        if let Some(ref display_name) = update.display_name {
            separated.push("display_name = ");
            separated.push_bind_unseparated(display_name.clone());
        }
        if let Some(tier) = update.tier {
            separated.push("tier = ");
            separated.push_bind_unseparated(tier.as_str().to_string());
        }
        if let Some(ref expires) = update.subscription_expires_at {
            separated.push("subscription_expires_at = ");
            separated.push_bind_unseparated(expires.clone());
        }
        if let Some(is_blocked) = update.is_blocked {
            separated.push("is_blocked = ");
            separated.push_bind_unseparated(is_blocked);
        }
        if let Some(is_active) = update.is_active {
            separated.push("is_active = ");
            separated.push_bind_unseparated(is_active);
        }
        if let Some(reminder_sent) = update.reminder_sent {
            separated.push("reminder_sent = ");
            separated.push_bind_unseparated(reminder_sent);
        }
        separated.push("updated_at = datetime('now')");

        query.push(" WHERE id = ");
        query.push_bind(id);

        query.build().execute(self.pool).await?;

        self.get_by_id(id).await
    }

    /// Block a user. Returns true if the state changed.
    ///
    /// Already-blocked users are left untouched, so repeating the command
    /// does not move `blocked_at`.
    pub async fn block(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE users
             SET is_blocked = 1, blocked_at = ?, updated_at = datetime('now')
             WHERE id = ? AND is_blocked = 0",
        )
        .bind(datetime::to_sqlite(now))
        .bind(id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Unblock a user. Returns true if the state changed.
    pub async fn unblock(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE users
             SET is_blocked = 0, blocked_at = NULL, updated_at = datetime('now')
             WHERE id = ? AND is_blocked = 1",
        )
        .bind(id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Set a user's tier and expiry in one step.
    ///
    /// Granting a subscription also clears the reminder flag so the next
    /// expiry cycle notifies again.
    pub async fn set_subscription(
        &self,
        id: i64,
        tier: SubscriptionTier,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Option<User>> {
        let update = UserUpdate {
            tier: Some(tier),
            subscription_expires_at: Some(expires_at.map(datetime::to_sqlite)),
            reminder_sent: Some(false),
            ..Default::default()
        };
        self.update(id, &update).await
    }

    /// Record a completed upload.
    pub async fn increment_upload_count(&self, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE users SET upload_count = upload_count + 1, updated_at = datetime('now')
             WHERE id = ?",
        )
        .bind(id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Record a completed download.
    pub async fn increment_download_count(&self, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE users SET download_count = download_count + 1, updated_at = datetime('now')
             WHERE id = ?",
        )
        .bind(id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Search users by display name substring or exact external ID.
    pub async fn search(&self, pattern: &str, limit: i64) -> Result<Vec<User>> {
        let like = format!("%{}%", pattern);
        let external_id: i64 = pattern.parse().unwrap_or(-1);

        let users = sqlx::query_as::<_, User>(
            "SELECT id, external_id, display_name, tier, subscription_expires_at,
                    is_blocked, blocked_at, trial_started_at, upload_count,
                    download_count, is_active, reminder_sent, created_at, updated_at
             FROM users
             WHERE display_name LIKE ? OR external_id = ?
             ORDER BY created_at DESC
             LIMIT ?",
        )
        .bind(like)
        .bind(external_id)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(users)
    }

    /// List active, unblocked users (broadcast recipients).
    pub async fn list_active(&self) -> Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            "SELECT id, external_id, display_name, tier, subscription_expires_at,
                    is_blocked, blocked_at, trial_started_at, upload_count,
                    download_count, is_active, reminder_sent, created_at, updated_at
             FROM users
             WHERE is_active = 1 AND is_blocked = 0
             ORDER BY id",
        )
        .fetch_all(self.pool)
        .await?;

        Ok(users)
    }

    /// List paid users whose subscription ends within `days` of `now` and who
    /// have not yet been reminded.
    pub async fn list_expiring(&self, now: DateTime<Utc>, days: i64) -> Result<Vec<User>> {
        let horizon = now + Duration::days(days);

        let users = sqlx::query_as::<_, User>(
            "SELECT id, external_id, display_name, tier, subscription_expires_at,
                    is_blocked, blocked_at, trial_started_at, upload_count,
                    download_count, is_active, reminder_sent, created_at, updated_at
             FROM users
             WHERE tier IN ('standard', 'premium')
               AND subscription_expires_at IS NOT NULL
               AND subscription_expires_at > ?
               AND subscription_expires_at <= ?
               AND reminder_sent = 0
               AND is_blocked = 0
             ORDER BY subscription_expires_at",
        )
        .bind(datetime::to_sqlite(now))
        .bind(datetime::to_sqlite(horizon))
        .fetch_all(self.pool)
        .await?;

        Ok(users)
    }

    /// Count all users.
    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(self.pool)
            .await?;
        Ok(count)
    }
}
