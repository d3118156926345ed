//! Runtime settings store.
//!
//! A flat name/value table for operator-tunable values that must survive a
//! restart but should not require editing the config file. Values are plain
//! strings; callers parse what they need.

use sqlx::SqlitePool;

use crate::Result;

/// Comma-separated external IDs with administrator rights.
pub const SETTING_ADMIN_IDS: &str = "admin_ids";
/// Channel users must be a member of before registering files, if set.
pub const SETTING_REQUIRED_CHANNEL: &str = "required_channel";
/// Base domain used when rendering download links.
pub const SETTING_DOWNLOAD_DOMAIN: &str = "download_domain";
/// Days before subscription expiry at which a reminder is sent.
pub const SETTING_REMINDER_DAYS: &str = "reminder_days";
/// Override for the upload directory.
pub const SETTING_UPLOAD_DIR: &str = "upload_dir";

/// Repository for the settings table.
pub struct SettingsRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SettingsRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a setting value by name.
    pub async fn get(&self, name: &str) -> Result<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM settings WHERE name = ?")
                .bind(name)
                .fetch_optional(self.pool)
                .await?;
        Ok(value)
    }

    /// Get a setting parsed as i64, or `default` when absent or malformed.
    pub async fn get_i64(&self, name: &str, default: i64) -> Result<i64> {
        Ok(self
            .get(name)
            .await?
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default))
    }

    /// Set a setting, inserting or replacing.
    pub async fn set(&self, name: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings (name, value, updated_at)
             VALUES (?, ?, datetime('now'))
             ON CONFLICT(name) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
        )
        .bind(name)
        .bind(value)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Remove a setting. Returns true if it existed.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM settings WHERE name = ?")
            .bind(name)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All settings as (name, value) pairs, sorted by name.
    pub async fn all(&self) -> Result<Vec<(String, String)>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT name, value FROM settings ORDER BY name")
                .fetch_all(self.pool)
                .await?;
        Ok(rows)
    }

    /// Parse the admin ID list setting.
    pub async fn admin_ids(&self) -> Result<Vec<i64>> {
        let ids = match self.get(SETTING_ADMIN_IDS).await? {
            Some(raw) => raw
                .split(',')
                .filter_map(|part| part.trim().parse().ok())
                .collect(),
            None => Vec::new(),
        };
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn test_get_missing() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = SettingsRepository::new(db.pool());
        assert_eq!(repo.get("nothing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_then_overwrite() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = SettingsRepository::new(db.pool());

        repo.set(SETTING_REMINDER_DAYS, "3").await.unwrap();
        assert_eq!(
            repo.get(SETTING_REMINDER_DAYS).await.unwrap().as_deref(),
            Some("3")
        );

        repo.set(SETTING_REMINDER_DAYS, "7").await.unwrap();
        assert_eq!(repo.get_i64(SETTING_REMINDER_DAYS, 3).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_get_i64_fallback() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = SettingsRepository::new(db.pool());

        assert_eq!(repo.get_i64("absent", 5).await.unwrap(), 5);
        repo.set("bad", "not a number").await.unwrap();
        assert_eq!(repo.get_i64("bad", 5).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_delete() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = SettingsRepository::new(db.pool());

        repo.set("k", "v").await.unwrap();
        assert!(repo.delete("k").await.unwrap());
        assert!(!repo.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_admin_ids_parsing() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = SettingsRepository::new(db.pool());

        assert!(repo.admin_ids().await.unwrap().is_empty());
        repo.set(SETTING_ADMIN_IDS, "100, 200,junk,300").await.unwrap();
        assert_eq!(repo.admin_ids().await.unwrap(), vec![100, 200, 300]);
    }

    #[tokio::test]
    async fn test_all_sorted() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = SettingsRepository::new(db.pool());

        repo.set("b", "2").await.unwrap();
        repo.set("a", "1").await.unwrap();
        let all = repo.all().await.unwrap();
        assert_eq!(all[0].0, "a");
        assert_eq!(all[1].0, "b");
    }
}
