//! Database schema migrations for filegate.
//!
//! Each entry is applied once, in order, inside a transaction. The current
//! version is tracked in the `schema_version` table.

/// Ordered migration scripts.
pub const MIGRATIONS: &[&str] = &[
    // v1: users and files
    r#"
    CREATE TABLE users (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        external_id     INTEGER NOT NULL UNIQUE,
        display_name    TEXT,
        tier            TEXT NOT NULL DEFAULT 'trial',
        subscription_expires_at TEXT,
        is_blocked      INTEGER NOT NULL DEFAULT 0,
        blocked_at      TEXT,
        trial_started_at TEXT NOT NULL DEFAULT (datetime('now')),
        upload_count    INTEGER NOT NULL DEFAULT 0,
        download_count  INTEGER NOT NULL DEFAULT 0,
        is_active       INTEGER NOT NULL DEFAULT 1,
        created_at      TEXT NOT NULL DEFAULT (datetime('now')),
        updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
    );
    CREATE INDEX idx_users_tier ON users(tier);
    CREATE INDEX idx_users_is_blocked ON users(is_blocked);

    CREATE TABLE files (
        id              TEXT PRIMARY KEY,
        owner_id        INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        original_name   TEXT NOT NULL,
        size_bytes      INTEGER NOT NULL CHECK (size_bytes > 0),
        stored_name     TEXT NOT NULL,
        content_hash    TEXT,
        source_url      TEXT,
        download_token  TEXT NOT NULL UNIQUE,
        download_count  INTEGER NOT NULL DEFAULT 0 CHECK (download_count >= 0),
        created_at      TEXT NOT NULL DEFAULT (datetime('now')),
        updated_at      TEXT NOT NULL DEFAULT (datetime('now')),
        expires_at      TEXT NOT NULL,
        deleted_at      TEXT,
        CHECK (expires_at > created_at)
    );
    CREATE INDEX idx_files_owner_id ON files(owner_id);
    CREATE INDEX idx_files_expires_at ON files(expires_at);
    CREATE INDEX idx_files_deleted_at ON files(deleted_at);
    CREATE INDEX idx_files_content_hash ON files(content_hash);
    "#,
    // v2: flat settings store
    r#"
    CREATE TABLE settings (
        name        TEXT PRIMARY KEY,
        value       TEXT NOT NULL,
        updated_at  TEXT NOT NULL DEFAULT (datetime('now'))
    );
    "#,
    // v3: sweeper bookkeeping and audit trail, reminder flag
    r#"
    ALTER TABLE files ADD COLUMN purged_at TEXT;
    ALTER TABLE users ADD COLUMN reminder_sent INTEGER NOT NULL DEFAULT 0;

    CREATE TABLE audit_log (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        file_id     TEXT,
        user_id     INTEGER,
        action      TEXT NOT NULL,
        detail      TEXT,
        created_at  TEXT NOT NULL DEFAULT (datetime('now'))
    );
    CREATE INDEX idx_audit_log_file_id ON audit_log(file_id);
    CREATE INDEX idx_audit_log_action ON audit_log(action);
    "#,
];
