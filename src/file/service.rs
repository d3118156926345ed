//! File lifecycle service.
//!
//! Orchestrates registration, download resolution, deletion, and token
//! rotation across the gate, the rate limiters, the byte store, and the
//! registry. Registration is all-or-nothing: if the metadata insert fails
//! after bytes were written, the bytes are removed again.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use super::fetch::{validate_url, UrlFetcher};
use super::metadata::{FileRecord, FileRepository, NewFileRecord};
use super::storage::FileStorage;
use super::{token, MAX_FILENAME_LENGTH};
use crate::config::{Config, StorageConfig, SubscriptionConfig};
use crate::db::User;
use crate::error::TokenDenial;
use crate::gate::{MembershipChecker, SubscriptionGate};
use crate::rate_limit::{ActionClass, RateLimiters};
use crate::{FilegateError, Result};

/// A registration request carrying the bytes to store.
#[derive(Debug, Clone)]
pub struct RegisterRequest {
    pub file_name: String,
    pub bytes: Vec<u8>,
    /// Set when the bytes were fetched from a URL.
    pub source_url: Option<String>,
}

/// A granted download.
#[derive(Debug, Clone)]
pub struct ResolvedDownload {
    pub record: FileRecord,
    pub bytes: Vec<u8>,
}

/// Service tying the file lifecycle together.
pub struct FileService {
    pool: SqlitePool,
    storage: FileStorage,
    storage_config: StorageConfig,
    subscription_config: SubscriptionConfig,
    limiters: Arc<RateLimiters>,
    /// Channel users must belong to before registering, if any.
    required_channel: Option<String>,
}

impl FileService {
    pub fn new(
        pool: SqlitePool,
        storage: FileStorage,
        config: &Config,
        limiters: Arc<RateLimiters>,
    ) -> Self {
        Self {
            pool,
            storage,
            storage_config: config.storage.clone(),
            subscription_config: config.subscription.clone(),
            limiters,
            required_channel: None,
        }
    }

    /// Require membership in a channel for registrations.
    pub fn with_required_channel(mut self, channel: Option<String>) -> Self {
        self.required_channel = channel;
        self
    }

    fn repo(&self) -> FileRepository<'_> {
        FileRepository::new(&self.pool)
    }

    fn gate(&self) -> SubscriptionGate<'_> {
        SubscriptionGate::new(&self.pool, &self.subscription_config)
    }

    /// Register a file from bytes the user supplied directly.
    pub async fn register<C: MembershipChecker>(
        &self,
        user: &User,
        checker: &C,
        request: RegisterRequest,
        now: DateTime<Utc>,
    ) -> Result<FileRecord> {
        self.limiters.check(ActionClass::Upload, user.id)?;
        self.register_admitted(user, checker, request, now).await
    }

    /// Registration body shared by the direct and URL paths.
    async fn register_admitted<C: MembershipChecker>(
        &self,
        user: &User,
        checker: &C,
        request: RegisterRequest,
        now: DateTime<Utc>,
    ) -> Result<FileRecord> {
        let file_name = sanitize_filename(&request.file_name)?;
        self.check_extension(&file_name)?;

        let size = request.bytes.len() as u64;
        if size == 0 {
            return Err(FilegateError::Validation("file is empty".to_string()));
        }
        let limit = self.storage_config.max_file_size_bytes();
        if size > limit {
            return Err(FilegateError::SizeTooLarge { size, limit });
        }

        let gate = self.gate();
        // Blocked users are cut off before the membership oracle is asked
        // anything on their behalf.
        gate.ensure_not_blocked(user)?;
        gate.ensure_member(checker, self.required_channel.as_deref(), user.external_id)
            .await?;
        let user = gate
            .authorize_registration(user, size as i64, now)
            .await?;

        let content_hash = hex_digest(&request.bytes);
        let repo = self.repo();
        if let Some(existing) = repo.find_by_hash(user.id, &content_hash).await? {
            debug!(
                "User {} re-registering content already held as file {}",
                user.id, existing.id
            );
        }

        let stored_name = self.storage.save(&request.bytes, &file_name)?;
        let record = repo
            .create(&NewFileRecord {
                owner_id: user.id,
                original_name: file_name,
                size_bytes: size as i64,
                stored_name: stored_name.clone(),
                content_hash: Some(content_hash),
                source_url: request.source_url,
                expires_at: now + Duration::days(self.subscription_config.file_expiry_days),
            })
            .await;

        let record = match record {
            Ok(record) => record,
            Err(e) => {
                // Bytes without a registry row are unreachable; take them
                // back out.
                if let Err(remove_err) = self.storage.remove(&stored_name) {
                    warn!("Rollback of {} failed: {}", stored_name, remove_err);
                }
                return Err(e);
            }
        };

        crate::db::UserRepository::new(&self.pool)
            .increment_upload_count(user.id)
            .await?;
        repo.record_audit(Some(&record.id), Some(user.id), "registered", None)
            .await?;

        info!(
            "Registered file {} ({} bytes) for user {}, token {}…",
            record.id,
            record.size_bytes,
            user.id,
            token::token_prefix(&record.download_token)
        );
        Ok(record)
    }

    /// Register a file by fetching it from a URL.
    ///
    /// The rate-limit slot is taken before the transfer starts, so a user
    /// cannot trigger more fetches than registrations; the per-file size
    /// cap bounds the download itself.
    pub async fn register_from_url<C: MembershipChecker, F: UrlFetcher>(
        &self,
        user: &User,
        checker: &C,
        fetcher: &F,
        url: &str,
        now: DateTime<Utc>,
    ) -> Result<FileRecord> {
        self.limiters.check(ActionClass::Upload, user.id)?;

        let parsed = validate_url(url)?;
        let fetched = fetcher
            .fetch(parsed.as_str(), self.storage_config.max_file_size_bytes())
            .await?;

        self.register_admitted(
            user,
            checker,
            RegisterRequest {
                file_name: fetched.file_name,
                bytes: fetched.bytes,
                source_url: Some(parsed.to_string()),
            },
            now,
        )
        .await
    }

    /// Resolve a download token to file bytes.
    ///
    /// `requester` is the authenticated user asking, when there is one;
    /// anonymous link resolution skips the per-user checks.
    pub async fn resolve(
        &self,
        download_token: &str,
        requester: Option<&User>,
        now: DateTime<Utc>,
    ) -> Result<ResolvedDownload> {
        if let Some(user) = requester {
            self.limiters.check(ActionClass::Download, user.id)?;
            self.gate().authorize_download(user, now).await?;
        }

        let repo = self.repo();
        let record = match repo.get_by_token(download_token).await? {
            Some(record) => record,
            None => {
                debug!(
                    "Unknown download token {}…",
                    token::token_prefix(download_token)
                );
                return Err(FilegateError::InvalidToken(TokenDenial::Unknown));
            }
        };

        if record.is_deleted() {
            return Err(FilegateError::InvalidToken(TokenDenial::Deleted));
        }
        if record.is_expired(now) {
            return Err(FilegateError::InvalidToken(TokenDenial::Expired));
        }

        let bytes = self.storage.load(&record.stored_name)?;

        repo.increment_downloads(&record.id).await?;
        if let Some(user) = requester {
            crate::db::UserRepository::new(&self.pool)
                .increment_download_count(user.id)
                .await?;
        }

        Ok(ResolvedDownload { record, bytes })
    }

    /// Soft-delete a file as its owner or as an administrator.
    ///
    /// Idempotent: deleting an already-deleted file succeeds quietly, with
    /// no second audit entry. `NotFound` is reserved for ids that were
    /// never registered. Bytes are removed best-effort; a failed removal
    /// is retried by the sweeper via the purge backlog.
    pub async fn delete(
        &self,
        actor: &User,
        is_admin: bool,
        file_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let repo = self.repo();
        let record = repo
            .get_by_id(file_id)
            .await?
            .ok_or_else(|| FilegateError::NotFound("file".to_string()))?;

        if !is_admin && record.owner_id != actor.id {
            return Err(FilegateError::OwnerMismatch(format!("file {file_id}")));
        }

        if record.is_deleted() {
            debug!("File {} already deleted", file_id);
            return Ok(());
        }

        let action = if is_admin && record.owner_id != actor.id {
            "admin_deleted"
        } else {
            "owner_deleted"
        };
        if !repo.soft_delete(file_id, now, action, Some(actor.id)).await? {
            // Someone else won the transition between lookup and update;
            // the file is deleted either way.
            return Ok(());
        }

        match self.storage.remove(&record.stored_name) {
            Ok(_) => repo.mark_purged(file_id, now).await?,
            Err(e) => warn!(
                "Byte removal for deleted file {} failed, sweeper will retry: {}",
                file_id, e
            ),
        }

        info!("File {} deleted ({})", file_id, action);
        Ok(())
    }

    /// Rotate the download token of a live file.
    ///
    /// The old token stops resolving the moment the new one is written.
    pub async fn regenerate_token(
        &self,
        actor: &User,
        is_admin: bool,
        file_id: &str,
    ) -> Result<String> {
        let repo = self.repo();
        let record = repo
            .get_by_id(file_id)
            .await?
            .filter(|r| !r.is_deleted())
            .ok_or_else(|| FilegateError::NotFound("file".to_string()))?;

        if !is_admin && record.owner_id != actor.id {
            return Err(FilegateError::OwnerMismatch(format!("file {file_id}")));
        }

        let new_token = repo
            .replace_token(file_id)
            .await?
            .ok_or_else(|| FilegateError::NotFound("file".to_string()))?;

        repo.record_audit(Some(file_id), Some(actor.id), "token_rotated", None)
            .await?;
        info!(
            "Token for file {} rotated to {}…",
            file_id,
            token::token_prefix(&new_token)
        );
        Ok(new_token)
    }

    /// List an owner's live files.
    pub async fn list(
        &self,
        owner: &User,
        pattern: Option<&str>,
        limit: i64,
    ) -> Result<Vec<FileRecord>> {
        self.repo().list_by_owner(owner.id, pattern, limit).await
    }

    fn check_extension(&self, file_name: &str) -> Result<()> {
        let ext = std::path::Path::new(file_name)
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| format!(".{}", s.to_lowercase()))
            .unwrap_or_default();

        if self
            .storage_config
            .blocked_extensions
            .iter()
            .any(|blocked| blocked.eq_ignore_ascii_case(&ext))
        {
            return Err(FilegateError::ExtensionBlocked(ext));
        }

        if !self.storage_config.allowed_extensions.is_empty()
            && !self
                .storage_config
                .allowed_extensions
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(&ext))
        {
            return Err(FilegateError::ExtensionBlocked(ext));
        }

        Ok(())
    }
}

/// Reduce a client-supplied filename to a safe basename.
///
/// Path components are stripped rather than rejected, because messenger
/// clients legitimately send full paths. What remains must be a plain,
/// printable name.
pub fn sanitize_filename(raw: &str) -> Result<String> {
    let basename = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    let cleaned: String = basename.chars().filter(|c| !c.is_control()).collect();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return Err(FilegateError::Validation("invalid filename".to_string()));
    }
    if cleaned.chars().count() > MAX_FILENAME_LENGTH {
        return Err(FilegateError::Validation(format!(
            "filename longer than {MAX_FILENAME_LENGTH} characters"
        )));
    }

    Ok(cleaned)
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
