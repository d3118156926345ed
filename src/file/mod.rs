//! File lifecycle module for filegate.
//!
//! Covers the full path of a file through the system:
//! - registration (direct bytes or fetched from a URL)
//! - physical storage with UUID naming and directory sharding
//! - token-gated download resolution
//! - soft deletion and token regeneration

mod fetch;
mod metadata;
mod service;
mod storage;
mod token;

pub use fetch::{FetchedFile, HttpFetcher, UrlFetcher};
pub use metadata::{AuditEntry, FileRecord, FileRepository, NewFileRecord, OwnerUsage};
pub use service::{FileService, RegisterRequest, ResolvedDownload};
pub use storage::FileStorage;
pub use token::{download_token, download_url, token_prefix};

/// Maximum length for an original filename (in characters).
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Length of a download token in characters.
pub const TOKEN_LENGTH: usize = 43;
