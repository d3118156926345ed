//! Physical byte storage.
//!
//! Stored names are UUIDs with the original extension appended, laid out in
//! shard directories keyed by the first two characters of the name. The
//! original filename never touches the filesystem, so hostile names cannot
//! escape the storage root.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::{FilegateError, Result};

/// Sharded on-disk store for file bytes.
#[derive(Debug, Clone)]
pub struct FileStorage {
    base_path: PathBuf,
}

impl FileStorage {
    /// Open a store rooted at `base_path`, creating the directory if needed.
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Write content under a fresh UUID-based stored name.
    ///
    /// Returns the stored name to record in the registry.
    pub fn save(&self, content: &[u8], original_name: &str) -> Result<String> {
        let stored_name = Self::generate_stored_name(original_name);
        self.save_with_name(content, &stored_name)?;
        Ok(stored_name)
    }

    /// Write content under an already-assigned stored name.
    pub fn save_with_name(&self, content: &[u8], stored_name: &str) -> Result<()> {
        let path = self.resolve_path(stored_name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        Ok(())
    }

    /// Read stored bytes.
    pub fn load(&self, stored_name: &str) -> Result<Vec<u8>> {
        match fs::read(self.resolve_path(stored_name)) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(FilegateError::NotFound(format!("stored file {stored_name}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove stored bytes.
    ///
    /// Returns `true` if bytes were present. An already-absent file is not
    /// an error; the sweeper retries removals.
    pub fn remove(&self, stored_name: &str) -> Result<bool> {
        match fs::remove_file(self.resolve_path(stored_name)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(&self, stored_name: &str) -> bool {
        self.resolve_path(stored_name).exists()
    }

    /// Size in bytes of a stored file.
    pub fn file_size(&self, stored_name: &str) -> Result<u64> {
        match fs::metadata(self.resolve_path(stored_name)) {
            Ok(m) => Ok(m.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(FilegateError::NotFound(format!("stored file {stored_name}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Full path of a stored name: `{base}/{shard}/{stored_name}`.
    fn resolve_path(&self, stored_name: &str) -> PathBuf {
        let shard = if stored_name.len() >= 2 {
            &stored_name[..2]
        } else {
            stored_name
        };
        self.base_path.join(shard).join(stored_name)
    }

    /// Produce a new stored name, keeping the original extension.
    pub fn generate_stored_name(original_name: &str) -> String {
        let ext = Path::new(original_name)
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("bin");
        format!("{}.{}", Uuid::new_v4(), ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, FileStorage) {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        (dir, storage)
    }

    #[test]
    fn test_save_load_remove_cycle() {
        let (_dir, storage) = setup();

        let stored = storage.save(b"payload", "report.pdf").unwrap();
        assert!(stored.ends_with(".pdf"));
        assert!(storage.exists(&stored));
        assert_eq!(storage.load(&stored).unwrap(), b"payload");
        assert_eq!(storage.file_size(&stored).unwrap(), 7);

        assert!(storage.remove(&stored).unwrap());
        assert!(!storage.exists(&stored));
    }

    #[test]
    fn test_remove_missing_is_not_an_error() {
        let (_dir, storage) = setup();
        assert!(!storage.remove("gone.bin").unwrap());
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let (_dir, storage) = setup();
        assert!(matches!(
            storage.load("gone.bin"),
            Err(FilegateError::NotFound(_))
        ));
    }

    #[test]
    fn test_shard_layout() {
        let (_dir, storage) = setup();
        let stored = storage.save(b"x", "a.txt").unwrap();
        let shard_dir = storage.base_path().join(&stored[..2]);
        assert!(shard_dir.is_dir());
        assert!(shard_dir.join(&stored).is_file());
    }

    #[test]
    fn test_stored_name_hides_original() {
        let stored = FileStorage::generate_stored_name("../../etc/passwd.txt");
        assert!(!stored.contains(".."));
        assert!(!stored.contains('/'));
        assert!(stored.ends_with(".txt"));
    }

    #[test]
    fn test_missing_extension_defaults_to_bin() {
        let stored = FileStorage::generate_stored_name("README");
        assert!(stored.ends_with(".bin"));
    }

    #[test]
    fn test_stored_names_are_unique() {
        let a = FileStorage::generate_stored_name("a.txt");
        let b = FileStorage::generate_stored_name("a.txt");
        assert_ne!(a, b);
    }
}
