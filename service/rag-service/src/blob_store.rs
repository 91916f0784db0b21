//! Blob storage seam: save/read/delete by opaque stored path. The filesystem
//! implementation keeps everything under one media root and refuses to step
//! outside it.

use std::path::{Component, Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("blob io failed at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid blob path: {0}")]
    InvalidPath(String),
}

pub trait BlobStore: Send + Sync {
    /// Store bytes under a path derived from `relative_path`, returning the
    /// stored path used for all later access.
    fn save(&self, relative_path: &str, bytes: &[u8]) -> Result<String, BlobError>;
    fn delete(&self, stored_path: &str) -> Result<(), BlobError>;
    fn read_bytes(&self, stored_path: &str) -> Result<Vec<u8>, BlobError>;
    fn resolve_fs_path(&self, stored_path: &str) -> Result<PathBuf, BlobError>;
}

pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn checked_join(&self, stored_path: &str) -> Result<PathBuf, BlobError> {
        let rel = Path::new(stored_path);
        if rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(BlobError::InvalidPath(stored_path.to_string()));
        }
        Ok(self.root.join(rel))
    }

    fn io(path: &Path, source: std::io::Error) -> BlobError {
        BlobError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

impl BlobStore for FsBlobStore {
    fn save(&self, relative_path: &str, bytes: &[u8]) -> Result<String, BlobError> {
        let mut stored = relative_path.to_string();
        let mut full = self.checked_join(&stored)?;

        // Collision-avoiding suffix, like `name_1.pdf`, `name_2.pdf`.
        let mut attempt = 0usize;
        while full.exists() {
            attempt += 1;
            let rel = Path::new(relative_path);
            let stem = rel
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("blob");
            let ext = rel.extension().and_then(|s| s.to_str());
            let parent = rel.parent().filter(|p| !p.as_os_str().is_empty());
            let name = match ext {
                Some(ext) => format!("{stem}_{attempt}.{ext}"),
                None => format!("{stem}_{attempt}"),
            };
            stored = match parent {
                Some(p) => p.join(&name).to_string_lossy().into_owned(),
                None => name,
            };
            full = self.checked_join(&stored)?;
        }

        if let Some(dir) = full.parent() {
            std::fs::create_dir_all(dir).map_err(|e| Self::io(dir, e))?;
        }
        std::fs::write(&full, bytes).map_err(|e| Self::io(&full, e))?;
        Ok(stored)
    }

    fn delete(&self, stored_path: &str) -> Result<(), BlobError> {
        let full = self.checked_join(stored_path)?;
        std::fs::remove_file(&full).map_err(|e| Self::io(&full, e))
    }

    fn read_bytes(&self, stored_path: &str) -> Result<Vec<u8>, BlobError> {
        let full = self.checked_join(stored_path)?;
        std::fs::read(&full).map_err(|e| Self::io(&full, e))
    }

    fn resolve_fs_path(&self, stored_path: &str) -> Result<PathBuf, BlobError> {
        self.checked_join(stored_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_read_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let stored = store.save("documents/hr/rules.txt", b"text body").unwrap();
        assert_eq!(stored, "documents/hr/rules.txt");
        assert_eq!(store.read_bytes(&stored).unwrap(), b"text body");
        store.delete(&stored).unwrap();
        assert!(store.read_bytes(&stored).is_err());
    }

    #[test]
    fn duplicate_names_get_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let first = store.save("documents/hr/rules.txt", b"a").unwrap();
        let second = store.save("documents/hr/rules.txt", b"b").unwrap();
        assert_eq!(first, "documents/hr/rules.txt");
        assert_eq!(second, "documents/hr/rules_1.txt");
        assert_eq!(store.read_bytes(&second).unwrap(), b"b");
    }

    #[test]
    fn traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        assert!(matches!(
            store.save("../escape.txt", b"x"),
            Err(BlobError::InvalidPath(_))
        ));
        assert!(matches!(
            store.read_bytes("/etc/passwd"),
            Err(BlobError::InvalidPath(_))
        ));
    }
}
