use std::collections::HashMap;
use std::path::{Path, PathBuf};
use parking_lot::RwLock;
use tracing::debug;

/// Durable key-value backend for cache blobs
pub trait DurableStore: Send + Sync {
    /// `Ok(None)` when the blob was never written
    fn load(&self, name: &str) -> anyhow::Result<Option<Vec<u8>>>;
    fn save(&self, name: &str, bytes: &[u8]) -> anyhow::Result<()>;
    /// Removing a missing blob is not an error
    fn remove(&self, name: &str) -> anyhow::Result<()>;
}

/// One `<name>.json` file per blob under a directory
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn blob_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }
}

impl DurableStore for FileStore {
    fn load(&self, name: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let path = self.blob_path(name);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(anyhow::anyhow!("Failed to read '{}': {}", path.display(), e)),
        }
    }

    fn save(&self, name: &str, bytes: &[u8]) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| anyhow::anyhow!("Failed to create '{}': {}", self.dir.display(), e))?;

        // Write-then-rename so a crash never leaves a half-written blob
        let path = self.blob_path(name);
        let tmp = self.dir.join(format!(".{}.json.tmp", name));
        std::fs::write(&tmp, bytes)
            .map_err(|e| anyhow::anyhow!("Failed to write '{}': {}", tmp.display(), e))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| anyhow::anyhow!("Failed to replace '{}': {}", path.display(), e))?;

        debug!("Saved {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }

    fn remove(&self, name: &str) -> anyhow::Result<()> {
        let path = self.blob_path(name);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(anyhow::anyhow!("Failed to remove '{}': {}", path.display(), e)),
        }
    }
}

/// In-process store for tests and embedding
#[derive(Default)]
pub struct MemoryStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.blobs.read().contains_key(name)
    }
}

impl DurableStore for MemoryStore {
    fn load(&self, name: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.blobs.read().get(name).cloned())
    }

    fn save(&self, name: &str, bytes: &[u8]) -> anyhow::Result<()> {
        self.blobs.write().insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn remove(&self, name: &str) -> anyhow::Result<()> {
        self.blobs.write().remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested"));

        assert_eq!(store.load("cached_lists").unwrap(), None);
        store.save("cached_lists", b"{\"a\":1}").unwrap();
        assert_eq!(store.load("cached_lists").unwrap(), Some(b"{\"a\":1}".to_vec()));

        store.save("cached_lists", b"{}").unwrap();
        assert_eq!(store.load("cached_lists").unwrap(), Some(b"{}".to_vec()));
        assert!(!dir.path().join("nested/.cached_lists.json.tmp").exists());
    }

    #[test]
    fn test_file_store_remove_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.remove("last_update_times").unwrap();

        store.save("last_update_times", b"{}").unwrap();
        store.remove("last_update_times").unwrap();
        assert_eq!(store.load("last_update_times").unwrap(), None);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        store.save("x", b"1").unwrap();
        assert!(store.contains("x"));
        store.remove("x").unwrap();
        assert_eq!(store.load("x").unwrap(), None);
    }
}
