//! Local tier: one JSON document per fingerprint in a directory.
//!
//! Entries never expire here; they stay until deleted or cleared.

use super::backend::CacheBackend;
use super::entry::CacheEntry;
use super::key::CacheKey;
use crate::{Error, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &CacheKey) -> Result<PathBuf> {
        let valid = !key.hash.is_empty()
            && key
                .hash
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(Error::Cache(format!("invalid cache key '{}'", key.hash)));
        }
        Ok(self.dir.join(format!("{}.json", key.hash)))
    }

    /// Number of entries on disk.
    pub async fn len(&self) -> Result<usize> {
        Ok(self.keys().await?.len())
    }

    /// Fingerprints of all stored entries.
    pub async fn keys(&self) -> Result<Vec<String>> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(d) => d,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut keys = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl CacheBackend for FileStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let path = self.path_for(key)?;
        let data = match tokio::fs::read(&path).await {
            Ok(d) => d,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&data) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(fingerprint = %key, error = %e, "corrupt cache entry, treating as miss");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &CacheKey, entry: &CacheEntry, _ttl: Option<Duration>) -> Result<()> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let data = serde_json::to_vec_pretty(entry)?;
        // Write-then-rename so a concurrent reader never sees half a document.
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", key.hash, uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, &data).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self) -> Result<()> {
        for key in self.keys().await? {
            self.delete(&CacheKey::new(key)).await?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EntryMetadata;
    use crate::types::Response;

    fn temp_store() -> FileStore {
        let dir = std::env::temp_dir().join(format!("llm-exec-file-{}", uuid::Uuid::new_v4()));
        FileStore::new(dir)
    }

    fn entry(key: &str, text: &str) -> CacheEntry {
        let meta = EntryMetadata {
            cached_at: crate::cache::unix_now(),
            ..Default::default()
        };
        CacheEntry::new(key, Response::new(text, "m"), meta)
    }

    #[tokio::test]
    async fn round_trip_creates_directory_lazily() {
        let store = temp_store();
        let key = CacheKey::new("abc123");
        assert!(!store.dir().exists());
        assert!(store.get(&key).await.unwrap().is_none());

        store.set(&key, &entry("abc123", "Paris"), None).await.unwrap();
        let got = store.get(&key).await.unwrap().unwrap();
        assert_eq!(got.payload.text, "Paris");
        assert_eq!(store.len().await.unwrap(), 1);

        assert!(store.delete(&key).await.unwrap());
        assert!(!store.delete(&key).await.unwrap());
        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[tokio::test]
    async fn corrupt_entry_reads_as_miss() {
        let store = temp_store();
        std::fs::create_dir_all(store.dir()).unwrap();
        std::fs::write(store.dir().join("bad.json"), b"{not json").unwrap();
        assert!(store.get(&CacheKey::new("bad")).await.unwrap().is_none());
        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[tokio::test]
    async fn old_entries_are_kept_until_cleared() {
        let store = temp_store();
        let mut old = entry("old", "still here");
        old.metadata.cached_at -= 5 * 365 * 86_400;
        let ttl = Some(Duration::from_secs(1));
        store.set(&CacheKey::new("old"), &old, ttl).await.unwrap();

        let got = store.get(&CacheKey::new("old")).await.unwrap().unwrap();
        assert_eq!(got.payload.text, "still here");
        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[tokio::test]
    async fn rejects_path_like_keys() {
        let store = temp_store();
        assert!(store.get(&CacheKey::new("../etc/passwd")).await.is_err());
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let store = temp_store();
        for k in ["a1", "b2", "c3"] {
            store.set(&CacheKey::new(k), &entry(k, k), None).await.unwrap();
        }
        assert_eq!(store.keys().await.unwrap(), vec!["a1", "b2", "c3"]);
        store.clear().await.unwrap();
        assert_eq!(store.len().await.unwrap(), 0);
        let _ = std::fs::remove_dir_all(store.dir());
    }
}
