//! Artifact cache restore/save lifecycle. Caching is strictly an
//! optimization: transport failures are logged and never fail the session.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};

#[async_trait]
pub trait CacheTransport: Send + Sync {
    /// Exact-key then prefix-fallback lookup; `Some(matched)` on hit with
    /// the contents extracted into `dir`.
    async fn restore(&self, dir: &Path, key: &str, restore_keys: &[String])
        -> Result<Option<String>>;

    /// Upload `dir` under `key`. A concurrent job claiming the same key
    /// surfaces as `SessionError::CacheConflict`.
    async fn save(&self, dir: &Path, key: &str) -> Result<()>;
}

/// Keyed, directory-shaped artifact persisted between sessions.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub dir: PathBuf,
    pub restored: bool,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            key: key.into(),
            dir: dir.into(),
            restored: false,
        }
    }
}

/// Transport backed by an external cache client process
/// (`<client> restore <dir> <key> [fallbacks…]` / `<client> save <dir> <key>`).
/// The matched key is the first line of restore's stdout; empty means miss.
pub struct ProcessCacheTransport {
    client: String,
}

impl ProcessCacheTransport {
    pub fn new(client: impl Into<String>) -> Self {
        Self {
            client: client.into(),
        }
    }
}

#[async_trait]
impl CacheTransport for ProcessCacheTransport {
    async fn restore(
        &self,
        dir: &Path,
        key: &str,
        restore_keys: &[String],
    ) -> Result<Option<String>> {
        let mut args: Vec<String> = vec![
            "restore".into(),
            dir.to_string_lossy().into_owned(),
            key.to_string(),
        ];
        args.extend(restore_keys.iter().cloned());

        debug!(key, "Invoking cache client restore");
        let output = Command::new(&self.client)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SessionError::CacheRestore(format!("{}: {}", self.client, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SessionError::CacheRestore(stderr.trim().to_string()));
        }

        let matched = String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or("")
            .trim()
            .to_string();
        Ok(if matched.is_empty() { None } else { Some(matched) })
    }

    async fn save(&self, dir: &Path, key: &str) -> Result<()> {
        debug!(key, "Invoking cache client save");
        let dir_arg = dir.to_string_lossy().into_owned();
        let output = Command::new(&self.client)
            .args(["save", dir_arg.as_str(), key])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SessionError::CacheSave(format!("{}: {}", self.client, e)))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.to_lowercase().contains("already exists") {
            Err(SessionError::CacheConflict(stderr))
        } else {
            Err(SessionError::CacheSave(stderr))
        }
    }
}

/// Restore/save policy on top of a transport.
pub struct ArtifactCache {
    transport: Arc<dyn CacheTransport>,
}

impl ArtifactCache {
    pub fn new(transport: Arc<dyn CacheTransport>) -> Self {
        Self { transport }
    }

    /// Restore an entry before VM launch. On a reported miss that leaves
    /// the directory non-empty (partial extraction from a prior attempt),
    /// the directory is cleared and recreated so stale content never
    /// reaches the VM. Transport failures are logged, not raised.
    pub async fn restore(&self, entry: &mut CacheEntry) -> Result<Option<String>> {
        tokio::fs::create_dir_all(&entry.dir).await?;

        let restore_keys = vec![entry.key.clone()];
        let start = Instant::now();
        let outcome = self
            .transport
            .restore(&entry.dir, &entry.key, &restore_keys)
            .await;
        info!(elapsed_ms = start.elapsed().as_millis() as u64, "Cache restore finished");

        let matched = match outcome {
            Ok(matched) => matched,
            Err(e) => {
                warn!(key = %entry.key, error = %e, "Cache restore failed");
                None
            }
        };

        match matched {
            Some(matched) => {
                info!(key = %matched, "Cache restored");
                entry.restored = true;
                Ok(Some(matched))
            }
            None => {
                info!(key = %entry.key, "No cache hit");
                if dir_non_empty(&entry.dir).await? {
                    warn!(
                        dir = %entry.dir.display(),
                        "Cache directory non-empty after miss, clearing partial extraction"
                    );
                    tokio::fs::remove_dir_all(&entry.dir).await?;
                    tokio::fs::create_dir_all(&entry.dir).await?;
                }
                Ok(None)
            }
        }
    }

    /// Save an entry after the run. Skipped when it was freshly restored
    /// (redundant upload) or the directory is missing. An already-exists
    /// race is benign; all other failures are warnings.
    pub async fn save(&self, entry: &CacheEntry) {
        if entry.restored {
            info!(key = %entry.key, "Skip cache save (entry was restored)");
            return;
        }
        if !entry.dir.exists() {
            info!(key = %entry.key, "Skip cache save (directory missing)");
            return;
        }

        let start = Instant::now();
        match self.transport.save(&entry.dir, &entry.key).await {
            Ok(()) => {
                info!(
                    key = %entry.key,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Cache saved"
                );
            }
            Err(SessionError::CacheConflict(msg)) => {
                info!(key = %entry.key, "Cache save skipped, key already claimed: {}", msg);
            }
            Err(e) => {
                warn!(key = %entry.key, error = %e, "Cache save failed");
            }
        }
    }
}

async fn dir_non_empty(dir: &Path) -> Result<bool> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    Ok(entries.next_entry().await?.is_some())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tempfile::TempDir;

    use super::*;

    struct FakeTransport {
        restore_result: Option<String>,
        save_result: Mutex<Option<SessionError>>,
        saves: Mutex<Vec<String>>,
    }

    impl FakeTransport {
        fn hit(key: &str) -> Self {
            Self {
                restore_result: Some(key.to_string()),
                save_result: Mutex::new(None),
                saves: Mutex::new(Vec::new()),
            }
        }

        fn miss() -> Self {
            Self {
                restore_result: None,
                save_result: Mutex::new(None),
                saves: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CacheTransport for FakeTransport {
        async fn restore(&self, _: &Path, _: &str, _: &[String]) -> Result<Option<String>> {
            Ok(self.restore_result.clone())
        }

        async fn save(&self, _: &Path, key: &str) -> Result<()> {
            self.saves.lock().unwrap().push(key.to_string());
            match self.save_result.lock().unwrap().take() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }

    #[tokio::test]
    async fn test_restore_hit_sets_flag() {
        let dir = TempDir::new().unwrap();
        let cache = ArtifactCache::new(Arc::new(FakeTransport::hit("abc-v1")));
        let mut entry = CacheEntry::new("abc-v1", dir.path().join("cache"));

        let matched = cache.restore(&mut entry).await.unwrap();
        assert_eq!(matched.as_deref(), Some("abc-v1"));
        assert!(entry.restored);
    }

    #[tokio::test]
    async fn test_miss_with_partial_extraction_clears_dir() {
        let dir = TempDir::new().unwrap();
        let cache_dir = dir.path().join("cache");
        std::fs::create_dir_all(&cache_dir).unwrap();
        std::fs::write(cache_dir.join("truncated.img"), b"junk").unwrap();

        let cache = ArtifactCache::new(Arc::new(FakeTransport::miss()));
        let mut entry = CacheEntry::new("abc-v1", &cache_dir);

        let matched = cache.restore(&mut entry).await.unwrap();
        assert!(matched.is_none());
        assert!(!entry.restored);
        assert!(cache_dir.exists());
        assert_eq!(std::fs::read_dir(&cache_dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_save_skipped_when_restored() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(FakeTransport::miss());
        let cache = ArtifactCache::new(Arc::clone(&transport) as Arc<dyn CacheTransport>);

        let mut entry = CacheEntry::new("abc-v1", dir.path());
        entry.restored = true;
        cache.save(&entry).await;
        assert!(transport.saves.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_skipped_when_dir_missing() {
        let transport = Arc::new(FakeTransport::miss());
        let cache = ArtifactCache::new(Arc::clone(&transport) as Arc<dyn CacheTransport>);

        let entry = CacheEntry::new("abc-v1", "/nonexistent/cache/dir");
        cache.save(&entry).await;
        assert!(transport.saves.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_conflict_is_benign() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(FakeTransport::miss());
        *transport.save_result.lock().unwrap() =
            Some(SessionError::CacheConflict("abc-v1 already exists".into()));
        let cache = ArtifactCache::new(Arc::clone(&transport) as Arc<dyn CacheTransport>);

        let entry = CacheEntry::new("abc-v1", dir.path());
        // Must not panic or propagate; the session outcome is unaffected.
        cache.save(&entry).await;
        assert_eq!(transport.saves.lock().unwrap().len(), 1);
    }
}
