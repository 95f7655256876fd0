use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Config not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cache restore failed: {0}")]
    CacheRestore(String),

    #[error("Cache save failed: {0}")]
    CacheSave(String),

    /// Benign race: another job claimed the same cache key first.
    #[error("Cache entry already exists: {0}")]
    CacheConflict(String),

    #[error("Remote command failed (exit {code:?}): {command}")]
    RemoteCommand { command: String, code: Option<i32> },

    #[error("VM unreachable: {0}")]
    VmUnreachable(String),

    #[error("Sync transfer failed: {0}")]
    SyncTransfer(String),

    #[error("Launcher failed (exit {1:?}): {0}")]
    Launcher(String, Option<i32>),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl SessionError {
    /// Cache failures are strictly an optimization; callers log and move on.
    pub fn is_cache_error(&self) -> bool {
        matches!(
            self,
            Self::CacheRestore(_) | Self::CacheSave(_) | Self::CacheConflict(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
