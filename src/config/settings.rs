use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{Result, SessionError};
use crate::poll::PollPlan;

/// Runner tunables, loaded from an optional `runner.toml` next to the
/// conf directory. Everything has a working default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub launcher: LauncherConfig,
    pub poll: PollConfig,
    pub cache: CacheConfig,
    pub ssh: SshConfig,
    pub sync: SyncConfig,
}

impl RunnerConfig {
    pub async fn load(dir: &Path) -> Result<Self> {
        let path = dir.join("runner.toml");
        let config = if path.exists() {
            let content = fs::read_to_string(&path).await?;
            toml::from_str(&content).map_err(|e| SessionError::Config(e.to_string()))?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.poll.recovery_max_attempts == 0 {
            errors.push("poll.recovery_max_attempts must be greater than 0");
        }
        if self.poll.ready_max_attempts == 0 {
            errors.push("poll.ready_max_attempts must be greater than 0");
        }
        if self.poll.probe_timeout_secs == 0 {
            errors.push("poll.probe_timeout_secs must be greater than 0");
        }
        if self.poll.continue_marker.is_empty() {
            errors.push("poll.continue_marker must not be empty");
        }
        if self.launcher.program.is_empty() {
            errors.push("launcher.program must not be empty");
        }
        if self.cache.schema_version.is_empty() {
            errors.push("cache.schema_version must not be empty");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SessionError::Config(errors.join("; ")))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Interpreter the launcher script runs under.
    pub program: String,
    /// Launcher script name, resolved relative to the conf directory's parent.
    pub script: String,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            program: "python3".into(),
            script: "anyvm.py".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub recovery_interval_secs: u64,
    pub recovery_max_attempts: u32,
    pub probe_timeout_secs: u64,
    pub ready_interval_secs: u64,
    pub ready_max_attempts: u32,
    /// Marker file an operator touches in the guest to resume after a
    /// debug-on-error pause.
    pub continue_marker: String,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            recovery_interval_secs: 5,
            recovery_max_attempts: 300,
            probe_timeout_secs: 3,
            ready_interval_secs: 5,
            ready_max_attempts: 60,
            continue_marker: "/tmp/.anyvm-continue".into(),
        }
    }
}

impl PollConfig {
    pub fn recovery_plan(&self) -> PollPlan {
        PollPlan::new(
            Duration::from_secs(self.recovery_interval_secs),
            Duration::from_secs(self.probe_timeout_secs),
            self.recovery_max_attempts,
        )
    }

    pub fn ready_plan(&self) -> PollPlan {
        PollPlan::new(
            Duration::from_secs(self.ready_interval_secs),
            Duration::from_secs(self.probe_timeout_secs),
            self.ready_max_attempts,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache key schema tag; bump to invalidate all existing entries.
    pub schema_version: String,
    /// External cache client program (restore/save subcommands).
    pub client: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            schema_version: "v1".into(),
            client: "anyvm-cache".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Transport options applied to every invocation. Host keys cannot be
    /// pre-known for an ephemeral VM, so checking is disabled.
    pub options: Vec<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            options: vec![
                "StrictHostKeyChecking=no".into(),
                "UserKnownHostsFile=/dev/null".into(),
                "ConnectTimeout=5".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Internal bookkeeping directories that must never cross the boundary.
    pub push_excludes: Vec<String>,
    /// Version-control metadata excluded on copyback.
    pub pull_excludes: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            push_excludes: vec!["_actions".into(), "_PipelineMapping".into()],
            pull_excludes: vec![".git".into()],
        }
    }
}
