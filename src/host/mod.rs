//! Host-side tool execution (launcher, rsync, scp).

use std::path::Path;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::Result;

#[async_trait]
pub trait HostRunner: Send + Sync {
    /// Run a host tool to completion. Exit status is reported to the
    /// caller, not interpreted here; spawn failures are errors.
    async fn run(&self, program: &str, args: &[String], silent: bool) -> Result<Output>;
}

/// Production runner over `tokio::process`.
pub struct ToolRunner;

#[async_trait]
impl HostRunner for ToolRunner {
    async fn run(&self, program: &str, args: &[String], silent: bool) -> Result<Output> {
        debug!(program, args = ?args, "Running host tool");

        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::null());
        if !silent {
            // Let tool output flow to the job log; capture only the exit.
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }
        let output = cmd.output().await?;

        if !output.status.success() {
            warn!(program, code = ?output.status.code(), "Host tool exited non-zero");
        }

        Ok(output)
    }
}

/// True when the child both spawned and exited successfully.
pub fn succeeded(output: &Output) -> bool {
    output.status.success()
}

/// Best-effort chmod used before syncing out of `$HOME`.
pub async fn chmod(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(mode);
        tokio::fs::set_permissions(path, perms).await?;
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
    Ok(())
}
