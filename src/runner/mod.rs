//! The prepare/run phases and the debug-on-error recovery loop.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::bridge::{ExecOptions, GuestTransport, ProbeStatus};
use crate::config::PollConfig;
use crate::error::{Result, SessionError};
use crate::poll::{poll_until, Probe};

/// One user-supplied script phase.
#[derive(Debug, Clone)]
pub struct CommandPhase {
    pub name: &'static str,
    pub script: String,
    /// Prefix a `cd` into the job workspace so relative paths resolve.
    pub cd_workspace: bool,
}

impl CommandPhase {
    pub fn prepare(script: &str, cd_workspace: bool) -> Self {
        Self {
            name: "prepare",
            script: script.to_string(),
            cd_workspace,
        }
    }

    pub fn run(script: &str, cd_workspace: bool) -> Self {
        Self {
            name: "run",
            script: script.to_string(),
            cd_workspace,
        }
    }

    fn full_script(&self) -> String {
        if self.cd_workspace {
            format!("cd \"$GITHUB_WORKSPACE\"\n{}", self.script)
        } else {
            self.script.clone()
        }
    }
}

pub struct CommandRunner {
    transport: Arc<dyn GuestTransport>,
    poll: PollConfig,
    debug_on_error: bool,
}

impl CommandRunner {
    pub fn new(transport: Arc<dyn GuestTransport>, poll: PollConfig, debug_on_error: bool) -> Self {
        Self {
            transport,
            poll,
            debug_on_error,
        }
    }

    /// Execute one phase. An empty script is skipped. On failure with
    /// debug-on-error requested the error is suppressed and the session
    /// pauses until an operator signals completion from inside the guest.
    pub async fn run_phase(&self, phase: &CommandPhase, vnc_file: Option<&Path>) -> Result<()> {
        if phase.script.is_empty() {
            info!(phase = phase.name, "Phase empty, skipping");
            return Ok(());
        }

        info!(phase = phase.name, "Running phase in guest");
        match self
            .transport
            .exec(&phase.full_script(), ExecOptions::default())
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if self.debug_on_error => {
                warn!(phase = phase.name, error = %e, "Phase failed, entering debug wait");
                self.announce_display_link(vnc_file).await;
                self.wait_for_operator().await
            }
            Err(e) => Err(e),
        }
    }

    async fn announce_display_link(&self, vnc_file: Option<&Path>) {
        let Some(vnc_file) = vnc_file else {
            return;
        };
        match tokio::fs::read_to_string(vnc_file).await {
            Ok(link) => info!("Attach a VNC session to debug: {}", link.trim()),
            Err(_) => warn!(path = %vnc_file.display(), "No display link recorded by launcher"),
        }
    }

    /// Poll the guest for the continue marker. Marker present → clean it
    /// up and resume; transport alive but no marker → keep waiting;
    /// transport dead → the VM is gone and the session fails.
    async fn wait_for_operator(&self) -> Result<()> {
        let marker = self.poll.continue_marker.clone();
        info!(
            marker = %marker,
            "Waiting for operator; touch the marker file in the guest to resume"
        );

        let probe_cmd = format!("test -f {}", marker);
        let transport = Arc::clone(&self.transport);
        poll_until(self.poll.recovery_plan(), "debug recovery", || {
            let transport = Arc::clone(&transport);
            let probe_cmd = probe_cmd.clone();
            async move {
                match transport.probe(&probe_cmd).await {
                    Ok(ProbeStatus::Success) => Ok(Probe::Ready),
                    Ok(ProbeStatus::Failure) => Ok(Probe::NotYet),
                    Ok(ProbeStatus::Unreachable) => Err(SessionError::VmUnreachable(
                        "transport lost during debug wait".into(),
                    )),
                    Err(e @ SessionError::VmUnreachable(_)) => Err(e),
                    // A transport that cannot even launch a probe is as
                    // gone as one that refuses connections.
                    Err(e) => Err(SessionError::VmUnreachable(e.to_string())),
                }
            }
        })
        .await?;

        self.transport
            .exec(&format!("rm -f {}", marker), ExecOptions::ignore_failure())
            .await?;
        info!("Operator signalled completion, resuming");
        Ok(())
    }
}

/// Post-launch transport readiness wait. Unlike the debug-recovery loop,
/// an unreachable transport just means the guest is still booting.
pub async fn wait_ready(
    transport: &Arc<dyn GuestTransport>,
    poll: &PollConfig,
) -> Result<()> {
    let transport = Arc::clone(transport);
    poll_until(poll.ready_plan(), "guest transport", || {
        let transport = Arc::clone(&transport);
        async move {
            match transport.probe("true").await? {
                ProbeStatus::Success => Ok(Probe::Ready),
                ProbeStatus::Failure | ProbeStatus::Unreachable => Ok(Probe::NotYet),
            }
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cd_prefix_applied_when_synced() {
        let phase = CommandPhase::prepare("echo hi", true);
        assert_eq!(phase.full_script(), "cd \"$GITHUB_WORKSPACE\"\necho hi");
    }

    #[test]
    fn test_no_cd_prefix_without_sync() {
        let phase = CommandPhase::run("echo done", false);
        assert_eq!(phase.full_script(), "echo done");
    }
}
