//! Moving the job workspace into the guest and back out.

use std::sync::Arc;

use tracing::info;

use crate::bridge::{ExecOptions, GuestTransport, ProbeStatus};
use crate::config::{SyncConfig, SyncStrategy};
use crate::error::{Result, SessionError};
use crate::host::{succeeded, HostRunner};
use crate::session::SessionDescriptor;

pub struct WorkspaceSync {
    transport: Arc<dyn GuestTransport>,
    host: Arc<dyn HostRunner>,
    config: SyncConfig,
}

impl WorkspaceSync {
    pub fn new(
        transport: Arc<dyn GuestTransport>,
        host: Arc<dyn HostRunner>,
        config: SyncConfig,
    ) -> Self {
        Self {
            transport,
            host,
            config,
        }
    }

    /// Host→guest transfer before the prepare phase. Mount strategies are
    /// configured on the launcher command line and need no transfer here.
    pub async fn push(&self, descriptor: &SessionDescriptor) -> Result<()> {
        if !descriptor.sync.is_copy() {
            return Ok(());
        }

        if descriptor.sync == SyncStrategy::Rsync {
            if let Some(install) = descriptor.profile.rsync_install {
                info!("Installing rsync in guest");
                self.transport
                    .exec(install, ExecOptions::ignore_failure())
                    .await?;
            }
        }

        self.transport
            .exec(&format!("rm -rf {}", descriptor.guest_work), ExecOptions::default())
            .await?;
        self.transport
            .exec(&format!("mkdir -p {}", descriptor.guest_work), ExecOptions::default())
            .await?;

        match descriptor.sync {
            SyncStrategy::Rsync => self.push_rsync(descriptor).await?,
            SyncStrategy::Scp => self.push_scp(descriptor).await?,
            _ => unreachable!("push only runs for copy strategies"),
        }

        if descriptor.debug {
            self.transport
                .exec(
                    &format!("tree -L 2 {}", descriptor.guest_work),
                    ExecOptions::ignore_failure(),
                )
                .await?;
        }

        Ok(())
    }

    async fn push_rsync(&self, descriptor: &SessionDescriptor) -> Result<()> {
        info!("Syncing workspace via rsync");
        let args = rsync_push_args(descriptor, &self.config.push_excludes);
        let output = self.host.run("rsync", &args, false).await?;
        if !succeeded(&output) {
            return Err(SessionError::SyncTransfer(format!(
                "rsync push exited {:?}",
                output.status.code()
            )));
        }
        Ok(())
    }

    /// `scp` cannot reliably copy the whole tree in one shot, so each
    /// immediate child is transferred individually. One failed item fails
    /// the push; a silently partial workspace is unsafe to build on.
    async fn push_scp(&self, descriptor: &SessionDescriptor) -> Result<()> {
        info!("Syncing workspace via scp");

        let mut entries = tokio::fs::read_dir(&descriptor.host_work).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.config.push_excludes.iter().any(|e| *e == name) {
                continue;
            }

            let local = entry.path();
            info!(item = %local.display(), "Uploading");
            let args = scp_item_args(&local.to_string_lossy(), descriptor);
            let output = self.host.run("scp", &args, false).await?;
            if !succeeded(&output) {
                return Err(SessionError::SyncTransfer(format!(
                    "scp of {} exited {:?}",
                    local.display(),
                    output.status.code()
                )));
            }
        }
        Ok(())
    }

    /// Give scripts a conventional fixed path regardless of where the
    /// guest workspace really lives.
    pub async fn link_home(&self, descriptor: &SessionDescriptor) -> Result<()> {
        if descriptor.sync == SyncStrategy::None {
            return Ok(());
        }
        self.transport
            .exec(
                &format!("ln -s {} $HOME/work", descriptor.guest_work),
                ExecOptions::default(),
            )
            .await
    }

    /// Guest→host copyback after the run phase. Mount strategies already
    /// expose guest state live; nothing to pull.
    pub async fn pull(&self, descriptor: &SessionDescriptor) -> Result<()> {
        if !descriptor.copyback || !descriptor.sync.is_copy() {
            return Ok(());
        }
        info!("Copying workspace back to host");

        match descriptor.sync {
            SyncStrategy::Rsync => {
                let args = rsync_pull_args(descriptor, &self.config.pull_excludes);
                let output = self.host.run("rsync", &args, false).await?;
                if !succeeded(&output) {
                    return Err(SessionError::SyncTransfer(format!(
                        "rsync pull exited {:?}",
                        output.status.code()
                    )));
                }
                Ok(())
            }
            SyncStrategy::Scp => self.pull_scp(descriptor).await,
            _ => unreachable!("pull only runs for copy strategies"),
        }
    }

    /// Stream a guest-side archive straight into a local extractor; no
    /// intermediate file. `cpio` is preferred, `tar` the fallback when the
    /// guest lacks it.
    async fn pull_scp(&self, descriptor: &SessionDescriptor) -> Result<()> {
        let use_cpio = if descriptor.profile.probe_archiver {
            match self.transport.probe("command -v cpio").await? {
                ProbeStatus::Success => true,
                ProbeStatus::Failure => false,
                ProbeStatus::Unreachable => {
                    return Err(SessionError::VmUnreachable(
                        "guest unreachable while probing archiver".into(),
                    ))
                }
            }
        } else {
            true
        };

        let remote_cmd = archive_cmd(&descriptor.guest_work, &self.config.pull_excludes, use_cpio);
        self.transport
            .exec_to_local(
                &remote_cmd,
                "tar",
                &["-xf".into(), "-".into()],
                &descriptor.host_work,
            )
            .await
    }
}

pub fn rsync_push_args(descriptor: &SessionDescriptor, excludes: &[String]) -> Vec<String> {
    let mut args = vec!["-avrtopg".to_string()];
    for exclude in excludes {
        args.push("--exclude".into());
        args.push(exclude.clone());
    }
    args.push("-e".into());
    args.push("ssh".into());
    args.push(format!("{}/", descriptor.host_work.display()));
    args.push(format!("{}:{}/", descriptor.ssh_alias, descriptor.guest_work));
    args
}

pub fn rsync_pull_args(descriptor: &SessionDescriptor, excludes: &[String]) -> Vec<String> {
    let mut args = vec!["-av".to_string()];
    for exclude in excludes {
        args.push("--exclude".into());
        args.push(exclude.clone());
    }
    args.push("-e".into());
    args.push("ssh".into());
    args.push(format!("{}:{}/", descriptor.ssh_alias, descriptor.guest_work));
    args.push(format!("{}/", descriptor.host_work.display()));
    args
}

pub fn scp_item_args(local: &str, descriptor: &SessionDescriptor) -> Vec<String> {
    vec![
        "-O".into(),
        "-r".into(),
        "-p".into(),
        "-o".into(),
        "StrictHostKeyChecking=no".into(),
        local.into(),
        format!("{}:{}/", descriptor.ssh_alias, descriptor.guest_work),
    ]
}

pub fn archive_cmd(guest_work: &str, excludes: &[String], use_cpio: bool) -> String {
    if use_cpio {
        let prunes: String = excludes
            .iter()
            .map(|e| format!("-name {} -prune -o ", e))
            .collect();
        format!(
            "cd \"{}\" && find . {}-print | cpio -o -H ustar",
            guest_work, prunes
        )
    } else {
        let skips: String = excludes
            .iter()
            .map(|e| format!("--exclude {} ", e))
            .collect();
        format!("cd \"{}\" && tar -cf - {}.", guest_work, skips)
    }
}
