//! Remote shell transport into the guest, plus environment bridging.
//!
//! Scripts are delivered on the transport's stdin to an interactive `sh`,
//! never as a command-line argument, so multi-line scripts with quotes and
//! guest-side `$VAR` expansions need no escaping.

mod env;

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Result, SessionError};

pub use env::{EnvBridge, EnvPattern, PathRewrite};

#[derive(Debug, Clone, Copy, Default)]
pub struct ExecOptions {
    /// Swallow a non-zero remote exit instead of failing.
    pub ignore_failure: bool,
    /// Suppress remote stdout/stderr in the job log.
    pub silent: bool,
}

impl ExecOptions {
    pub fn ignore_failure() -> Self {
        Self {
            ignore_failure: true,
            ..Self::default()
        }
    }
}

/// Result of a single reachability probe against the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    /// Probe command succeeded in the guest.
    Success,
    /// Transport connected but the probe command exited non-zero.
    Failure,
    /// Transport-level failure; the VM is not reachable.
    Unreachable,
}

#[async_trait]
pub trait GuestTransport: Send + Sync {
    /// Execute a script in the guest via `sh` reading stdin.
    async fn exec(&self, script: &str, opts: ExecOptions) -> Result<()>;

    /// Run a short command and classify the outcome for polling.
    async fn probe(&self, command: &str) -> Result<ProbeStatus>;

    /// Stream a guest command's stdout into a local program's stdin.
    async fn exec_to_local(
        &self,
        remote_cmd: &str,
        program: &str,
        args: &[String],
        cwd: &Path,
    ) -> Result<()>;
}

/// Production bridge over the `ssh` client.
pub struct SessionBridge {
    alias: String,
    options: Vec<String>,
    env_bridge: EnvBridge,
    /// Guest needs explicit `export` injection instead of SendEnv.
    inject_env: bool,
}

impl SessionBridge {
    pub fn new(alias: &str, options: &[String], env_bridge: EnvBridge, inject_env: bool) -> Self {
        Self {
            alias: alias.to_string(),
            options: options.to_vec(),
            env_bridge,
            inject_env,
        }
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.options.len() * 2 + 2);
        for opt in &self.options {
            args.push("-o".into());
            args.push(opt.clone());
        }
        args
    }

    /// Append env-forwarding rules and the relaxed host-key rule to the
    /// host's ssh client config. Done once per session.
    pub async fn write_ssh_config(&self, home: &Path) -> Result<PathBuf> {
        let ssh_dir = home.join(".ssh");
        tokio::fs::create_dir_all(&ssh_dir).await?;
        let config_path = ssh_dir.join("config");

        let mut entry = String::new();
        let send_envs = self.env_bridge.send_env_names(self.inject_env);
        if !send_envs.is_empty() {
            entry.push_str(&format!(
                "Host {}\n  SendEnv {}\n",
                self.alias,
                send_envs.join(" ")
            ));
        }
        entry.push_str("Host *\n  StrictHostKeyChecking no\n");

        let existing = tokio::fs::read_to_string(&config_path)
            .await
            .unwrap_or_default();
        tokio::fs::write(&config_path, existing + &entry).await?;
        debug!(path = %config_path.display(), "Wrote ssh client config");

        Ok(config_path)
    }

    /// Write a `~/.local/bin/<alias>` wrapper so job steps can use the
    /// guest as a custom shell.
    pub async fn write_shell_wrapper(&self, home: &Path) -> Result<PathBuf> {
        let bin_dir = home.join(".local").join("bin");
        tokio::fs::create_dir_all(&bin_dir).await?;
        let wrapper = bin_dir.join(&self.alias);

        let content = format!("#!/usr/bin/env sh\n\nssh {} sh<$1\n", self.alias);
        tokio::fs::write(&wrapper, content).await?;
        crate::host::chmod(&wrapper, 0o755).await?;

        Ok(wrapper)
    }

    fn full_script(&self, script: &str) -> String {
        if self.inject_env {
            let exports = self.env_bridge.export_lines(std::env::vars());
            format!("{}{}", exports, script)
        } else {
            script.to_string()
        }
    }
}

#[async_trait]
impl GuestTransport for SessionBridge {
    async fn exec(&self, script: &str, opts: ExecOptions) -> Result<()> {
        info!(host = %self.alias, "Exec SSH: {}", script);

        let mut args = self.base_args();
        args.push(self.alias.clone());
        args.push("sh".into());

        let mut cmd = Command::new("ssh");
        cmd.args(&args).stdin(Stdio::piped());
        if opts.silent {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let mut child = cmd.spawn()?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SessionError::Other("ssh stdin unavailable".into()))?;
        stdin.write_all(self.full_script(script).as_bytes()).await?;
        drop(stdin);

        let status = child.wait().await?;
        if !status.success() && !opts.ignore_failure {
            return Err(SessionError::RemoteCommand {
                command: script.to_string(),
                code: status.code(),
            });
        }
        Ok(())
    }

    async fn probe(&self, command: &str) -> Result<ProbeStatus> {
        let mut args = self.base_args();
        args.push(self.alias.clone());
        args.push(command.to_string());

        // Poll loops cancel a hung probe by dropping this future; the
        // client must die with it, not linger against a dead transport.
        let output = Command::new("ssh")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        // ssh reserves 255 for transport-level failures.
        Ok(match output.status.code() {
            Some(0) => ProbeStatus::Success,
            Some(255) | None => ProbeStatus::Unreachable,
            Some(_) => ProbeStatus::Failure,
        })
    }

    async fn exec_to_local(
        &self,
        remote_cmd: &str,
        program: &str,
        args: &[String],
        cwd: &Path,
    ) -> Result<()> {
        info!(host = %self.alias, "Exec SSH: {}", remote_cmd);

        let mut ssh_args = self.base_args();
        ssh_args.push(self.alias.clone());
        ssh_args.push(remote_cmd.to_string());

        let mut ssh = Command::new("ssh")
            .args(&ssh_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()?;
        let ssh_out = ssh
            .stdout
            .take()
            .ok_or_else(|| SessionError::Other("ssh stdout unavailable".into()))?;

        let stdio: Stdio = ssh_out
            .try_into()
            .map_err(|_| SessionError::Other("failed to wire ssh stdout".into()))?;
        let mut local = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(stdio)
            .spawn()?;

        let (ssh_status, local_status) = tokio::join!(ssh.wait(), local.wait());
        let ssh_status = ssh_status?;
        let local_status = local_status?;

        if !ssh_status.success() {
            return Err(SessionError::SyncTransfer(format!(
                "remote archive command exited {:?}: {}",
                ssh_status.code(),
                remote_cmd
            )));
        }
        if !local_status.success() {
            return Err(SessionError::SyncTransfer(format!(
                "{} exited {:?} while extracting copyback stream",
                program,
                local_status.code()
            )));
        }
        Ok(())
    }
}
