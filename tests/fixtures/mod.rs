#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::process::Output;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use anyvm_runner::bridge::{ExecOptions, GuestTransport, ProbeStatus};
use anyvm_runner::cache::CacheTransport;
use anyvm_runner::error::{Result, SessionError};
use anyvm_runner::host::HostRunner;

fn exit_status(code: i32) -> std::process::ExitStatus {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        std::process::ExitStatus::from_raw(code << 8)
    }
    #[cfg(not(unix))]
    {
        use std::os::windows::process::ExitStatusExt;
        std::process::ExitStatus::from_raw(code as u32)
    }
}

/// Recording guest transport with scripted probe outcomes.
#[derive(Default)]
pub struct FakeTransport {
    pub execs: Mutex<Vec<String>>,
    /// Scripts containing any of these substrings fail with a remote error.
    pub exec_failures: Mutex<Vec<String>>,
    pub probes: Mutex<Vec<String>>,
    /// Outcomes popped per probe; empty means `Success`.
    pub probe_script: Mutex<VecDeque<ProbeStatus>>,
    /// Error returned by the next probe, taking priority over outcomes.
    pub probe_error: Mutex<Option<SessionError>>,
    pub piped: Mutex<Vec<(String, String)>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_scripts_containing(&self, needle: &str) {
        self.exec_failures.lock().unwrap().push(needle.to_string());
    }

    pub fn script_probes(&self, outcomes: impl IntoIterator<Item = ProbeStatus>) {
        self.probe_script.lock().unwrap().extend(outcomes);
    }

    pub fn fail_next_probe(&self, error: SessionError) {
        *self.probe_error.lock().unwrap() = Some(error);
    }

    pub fn exec_log(&self) -> Vec<String> {
        self.execs.lock().unwrap().clone()
    }

    pub fn probe_log(&self) -> Vec<String> {
        self.probes.lock().unwrap().clone()
    }
}

#[async_trait]
impl GuestTransport for FakeTransport {
    async fn exec(&self, script: &str, opts: ExecOptions) -> Result<()> {
        self.execs.lock().unwrap().push(script.to_string());

        let fails = self
            .exec_failures
            .lock()
            .unwrap()
            .iter()
            .any(|needle| script.contains(needle.as_str()));
        if fails && !opts.ignore_failure {
            return Err(SessionError::RemoteCommand {
                command: script.to_string(),
                code: Some(1),
            });
        }
        Ok(())
    }

    async fn probe(&self, command: &str) -> Result<ProbeStatus> {
        self.probes.lock().unwrap().push(command.to_string());
        if let Some(error) = self.probe_error.lock().unwrap().take() {
            return Err(error);
        }
        Ok(self
            .probe_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ProbeStatus::Success))
    }

    async fn exec_to_local(
        &self,
        remote_cmd: &str,
        program: &str,
        _args: &[String],
        _cwd: &Path,
    ) -> Result<()> {
        self.piped
            .lock()
            .unwrap()
            .push((remote_cmd.to_string(), program.to_string()));
        Ok(())
    }
}

/// Recording host runner; programs can be marked as failing.
#[derive(Default)]
pub struct FakeHostRunner {
    pub calls: Mutex<Vec<(String, Vec<String>)>>,
    pub failing_programs: Mutex<Vec<String>>,
}

impl FakeHostRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_program(&self, program: &str) {
        self.failing_programs
            .lock()
            .unwrap()
            .push(program.to_string());
    }

    pub fn call_log(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, program: &str) -> Vec<Vec<String>> {
        self.call_log()
            .into_iter()
            .filter(|(p, _)| p == program)
            .map(|(_, args)| args)
            .collect()
    }
}

#[async_trait]
impl HostRunner for FakeHostRunner {
    async fn run(&self, program: &str, args: &[String], _silent: bool) -> Result<Output> {
        self.calls
            .lock()
            .unwrap()
            .push((program.to_string(), args.to_vec()));

        let code = if self
            .failing_programs
            .lock()
            .unwrap()
            .iter()
            .any(|p| p == program)
        {
            1
        } else {
            0
        };
        Ok(Output {
            status: exit_status(code),
            stdout: Vec::new(),
            stderr: Vec::new(),
        })
    }
}

/// In-memory cache transport; saves can be slowed down or made to fail to
/// exercise the background drain.
#[derive(Default)]
pub struct FakeCacheTransport {
    pub restore_hit: Option<String>,
    pub save_delay: Option<Duration>,
    pub save_fails: bool,
    pub saves: Mutex<Vec<String>>,
}

impl FakeCacheTransport {
    pub fn miss() -> Self {
        Self::default()
    }

    pub fn saved_keys(&self) -> Vec<String> {
        self.saves.lock().unwrap().clone()
    }
}

#[async_trait]
impl CacheTransport for FakeCacheTransport {
    async fn restore(&self, _: &Path, _: &str, _: &[String]) -> Result<Option<String>> {
        Ok(self.restore_hit.clone())
    }

    async fn save(&self, _: &Path, key: &str) -> Result<()> {
        if let Some(delay) = self.save_delay {
            tokio::time::sleep(delay).await;
        }
        // Record after the delay so callers can prove they waited.
        self.saves.lock().unwrap().push(key.to_string());
        if self.save_fails {
            return Err(SessionError::CacheSave("upload failed".into()));
        }
        Ok(())
    }
}
