use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::bridge::{EnvBridge, ExecOptions, GuestTransport, PathRewrite, SessionBridge};
use crate::cache::{ArtifactCache, CacheEntry, CacheTransport, ProcessCacheTransport};
use crate::config::{
    expand_vars, ConfigResolver, RunnerConfig, SessionInputs, SyncStrategy,
};
use crate::error::{Result, SessionError};
use crate::host::{chmod, succeeded, HostRunner, ToolRunner};
use crate::launcher::{cache_dir_supported, LaunchPaths, LauncherInvocation};
use crate::runner::{wait_ready, CommandPhase, CommandRunner};
use crate::session::SessionDescriptor;
use crate::sync::WorkspaceSync;
use crate::tasks::BackgroundTaskCoordinator;

/// Where the orchestrator lives on the host.
#[derive(Debug, Clone)]
pub struct HostContext {
    pub home: PathBuf,
    pub username: String,
    /// Directory holding `conf/`, the launcher script, and `hooks/`.
    pub action_dir: PathBuf,
}

impl HostContext {
    pub fn detect(action_dir: Option<PathBuf>) -> Result<Self> {
        let home = std::env::var("HOME")
            .map(PathBuf::from)
            .map_err(|_| SessionError::Config("HOME is not set".into()))?;
        let username = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "runner".into());
        let action_dir = match action_dir {
            Some(dir) => dir,
            None => std::env::current_exe()?
                .parent()
                .ok_or_else(|| SessionError::Config("cannot locate action directory".into()))?
                .to_path_buf(),
        };
        Ok(Self {
            home,
            username,
            action_dir,
        })
    }
}

pub struct SessionOrchestrator {
    inputs: SessionInputs,
    config: RunnerConfig,
    host: HostContext,
    host_runner: Arc<dyn HostRunner>,
    cache_transport: Arc<dyn CacheTransport>,
    /// Test seam; production builds the ssh bridge once the descriptor
    /// is known.
    transport_override: Option<Arc<dyn GuestTransport>>,
}

impl SessionOrchestrator {
    pub fn new(inputs: SessionInputs, config: RunnerConfig, host: HostContext) -> Self {
        let cache_client = config.cache.client.clone();
        Self {
            inputs,
            config,
            host,
            host_runner: Arc::new(ToolRunner),
            cache_transport: Arc::new(ProcessCacheTransport::new(cache_client)),
            transport_override: None,
        }
    }

    pub fn with_collaborators(
        inputs: SessionInputs,
        config: RunnerConfig,
        host: HostContext,
        host_runner: Arc<dyn HostRunner>,
        cache_transport: Arc<dyn CacheTransport>,
        transport: Arc<dyn GuestTransport>,
    ) -> Self {
        Self {
            inputs,
            config,
            host,
            host_runner,
            cache_transport,
            transport_override: Some(transport),
        }
    }

    /// Run the whole session. Background tasks are drained on every exit
    /// path; the primary outcome is preserved across the drain.
    pub async fn run(&self) -> Result<()> {
        let resolver = ConfigResolver::new(self.host.action_dir.join("conf"));
        let resolved = resolver
            .resolve(&self.inputs.release, &self.inputs.arch)
            .await?;
        info!(
            os = %self.inputs.os_name,
            release = %resolved.release,
            launcher_version = resolved.launcher_version.as_deref().unwrap_or("unknown"),
            builder_version = resolved.builder_version.as_deref().unwrap_or("default"),
            "Resolved session plan"
        );

        let descriptor = SessionDescriptor::new(
            &self.inputs,
            &resolved,
            &self.host.home,
            &self.host.username,
        )?;

        let host_env: HashMap<String, String> = std::env::vars().collect();
        let data_dir = if self.inputs.data_dir.is_empty() {
            self.host.action_dir.join("output")
        } else {
            PathBuf::from(expand_vars(&self.inputs.data_dir, &host_env))
        };
        tokio::fs::create_dir_all(&data_dir).await?;

        // Cache restore is folded into the launcher's flag vector: the
        // restored directory is handed over via --cache-dir.
        let cache = ArtifactCache::new(Arc::clone(&self.cache_transport));
        let cache_supported =
            cache_dir_supported(descriptor.launcher_version.as_deref()) && !self.inputs.disable_cache;
        let cache_entry = if cache_supported {
            let key = descriptor.cache_key(&self.config.cache.schema_version);
            let dir = if self.inputs.cache_dir.is_empty() {
                std::env::temp_dir().join(&key)
            } else {
                PathBuf::from(expand_vars(&self.inputs.cache_dir, &host_env))
            };
            let mut entry = CacheEntry::new(key, dir);
            cache.restore(&mut entry).await?;
            Some(entry)
        } else {
            info!(
                version = descriptor.launcher_version.as_deref().unwrap_or(""),
                "Launcher does not support a cache dir, skipping cache"
            );
            None
        };

        let paths = LaunchPaths {
            script: self.host.action_dir.join(&self.config.launcher.script),
            data_dir: data_dir.clone(),
            cache_dir: cache_entry.as_ref().map(|e| e.dir.clone()),
            vnc_file: descriptor
                .debug_on_error
                .then(|| data_dir.join("vnc-link.txt")),
        };

        // Transfer tools and guest-side mounts both traverse $HOME, and a
        // mount is live as soon as the launcher returns, so the home must
        // be opened up before the VM starts.
        if descriptor.sync != SyncStrategy::None {
            if let Err(e) = chmod(&self.host.home, 0o755).await {
                warn!(home = %self.host.home.display(), error = %e, "Failed to chmod home");
            }
        }

        self.launch_vm(&descriptor, &paths).await?;

        // Save runs concurrently with sync and the command phases; the
        // drain at the end is the only await point for it.
        let mut coordinator = BackgroundTaskCoordinator::new();
        if let Some(entry) = cache_entry {
            if descriptor.debug {
                self.preview_cache_dir(&entry.dir).await;
            }
            coordinator.spawn("cache-save", async move {
                cache.save(&entry).await;
            });
        }

        let result = self.run_session(&descriptor, &paths).await;
        coordinator.drain().await;
        result
    }

    async fn launch_vm(&self, descriptor: &SessionDescriptor, paths: &LaunchPaths) -> Result<()> {
        let invocation = LauncherInvocation::build(
            &self.config.launcher.program,
            descriptor,
            &self.inputs,
            paths,
        );
        info!(program = %invocation.program, args = ?invocation.args, "Starting VM");

        let output = self
            .host_runner
            .run(&invocation.program, &invocation.args, false)
            .await?;
        if !succeeded(&output) {
            return Err(SessionError::Launcher(
                format!("{} {}", invocation.program, invocation.args.join(" ")),
                output.status.code(),
            ));
        }
        info!("VM started");
        Ok(())
    }

    /// Best-effort cache directory listing for debugging; never escalates.
    async fn preview_cache_dir(&self, dir: &Path) {
        let dir = dir.to_string_lossy().into_owned();
        for (program, args) in [
            ("du", vec!["-sh".to_string(), dir.clone()]),
            (
                "find",
                vec![dir, "-maxdepth".into(), "5".into(), "-type".into(), "f".into()],
            ),
        ] {
            if let Err(e) = self.host_runner.run(program, &args, false).await {
                warn!(program, error = %e, "Cache dir preview failed");
            }
        }
    }

    fn build_transport(&self, descriptor: &SessionDescriptor) -> Arc<dyn GuestTransport> {
        if let Some(transport) = &self.transport_override {
            return Arc::clone(transport);
        }

        let rewrite = descriptor.profile.inject_env.then(|| {
            PathRewrite::new(
                &descriptor.host_work.to_string_lossy(),
                &descriptor.guest_work,
            )
        });
        let env_bridge = EnvBridge::standard(&self.inputs.envs, rewrite);
        Arc::new(SessionBridge::new(
            &descriptor.ssh_alias,
            &self.config.ssh.options,
            env_bridge,
            descriptor.profile.inject_env,
        ))
    }

    async fn run_session(&self, descriptor: &SessionDescriptor, paths: &LaunchPaths) -> Result<()> {
        let transport = self.build_transport(descriptor);

        if self.transport_override.is_none() {
            // Persisted transport config: SendEnv rules for the alias plus
            // the relaxed host-key rule, and the custom-shell wrapper.
            let bridge = SessionBridge::new(
                &descriptor.ssh_alias,
                &self.config.ssh.options,
                EnvBridge::standard(&self.inputs.envs, None),
                descriptor.profile.inject_env,
            );
            let config_path = bridge.write_ssh_config(&self.host.home).await?;
            if descriptor.debug {
                let content = tokio::fs::read_to_string(&config_path).await.unwrap_or_default();
                info!("SSH config content:\n{}", content);
            }
            bridge.write_shell_wrapper(&self.host.home).await?;
        }

        wait_ready(&transport, &self.config.poll).await?;

        self.run_started_hook(&transport).await?;

        let sync = WorkspaceSync::new(
            Arc::clone(&transport),
            Arc::clone(&self.host_runner),
            self.config.sync.clone(),
        );
        sync.push(descriptor).await?;
        sync.link_home(descriptor).await?;

        let cd_workspace = descriptor.sync != SyncStrategy::None;
        let runner = CommandRunner::new(
            Arc::clone(&transport),
            self.config.poll.clone(),
            descriptor.debug_on_error,
        );
        let vnc_file = paths.vnc_file.as_deref();
        runner
            .run_phase(&CommandPhase::prepare(&self.inputs.prepare, cd_workspace), vnc_file)
            .await?;
        runner
            .run_phase(&CommandPhase::run(&self.inputs.run, cd_workspace), vnc_file)
            .await?;

        sync.pull(descriptor).await?;
        Ok(())
    }

    async fn run_started_hook(&self, transport: &Arc<dyn GuestTransport>) -> Result<()> {
        let hook = self.host.action_dir.join("hooks").join("on_started.sh");
        if !hook.exists() {
            return Ok(());
        }
        info!(hook = %hook.display(), "Running on-started hook");
        let content = tokio::fs::read_to_string(&hook).await?;
        transport
            .exec(
                &content,
                ExecOptions {
                    ignore_failure: false,
                    silent: !self.inputs.debug,
                },
            )
            .await
    }
}
