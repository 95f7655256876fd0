//! Configuration: release conf resolution, session inputs, runner settings.

mod inputs;
mod resolver;
mod settings;

pub use inputs::{normalize_arch, NatRule, SessionInputs, SyncStrategy};
pub use resolver::{expand_vars, parse_conf_str, ConfigResolver, ResolvedConfig};
pub use settings::{CacheConfig, LauncherConfig, PollConfig, RunnerConfig, SshConfig, SyncConfig};
