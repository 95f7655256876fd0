//! The immutable per-run plan and per-guest quirk data.

use std::path::{Path, PathBuf};

use crate::config::{ResolvedConfig, SessionInputs, SyncStrategy};
use crate::error::{Result, SessionError};

/// OS-specific quirks, kept as data rather than branches at call sites.
#[derive(Debug, Clone, Default)]
pub struct GuestProfile {
    /// Guest cannot receive env over the transport; the bridge prepends
    /// export lines to every script instead.
    pub inject_env: bool,
    /// Display adapter override passed to the launcher.
    pub vga: Option<&'static str>,
    /// Command to install rsync inside the guest before an rsync push.
    pub rsync_install: Option<&'static str>,
    /// Copyback must probe which archiver the guest actually has.
    pub probe_archiver: bool,
}

impl GuestProfile {
    pub fn for_os(os: &str) -> Self {
        match os {
            "haiku" => Self {
                inject_env: true,
                vga: Some("std"),
                rsync_install: None,
                probe_archiver: true,
            },
            os if os.contains("netbsd") => Self {
                rsync_install: Some("/usr/sbin/pkg_add rsync"),
                ..Self::default()
            },
            _ => Self::default(),
        }
    }
}

/// Immutable per-run plan, assembled once from inputs and resolved config.
#[derive(Debug, Clone)]
pub struct SessionDescriptor {
    pub os: String,
    pub release: String,
    /// Normalized; empty string means the implicit default architecture.
    pub arch: String,
    pub launcher_version: Option<String>,
    pub builder_version: Option<String>,
    pub sync: SyncStrategy,
    /// SSH host alias, equal to the OS identifier.
    pub ssh_alias: String,
    pub host_work: PathBuf,
    /// Absolute path of the job workspace as seen inside the guest.
    pub guest_work: String,
    pub profile: GuestProfile,
    pub debug: bool,
    pub debug_on_error: bool,
    pub copyback: bool,
}

impl SessionDescriptor {
    pub fn new(
        inputs: &SessionInputs,
        resolved: &ResolvedConfig,
        host_home: &Path,
        username: &str,
    ) -> Result<Self> {
        let host_work = host_home.join("work");
        let guest_work = if inputs.os_name == "haiku" {
            format!("/boot/home/{}/work", username)
        } else {
            host_work.to_string_lossy().into_owned()
        };
        if !guest_work.starts_with('/') {
            return Err(SessionError::Config(format!(
                "guest workspace must be absolute: {}",
                guest_work
            )));
        }

        Ok(Self {
            os: inputs.os_name.clone(),
            release: resolved.release.clone(),
            arch: inputs.arch.clone(),
            launcher_version: resolved.launcher_version.clone(),
            builder_version: resolved.builder_version.clone(),
            sync: inputs.sync,
            ssh_alias: inputs.os_name.clone(),
            host_work,
            guest_work,
            profile: GuestProfile::for_os(&inputs.os_name),
            debug: inputs.debug,
            debug_on_error: inputs.debug_on_error,
            copyback: inputs.copyback,
        })
    }

    /// Deterministic cache key:
    /// `<os>-<release>-<builderVersionOrDefault>-<archOrHostArch>-<schema>`.
    pub fn cache_key(&self, schema_version: &str) -> String {
        let builder = self.builder_version.as_deref().unwrap_or("default");
        let arch = if self.arch.is_empty() {
            host_arch()
        } else {
            self.arch.clone()
        };
        format!(
            "{}-{}-{}-{}-{}",
            self.os, self.release, builder, arch, schema_version
        )
    }
}

/// Host architecture tag used when no explicit arch was requested.
pub fn host_arch() -> String {
    match std::env::consts::ARCH {
        "x86_64" => "amd64".into(),
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::normalize_arch;

    fn inputs(os: &str) -> SessionInputs {
        SessionInputs {
            os_name: os.into(),
            ..Default::default()
        }
    }

    fn resolved(release: &str, builder: Option<&str>) -> ResolvedConfig {
        ResolvedConfig {
            release: release.into(),
            launcher_version: Some("0.2.0".into()),
            builder_version: builder.map(Into::into),
            values: Default::default(),
        }
    }

    #[test]
    fn test_cache_key_with_explicit_parts() {
        let mut inp = inputs("freebsd");
        inp.arch = normalize_arch("arm64");
        let desc = SessionDescriptor::new(
            &inp,
            &resolved("14.2", Some("1.1")),
            Path::new("/home/runner"),
            "runner",
        )
        .unwrap();
        assert_eq!(desc.cache_key("v1"), "freebsd-14.2-1.1-aarch64-v1");
    }

    #[test]
    fn test_cache_key_defaults() {
        let desc = SessionDescriptor::new(
            &inputs("linux"),
            &resolved("stable", None),
            Path::new("/home/runner"),
            "runner",
        )
        .unwrap();
        assert_eq!(
            desc.cache_key("v1"),
            format!("linux-stable-default-{}-v1", host_arch())
        );
    }

    #[test]
    fn test_haiku_guest_workspace_and_profile() {
        let desc = SessionDescriptor::new(
            &inputs("haiku"),
            &resolved("r1beta5", None),
            Path::new("/home/runner"),
            "runner",
        )
        .unwrap();
        assert_eq!(desc.guest_work, "/boot/home/runner/work");
        assert!(desc.profile.inject_env);
        assert_eq!(desc.profile.vga, Some("std"));
        assert!(desc.profile.probe_archiver);
    }

    #[test]
    fn test_netbsd_profile_installs_rsync() {
        let profile = GuestProfile::for_os("netbsd");
        assert_eq!(profile.rsync_install, Some("/usr/sbin/pkg_add rsync"));
        assert!(!profile.inject_env);
    }

    #[test]
    fn test_default_guest_workspace_mirrors_host() {
        let desc = SessionDescriptor::new(
            &inputs("openbsd"),
            &resolved("7.6", None),
            Path::new("/home/runner"),
            "runner",
        )
        .unwrap();
        assert_eq!(desc.guest_work, "/home/runner/work");
        assert_eq!(desc.ssh_alias, "openbsd");
    }
}
