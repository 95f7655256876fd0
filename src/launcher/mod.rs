//! Flag-vector interface to the external VM launcher tool.

use std::path::PathBuf;

use crate::config::SessionInputs;
use crate::session::SessionDescriptor;

/// Whether the launcher accepts `--cache-dir` (added in 0.1.4).
/// The patch component may carry a suffix; leading digits win.
pub fn cache_dir_supported(version: Option<&str>) -> bool {
    let Some(version) = version else {
        return false;
    };
    if version.is_empty() {
        return false;
    }

    let mut parts = version.split('.');
    let mut next = || -> u32 {
        parts
            .next()
            .map(leading_digits)
            .unwrap_or(0)
    };
    let (major, minor, patch) = (next(), next(), next());

    major > 0 || minor > 1 || (minor == 1 && patch >= 4)
}

fn leading_digits(s: &str) -> u32 {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

/// Host-side paths the launcher needs.
#[derive(Debug, Clone)]
pub struct LaunchPaths {
    pub script: PathBuf,
    pub data_dir: PathBuf,
    pub cache_dir: Option<PathBuf>,
    /// Where the launcher writes the remote display link (debug-on-error).
    pub vnc_file: Option<PathBuf>,
}

/// A fully assembled launcher command line. The launcher call is a
/// foreground run that returns once the VM is backgrounded and booted;
/// stdout is captured only for diagnostics.
#[derive(Debug, Clone)]
pub struct LauncherInvocation {
    pub program: String,
    pub args: Vec<String>,
}

impl LauncherInvocation {
    pub fn build(
        program: &str,
        descriptor: &SessionDescriptor,
        inputs: &SessionInputs,
        paths: &LaunchPaths,
    ) -> Self {
        let mut args: Vec<String> = vec![
            paths.script.to_string_lossy().into_owned(),
            "--os".into(),
            descriptor.os.clone(),
            "--release".into(),
            descriptor.release.clone(),
        ];

        if !descriptor.arch.is_empty() {
            args.push("--arch".into());
            args.push(descriptor.arch.clone());
        }

        args.push("--data-dir".into());
        args.push(paths.data_dir.to_string_lossy().into_owned());

        if let Some(cache_dir) = &paths.cache_dir {
            args.push("--cache-dir".into());
            args.push(cache_dir.to_string_lossy().into_owned());
        }

        if let Some(builder) = &descriptor.builder_version {
            args.push("--builder".into());
            args.push(builder.clone());
        }

        match inputs.sync_time {
            Some(true) => args.push("--sync-time".into()),
            Some(false) => {
                args.push("--sync-time".into());
                args.push("off".into());
            }
            None => {}
        }

        if descriptor.debug {
            args.push("--debug".into());
        }
        if !inputs.cpu.is_empty() {
            args.push("--cpu".into());
            args.push(inputs.cpu.clone());
        }
        if !inputs.mem.is_empty() {
            args.push("--mem".into());
            args.push(inputs.mem.clone());
        }
        for rule in &inputs.nat {
            args.push("-p".into());
            args.push(rule.token());
        }

        // Mount strategies are the launcher's job; copy strategies sync
        // over ssh after boot.
        if descriptor.sync.is_mount() {
            args.push("--sync".into());
            args.push(descriptor.sync.as_str().into());
            args.push("-v".into());
            args.push(format!(
                "{}:{}",
                descriptor.host_work.display(),
                descriptor.guest_work
            ));
        }

        args.push("-d".into());
        args.push("--ssh-name".into());
        args.push(descriptor.ssh_alias.clone());
        args.push("--snapshot".into());

        if let Some(vga) = descriptor.profile.vga {
            args.push("--vga".into());
            args.push(vga.into());
        }

        match &paths.vnc_file {
            Some(vnc_file) => {
                args.push("--vnc".into());
                args.push("on".into());
                args.push("--vnc-file".into());
                args.push(vnc_file.to_string_lossy().into_owned());
            }
            None => {
                args.push("--vnc".into());
                args.push("off".into());
            }
        }

        Self {
            program: program.to_string(),
            args,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::config::{NatRule, ResolvedConfig, SessionInputs, SyncStrategy};

    #[test]
    fn test_cache_dir_support_matrix() {
        assert!(!cache_dir_supported(None));
        assert!(!cache_dir_supported(Some("")));
        assert!(!cache_dir_supported(Some("0.1.3")));
        assert!(cache_dir_supported(Some("0.1.4")));
        assert!(cache_dir_supported(Some("0.2.0")));
        assert!(cache_dir_supported(Some("1.0.0")));
        assert!(cache_dir_supported(Some("0.1.4-beta1")));
        assert!(!cache_dir_supported(Some("0.1")));
    }

    fn descriptor(os: &str, sync: SyncStrategy) -> SessionDescriptor {
        let inputs = SessionInputs {
            os_name: os.into(),
            sync,
            ..Default::default()
        };
        let resolved = ResolvedConfig {
            release: "stable".into(),
            launcher_version: Some("0.2.0".into()),
            builder_version: Some("1.1".into()),
            values: Default::default(),
        };
        SessionDescriptor::new(&inputs, &resolved, Path::new("/home/runner"), "runner").unwrap()
    }

    fn paths() -> LaunchPaths {
        LaunchPaths {
            script: "/opt/anyvm.py".into(),
            data_dir: "/tmp/data".into(),
            cache_dir: None,
            vnc_file: None,
        }
    }

    #[test]
    fn test_basic_flag_vector() {
        let inputs = SessionInputs {
            cpu: "2".into(),
            mem: "4096".into(),
            nat: NatRule::parse_all("8080:80"),
            ..Default::default()
        };
        let inv = LauncherInvocation::build("python3", &descriptor("linux", SyncStrategy::Rsync), &inputs, &paths());

        assert_eq!(inv.program, "python3");
        let joined = inv.args.join(" ");
        assert!(joined.starts_with("/opt/anyvm.py --os linux --release stable"));
        assert!(joined.contains("--data-dir /tmp/data"));
        assert!(joined.contains("--builder 1.1"));
        assert!(joined.contains("--cpu 2"));
        assert!(joined.contains("--mem 4096"));
        assert!(joined.contains("-p 8080:80"));
        assert!(joined.contains("-d --ssh-name linux --snapshot"));
        assert!(joined.ends_with("--vnc off"));
        assert!(!joined.contains("--arch"));
        assert!(!joined.contains("--cache-dir"));
        assert!(!joined.contains("--sync "));
    }

    #[test]
    fn test_mount_strategy_and_cache_dir() {
        let mut p = paths();
        p.cache_dir = Some("/tmp/cache".into());
        let inputs = SessionInputs {
            sync_time: Some(false),
            ..Default::default()
        };
        let inv = LauncherInvocation::build("python3", &descriptor("freebsd", SyncStrategy::Nfs), &inputs, &p);

        let joined = inv.args.join(" ");
        assert!(joined.contains("--cache-dir /tmp/cache"));
        assert!(joined.contains("--sync-time off"));
        assert!(joined.contains("--sync nfs -v /home/runner/work:/home/runner/work"));
    }

    #[test]
    fn test_debug_on_error_requests_display() {
        let mut p = paths();
        p.vnc_file = Some("/tmp/data/vnc.txt".into());
        let inv = LauncherInvocation::build(
            "python3",
            &descriptor("haiku", SyncStrategy::Rsync),
            &SessionInputs::default(),
            &p,
        );

        let joined = inv.args.join(" ");
        assert!(joined.contains("--vga std"));
        assert!(joined.contains("--vnc on --vnc-file /tmp/data/vnc.txt"));
        assert!(!joined.contains("--vnc off"));
    }
}
