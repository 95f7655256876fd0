use std::fmt;

use tracing::warn;

/// Workspace synchronization strategy between host and guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStrategy {
    /// No workspace bridging at all.
    None,
    #[default]
    Rsync,
    Scp,
    /// Guest mounts the host workspace; the launcher owns the mount.
    Sshfs,
    Nfs,
    Other,
}

impl SyncStrategy {
    pub fn parse(value: &str) -> Self {
        match value {
            "" | "rsync" => Self::Rsync,
            "scp" => Self::Scp,
            "sshfs" => Self::Sshfs,
            "nfs" => Self::Nfs,
            "none" | "no" => Self::None,
            _ => Self::Other,
        }
    }

    /// Copy-based strategies push/pull files through the transport.
    pub fn is_copy(self) -> bool {
        matches!(self, Self::Rsync | Self::Scp)
    }

    /// Mount-based strategies are configured on the launcher command line.
    pub fn is_mount(self) -> bool {
        matches!(self, Self::Sshfs | Self::Nfs)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Rsync => "rsync",
            Self::Scp => "scp",
            Self::Sshfs => "sshfs",
            Self::Nfs => "nfs",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One NAT port-forward rule, parsed from a `host:guest` or
/// `proto:host:guest` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatRule {
    pub proto: String,
    pub host_port: String,
    pub guest_port: String,
    /// The cleaned input line, preserved exactly as written.
    token: String,
}

impl NatRule {
    /// Parse a single rule line. Quotes and whitespace are stripped first,
    /// so `udp:"8081":"80"` and `8080: 80` are accepted.
    pub fn parse(line: &str) -> Option<Self> {
        let cleaned: String = line
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '"' && *c != '\'')
            .collect();
        if cleaned.is_empty() {
            return None;
        }

        let parts: Vec<&str> = cleaned.split(':').collect();
        match parts.as_slice() {
            [host, guest] => Some(Self {
                proto: "tcp".into(),
                host_port: (*host).into(),
                guest_port: (*guest).into(),
                token: cleaned.clone(),
            }),
            [proto, host, guest] => Some(Self {
                proto: (*proto).into(),
                host_port: (*host).into(),
                guest_port: (*guest).into(),
                token: cleaned.clone(),
            }),
            _ => None,
        }
    }

    /// Parse a multi-line `nat` input, dropping blank lines.
    pub fn parse_all(input: &str) -> Vec<Self> {
        input
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| {
                let rule = Self::parse(l);
                if rule.is_none() {
                    warn!(line = %l, "Ignoring malformed NAT rule");
                }
                rule
            })
            .collect()
    }

    /// Token handed to the launcher's `-p` flag: the cleaned line as the
    /// user wrote it, never re-serialized.
    pub fn token(&self) -> String {
        self.token.clone()
    }
}

/// Normalize an architecture input. The empty string marks the implicit
/// default architecture; `arm64` is folded to `aarch64`.
pub fn normalize_arch(input: &str) -> String {
    match input.to_lowercase().as_str() {
        "" | "x86_64" | "amd64" => String::new(),
        "arm64" | "aarch64" => "aarch64".into(),
        other => other.into(),
    }
}

/// String inputs supplied by the CI platform (`INPUT_<NAME>` environment
/// variables, the way the Actions runner passes them).
#[derive(Debug, Clone, Default)]
pub struct SessionInputs {
    pub debug: bool,
    pub release: String,
    pub arch: String,
    pub os_name: String,
    pub mem: String,
    pub cpu: String,
    pub nat: Vec<NatRule>,
    pub envs: String,
    pub prepare: String,
    pub run: String,
    pub sync: SyncStrategy,
    pub copyback: bool,
    pub sync_time: Option<bool>,
    pub disable_cache: bool,
    pub debug_on_error: bool,
    pub data_dir: String,
    pub cache_dir: String,
}

fn input(name: &str) -> String {
    let key = format!("INPUT_{}", name.replace(' ', "_").to_uppercase());
    std::env::var(key).unwrap_or_default().trim().to_string()
}

impl SessionInputs {
    pub fn from_env() -> Self {
        Self {
            debug: input("debug") == "true",
            release: input("release").to_lowercase(),
            arch: normalize_arch(&input("arch")),
            os_name: input("osname").to_lowercase(),
            mem: input("mem"),
            cpu: input("cpu"),
            nat: NatRule::parse_all(&input("nat")),
            envs: input("envs"),
            prepare: input("prepare"),
            run: input("run"),
            sync: SyncStrategy::parse(&input("sync").to_lowercase()),
            copyback: input("copyback").to_lowercase() != "false",
            sync_time: match input("sync-time").to_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            disable_cache: input("disable-cache").to_lowercase() == "true",
            debug_on_error: input("debug-on-error").to_lowercase() == "true",
            data_dir: input("data-dir"),
            cache_dir: input("cache-dir"),
        }
    }
}
