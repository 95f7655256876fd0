use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::{Captures, Regex};
use tokio::fs;
use tracing::debug;

use crate::error::{Result, SessionError};

/// Release configuration resolved from the defaults file plus the
/// target-specific `<release>[-<arch>].conf` file.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub release: String,
    pub launcher_version: Option<String>,
    pub builder_version: Option<String>,
    pub values: HashMap<String, String>,
}

pub struct ConfigResolver {
    conf_dir: PathBuf,
}

impl ConfigResolver {
    pub fn new(conf_dir: impl Into<PathBuf>) -> Self {
        Self {
            conf_dir: conf_dir.into(),
        }
    }

    /// Merge `default.release.conf` with the target-specific conf file.
    ///
    /// The target file is named by the effective release (override or
    /// `DEFAULT_RELEASE` from the defaults) plus `-<arch>` when a
    /// non-default arch is requested. A missing target file is fatal;
    /// there is no defaults-only fallback.
    pub async fn resolve(&self, override_release: &str, arch: &str) -> Result<ResolvedConfig> {
        let mut values = HashMap::new();

        let defaults = self.conf_dir.join("default.release.conf");
        if defaults.exists() {
            parse_conf_file(&defaults, &mut values).await?;
        }

        let release = if override_release.is_empty() {
            values
                .get("DEFAULT_RELEASE")
                .cloned()
                .ok_or_else(|| SessionError::Config("no release given and DEFAULT_RELEASE not set".into()))?
        } else {
            override_release.to_string()
        };

        let mut conf_name = release.clone();
        if !arch.is_empty() {
            conf_name.push('-');
            conf_name.push_str(arch);
        }
        let target = self.conf_dir.join(format!("{}.conf", conf_name));
        if !target.exists() {
            return Err(SessionError::ConfigNotFound(target));
        }

        parse_conf_file(&target, &mut values).await?;
        debug!(release = %release, conf = %target.display(), "Resolved release config");

        Ok(ResolvedConfig {
            release,
            launcher_version: values.get("ANYVM_VERSION").cloned(),
            builder_version: values.get("BUILDER_VERSION").cloned(),
            values,
        })
    }
}

/// Parse an ordered `KEY=VALUE` conf file into `values`, expanding the
/// right-hand side against keys already resolved in the same pass.
/// Later assignments win on collision.
pub async fn parse_conf_file(path: &Path, values: &mut HashMap<String, String>) -> Result<()> {
    let content = fs::read_to_string(path).await?;
    parse_conf_str(&content, values);
    Ok(())
}

fn assignment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z0-9_]+)=(.*)$").unwrap())
}

pub fn parse_conf_str(content: &str, values: &mut HashMap<String, String>) {
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let Some(caps) = assignment_re().captures(trimmed) else {
            continue;
        };
        let key = caps[1].to_string();
        let mut value = caps[2].to_string();

        // Strip one layer of wrapping quotes.
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            value = value[1..value.len() - 1].to_string();
        }

        let expanded = expand_vars(&value, values);
        values.insert(key, expanded);
    }
}

/// Expand `${NAME}` and bare `$NAME` references against `values`.
/// Unresolved references are left verbatim.
pub fn expand_vars(input: &str, values: &HashMap<String, String>) -> String {
    static BRACED: OnceLock<Regex> = OnceLock::new();
    static BARE: OnceLock<Regex> = OnceLock::new();
    let braced = BRACED.get_or_init(|| Regex::new(r"\$\{([A-Za-z0-9_]+)\}").unwrap());
    let bare = BARE.get_or_init(|| Regex::new(r"\$([A-Za-z0-9_]+)").unwrap());

    let lookup = |caps: &Captures| -> String {
        match values.get(&caps[1]) {
            Some(v) if !v.is_empty() => v.clone(),
            _ => caps[0].to_string(),
        }
    };

    let pass = braced.replace_all(input, &lookup);
    bare.replace_all(&pass, &lookup).into_owned()
}
