//! Allow-listed environment forwarding across the host/guest boundary.

use regex::RegexBuilder;

/// A single forwarding rule: exact name or name prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvPattern {
    Prefix(String),
    Exact(String),
}

impl EnvPattern {
    pub fn parse(token: &str) -> Self {
        match token.strip_suffix('*') {
            Some(prefix) => Self::Prefix(prefix.to_string()),
            None => Self::Exact(token.to_string()),
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Prefix(p) => name.starts_with(p.as_str()),
            Self::Exact(e) => name == e,
        }
    }

    /// SendEnv token form (`GITHUB_*` or the exact name).
    pub fn token(&self) -> String {
        match self {
            Self::Prefix(p) => format!("{}*", p),
            Self::Exact(e) => e.clone(),
        }
    }
}

/// Case-insensitive rewrite of the host workspace path to the guest's
/// equivalent, applied to forwarded values for guests that report host
/// paths in their own environment.
#[derive(Debug, Clone)]
pub struct PathRewrite {
    pattern: regex::Regex,
    replacement: String,
}

impl PathRewrite {
    pub fn new(host_work: &str, guest_work: &str) -> Self {
        let pattern = RegexBuilder::new(&regex::escape(host_work))
            .case_insensitive(true)
            .build()
            .expect("escaped path is a valid pattern");
        Self {
            pattern,
            replacement: guest_work.to_string(),
        }
    }

    pub fn apply(&self, value: &str) -> String {
        self.pattern
            .replace_all(value, self.replacement.as_str())
            .into_owned()
    }
}

/// Ordered allow-list of variables to forward, plus the optional rewrite.
#[derive(Debug, Clone)]
pub struct EnvBridge {
    patterns: Vec<EnvPattern>,
    rewrite: Option<PathRewrite>,
}

impl EnvBridge {
    /// CI markers plus any user-supplied names/patterns from the `envs`
    /// input (whitespace-separated; a trailing `*` marks a prefix).
    pub fn standard(user_envs: &str, rewrite: Option<PathRewrite>) -> Self {
        let mut patterns: Vec<EnvPattern> =
            user_envs.split_whitespace().map(EnvPattern::parse).collect();
        patterns.push(EnvPattern::Prefix("GITHUB_".into()));
        patterns.push(EnvPattern::Exact("CI".into()));
        Self { patterns, rewrite }
    }

    pub fn matches(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(name))
    }

    /// `export NAME="value"` lines prepended to injected scripts, with the
    /// path rewrite applied first.
    pub fn export_lines(&self, env: impl Iterator<Item = (String, String)>) -> String {
        let mut out = String::new();
        for (name, value) in env {
            if !self.matches(&name) {
                continue;
            }
            let value = match &self.rewrite {
                Some(rewrite) => rewrite.apply(&value),
                None => value,
            };
            out.push_str(&format!("export {}=\"{}\"\n", name, value));
        }
        out
    }

    /// Tokens for the ssh `SendEnv` rule. Guests using injection skip the
    /// wildcard prefixes since those variables arrive as export lines.
    pub fn send_env_names(&self, inject_env: bool) -> Vec<String> {
        self.patterns
            .iter()
            .filter(|p| !(inject_env && matches!(p, EnvPattern::Prefix(_))))
            .map(EnvPattern::token)
            .collect()
    }
}
