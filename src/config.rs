use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::validate::{PathPolicy, sanitize_log_value};

/// Embedded default configuration.
const DEFAULT_CONFIG: &str = include_str!("../config.default.toml");

/// File names tried in each config directory, in order.
pub const CONFIG_FILE_NAMES: [&str; 3] = ["config.toml", "config.yaml", "config.yml"];

pub const ENV_PASSPORT_FILE: &str = "OPENCLAW_PASSPORT_FILE";
pub const ENV_API_URL: &str = "APORT_API_URL";
pub const ENV_API_KEY: &str = "APORT_API_KEY";
pub const ENV_AGENT_ID: &str = "APORT_AGENT_ID";
pub const ENV_GUARDRAIL_SCRIPT: &str = "APORT_GUARDRAIL_SCRIPT";
pub const ENV_VERIFY_SSL: &str = "APORT_VERIFY_SSL";
pub const ENV_FAIL_OPEN: &str = "APORT_FAIL_OPEN_WHEN_MISSING_CONFIG";
pub const ENV_SUBPROCESS_TIMEOUT: &str = "APORT_SUBPROCESS_TIMEOUT";
pub const ENV_API_TIMEOUT: &str = "APORT_API_TIMEOUT";
pub const ENV_MAX_CONTEXT_SIZE: &str = "APORT_MAX_CONTEXT_SIZE";

/// Every variable the overlay reads.
/// Longest subprocess or API timeout honoured; larger values are capped.
pub const MAX_TIMEOUT_SECS: u64 = 3600;

pub const ENV_VARS: [&str; 10] = [
    ENV_PASSPORT_FILE,
    ENV_API_URL,
    ENV_API_KEY,
    ENV_AGENT_ID,
    ENV_GUARDRAIL_SCRIPT,
    ENV_VERIFY_SSL,
    ENV_FAIL_OPEN,
    ENV_SUBPROCESS_TIMEOUT,
    ENV_API_TIMEOUT,
    ENV_MAX_CONTEXT_SIZE,
];

// ── Final (merged) config ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Local,
    Api,
}

impl Mode {
    /// Anything other than `api` means local evaluation.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "api" => Mode::Api,
            "local" | "" => Mode::Local,
            other => {
                log::warn!("unknown mode {other:?}, using local evaluation");
                Mode::Local
            }
        }
    }
}

/// How tool calls are evaluated. Resolved once per evaluator and never
/// mutated afterwards.
#[derive(Clone, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default)]
    pub mode: Mode,
    pub api_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Unexpanded; may start with `~`.
    #[serde(default)]
    pub passport_path: Option<String>,
    #[serde(default)]
    pub guardrail_script: Option<String>,
    pub verify_ssl: bool,
    pub fail_open_when_missing_config: bool,
    #[serde(default)]
    pub framework: Option<String>,
    pub subprocess_timeout_secs: u64,
    pub api_timeout_secs: u64,
    pub max_context_bytes: usize,
}

impl fmt::Debug for EvaluationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationConfig")
            .field("mode", &self.mode)
            .field("api_url", &self.api_url)
            .field(
                "api_key",
                &self.api_key.as_deref().map(|k| sanitize_log_value(k, "api_key")),
            )
            .field("agent_id", &self.agent_id)
            .field("passport_path", &self.passport_path)
            .field("guardrail_script", &self.guardrail_script)
            .field("verify_ssl", &self.verify_ssl)
            .field("fail_open_when_missing_config", &self.fail_open_when_missing_config)
            .field("framework", &self.framework)
            .field("subprocess_timeout_secs", &self.subprocess_timeout_secs)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("max_context_bytes", &self.max_context_bytes)
            .finish()
    }
}

// ── Overlay (config file) ──

/// Shape shared by `config.toml` and the YAML files written by the setup
/// tooling. Every key is optional; unknown keys are ignored.
#[derive(Debug, Deserialize, Default)]
pub struct FileConfig {
    pub mode: Option<String>,
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub agent_id: Option<String>,
    pub passport_path: Option<String>,
    pub guardrail_script: Option<String>,
    pub verify_ssl: Option<bool>,
    pub fail_open_when_missing_config: Option<bool>,
    pub framework: Option<String>,
    pub subprocess_timeout_secs: Option<u64>,
    pub api_timeout_secs: Option<u64>,
    pub max_context_bytes: Option<usize>,
}

// ── Overlay (environment) ──

/// The recognised environment variables, captured once.
#[derive(Debug, Clone, Default)]
pub struct EnvOverlay {
    vars: BTreeMap<String, String>,
}

impl EnvOverlay {
    pub fn capture() -> Self {
        let vars = ENV_VARS
            .iter()
            .filter_map(|name| std::env::var(name).ok().map(|v| (name.to_string(), v)))
            .collect();
        Self { vars }
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Empty values count as unset.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// Process state the evaluator depends on: home, working directory and the
/// recognised environment variables. Captured when the evaluator is built,
/// or assembled by hand for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub home: Option<PathBuf>,
    pub cwd: Option<PathBuf>,
    pub vars: EnvOverlay,
}

impl Environment {
    pub fn capture() -> Self {
        Self {
            home: std::env::var_os("HOME")
                .filter(|h| !h.is_empty())
                .map(PathBuf::from),
            cwd: std::env::current_dir().ok(),
            vars: EnvOverlay::capture(),
        }
    }

    /// An environment with only a home directory and no variables set.
    pub fn isolated(home: impl Into<PathBuf>) -> Self {
        Self {
            home: Some(home.into()),
            cwd: None,
            vars: EnvOverlay::default(),
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.set(name, value);
        self
    }

    /// The default passport allow-list for this home directory.
    pub fn path_policy(&self) -> PathPolicy {
        PathPolicy::with_defaults(self.home.clone())
    }

    /// Expand `~` and anchor relative paths at the captured working directory.
    pub fn expand(&self, raw: &str) -> PathBuf {
        let expanded = self.path_policy().expand(raw);
        match &self.cwd {
            Some(cwd) if expanded.is_relative() => cwd.join(expanded),
            _ => expanded,
        }
    }
}

// ── Merge logic ──

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_positive<T: std::str::FromStr + PartialOrd + Default>(raw: &str) -> Option<T> {
    raw.parse::<T>().ok().filter(|v| *v > T::default())
}

fn capped_timeout(name: &str, secs: u64) -> u64 {
    if secs > MAX_TIMEOUT_SECS {
        log::warn!("{name}={secs} exceeds {MAX_TIMEOUT_SECS}s, capping");
        MAX_TIMEOUT_SECS
    } else {
        secs
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl EvaluationConfig {
    /// Load the default embedded configuration.
    pub fn default_config() -> Self {
        toml::from_str(DEFAULT_CONFIG).expect("embedded default config must parse")
    }

    pub fn is_api(&self) -> bool {
        self.mode == Mode::Api
    }

    pub fn framework(&self) -> &str {
        self.framework.as_deref().unwrap_or(crate::DEFAULT_FRAMEWORK)
    }

    pub fn subprocess_timeout(&self) -> Duration {
        Duration::from_secs(self.subprocess_timeout_secs.min(MAX_TIMEOUT_SECS))
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs.min(MAX_TIMEOUT_SECS))
    }

    /// Scalars present in the file replace the defaults.
    fn apply_overlay(&mut self, overlay: FileConfig) {
        if let Some(v) = overlay.mode {
            self.mode = Mode::parse(&v);
        }
        if let Some(v) = non_empty(overlay.api_url) {
            self.api_url = v;
        }
        if let Some(v) = non_empty(overlay.api_key) {
            self.api_key = Some(v);
        }
        if let Some(v) = non_empty(overlay.agent_id) {
            self.agent_id = Some(v);
        }
        if let Some(v) = non_empty(overlay.passport_path) {
            self.passport_path = Some(v);
        }
        if let Some(v) = non_empty(overlay.guardrail_script) {
            self.guardrail_script = Some(v);
        }
        if let Some(v) = overlay.verify_ssl {
            self.verify_ssl = v;
        }
        if let Some(v) = overlay.fail_open_when_missing_config {
            self.fail_open_when_missing_config = v;
        }
        if let Some(v) = non_empty(overlay.framework) {
            self.framework = Some(v);
        }
        if let Some(v) = overlay.subprocess_timeout_secs.filter(|v| *v > 0) {
            self.subprocess_timeout_secs = capped_timeout("subprocess_timeout_secs", v);
        }
        if let Some(v) = overlay.api_timeout_secs.filter(|v| *v > 0) {
            self.api_timeout_secs = capped_timeout("api_timeout_secs", v);
        }
        if let Some(v) = overlay.max_context_bytes.filter(|v| *v > 0) {
            self.max_context_bytes = v;
        }
    }

    /// Environment variables win over the file. Malformed values are
    /// ignored with a warning.
    fn apply_env(&mut self, env: &EnvOverlay) {
        if let Some(v) = env.get(ENV_PASSPORT_FILE) {
            self.passport_path = Some(v.to_string());
        }
        if let Some(v) = env.get(ENV_API_URL) {
            self.api_url = v.to_string();
        }
        if let Some(v) = env.get(ENV_API_KEY) {
            self.api_key = Some(v.to_string());
        }
        if let Some(v) = env.get(ENV_AGENT_ID) {
            self.agent_id = Some(v.to_string());
        }
        if let Some(v) = env.get(ENV_GUARDRAIL_SCRIPT) {
            self.guardrail_script = Some(v.to_string());
        }

        let flags: [(&str, &mut bool); 2] = [
            (ENV_VERIFY_SSL, &mut self.verify_ssl),
            (ENV_FAIL_OPEN, &mut self.fail_open_when_missing_config),
        ];
        for (name, slot) in flags {
            if let Some(raw) = env.get(name) {
                match parse_flag(raw) {
                    Some(v) => *slot = v,
                    None => log::warn!("ignoring {name}={raw:?}: expected 0/1/true/false"),
                }
            }
        }

        let timeouts: [(&str, &mut u64); 2] = [
            (ENV_SUBPROCESS_TIMEOUT, &mut self.subprocess_timeout_secs),
            (ENV_API_TIMEOUT, &mut self.api_timeout_secs),
        ];
        for (name, slot) in timeouts {
            if let Some(raw) = env.get(name) {
                match parse_positive(raw) {
                    Some(v) => *slot = capped_timeout(name, v),
                    None => log::warn!("ignoring {name}={raw:?}: expected a positive number of seconds"),
                }
            }
        }

        if let Some(raw) = env.get(ENV_MAX_CONTEXT_SIZE) {
            match parse_positive(raw) {
                Some(v) => self.max_context_bytes = v,
                None => log::warn!("ignoring {ENV_MAX_CONTEXT_SIZE}={raw:?}: expected a positive byte count"),
            }
        }
    }

    /// Apply an overlay from a TOML string. Used for testing.
    #[cfg(test)]
    fn apply_overlay_str(&mut self, toml_str: &str) {
        let overlay: FileConfig = toml::from_str(toml_str).unwrap();
        self.apply_overlay(overlay);
    }
}

// ── Discovery ──

/// First existing config file, probing `<cwd>/.aport/`, `~/.aport/<framework>/`
/// and `~/.aport/` in that order.
pub fn find_config_path(env: &Environment, framework: &str) -> Option<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(cwd) = &env.cwd {
        dirs.push(cwd.join(".aport"));
    }
    if let Some(home) = &env.home {
        let aport = home.join(".aport");
        if !framework.is_empty() {
            dirs.push(aport.join(framework));
        }
        dirs.push(aport);
    }
    dirs.iter()
        .flat_map(|dir| CONFIG_FILE_NAMES.iter().map(move |name| dir.join(name)))
        .find(|candidate| candidate.is_file())
}

/// Parse a config file by extension: `.yaml`/`.yml` as YAML, anything else
/// as TOML. A file that vanished since discovery counts as empty.
pub fn read_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(FileConfig::default()),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    if content.trim().is_empty() {
        return Ok(FileConfig::default());
    }
    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
    if is_yaml {
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    } else {
        toml::from_str(&content).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Resolve the configuration for one evaluator:
/// 1. Start with embedded defaults
/// 2. Layer the explicit config file, or the first discovered one
/// 3. Layer the environment overlay
///
/// `framework` fills in when neither file nor defaults name one.
pub fn load_config(
    explicit: Option<&Path>,
    env: &Environment,
    framework: &str,
) -> Result<EvaluationConfig, ConfigError> {
    let mut config = EvaluationConfig::default_config();

    let path = match explicit {
        Some(p) if p.is_file() => Some(p.to_path_buf()),
        Some(p) => {
            log::warn!("config {} is not a file, falling back to discovery", p.display());
            find_config_path(env, framework)
        }
        None => find_config_path(env, framework),
    };
    if let Some(path) = path {
        log::debug!("loading config from {}", path.display());
        config.apply_overlay(read_file_config(&path)?);
    }

    config.apply_env(&env.vars);
    if config.framework.is_none() && !framework.is_empty() {
        config.framework = Some(framework.to_string());
    }
    Ok(config)
}
