use std::collections::BTreeMap;
use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::properties::Properties;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Split a stage list written as `"tokenize, ssplit pos"`.
pub fn split_names(list: &str) -> Vec<String> {
    list.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// What happens to cached stage instances when a pipeline shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolPolicy {
    /// Keep every instance until the pool is cleared explicitly.
    #[default]
    Retain,
    /// Evict all instances once the owning pipeline has shut down.
    ClearOnShutdown,
}

// ── Top-level config ──────────────────────────────────────────

/// Everything needed to build an annotation pipeline.
///
/// Parsed from TOML, from a flat [`Properties`] map (the form a remote
/// client sends), or assembled in code. Environment variables named
/// `ANNOTA_*` override the parsed values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Requested stage names, in the order the caller listed them.
    #[serde(default)]
    pub annotators: Vec<String>,

    /// Documents annotated in parallel by the local engine. 0 = available parallelism.
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Remote endpoints, `[(http|https)://]host[:port]`. Non-empty selects remote mode.
    #[serde(default)]
    pub backends: Vec<String>,

    /// Check declared stage requirements while building the pipeline.
    #[serde(default = "default_true")]
    pub enforce_requirements: bool,

    /// Extend and reorder `annotators` so every prerequisite runs first.
    #[serde(default = "default_true")]
    pub resolve_prerequisites: bool,

    #[serde(default)]
    pub pool_policy: PoolPolicy,

    /// Remote request timeout in milliseconds (0 = none).
    #[serde(default)]
    pub timeout_ms: u64,

    pub api_key: Option<String>,
    pub api_secret: Option<String>,

    /// Annotate locally when a remote call fails.
    #[serde(default)]
    pub fallback_to_local: bool,

    /// Stage configuration, scoped by the `{stage}.` prefix convention.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

fn default_threads() -> usize {
    1
}

fn default_true() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            annotators: Vec::new(),
            threads: default_threads(),
            backends: Vec::new(),
            enforce_requirements: true,
            resolve_prerequisites: true,
            pool_policy: PoolPolicy::default(),
            timeout_ms: 0,
            api_key: None,
            api_secret: None,
            fallback_to_local: false,
            properties: BTreeMap::new(),
        }
    }
}

impl PipelineConfig {
    /// A config requesting `annotators` with every other setting at its default.
    pub fn for_annotators<I, S>(annotators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            annotators: annotators.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Build config from a flat property map.
    ///
    /// Recognized keys: `annotators`, `threads`, `backends`,
    /// `enforceRequirements`, `resolvePrerequisites`, `timeoutMs`,
    /// `fallbackToLocalPipeline`. Every entry, recognized or not, is kept as
    /// stage configuration.
    pub fn from_properties(props: &Properties) -> Result<Self, ConfigError> {
        let mut config = Self {
            annotators: split_names(props.get_or("annotators", "")),
            properties: props.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            ..Self::default()
        };
        if let Some(threads) = props.get("threads") {
            config.threads = threads.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("threads must be a non-negative integer, got '{threads}'"))
            })?;
        }
        if let Some(backends) = props.get("backends") {
            config.backends = backends
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        config.enforce_requirements = props.get_bool("enforceRequirements", true);
        config.resolve_prerequisites = props.get_bool("resolvePrerequisites", true);
        config.fallback_to_local = props.get_bool("fallbackToLocalPipeline", false);
        if let Some(timeout) = props.get("timeoutMs") {
            config.timeout_ms = timeout.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("timeoutMs must be an integer, got '{timeout}'"))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Stage configuration as [`Properties`].
    pub fn stage_properties(&self) -> Properties {
        Properties::from(self.properties.clone())
    }

    /// Resolve the local thread count (0 means use available parallelism).
    pub fn resolved_threads(&self) -> usize {
        if self.threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.threads
        }
    }

    pub fn is_remote(&self) -> bool {
        !self.backends.is_empty()
    }

    /// Validate the config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.annotators.iter().all(|a| a.trim().is_empty()) {
            return Err(ConfigError::Invalid("no annotators requested".into()));
        }
        if self.api_key.is_some() != self.api_secret.is_some() {
            return Err(ConfigError::Invalid(
                "api_key and api_secret must be set together".into(),
            ));
        }
        Ok(())
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// - `ANNOTA_ANNOTATORS` -> `annotators` (comma or space separated)
    /// - `ANNOTA_THREADS` -> `threads`
    /// - `ANNOTA_BACKENDS` -> `backends` (comma separated)
    /// - `ANNOTA_TIMEOUT_MS` -> `timeout_ms`
    /// - `ANNOTA_API_KEY` / `ANNOTA_API_SECRET` -> credentials
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_opt("ANNOTA_ANNOTATORS") {
            self.annotators = split_names(&v);
        }
        if let Some(v) = env_opt("ANNOTA_THREADS") {
            if let Ok(threads) = v.parse::<usize>() {
                self.threads = threads;
            }
        }
        if let Some(v) = env_opt("ANNOTA_BACKENDS") {
            self.backends = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = env_opt("ANNOTA_TIMEOUT_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                self.timeout_ms = ms;
            }
        }
        if let Some(v) = env_opt("ANNOTA_API_KEY") {
            self.api_key = Some(v);
        }
        if let Some(v) = env_opt("ANNOTA_API_SECRET") {
            self.api_secret = Some(v);
        }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!(
            annotators = %self.annotators.join(","),
            threads = self.resolved_threads(),
            backends = self.backends.len(),
            pool_policy = ?self.pool_policy,
            credentials = self.api_key.is_some(),
            "pipeline config loaded"
        );
    }
}
