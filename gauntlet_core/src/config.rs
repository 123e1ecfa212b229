use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Misuse of the engine itself, as opposed to a finding about a target.
///
/// This is the only error class that the orchestrator hands back to its caller;
/// everything a target does wrong is absorbed into an `Outcome`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Corpus name must not be empty")]
    EmptyCorpusName,
    #[error("Target display name must not be empty")]
    EmptyTargetName,
    #[error("Target display name {0:?} contains a NUL byte")]
    NulInTargetName(String),
    #[error("Target '{target}' declares {arity} parameters; at most {max} are supported")]
    UnsupportedArity {
        target: String,
        arity: usize,
        max: usize,
    },
    #[error("Target '{0}' was passed more than once in the same run")]
    DuplicateTarget(String),
    #[error("Invocation timeout must be greater than zero")]
    InvalidTimeout,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationKind {
    #[default]
    Process,
    Thread,
}

impl IsolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationKind::Process => "process",
            IsolationKind::Thread => "thread",
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CorpusFormat {
    /// A JSON document holding a single list of strings.
    #[default]
    JsonList,
    /// One input per line, line terminators stripped.
    Lines,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CorpusSource {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub format: CorpusFormat,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FuzzerSettings {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub isolation: IsolationKind,
    #[serde(default = "default_scoped_workdir")]
    pub scoped_workdir: bool,
}

pub fn default_timeout_ms() -> u64 {
    5000
}

fn default_scoped_workdir() -> bool {
    true
}

impl FuzzerSettings {
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout);
        }
        Ok(Duration::from_millis(self.timeout_ms))
    }
}

impl Default for FuzzerSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            isolation: IsolationKind::default(),
            scoped_workdir: default_scoped_workdir(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct GauntletConfig {
    #[serde(default)]
    pub fuzzer: FuzzerSettings,
    #[serde(default)]
    pub corpus: Vec<CorpusSource>,
}

impl GauntletConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        Self::from_toml_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, anyhow::Error> {
        let config: GauntletConfig = toml::from_str(content)?;
        config.fuzzer.timeout()?;
        for source in &config.corpus {
            if source.name.is_empty() {
                return Err(ConfigError::EmptyCorpusName.into());
            }
        }
        Ok(config)
    }
}
