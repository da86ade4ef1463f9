//! Configuration for agentplane.
//!
//! Settings are layered, first match wins:
//! 1. Environment variables (AGENTPLANE_HOME, AGENTPLANE_STORAGE, AGENTPLANE_DB,
//!    AGENTPLANE_AGENT_TOKEN)
//! 2. Config file (.agentplane/config.yaml)
//! 3. Defaults (~/.agentplane, SQLite at ~/.agentplane/agentplane.db)
//!
//! The file is found by walking up from the working directory looking for
//! .agentplane/config.yaml. Relative paths inside it resolve against that
//! .agentplane/ directory.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::limits::ExecutionLimits;
use crate::domain::{EnvironmentId, ModelPrice};

/// Process-wide settings, resolved on first use. Load errors are cached too.
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const CONFIG_DIR: &str = ".agentplane";
const CONFIG_FILE: &str = "config.yaml";
const DEFAULT_DB_FILE: &str = "agentplane.db";

/// On-disk shape of config.yaml
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub execution: Option<ExecutionLimits>,
    #[serde(default)]
    pub promotion: PromotionConfig,
    #[serde(default)]
    pub metering: MeteringConfig,
    #[serde(default)]
    pub agents: Option<AgentSettings>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .agentplane/)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    pub backend: Option<StorageBackendKind>,
    /// Database file (relative to .agentplane/)
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromotionConfig {
    /// Destinations deployed without review
    pub auto_approve: Option<Vec<EnvironmentId>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MeteringConfig {
    /// Per-model prices merged over the built-in table
    #[serde(default)]
    pub pricing: HashMap<String, ModelPrice>,
}

/// Which persistence backend to open at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackendKind {
    Memory,
    #[default]
    Sqlite,
}

impl fmt::Display for StorageBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.pad("memory"),
            Self::Sqlite => f.pad("sqlite"),
        }
    }
}

impl FromStr for StorageBackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            other => anyhow::bail!("Unknown storage backend '{}' (expected memory or sqlite)", other),
        }
    }
}

/// Resolved storage settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    pub backend: StorageBackendKind,
    /// SQLite database file
    pub path: PathBuf,
}

/// How steps reach their agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentBackend {
    /// Spawn a local command per step attempt
    #[default]
    Command,
    /// POST to a remote agent service
    Http,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default)]
    pub backend: AgentBackend,

    /// Program spawned by the command backend (default: agentplane-agent)
    #[serde(default = "default_agent_command")]
    pub command: String,

    /// Arguments placed before the agent id
    #[serde(default)]
    pub args: Vec<String>,

    /// Base URL of the HTTP backend
    #[serde(default)]
    pub base_url: Option<String>,

    /// Bearer token for the HTTP backend
    #[serde(default)]
    pub token: Option<String>,
}

fn default_agent_command() -> String {
    "agentplane-agent".to_string()
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            backend: AgentBackend::default(),
            command: default_agent_command(),
            args: Vec::new(),
            base_url: None,
            token: None,
        }
    }
}

/// Effective settings after layering
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// State directory
    pub home: PathBuf,
    pub storage: StorageSettings,
    pub execution: ExecutionLimits,
    /// Promotion destinations deployed without review
    pub auto_approve: Vec<EnvironmentId>,
    pub pricing: HashMap<String, ModelPrice>,
    pub agents: AgentSettings,
    /// The config.yaml that contributed, if any
    pub config_file: Option<PathBuf>,
}

/// Walk up from the working directory looking for .agentplane/config.yaml
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge env vars, an optional config file and defaults.
///
/// `env` looks up environment variables so tests can supply their own.
fn resolve_config(
    config_file: Option<(PathBuf, ConfigFile)>,
    env: impl Fn(&str) -> Option<String>,
    default_home: PathBuf,
) -> Result<ResolvedConfig> {
    let (config_path, file) = match config_file {
        Some((path, file)) => (Some(path), file),
        None => (None, ConfigFile::default()),
    };
    // Relative paths in the file resolve against .agentplane/
    let config_dir = config_path
        .as_deref()
        .and_then(Path::parent)
        .unwrap_or(Path::new("."));

    let home = if let Some(env_home) = env("AGENTPLANE_HOME") {
        PathBuf::from(env_home)
    } else if let Some(ref home_path) = file.paths.home {
        resolve_path(config_dir, home_path)
    } else {
        default_home
    };

    let backend = match env("AGENTPLANE_STORAGE") {
        Some(value) => value.parse()?,
        None => file.storage.backend.unwrap_or_default(),
    };

    let db_path = if let Some(env_db) = env("AGENTPLANE_DB") {
        PathBuf::from(env_db)
    } else if let Some(ref db_path) = file.storage.path {
        resolve_path(config_dir, db_path)
    } else {
        home.join(DEFAULT_DB_FILE)
    };

    let mut agents = file.agents.unwrap_or_default();
    if let Some(token) = env("AGENTPLANE_AGENT_TOKEN") {
        agents.token = Some(token);
    }

    Ok(ResolvedConfig {
        home,
        storage: StorageSettings {
            backend,
            path: db_path,
        },
        execution: file.execution.unwrap_or_default(),
        auto_approve: file
            .promotion
            .auto_approve
            .unwrap_or_else(|| vec![EnvironmentId::Qa]),
        pricing: file.metering.pricing,
        agents,
        config_file: config_path,
    })
}

fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR);

    let config_file = match find_config_file() {
        Some(path) => {
            let file = load_config_file(&path)?;
            Some((path, file))
        }
        None => None,
    };

    resolve_config(config_file, |key| std::env::var(key).ok(), default_home)
}

/// Settings for this process. Resolved once, then shared.
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Resolve settings again, bypassing the process-wide cache
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}
