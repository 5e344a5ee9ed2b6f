//! Agent configuration
//!
//! Loaded from a TOML file (`BACKUP_AGENT_CONFIG`, default
//! `config/agent.toml`), then overridden by environment variables.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::backup::{BackupSettings, BackupTarget, Stage, Strategy};

pub const DEFAULT_CONFIG_PATH: &str = "config/agent.toml";
pub const DEFAULT_API_KEY: &str = "default-development-key";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_backup_path")]
    pub backup_path: PathBuf,
    #[serde(default)]
    pub strategy: Strategy,
    /// Detected at start-up when unset.
    pub tar_command: Option<String>,
    #[serde(default = "default_rsync_command")]
    pub rsync_command: String,
    #[serde(default = "default_compress_command")]
    pub compress_command: Vec<String>,
    #[serde(default = "default_decompress_command")]
    pub decompress_command: Vec<String>,
    #[serde(default = "default_archive_extension")]
    pub archive_extension: String,
    #[serde(default)]
    pub ignore_tar_warnings: bool,
    #[serde(default)]
    pub targets: BTreeMap<String, TargetConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub excludes: Vec<String>,
    /// Falls back to the agent-wide strategy.
    pub strategy: Option<Strategy>,
}

fn default_bind_address() -> String {
    "0.0.0.0:8745".to_string()
}

fn default_api_key() -> String {
    DEFAULT_API_KEY.to_string()
}

fn default_backup_path() -> PathBuf {
    PathBuf::from("/var/backups/data")
}

fn default_rsync_command() -> String {
    "rsync".to_string()
}

fn default_compress_command() -> Vec<String> {
    vec!["gzip".to_string(), "-c".to_string(), "-1".to_string()]
}

fn default_decompress_command() -> Vec<String> {
    vec!["gzip".to_string(), "-cd".to_string()]
}

fn default_archive_extension() -> String {
    "tar.gz".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            api_key: default_api_key(),
            backup_path: default_backup_path(),
            strategy: Strategy::default(),
            tar_command: None,
            rsync_command: default_rsync_command(),
            compress_command: default_compress_command(),
            decompress_command: default_decompress_command(),
            archive_extension: default_archive_extension(),
            ignore_tar_warnings: false,
            targets: BTreeMap::new(),
        }
    }
}

impl AgentConfig {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| anyhow!("Failed to parse agent config: {}", e))
    }

    /// Reads `path`; a missing file yields the defaults.
    pub async fn load(path: &str) -> Result<Self> {
        match fs::read_to_string(path).await {
            Ok(content) => {
                debug!("Loading agent config from {}", path);
                Self::parse(&content)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No config file at {}, using defaults", path);
                Ok(Self::default())
            }
            Err(e) => Err(anyhow!("Failed to read agent config {}: {}", path, e)),
        }
    }

    /// Applies `AGENT_BIND`, `AGENT_API_KEY`, `BACKUP_PATH` and `STRATEGY`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("AGENT_BIND") {
            self.bind_address = bind;
        }
        if let Some(key) = lookup("AGENT_API_KEY") {
            self.api_key = key;
        }
        if let Some(path) = lookup("BACKUP_PATH") {
            self.backup_path = PathBuf::from(path);
        }
        if let Some(strategy) = lookup("STRATEGY") {
            self.strategy = Strategy::from_toggle(Some(&strategy));
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.backup_path.is_absolute() {
            return Err(anyhow!(
                "backup_path must be absolute, got {}",
                self.backup_path.display()
            ));
        }
        if self.compress_command.is_empty() {
            return Err(anyhow!("compress_command must not be empty"));
        }
        if self.decompress_command.is_empty() {
            return Err(anyhow!("decompress_command must not be empty"));
        }
        if self.archive_extension.is_empty() {
            return Err(anyhow!("archive_extension must not be empty"));
        }
        for (name, target) in &self.targets {
            if name.is_empty() || name.contains('/') {
                return Err(anyhow!("Invalid target name: '{}'", name));
            }
            if !target.path.is_absolute() {
                return Err(anyhow!(
                    "Target {} path must be absolute, got {}",
                    name,
                    target.path.display()
                ));
            }
        }
        if self.api_key == DEFAULT_API_KEY {
            warn!(
                "Using default development API key - set AGENT_API_KEY environment variable \
                 for production"
            );
        }
        Ok(())
    }

    pub fn target(&self, name: &str) -> Option<BackupTarget> {
        self.targets.get(name).map(|target| {
            BackupTarget::new(name, target.path.clone())
                .with_excludes(target.excludes.iter().cloned())
                .with_strategy(target.strategy.unwrap_or(self.strategy))
        })
    }

    pub fn backup_settings(&self, tar_command: String) -> Result<BackupSettings> {
        let compressor = Stage::from_argv(&self.compress_command)
            .ok_or_else(|| anyhow!("compress_command must not be empty"))?;
        let decompressor = Stage::from_argv(&self.decompress_command)
            .ok_or_else(|| anyhow!("decompress_command must not be empty"))?;

        Ok(BackupSettings {
            backup_root: self.backup_path.clone(),
            tar_command,
            rsync_command: self.rsync_command.clone(),
            compressor,
            decompressor,
            archive_extension: self.archive_extension.clone(),
            ignore_tar_warnings: self.ignore_tar_warnings,
        })
    }
}

/// Loads the file named by `BACKUP_AGENT_CONFIG`, applies environment
/// overrides and validates the result.
pub async fn load_config() -> Result<AgentConfig> {
    let path =
        std::env::var("BACKUP_AGENT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let mut config = AgentConfig::load(&path).await?;
    config.apply_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}
