use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::db::TlsConfig;
use crate::registry::OverwritePolicy;
use crate::template::Materialization;

/// A datasource created at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasourceSeed {
    pub id: String,
    pub uri: String,
}

/// Server configuration, read from `config.toml`.
///
/// Every key is optional; a missing file yields the defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind: String,
    pub default_timeout_ms: u64,
    pub max_timeout_ms: u64,
    pub materialization: Materialization,
    pub overwrite_policy: OverwritePolicy,
    pub pool_max_size: usize,
    pub tls: TlsConfig,
    pub datasources: Vec<DatasourceSeed>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            default_timeout_ms: 30_000,
            max_timeout_ms: 300_000,
            materialization: Materialization::default(),
            overwrite_policy: OverwritePolicy::default(),
            pool_max_size: 16,
            tls: TlsConfig::default(),
            datasources: Vec::new(),
        }
    }
}

impl Config {
    /// `<config dir>/dynapi/config.toml`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dynapi")
            .join("config.toml")
    }

    /// Load from an explicit path, or from [`Config::default_path`].
    ///
    /// An explicit path must exist. The default path may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = Self::default_path();
                if !path.exists() {
                    return Ok(Self::default());
                }
                Self::from_file(&path)?
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_timeout_ms == 0 {
            bail!("default_timeout_ms must be greater than zero");
        }
        if self.max_timeout_ms == 0 {
            bail!("max_timeout_ms must be greater than zero");
        }
        if self.pool_max_size == 0 {
            bail!("pool_max_size must be greater than zero");
        }
        let mut seen = std::collections::HashSet::new();
        for seed in &self.datasources {
            if seed.id.trim().is_empty() {
                bail!("datasource id must not be empty");
            }
            if !seen.insert(seed.id.as_str()) {
                bail!("datasource '{}' is declared twice", seed.id);
            }
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn max_timeout(&self) -> Duration {
        Duration::from_millis(self.max_timeout_ms)
    }
}
