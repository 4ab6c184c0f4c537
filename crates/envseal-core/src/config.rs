//! Configuration management for envseal

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Global envseal configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Secret name used when none is given on the command line
    #[serde(default)]
    pub secret_name: Option<String>,

    /// Prefix for rewritten task definition files
    #[serde(default = "default_output_prefix")]
    pub output_prefix: String,

    /// Override for the vault root (defaults to the data directory)
    #[serde(default)]
    pub vault_dir: Option<PathBuf>,

    /// Indentation width of written JSON
    #[serde(default = "default_indent")]
    pub indent: usize,
}

fn default_output_prefix() -> String {
    "updated_".to_string()
}

fn default_indent() -> usize {
    4
}

impl Default for Config {
    fn default() -> Self {
        Self {
            secret_name: None,
            output_prefix: default_output_prefix(),
            vault_dir: None,
            indent: default_indent(),
        }
    }
}

impl Config {
    /// Load config from file, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {:?}", path))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config from {:?}", path))
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {:?}", path))
    }
}
