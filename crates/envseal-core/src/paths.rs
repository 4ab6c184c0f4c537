//! Standard paths used by envseal

use std::path::PathBuf;

/// Standard envseal paths
pub struct Paths {
    /// Data directory (~/.local/share/envseal)
    pub data: PathBuf,
    /// Config directory (~/.config/envseal)
    pub config: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

impl Paths {
    pub fn new() -> Self {
        let data = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("envseal");

        let config = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("envseal");

        Self { data, config }
    }

    /// Default location of the global config file
    pub fn config_file(&self) -> PathBuf {
        self.config.join("config.json")
    }

    /// Root of the local secrets vault
    pub fn vault(&self) -> PathBuf {
        self.data.join("vault")
    }
}
