use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use compositor::OnionSkinSettings;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use xsheet::SheetConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub fn app_config_dir() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(std::env::temp_dir);
    base.join("xsheet")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub sheet: SheetConfig,
    #[serde(default)]
    pub onionskin: OnionSkinSettings,
}

impl Config {
    pub fn default_path() -> PathBuf {
        app_config_dir().join("config.json")
    }

    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(?path, "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(err) => return Err(err.into()),
        };
        let config: Config = serde_json::from_str(&raw)?;
        config.validated()
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validated(mut self) -> Result<Self, ConfigError> {
        if self.sheet.frames_length < 1 {
            return Err(ConfigError::Invalid("frames_length must be at least 1".into()));
        }
        if self.sheet.layers_length < 1 {
            return Err(ConfigError::Invalid("layers_length must be at least 1".into()));
        }
        if self.sheet.frames_separation < 1 {
            return Err(ConfigError::Invalid("frames_separation must be at least 1".into()));
        }
        if self.sheet.fps.num == 0 || self.sheet.fps.den == 0 {
            return Err(ConfigError::Invalid(format!(
                "fps {}/{} must have a non-zero numerator and denominator",
                self.sheet.fps.num, self.sheet.fps.den
            )));
        }
        if self.onionskin.length < 1 {
            return Err(ConfigError::Invalid("onion-skin length must be at least 1".into()));
        }
        self.onionskin.falloff = self.onionskin.falloff.clamp(0.0, 1.0);
        Ok(self)
    }
}
