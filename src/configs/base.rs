use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    common::errors::{Fc2Error, Result},
    configs::*,
};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub fc2: Fc2Config,
    pub logging: Option<LoggingConfig>,
}

impl Config {
    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Load `path`, or the first of `config.toml` / `config.default.toml`
    /// that exists. With neither present the defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => {
                if !p.exists() {
                    return Err(Fc2Error::Config(format!("{} not found", p.display())));
                }
                p
            }
            None if Path::new("config.toml").exists() => Path::new("config.toml"),
            None if Path::new("config.default.toml").exists() => Path::new("config.default.toml"),
            None => return Ok(Self::default()),
        };

        let config_str = std::fs::read_to_string(config_path)
            .map_err(|e| Fc2Error::Config(format!("{}: {}", config_path.display(), e)))?;
        Self::from_toml(&config_str)
    }
}
