//! Reading configuration files in any of the supported formats.

use std::path::{Path, PathBuf};

use crate::Config;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("toml: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unsupported config format")]
    UnsupportedFormat,
    #[error("validation: {0}")]
    Validation(String),
}

impl ConfigError {
    pub fn error_type(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => strata_core::ERROR_IO,
            _ => strata_core::ERROR_CONFIG,
        }
    }
}

/// On-disk syntax of a configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    /// JSON with `//` and `/* */` comments allowed.
    Json,
    Yaml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "toml" => Some(ConfigFormat::Toml),
            "json" | "jsonc" => Some(ConfigFormat::Json),
            "yaml" | "yml" => Some(ConfigFormat::Yaml),
            _ => None,
        }
    }
}

/// Load a configuration file, picking the format from its extension.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let format = ConfigFormat::from_path(path).ok_or(ConfigError::UnsupportedFormat)?;
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&text, format)
}

/// Parse configuration text without touching the filesystem.
pub fn parse_config(text: &str, format: ConfigFormat) -> Result<Config, ConfigError> {
    let config = match format {
        ConfigFormat::Toml => toml::from_str(text)?,
        ConfigFormat::Json => {
            serde_json::from_reader(json_comments::StripComments::new(text.as_bytes()))?
        }
        ConfigFormat::Yaml => serde_yaml::from_str(text)?,
    };
    Ok(config)
}
