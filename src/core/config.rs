//! Runtime configuration
//!
//! Loaded from an optional TOML file, then overridden by environment variables.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use super::paths::DataPaths;

pub const CONFIG_ENV: &str = "BEAR_SEARCH_CONFIG";
pub const DATABASE_ENV: &str = "BEAR_DATABASE_PATH";
pub const INDEX_ENV: &str = "BEAR_INDEX_PATH";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub store: StoreConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_path: PathBuf,
    pub busy_timeout_ms: u64,
    pub tag_join_table: String,
    pub tag_join_note_column: String,
    pub tag_join_tag_column: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackendKind {
    Htp,
    Disabled,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackendKind,
    pub max_input_chars: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub path: PathBuf,
    pub build_on_startup: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            store: StoreConfig::default(),
            embedding: EmbeddingConfig::default(),
            index: IndexConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: DataPaths::new().database,
            busy_timeout_ms: 5000,
            tag_join_table: "Z_5TAGS".to_string(),
            tag_join_note_column: "Z_5NOTES".to_string(),
            tag_join_tag_column: "Z_13TAGS".to_string(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackendKind::Htp,
            max_input_chars: 8000,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: DataPaths::new().index,
            build_on_startup: true,
        }
    }
}

impl Config {
    /// Load config from `path` if given, else from `$BEAR_SEARCH_CONFIG`, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("Failed to parse config {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    fn apply_env(&mut self) {
        if let Some(path) = std::env::var_os(DATABASE_ENV) {
            self.store.database_path = PathBuf::from(path);
        }
        if let Some(path) = std::env::var_os(INDEX_ENV) {
            self.index.path = PathBuf::from(path);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.embedding.max_input_chars == 0 {
            bail!("embedding.max_input_chars must be greater than zero");
        }
        if self.index.path.as_os_str().is_empty() {
            bail!("index.path must be non-empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.store.tag_join_table, "Z_5TAGS");
        assert_eq!(config.embedding.backend, EmbeddingBackendKind::Htp);
        assert!(config.index.build_on_startup);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() -> Result<()> {
        let config = Config::from_toml(
            r#"
            log_level = "debug"

            [store]
            database_path = "/tmp/bear.sqlite"
            tag_join_table = "Z_7TAGS"

            [embedding]
            backend = "disabled"
            "#,
        )?;

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.store.database_path, PathBuf::from("/tmp/bear.sqlite"));
        assert_eq!(config.store.tag_join_table, "Z_7TAGS");
        assert_eq!(config.store.tag_join_note_column, "Z_5NOTES");
        assert_eq!(config.store.busy_timeout_ms, 5000);
        assert_eq!(config.embedding.backend, EmbeddingBackendKind::Disabled);
        assert_eq!(config.embedding.max_input_chars, 8000);
        Ok(())
    }

    #[test]
    fn test_rejects_zero_input_chars() -> Result<()> {
        let config = Config::from_toml("[embedding]\nmax_input_chars = 0\n")?;
        assert!(config.validate().is_err());
        Ok(())
    }

    #[test]
    fn test_unknown_backend_fails_to_parse() {
        assert!(Config::from_toml("[embedding]\nbackend = \"onnx\"\n").is_err());
    }
}
