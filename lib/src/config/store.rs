use serde::{de::DeserializeOwned, Serialize};
use std::{
    fmt,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::fs;
use tracing::instrument;

/// Directory of configuration entries, one JSON file per key.
#[derive(Clone, Debug)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry<T>(&self, key: ConfigKey<T>) -> ConfigEntry<'_, T> {
        ConfigEntry { store: self, key }
    }
}

/// Name, description and, optionally, the default value of a config entry of type `T`.
pub struct ConfigKey<T> {
    name: &'static str,
    comment: &'static str,
    default: Option<fn() -> T>,
}

impl<T> ConfigKey<T> {
    /// Key whose entry must be present in the store.
    pub const fn required(name: &'static str, comment: &'static str) -> Self {
        Self {
            name,
            comment,
            default: None,
        }
    }

    /// Key whose entry falls back to `default()` when absent from the store.
    pub const fn with_default(
        name: &'static str,
        comment: &'static str,
        default: fn() -> T,
    ) -> Self {
        Self {
            name,
            comment,
            default: Some(default),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for ConfigKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ConfigKey<T> {}

pub struct ConfigEntry<'a, T> {
    store: &'a ConfigStore,
    key: ConfigKey<T>,
}

impl<T> ConfigEntry<'_, T> {
    fn path(&self) -> PathBuf {
        self.store.dir.join(self.key.name).with_extension("conf")
    }

    /// File content: the key's comment as `#` lines followed by the value.
    fn render(&self, json: &str) -> String {
        let mut content = String::new();

        for line in self.key.comment.lines() {
            content.push_str("# ");
            content.push_str(line);
            content.push('\n');
        }

        content.push('\n');
        content.push_str(json);
        content.push('\n');
        content
    }
}

impl<T> ConfigEntry<'_, T>
where
    T: Serialize + fmt::Debug,
{
    #[instrument(name = "config.store", skip_all, fields(key = self.key.name), err(Debug))]
    pub async fn store(&self, value: &T) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|error| io::Error::new(ErrorKind::InvalidInput, error))?;
        let path = self.path();

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }

        fs::write(&path, self.render(&json)).await?;

        Ok(())
    }
}

impl<T> ConfigEntry<'_, T>
where
    T: DeserializeOwned + fmt::Debug,
{
    /// Loads the value, falling back to the key's default when the entry doesn't exist.
    #[instrument(name = "config.load", skip(self), fields(key = self.key.name))]
    pub async fn load(&self) -> Result<T, ConfigError> {
        let content = match fs::read_to_string(self.path()).await {
            Ok(content) => content,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return self
                    .key
                    .default
                    .map(|default| default())
                    .ok_or(ConfigError::NotFound(self.key.name));
            }
            Err(error) if error.kind() == ErrorKind::InvalidData => {
                tracing::error!(?error);
                return Err(ConfigError::Malformed(Box::new(error)));
            }
            Err(error) => {
                tracing::error!(?error);
                return Err(error.into());
            }
        };

        let json: String = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.starts_with('#'))
            .collect();

        serde_json::from_str(&json)
            .map_err(|error| ConfigError::Malformed(Box::new(error)))
            .inspect_err(|error| tracing::error!(?error))
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config entry not found: {0}")]
    NotFound(&'static str),
    #[error("config value is malformed")]
    Malformed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("input/output error")]
    Io(#[from] io::Error),
}
