//! Runtime configuration for the task store and logging.
//!
//! # Environment Variables
//!
//! - `GTD_DATA_DIR`: base directory for the database and logs
//! - `GTD_DB_FILE`: database file name inside the data directory
//! - `GTD_LOG_LEVEL`: trace|debug|info|warn|error
//!
//! Relative data directories are resolved against the current directory.

use crate::logging::{default_log_level, normalize_level, LogError};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

pub const DATA_DIR_ENV: &str = "GTD_DATA_DIR";
pub const DB_FILE_ENV: &str = "GTD_DB_FILE";
pub const LOG_LEVEL_ENV: &str = "GTD_LOG_LEVEL";

pub const DEFAULT_DB_FILE: &str = "gtd.sqlite3";
const DEFAULT_DATA_DIR: &str = ".gtd";
const LOGS_SUBDIR: &str = "logs";

#[derive(Debug)]
pub enum ConfigError {
    InvalidLogLevel(LogError),
    /// DB file name is blank or contains a path separator.
    InvalidDbFileName(String),
    Io(std::io::Error),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidLogLevel(err) => write!(f, "{err}"),
            Self::InvalidDbFileName(name) => write!(f, "invalid database file name `{name}`"),
            Self::Io(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::InvalidLogLevel(err) => Some(err),
            Self::InvalidDbFileName(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Resolved core configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    data_dir: PathBuf,
    db_file_name: String,
    log_level: &'static str,
}

impl CoreConfig {
    /// Defaults rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            db_file_name: DEFAULT_DB_FILE.to_string(),
            log_level: default_log_level(),
        }
    }

    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`CoreConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let data_dir = value(DATA_DIR_ENV).unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
        let mut config = Self::new(PathBuf::new()).with_data_dir(data_dir)?;
        if let Some(name) = value(DB_FILE_ENV) {
            config = config.with_db_file_name(name)?;
        }
        if let Some(level) = value(LOG_LEVEL_ENV) {
            config = config.with_log_level(&level)?;
        }
        Ok(config)
    }

    /// Moves the data directory, keeping file name and level.
    /// A relative `dir` is resolved against the current directory.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let dir = dir.into();
        self.data_dir = if dir.is_absolute() {
            dir
        } else {
            std::env::current_dir()?.join(dir)
        };
        Ok(self)
    }

    pub fn with_db_file_name(mut self, name: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into().trim().to_string();
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(ConfigError::InvalidDbFileName(name));
        }
        self.db_file_name = name;
        Ok(self)
    }

    pub fn with_log_level(mut self, level: &str) -> Result<Self, ConfigError> {
        self.log_level = normalize_level(level).map_err(ConfigError::InvalidLogLevel)?;
        Ok(self)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn db_file_name(&self) -> &str {
        &self.db_file_name
    }

    pub fn log_level(&self) -> &'static str {
        self.log_level
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_file_name)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join(LOGS_SUBDIR)
    }
}
