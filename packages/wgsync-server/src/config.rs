use crate::{error::ServerError, ServerResult};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    path::{Path, PathBuf},
    time::Duration,
};
use wgsync_lib::constant::{
    default_config_dirs, DEFAULT_DUMP_INTERVAL_SECS, WGSYNC_SECRETS_DIR,
};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Config {
    #[serde(default = "config_dirs")]
    config_dirs: Vec<PathBuf>,
    #[serde(default = "dump_interval", with = "humantime_serde")]
    dump_interval: Duration,
    #[serde(default = "secrets_dir")]
    secrets_dir: PathBuf,
}

fn config_dirs() -> Vec<PathBuf> {
    default_config_dirs().iter().map(PathBuf::from).collect()
}

fn dump_interval() -> Duration {
    Duration::from_secs(DEFAULT_DUMP_INTERVAL_SECS)
}

fn secrets_dir() -> PathBuf {
    PathBuf::from(WGSYNC_SECRETS_DIR)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_dirs: config_dirs(),
            dump_interval: dump_interval(),
            secrets_dir: secrets_dir(),
        }
    }
}

impl Config {
    pub fn config_dirs(&self) -> &[PathBuf] {
        &self.config_dirs
    }

    pub fn dump_interval(&self) -> Duration {
        self.dump_interval
    }

    pub fn secrets_dir(&self) -> &Path {
        &self.secrets_dir
    }

    pub fn with_config_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.config_dirs = dirs;
        self
    }

    pub fn with_dump_interval(mut self, interval: Duration) -> Self {
        self.dump_interval = interval;
        self
    }

    pub fn with_secrets_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.secrets_dir = dir.into();
        self
    }

    pub fn validate(&self) -> ServerResult<()> {
        if self.config_dirs.is_empty() {
            return Err(ServerError::NoConfigDirs);
        }
        if self.dump_interval.is_zero() {
            return Err(ServerError::validation(
                "dump_interval",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    fn from_value(content: serde_yaml::Value) -> ServerResult<Self> {
        let config: Config = serde_yaml::from_value(content)?;
        config.validate()?;
        Ok(config)
    }
}

impl TryFrom<&PathBuf> for Config {
    type Error = ServerError;
    fn try_from(p: &PathBuf) -> ServerResult<Self> {
        Self::try_from(p.as_path())
    }
}

impl TryFrom<&Path> for Config {
    type Error = ServerError;
    fn try_from(p: &Path) -> ServerResult<Self> {
        let file = File::open(p)?;
        let content: serde_yaml::Value = serde_yaml::from_reader(file)?;
        Self::from_value(content)
    }
}

impl TryFrom<&str> for Config {
    type Error = ServerError;
    fn try_from(s: &str) -> ServerResult<Self> {
        let content: serde_yaml::Value = serde_yaml::from_str(s)?;
        // An empty document means "all defaults".
        if content.is_null() {
            return Ok(Config::default());
        }
        Self::from_value(content)
    }
}
