use std::fs::{self, read_to_string};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{chain, ConfigError};
use crate::DEFAULT_TIMEOUT;

pub const DEFAULT_RPC_URL: &str = "http://localhost:9091/transmission/rpc";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(flatten)]
    pub settings: Settings,
    pub transmission: Transmission,
}

/// Top-level keys of `config.toml`, everything but `[transmission]`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Settings {
    /// Defaults to `cistern.db` in the cistern home directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Settings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn database_path(&self, home: &Path) -> PathBuf {
        match &self.database {
            Some(path) => home.join(path),
            None => default_database_path(home),
        }
    }
}

fn default_database_path(home: &Path) -> PathBuf {
    home.join("cistern.db")
}

/// Settings of the config file at `path`, defaults if there is none.
/// The `[transmission]` table is not looked at.
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    Ok(read(path)?.unwrap_or_default())
}

/// The whole config file at `path`, `None` if there is none.
pub fn load_config(path: &Path) -> Result<Option<Config>, ConfigError> {
    read(path)
}

fn read<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, ConfigError> {
    let content = match read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    toml::from_str(&content)
        .map(Some)
        .map_err(|source| ConfigError::Invalid {
            path: path.to_path_buf(),
            source,
        })
}

/// Write `transmission` to the config file at `path`, replacing whatever
/// it held. The database and timeout settings are kept if they can be read.
pub fn write_setup(path: &Path, transmission: Transmission) -> Result<Config, ConfigError> {
    let settings = load_settings(path).unwrap_or_else(|err| {
        log::warn!("Discarding unreadable settings: {}", chain(&err));
        Settings::default()
    });

    let cfg = Config {
        settings,
        transmission,
    };
    let content = toml::to_string(&cfg)?;
    fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(cfg)
}

/// `$CISTERNHOME`, else `~/.cistern`.
pub fn cistern_home() -> Option<PathBuf> {
    match std::env::var_os("CISTERNHOME") {
        Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => home::home_dir().map(|dir| dir.join(".cistern")),
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(try_from = "RawTransmission", into = "RawTransmission")]
pub struct Transmission {
    pub url: Url,
    pub auth: Option<Credentials>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl TryFrom<RawTransmission> for Transmission {
    type Error = io::Error;

    fn try_from(value: RawTransmission) -> Result<Self, Self::Error> {
        let url = match value.url {
            Some(url) => url,
            None => Url::parse(DEFAULT_RPC_URL)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?,
        };

        let password = match value.password {
            Some(TransmissionPassword::Raw { password }) => Some(password),
            Some(TransmissionPassword::File { password_file }) => {
                Some(read_to_string(password_file)?.trim().to_string())
            }
            None => None,
        };

        let auth = match (value.username, password) {
            (Some(username), Some(password)) => Some(Credentials { username, password }),
            (None, None) => None,
            (Some(_), None) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "a transmission username requires `password` or `password_file`",
                ))
            }
            (None, Some(_)) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "a transmission password requires `username`",
                ))
            }
        };

        Ok(Transmission { url, auth })
    }
}

impl From<Transmission> for RawTransmission {
    fn from(value: Transmission) -> Self {
        let (username, password) = match value.auth {
            Some(Credentials { username, password }) => {
                (Some(username), Some(TransmissionPassword::Raw { password }))
            }
            None => (None, None),
        };

        RawTransmission {
            url: Some(value.url),
            username,
            password,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RawTransmission {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(flatten)]
    pub password: Option<TransmissionPassword>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum TransmissionPassword {
    Raw { password: String },
    File { password_file: String },
}
