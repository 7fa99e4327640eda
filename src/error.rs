use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by feed-level operations (onboarding, enable/disable).
#[derive(Debug, Error)]
pub enum Error {
    #[error("`{0}` is not a valid feed URL, only http and https are supported")]
    InvalidUrl(String),

    #[error("No entries found in feed `{0}`")]
    EmptyFeed(String),

    #[error("No magnet or .torrent field found in the entries of `{0}`")]
    NoLinkFieldFound(String),

    #[error(transparent)]
    FeedFetch(#[from] FeedError),

    #[error("`{0}` is not a valid feed id")]
    InvalidFeedIdentifier(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Fetching or parsing a feed failed. Fatal for that feed's refresh only.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Failed to fetch feed from {url}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Failed to parse feed from {url}")]
    Parse {
        url: String,
        #[source]
        source: ParseError,
    },

    #[error("Connection timeout while fetching {url}")]
    Timeout { url: String },
}

/// A document that is neither an RSS channel nor an Atom feed.
#[derive(Debug, Error)]
#[error("not an RSS channel ({rss})")]
pub struct ParseError {
    pub rss: rss::Error,
    #[source]
    pub atom: feed_rs::parser::ParseFeedError,
}

/// The remote client did not accept a torrent.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Error connecting to Transmission: {0}")]
    Rpc(String),

    #[error("Transmission rejected the torrent: {0}")]
    Rejected(String),

    #[error("Timeout while connecting to Transmission")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error")]
    Sqlx(#[from] sqlx::Error),

    #[error("Database migration to version {version} failed")]
    Migration {
        version: i64,
        #[source]
        source: sqlx::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't access config file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Config file {path:?} is invalid")]
    Invalid {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Unable to serialize the configuration")]
    Serialize(#[from] toml::ser::Error),
}

/// `err` followed by each of its causes, separated by `: `.
pub fn chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
