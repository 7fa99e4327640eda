pub mod config;
pub mod error;
pub mod feeds;
pub mod progress;
pub mod reconcile;
pub mod refresh;
pub mod rss;
pub mod store;
pub mod tag;
pub mod transmission;

#[cfg(test)]
mod testutil;

use std::time::Duration;

/// Upper bound for a single feed fetch or daemon call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
