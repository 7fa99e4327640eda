use crate::error::{DispatchError, FeedError};
use crate::progress::{ProgressEvent, ProgressReporter, Stage};
use crate::rss::{FeedEntry, FeedSource};
use crate::store::{Feed, NewFeed, Store};
use crate::transmission::DownloadClient;

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tempfile::{tempdir, TempDir};

pub async fn test_store() -> (TempDir, Store) {
    let dir = tempdir().unwrap();
    let store = Store::open(&dir.path().join("cistern.db")).await.unwrap();
    (dir, store)
}

pub async fn test_feed(store: &Store, url: &str, tag: &str) -> Feed {
    store
        .insert_feed(&NewFeed {
            name: url.rsplit('/').next().unwrap_or(url).to_string(),
            url: url.to_string(),
            download_dir: None,
            tag: tag.to_string(),
        })
        .await
        .unwrap()
}

/// Serves canned entries; unknown URLs fail like an unreachable host.
#[derive(Default)]
pub struct MockFeedSource {
    feeds: HashMap<String, Vec<FeedEntry>>,
    pub fetched: RefCell<Vec<String>>,
}

impl MockFeedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed(mut self, url: &str, entries: Vec<FeedEntry>) -> Self {
        self.feeds.insert(url.to_string(), entries);
        self
    }
}

#[async_trait(?Send)]
impl FeedSource for MockFeedSource {
    async fn fetch(&self, url: &str) -> Result<Vec<FeedEntry>, FeedError> {
        self.fetched.borrow_mut().push(url.to_string());
        self.feeds
            .get(url)
            .cloned()
            .ok_or_else(|| FeedError::Status {
                url: url.to_string(),
                status: 404,
            })
    }
}

/// Records submissions; rejects the links it was told to.
#[derive(Default)]
pub struct MockClient {
    rejected: HashSet<String>,
    pub added: RefCell<Vec<(String, Option<String>)>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(mut self, link: &str) -> Self {
        self.rejected.insert(link.to_string());
        self
    }

    pub fn added_links(&self) -> Vec<String> {
        self.added
            .borrow()
            .iter()
            .map(|(link, _)| link.clone())
            .collect()
    }
}

#[async_trait(?Send)]
impl DownloadClient for MockClient {
    async fn add(&self, link: &str, download_dir: Option<&str>) -> Result<(), DispatchError> {
        if self.rejected.contains(link) {
            return Err(DispatchError::Rejected("invalid or corrupt torrent file".to_string()));
        }
        self.added
            .borrow_mut()
            .push((link.to_string(), download_dir.map(str::to_string)));
        Ok(())
    }
}

/// Keeps a readable trace of every progress event.
#[derive(Default)]
pub struct RecordingReporter {
    pub events: RefCell<Vec<String>>,
}

impl ProgressReporter for RecordingReporter {
    fn report(&self, event: ProgressEvent<'_>) {
        let line = match event {
            ProgressEvent::Started { feed, stage, total } => {
                let stage = match stage {
                    Stage::Refreshing => "refreshing",
                    Stage::Dispatching => "dispatching",
                };
                format!("start {stage} {feed} {total}")
            }
            ProgressEvent::Advanced { name } => format!("advance {name}"),
            ProgressEvent::Finished => "finish".to_string(),
        };
        self.events.borrow_mut().push(line);
    }
}
