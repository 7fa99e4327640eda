use crate::error::{Error, FeedError, StoreError};
use crate::progress::{NoopReporter, ProgressEvent, ProgressReporter, SharedProgressReporter, Stage};
use crate::rss::{FeedEntry, FeedSource};
use crate::store::{Feed, NewTorrent, Store};

use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub entries: usize,
    pub inserted: usize,
    /// Entries without a value for the feed's tag.
    pub malformed: usize,
}

/// Fetches feeds and records the torrents they list.
pub struct Refresher<S> {
    source: S,
    timeout: Duration,
    progress: SharedProgressReporter,
}

impl<S: FeedSource> Refresher<S> {
    pub fn new(source: S, timeout: Duration) -> Self {
        Self {
            source,
            timeout,
            progress: NoopReporter::shared(),
        }
    }

    pub fn with_progress(mut self, progress: SharedProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    #[cfg(test)]
    pub(crate) fn source(&self) -> &S {
        &self.source
    }

    pub async fn fetch(&self, url: &str) -> Result<Vec<FeedEntry>, FeedError> {
        match tokio::time::timeout(self.timeout, self.source.fetch(url)).await {
            Ok(result) => result,
            Err(_) => Err(FeedError::Timeout {
                url: url.to_string(),
            }),
        }
    }

    /// Fetch `feed` and insert every entry not seen before. With `downloaded`
    /// set, new torrents are recorded as already handled.
    pub async fn refresh(
        &self,
        store: &Store,
        feed: &Feed,
        downloaded: bool,
    ) -> Result<RefreshSummary, Error> {
        log::info!("Refreshing feed: {}", feed.name);
        let entries = self.fetch(&feed.url).await?;
        Ok(self.ingest(store, feed, &entries, downloaded).await?)
    }

    /// Insert the torrents of already fetched `entries`.
    pub async fn ingest(
        &self,
        store: &Store,
        feed: &Feed,
        entries: &[FeedEntry],
        downloaded: bool,
    ) -> Result<RefreshSummary, StoreError> {
        record(store, feed, entries, downloaded, &*self.progress).await
    }
}

#[cfg(test)]
pub(crate) async fn ingest(
    store: &Store,
    feed: &Feed,
    entries: &[FeedEntry],
    downloaded: bool,
) -> Result<RefreshSummary, StoreError> {
    record(store, feed, entries, downloaded, &NoopReporter).await
}

async fn record(
    store: &Store,
    feed: &Feed,
    entries: &[FeedEntry],
    downloaded: bool,
    progress: &dyn ProgressReporter,
) -> Result<RefreshSummary, StoreError> {
    let mut summary = RefreshSummary {
        entries: entries.len(),
        ..RefreshSummary::default()
    };

    progress.report(ProgressEvent::Started {
        feed: &feed.name,
        stage: Stage::Refreshing,
        total: entries.len(),
    });
    let result = record_each(store, feed, entries, downloaded, progress, &mut summary).await;
    progress.report(ProgressEvent::Finished);
    result?;

    log::info!(
        "{}: {} new torrent(s) out of {} entries",
        feed.name,
        summary.inserted,
        summary.entries
    );
    Ok(summary)
}

async fn record_each(
    store: &Store,
    feed: &Feed,
    entries: &[FeedEntry],
    downloaded: bool,
    progress: &dyn ProgressReporter,
    summary: &mut RefreshSummary,
) -> Result<(), StoreError> {
    for entry in entries {
        progress.report(ProgressEvent::Advanced {
            name: entry.title().unwrap_or_default(),
        });

        let Some(url) = entry.get(&feed.tag) else {
            log::warn!(
                "{}: entry `{}` has no `{}` field",
                feed.name,
                entry.title().unwrap_or_default(),
                feed.tag
            );
            summary.malformed += 1;
            continue;
        };

        let name = entry.title().unwrap_or_else(|| {
            log::warn!("{}: no title for `{url}`", feed.name);
            url
        });

        let torrent = NewTorrent {
            name,
            url,
            feed_id: feed.id,
            downloaded,
        };
        if store.insert_torrent_if_absent(torrent).await? {
            log::debug!("{}: new torrent `{name}`", feed.name);
            summary.inserted += 1;
        } else {
            log::debug!("{}: `{name}` already known", feed.name);
        }
    }
    Ok(())
}
