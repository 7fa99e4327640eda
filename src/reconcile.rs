use crate::error::{chain, Error, StoreError};
use crate::refresh::{RefreshSummary, Refresher};
use crate::rss::FeedSource;
use crate::store::{Feed, Store};
use crate::transmission::{DispatchSummary, Dispatcher, DownloadClient};

#[derive(Debug, Clone)]
pub struct FeedReport {
    pub feed: String,
    /// Set when the feed could not be fetched this run.
    pub refresh_error: Option<String>,
    pub new_torrents: usize,
    pub dispatched: usize,
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub feeds: Vec<FeedReport>,
}

impl RunReport {
    /// Names of every torrent the download client did not accept.
    pub fn failed(&self) -> Vec<&str> {
        self.feeds
            .iter()
            .flat_map(|feed| feed.failed.iter().map(String::as_str))
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.feeds.iter().all(|feed| feed.failed.is_empty())
    }
}

/// Refresh then dispatch every enabled feed.
///
/// Feed fetch failures and rejected torrents are collected in the report;
/// only store errors stop the run.
pub async fn run<S, C>(
    store: &Store,
    refresher: &Refresher<S>,
    dispatcher: &Dispatcher<C>,
) -> Result<RunReport, StoreError>
where
    S: FeedSource,
    C: DownloadClient,
{
    let mut report = RunReport::default();

    for feed in store.enabled_feeds().await? {
        let refresh = refresh_or_log(store, refresher, &feed).await?;
        let DispatchSummary { dispatched, failed } = dispatcher.dispatch(store, &feed).await?;

        report.feeds.push(FeedReport {
            feed: feed.name,
            new_torrents: refresh.as_ref().map_or(0, |summary| summary.inserted),
            refresh_error: refresh.err(),
            dispatched,
            failed,
        });
    }

    Ok(report)
}

/// Refresh every feed, enabled or not, without dispatching anything.
pub async fn refresh_all<S: FeedSource>(
    store: &Store,
    refresher: &Refresher<S>,
) -> Result<Vec<(Feed, Result<RefreshSummary, String>)>, StoreError> {
    let mut results = Vec::new();
    for feed in store.feeds().await? {
        let refresh = refresh_or_log(store, refresher, &feed).await?;
        results.push((feed, refresh));
    }
    Ok(results)
}

/// A fetch failure only concerns this feed; store errors are propagated.
async fn refresh_or_log<S: FeedSource>(
    store: &Store,
    refresher: &Refresher<S>,
    feed: &Feed,
) -> Result<Result<RefreshSummary, String>, StoreError> {
    match refresher.refresh(store, feed, false).await {
        Ok(summary) => Ok(Ok(summary)),
        Err(Error::Store(err)) => Err(err),
        Err(err) => {
            let message = chain(&err);
            log::error!("Couldn't refresh feed `{}`: {message}", feed.name);
            Ok(Err(message))
        }
    }
}
