use crate::config::Transmission;
use crate::error::{DispatchError, StoreError};
use crate::progress::{NoopReporter, ProgressEvent, SharedProgressReporter, Stage};
use crate::store::{Feed, Store, Torrent};

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use transmission_rpc::types::{BasicAuth, TorrentAddArgs};
use transmission_rpc::SharableTransClient;

/// Remote daemon accepting torrents by URI.
#[async_trait(?Send)]
pub trait DownloadClient {
    /// Submit `link`, saving into `download_dir` instead of the daemon's
    /// default when given.
    async fn add(&self, link: &str, download_dir: Option<&str>) -> Result<(), DispatchError>;
}

pub struct TransmissionClient {
    inner: SharableTransClient,
}

impl TransmissionClient {
    pub fn new(cfg: &Transmission) -> Self {
        let inner = match &cfg.auth {
            Some(auth) => {
                let basic_auth = BasicAuth {
                    user: auth.username.clone(),
                    password: auth.password.clone(),
                };
                SharableTransClient::with_auth(cfg.url.clone(), basic_auth)
            }
            None => SharableTransClient::new(cfg.url.clone()),
        };

        Self { inner }
    }
}

#[async_trait(?Send)]
impl DownloadClient for TransmissionClient {
    async fn add(&self, link: &str, download_dir: Option<&str>) -> Result<(), DispatchError> {
        let add = TorrentAddArgs {
            filename: Some(link.to_string()),
            download_dir: download_dir.map(str::to_string),
            ..TorrentAddArgs::default()
        };

        let response = self
            .inner
            .torrent_add(add)
            .await
            .map_err(|err| DispatchError::Rpc(err.to_string()))?;

        if response.is_ok() {
            Ok(())
        } else {
            Err(DispatchError::Rejected(response.result))
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub dispatched: usize,
    /// Names of the torrents the client did not accept.
    pub failed: Vec<String>,
}

/// Hands undownloaded torrents to the download client.
pub struct Dispatcher<C> {
    client: C,
    timeout: Duration,
    progress: SharedProgressReporter,
}

impl<C: DownloadClient> Dispatcher<C> {
    pub fn new(client: C, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            progress: NoopReporter::shared(),
        }
    }

    pub fn with_progress(mut self, progress: SharedProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    #[cfg(test)]
    pub(crate) fn client(&self) -> &C {
        &self.client
    }

    /// Submit every pending torrent of `feed`. A rejected torrent stays
    /// pending and is listed in the summary; the others are still tried.
    pub async fn dispatch(&self, store: &Store, feed: &Feed) -> Result<DispatchSummary, StoreError> {
        let mut summary = DispatchSummary::default();

        let pending = store.pending_torrents(feed.id).await?;
        if pending.is_empty() {
            log::info!("{}: no torrents to download", feed.name);
            return Ok(summary);
        }

        self.progress.report(ProgressEvent::Started {
            feed: &feed.name,
            stage: Stage::Dispatching,
            total: pending.len(),
        });
        let result = self.dispatch_each(store, feed, pending, &mut summary).await;
        self.progress.report(ProgressEvent::Finished);
        result?;

        Ok(summary)
    }

    async fn dispatch_each(
        &self,
        store: &Store,
        feed: &Feed,
        pending: Vec<Torrent>,
        summary: &mut DispatchSummary,
    ) -> Result<(), StoreError> {
        for torrent in pending {
            self.progress.report(ProgressEvent::Advanced {
                name: &torrent.name,
            });
            match self.add_with_timeout(&torrent, feed.download_override()).await {
                Ok(()) => {
                    store.mark_downloaded(torrent.id).await?;
                    log::info!("{}: added `{}`", feed.name, torrent.name);
                    summary.dispatched += 1;
                }
                Err(err) => {
                    log::error!("Error while adding torrent `{}`: {err}", torrent.name);
                    summary.failed.push(torrent.name);
                }
            }
        }
        Ok(())
    }

    async fn add_with_timeout(
        &self,
        torrent: &Torrent,
        download_dir: Option<&str>,
    ) -> Result<(), DispatchError> {
        match timeout(self.timeout, self.client.add(&torrent.url, download_dir)).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rss::FeedEntry;
    use crate::store::NewFeed;
    use crate::refresh::ingest;
    use crate::testutil::{test_feed, test_store, MockClient, RecordingReporter};

    use std::rc::Rc;

    use serde_json::json;
    use url::Url;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn entries(links: &[&str]) -> Vec<FeedEntry> {
        links
            .iter()
            .enumerate()
            .map(|(i, link)| {
                FeedEntry::new()
                    .with("title", format!("Torrent {i}"))
                    .with("link", *link)
            })
            .collect()
    }

    #[tokio::test]
    async fn one_rejection_does_not_block_siblings() {
        let (_dir, store) = test_store().await;
        let feed = test_feed(&store, "https://example.com/feed.xml", "link").await;
        let links = ["magnet:?xt=0", "magnet:?xt=1", "magnet:?xt=2", "magnet:?xt=3"];
        ingest(&store, &feed, &entries(&links), false).await.unwrap();

        let dispatcher = Dispatcher::new(
            MockClient::new().rejecting("magnet:?xt=1"),
            Duration::from_secs(5),
        );
        let summary = dispatcher.dispatch(&store, &feed).await.unwrap();

        assert_eq!(summary.dispatched, 3);
        assert_eq!(summary.failed, vec!["Torrent 1".to_string()]);
        assert_eq!(
            dispatcher.client.added_links(),
            vec!["magnet:?xt=0", "magnet:?xt=2", "magnet:?xt=3"]
        );

        let pending = store.pending_torrents(feed.id).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].url, "magnet:?xt=1");
    }

    #[tokio::test]
    async fn failed_torrent_is_retried_next_time() {
        let (_dir, store) = test_store().await;
        let feed = test_feed(&store, "https://example.com/feed.xml", "link").await;
        ingest(&store, &feed, &entries(&["magnet:?xt=0"]), false)
            .await
            .unwrap();

        let failing = Dispatcher::new(
            MockClient::new().rejecting("magnet:?xt=0"),
            Duration::from_secs(5),
        );
        assert_eq!(failing.dispatch(&store, &feed).await.unwrap().failed.len(), 1);

        let working = Dispatcher::new(MockClient::new(), Duration::from_secs(5));
        let summary = working.dispatch(&store, &feed).await.unwrap();
        assert_eq!(summary.dispatched, 1);
        assert!(summary.failed.is_empty());
    }

    #[tokio::test]
    async fn passes_download_dir_override() {
        let (_dir, store) = test_store().await;
        let feed = store
            .insert_feed(&NewFeed {
                name: "movies".to_string(),
                url: "https://example.com/movies.xml".to_string(),
                download_dir: Some("/data/movies".to_string()),
                tag: "link".to_string(),
            })
            .await
            .unwrap();
        let plain = test_feed(&store, "https://example.com/shows.xml", "link").await;
        ingest(&store, &feed, &entries(&["magnet:?xt=movie"]), false)
            .await
            .unwrap();
        ingest(&store, &plain, &entries(&["magnet:?xt=show"]), false)
            .await
            .unwrap();

        let dispatcher = Dispatcher::new(MockClient::new(), Duration::from_secs(5));
        dispatcher.dispatch(&store, &feed).await.unwrap();
        dispatcher.dispatch(&store, &plain).await.unwrap();

        assert_eq!(
            *dispatcher.client.added.borrow(),
            vec![
                ("magnet:?xt=movie".to_string(), Some("/data/movies".to_string())),
                ("magnet:?xt=show".to_string(), None),
            ]
        );
    }

    #[tokio::test]
    async fn nothing_pending_is_a_no_op() {
        let (_dir, store) = test_store().await;
        let feed = test_feed(&store, "https://example.com/feed.xml", "link").await;
        ingest(&store, &feed, &entries(&["magnet:?xt=0"]), true)
            .await
            .unwrap();

        let dispatcher = Dispatcher::new(MockClient::new(), Duration::from_secs(5));
        let summary = dispatcher.dispatch(&store, &feed).await.unwrap();

        assert_eq!(summary, DispatchSummary::default());
        assert!(dispatcher.client.added_links().is_empty());
    }

    struct StalledClient;

    #[async_trait(?Send)]
    impl DownloadClient for StalledClient {
        async fn add(&self, _link: &str, _download_dir: Option<&str>) -> Result<(), DispatchError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn unresponsive_client_times_out() {
        let (_dir, store) = test_store().await;
        let feed = test_feed(&store, "https://example.com/feed.xml", "link").await;
        ingest(&store, &feed, &entries(&["magnet:?xt=0"]), false)
            .await
            .unwrap();

        let dispatcher = Dispatcher::new(StalledClient, Duration::from_millis(10));
        let summary = dispatcher.dispatch(&store, &feed).await.unwrap();

        assert_eq!(summary.failed, vec!["Torrent 0".to_string()]);
        assert_eq!(store.pending_torrents(feed.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn progress_follows_submissions() {
        let (_dir, store) = test_store().await;
        let feed = test_feed(&store, "https://example.com/feed.xml", "link").await;
        ingest(&store, &feed, &entries(&["magnet:?xt=0", "magnet:?xt=1"]), false)
            .await
            .unwrap();

        let reporter = Rc::new(RecordingReporter::default());
        let dispatcher = Dispatcher::new(MockClient::new(), Duration::from_secs(5))
            .with_progress(reporter.clone());
        dispatcher.dispatch(&store, &feed).await.unwrap();

        assert_eq!(
            *reporter.events.borrow(),
            vec![
                "start dispatching feed.xml 2".to_string(),
                "advance Torrent 0".to_string(),
                "advance Torrent 1".to_string(),
                "finish".to_string(),
            ]
        );
    }

    async fn daemon(response: serde_json::Value) -> (MockServer, TransmissionClient) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transmission/rpc"))
            .and(body_partial_json(json!({ "method": "torrent-add" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(response))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/transmission/rpc", server.uri())).unwrap();
        let client = TransmissionClient::new(&Transmission { url, auth: None });
        (server, client)
    }

    #[tokio::test]
    async fn daemon_rejection_is_reported() {
        let (_server, client) = daemon(json!({
            "result": "invalid or corrupt torrent file",
            "arguments": {}
        }))
        .await;

        let err = client.add("https://example.com/bad.torrent", None).await.unwrap_err();

        match err {
            DispatchError::Rejected(reason) => {
                assert_eq!(reason, "invalid or corrupt torrent file")
            }
            other => panic!("expected a rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_torrent_counts_as_added() {
        let (server, client) = daemon(json!({
            "result": "success",
            "arguments": {
                "torrent-duplicate": { "hashString": "abc", "id": 1, "name": "x" }
            }
        }))
        .await;

        client
            .add("magnet:?xt=urn:btih:abc", Some("/data/shows"))
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["arguments"]["filename"], "magnet:?xt=urn:btih:abc");
        assert_eq!(body["arguments"]["download-dir"], "/data/shows");
    }

    #[tokio::test]
    async fn unreachable_daemon_is_an_rpc_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = Url::parse(&format!(
            "http://{}/transmission/rpc",
            listener.local_addr().unwrap()
        ))
        .unwrap();
        drop(listener);

        let client = TransmissionClient::new(&Transmission { url, auth: None });
        let err = client.add("magnet:?xt=0", None).await.unwrap_err();

        assert!(matches!(err, DispatchError::Rpc(_)));
    }
}
