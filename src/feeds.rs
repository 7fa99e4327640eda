//! Feed lifecycle: onboarding and enabling/disabling.

use crate::error::Error;
use crate::refresh::{RefreshSummary, Refresher};
use crate::rss::FeedSource;
use crate::store::{Feed, NewFeed, Store, Toggle};
use crate::tag::detect_tag;

use url::Url;

#[derive(Debug, Clone)]
pub struct FeedRequest {
    pub name: String,
    pub url: String,
    pub download_dir: Option<String>,
    /// Record the feed's current entries as already downloaded.
    pub mark_downloaded: bool,
}

/// Only `http` and `https` feeds are accepted.
pub fn validate_url(url: &str) -> Result<Url, Error> {
    match Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(parsed),
        _ => Err(Error::InvalidUrl(url.to_string())),
    }
}

/// Subscribe to a new feed.
///
/// The link field is detected from the first entry; nothing is persisted if
/// the URL is invalid, the feed can't be fetched, or no field holds a magnet
/// or `.torrent` link. The entries fetched for detection are recorded right
/// away, as already downloaded when `mark_downloaded` is set.
pub async fn onboard_feed<S: FeedSource>(
    store: &Store,
    refresher: &Refresher<S>,
    request: FeedRequest,
) -> Result<(Feed, RefreshSummary), Error> {
    validate_url(&request.url)?;

    let entries = refresher.fetch(&request.url).await?;
    let first = entries
        .first()
        .ok_or_else(|| Error::EmptyFeed(request.url.clone()))?;
    let tag = detect_tag(first)
        .ok_or_else(|| Error::NoLinkFieldFound(request.url.clone()))?
        .to_string();
    log::info!("{}: links found in `{tag}`", request.name);

    let download_dir = request.download_dir.filter(|dir| !dir.is_empty());
    let feed = store
        .insert_feed(&NewFeed {
            name: request.name,
            url: request.url,
            download_dir,
            tag,
        })
        .await?;

    let summary = refresher
        .ingest(store, &feed, &entries, request.mark_downloaded)
        .await?;
    Ok((feed, summary))
}

pub fn parse_feed_id(raw: &str) -> Result<i64, Error> {
    raw.trim()
        .parse()
        .map_err(|_| Error::InvalidFeedIdentifier(raw.to_string()))
}

pub async fn enable_feed(store: &Store, raw_id: &str) -> Result<(Feed, Toggle), Error> {
    set_enabled(store, raw_id, true).await
}

pub async fn disable_feed(store: &Store, raw_id: &str) -> Result<(Feed, Toggle), Error> {
    set_enabled(store, raw_id, false).await
}

async fn set_enabled(store: &Store, raw_id: &str, enabled: bool) -> Result<(Feed, Toggle), Error> {
    let id = parse_feed_id(raw_id)?;
    let toggle = store
        .set_feed_enabled(id, enabled)
        .await?
        .ok_or_else(|| Error::InvalidFeedIdentifier(raw_id.to_string()))?;
    let feed = store
        .feed(id)
        .await?
        .ok_or_else(|| Error::InvalidFeedIdentifier(raw_id.to_string()))?;
    Ok((feed, toggle))
}
