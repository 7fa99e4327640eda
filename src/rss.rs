use crate::error::{FeedError, ParseError};

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use rss::{Channel, Item};

/// A feed item flattened into field name → value.
///
/// Fields whose value is not a plain string (lists, nested elements) are
/// present with `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedEntry {
    fields: BTreeMap<String, Option<String>>,
}

impl FeedEntry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: &str, value: impl Into<String>) -> Self {
        self.insert(field, Some(value.into()));
        self
    }

    pub fn insert(&mut self, field: &str, value: Option<String>) {
        self.fields.insert(field.to_string(), value);
    }

    /// String value of `field`; `None` if missing or not a string.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|value| value.as_deref())
    }

    pub fn title(&self) -> Option<&str> {
        self.get("title")
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.fields
            .iter()
            .map(|(field, value)| (field.as_str(), value.as_deref()))
    }
}

#[async_trait(?Send)]
pub trait FeedSource {
    async fn fetch(&self, url: &str) -> Result<Vec<FeedEntry>, FeedError>;
}

pub struct HttpFeedSource {
    client: reqwest::Client,
}

impl HttpFeedSource {
    /// Connections that take longer than `connect_timeout` to establish
    /// are abandoned.
    pub fn new(connect_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait(?Send)]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, url: &str) -> Result<Vec<FeedEntry>, FeedError> {
        let http_err = |source| FeedError::Http {
            url: url.to_string(),
            source,
        };

        let response = self.client.get(url).send().await.map_err(http_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content = response.bytes().await.map_err(http_err)?;
        parse_entries(&content).map_err(|source| FeedError::Parse {
            url: url.to_string(),
            source,
        })
    }
}

/// Parse an RSS document, falling back to Atom.
pub fn parse_entries(content: &[u8]) -> Result<Vec<FeedEntry>, ParseError> {
    match Channel::read_from(content) {
        Ok(channel) => Ok(channel.items().iter().map(flatten_item).collect()),
        Err(rss_err) => match feed_rs::parser::parse(content) {
            Ok(feed) => Ok(feed.entries.into_iter().map(flatten_entry).collect()),
            Err(atom) => Err(ParseError { rss: rss_err, atom }),
        },
    }
}

fn flatten_item(item: &Item) -> FeedEntry {
    let mut entry = FeedEntry::new();

    let text_fields = [
        ("title", item.title()),
        ("link", item.link()),
        ("summary", item.description()),
        ("author", item.author()),
        ("comments", item.comments()),
        ("published", item.pub_date()),
        ("id", item.guid().map(|guid| guid.value())),
        ("enclosure", item.enclosure().map(|enclosure| enclosure.url())),
    ];
    for (field, value) in text_fields {
        if let Some(value) = value {
            entry.insert(field, Some(value.to_string()));
        }
    }

    if !item.categories().is_empty() {
        entry.insert("tags", None);
    }

    // e.g. <torrent:magnetURI> becomes `torrent_magneturi`
    for (prefix, elements) in item.extensions() {
        for (name, values) in elements {
            let value = match values.as_slice() {
                [single] if single.children().is_empty() => single.value().map(str::to_string),
                _ => None,
            };
            entry.insert(&format!("{prefix}_{name}").to_lowercase(), value);
        }
    }

    entry
}

fn flatten_entry(atom: feed_rs::model::Entry) -> FeedEntry {
    let mut entry = FeedEntry::new();

    if !atom.id.is_empty() {
        entry.insert("id", Some(atom.id));
    }
    if let Some(title) = atom.title {
        entry.insert("title", Some(title.content));
    }
    if let Some(summary) = atom.summary {
        entry.insert("summary", Some(summary.content));
    }
    if let Some(published) = atom.published.or(atom.updated) {
        entry.insert("published", Some(published.to_rfc3339()));
    }
    if let Some(author) = atom.authors.into_iter().next() {
        entry.insert("author", Some(author.name));
    }

    let (enclosures, others): (Vec<_>, Vec<_>) = atom
        .links
        .into_iter()
        .partition(|link| link.rel.as_deref() == Some("enclosure"));
    if let Some(link) = others.into_iter().next() {
        entry.insert("link", Some(link.href));
    }
    if let Some(link) = enclosures.into_iter().next() {
        entry.insert("enclosure", Some(link.href));
    }

    if !atom.categories.is_empty() {
        entry.insert("tags", None);
    }

    entry
}
