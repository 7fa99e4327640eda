use crate::rss::FeedEntry;

/// Pick the entry field that holds the downloadable link.
///
/// A field starting with `magnet:` wins over one ending in `.torrent`.
/// Non-string fields are ignored.
pub fn detect_tag(entry: &FeedEntry) -> Option<&str> {
    let mut torrent = None;

    for (field, value) in entry.fields() {
        let Some(value) = value else { continue };

        if value.starts_with("magnet:") {
            return Some(field);
        }
        if torrent.is_none() && value.ends_with(".torrent") {
            torrent = Some(field);
        }
    }

    torrent
}
