use crate::error::StoreError;

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqliteConnection, SqlitePool};

/// Latest schema version, stored in `PRAGMA user_version`.
const SCHEMA_VERSION: i64 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Feed {
    pub id: i64,
    pub name: String,
    pub url: String,
    /// Empty when the daemon's default directory should be used.
    pub download_dir: String,
    /// Entry field holding the magnet or `.torrent` link.
    pub tag: String,
    pub enabled: bool,
}

impl Feed {
    pub fn download_override(&self) -> Option<&str> {
        Some(self.download_dir.as_str()).filter(|dir| !dir.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct NewFeed {
    pub name: String,
    pub url: String,
    pub download_dir: Option<String>,
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Torrent {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub feed_id: i64,
    pub downloaded: bool,
    pub date_added: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct NewTorrent<'a> {
    pub name: &'a str,
    pub url: &'a str,
    pub feed_id: i64,
    pub downloaded: bool,
}

/// A torrent together with the name of the feed it came from.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TorrentListing {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub torrent: Torrent,
    pub feed_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Changed,
    Unchanged,
}

/// Feed and torrent records backed by SQLite.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if needed) the database at `path` and bring its schema
    /// up to date.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);

        // Single writer, single process run.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        let (mut version,): (i64,) = sqlx::query_as("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await?;

        while version < SCHEMA_VERSION {
            let next = version + 1;
            let mut tx = self.pool.begin().await?;
            apply_migration(next, &mut *tx)
                .await
                .map_err(|source| StoreError::Migration {
                    version: next,
                    source,
                })?;
            // PRAGMA does not accept bound parameters
            sqlx::query(&format!("PRAGMA user_version = {next}"))
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;

            log::info!("Database schema migrated to version {next}");
            version = next;
        }

        Ok(())
    }

    pub async fn insert_feed(&self, feed: &NewFeed) -> Result<Feed, StoreError> {
        let inserted = sqlx::query_as(
            "INSERT INTO feed (name, url, download_dir, tag, enabled) VALUES (?, ?, ?, ?, 1)
             RETURNING id, name, url, download_dir, tag, enabled",
        )
        .bind(&feed.name)
        .bind(&feed.url)
        .bind(feed.download_dir.as_deref().unwrap_or_default())
        .bind(&feed.tag)
        .fetch_one(&self.pool)
        .await?;
        Ok(inserted)
    }

    pub async fn feeds(&self) -> Result<Vec<Feed>, StoreError> {
        let feeds = sqlx::query_as(
            "SELECT id, name, url, download_dir, tag, enabled FROM feed ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    pub async fn enabled_feeds(&self) -> Result<Vec<Feed>, StoreError> {
        let feeds = sqlx::query_as(
            "SELECT id, name, url, download_dir, tag, enabled FROM feed WHERE enabled = 1 ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    pub async fn feed(&self, id: i64) -> Result<Option<Feed>, StoreError> {
        let feed = sqlx::query_as(
            "SELECT id, name, url, download_dir, tag, enabled FROM feed WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(feed)
    }

    /// Returns `None` when no feed has this id.
    pub async fn set_feed_enabled(
        &self,
        id: i64,
        enabled: bool,
    ) -> Result<Option<Toggle>, StoreError> {
        let result = sqlx::query("UPDATE feed SET enabled = ? WHERE id = ? AND enabled != ?")
            .bind(enabled)
            .bind(id)
            .bind(enabled)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            return Ok(Some(Toggle::Changed));
        }
        Ok(self.feed(id).await?.map(|_| Toggle::Unchanged))
    }

    /// Insert the torrent unless one with the same URL is already known.
    /// Returns whether a new row was created.
    pub async fn insert_torrent_if_absent(
        &self,
        torrent: NewTorrent<'_>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO torrent (name, url, feed_id, downloaded, date_added) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(url) DO NOTHING",
        )
        .bind(torrent.name)
        .bind(torrent.url)
        .bind(torrent.feed_id)
        .bind(torrent.downloaded)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn torrents(&self) -> Result<Vec<TorrentListing>, StoreError> {
        let torrents = sqlx::query_as(
            "SELECT t.id, t.name, t.url, t.feed_id, t.downloaded, t.date_added, f.name AS feed_name
             FROM torrent t JOIN feed f ON f.id = t.feed_id
             ORDER BY t.id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(torrents)
    }

    /// Torrents of `feed_id` not yet handed to the download client.
    pub async fn pending_torrents(&self, feed_id: i64) -> Result<Vec<Torrent>, StoreError> {
        let torrents = sqlx::query_as(
            "SELECT id, name, url, feed_id, downloaded, date_added FROM torrent
             WHERE feed_id = ? AND downloaded = 0 ORDER BY id",
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(torrents)
    }

    /// Flip `downloaded` to true. Returns false if it already was.
    pub async fn mark_downloaded(&self, torrent_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE torrent SET downloaded = 1 WHERE id = ? AND downloaded = 0")
            .bind(torrent_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

async fn apply_migration(version: i64, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    match version {
        // Databases created before versioning already have both tables.
        1 => {
            sqlx::query(
                "CREATE TABLE IF NOT EXISTS feed (
                    id INTEGER NOT NULL PRIMARY KEY,
                    name VARCHAR(255) NOT NULL,
                    url VARCHAR(255) NOT NULL,
                    download_dir VARCHAR(255) NOT NULL DEFAULT '',
                    tag VARCHAR(255) NOT NULL,
                    enabled INTEGER NOT NULL DEFAULT 1
                )",
            )
            .execute(&mut *conn)
            .await?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS torrent (
                    id INTEGER NOT NULL PRIMARY KEY,
                    name VARCHAR(255) NOT NULL,
                    url VARCHAR(255) NOT NULL,
                    feed_id INTEGER NOT NULL REFERENCES feed (id),
                    downloaded INTEGER NOT NULL DEFAULT 0
                )",
            )
            .execute(&mut *conn)
            .await?;

            sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS torrent_url ON torrent (url)")
                .execute(&mut *conn)
                .await?;
            sqlx::query("CREATE INDEX IF NOT EXISTS torrent_feed_id ON torrent (feed_id)")
                .execute(&mut *conn)
                .await?;
        }
        2 => {
            let (present,): (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM pragma_table_info('torrent') WHERE name = 'date_added'",
            )
            .fetch_one(&mut *conn)
            .await?;

            if present == 0 {
                // SQLite rejects non-constant defaults in ADD COLUMN
                sqlx::query("ALTER TABLE torrent ADD COLUMN date_added DATETIME")
                    .execute(&mut *conn)
                    .await?;
            }

            sqlx::query("UPDATE torrent SET date_added = ? WHERE date_added IS NULL")
                .bind(Utc::now())
                .execute(&mut *conn)
                .await?;
        }
        _ => {}
    }

    Ok(())
}
