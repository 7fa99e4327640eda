use cistern::config::{self, Credentials, Settings, Transmission};
use cistern::feeds::{self, FeedRequest};
use cistern::progress::{
    NoopReporter, ProgressEvent, ProgressReporter, SharedProgressReporter, Stage,
};
use cistern::reconcile;
use cistern::refresh::Refresher;
use cistern::rss::HttpFeedSource;
use cistern::store::{Store, Toggle};
use cistern::transmission::{Dispatcher, TransmissionClient};

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use url::Url;

/// Download torrents from RSS feeds through transmission
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Directory holding config.toml and the database [default: $CISTERNHOME or ~/.cistern]
    #[clap(long)]
    home: Option<PathBuf>,

    /// Don't draw progress bars
    #[clap(short, long)]
    quiet: bool,

    /// Without a command, refresh enabled feeds and send new torrents to transmission
    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[clap(flatten)]
    Store(StoreCommand),
    /// Writes the transmission connection settings
    Setup {
        /// Transmission RPC endpoint
        #[clap(long, default_value = config::DEFAULT_RPC_URL)]
        url: Url,
        #[clap(long, requires = "password")]
        username: Option<String>,
        #[clap(long, requires = "username")]
        password: Option<String>,
    },
}

/// Commands working on the database.
#[derive(Subcommand, Debug)]
enum StoreCommand {
    /// Adds a feed of torrents
    AddFeed {
        /// Name of the feed (for your reference)
        #[clap(long)]
        name: String,
        /// URL of the feed
        #[clap(long)]
        url: String,
        /// Custom download directory
        #[clap(long)]
        directory: Option<String>,
        /// Treat the feed's current entries as already downloaded
        #[clap(long)]
        mark_downloaded: bool,
    },
    /// Refreshes all feeds and records torrents to download later
    Refresh,
    /// Lists either feeds or torrents
    List {
        #[clap(value_enum)]
        kind: ListKind,
        /// Print JSON instead of a table
        #[clap(long)]
        json: bool,
    },
    /// Enables a feed to add torrents
    EnableFeed { feed_id: String },
    /// Disables a feed from adding new torrents
    DisableFeed { feed_id: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ListKind {
    Feeds,
    Torrents,
}

fn main() -> Result<ExitCode> {
    pretty_env_logger::formatted_builder()
        .filter(None, log::LevelFilter::Warn)
        .filter(Some("cistern"), log::LevelFilter::Info)
        .parse_filters(&std::env::var("RUST_LOG").unwrap_or_default())
        .init();

    let args = Args::parse();

    let home = match args.home {
        Some(home) => home,
        None => config::cistern_home()
            .context("Unable to find the home directory, set CISTERNHOME")?,
    };
    ensure_exists(&home)?;

    let progress: SharedProgressReporter = if args.quiet {
        NoopReporter::shared()
    } else {
        Rc::new(ProgressBars::default())
    };

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Unable to start the async runtime")?
        .block_on(run(args.command, &home, progress))
}

async fn run(
    command: Option<Command>,
    home: &Path,
    progress: SharedProgressReporter,
) -> Result<ExitCode> {
    let config_path = home.join("config.toml");

    let command = match command {
        Some(Command::Setup {
            url,
            username,
            password,
        }) => return setup(&config_path, url, username, password),
        Some(Command::Store(command)) => Some(command),
        None => None,
    };

    let settings = config::load_settings(&config_path)?;
    let db_path = settings.database_path(home);
    let store = Store::open(&db_path)
        .await
        .with_context(|| format!("Unable to open database {db_path:?}"))?;

    let result = execute(command, &config_path, &settings, &store, progress).await;
    store.close().await;
    result
}

async fn execute(
    command: Option<StoreCommand>,
    config_path: &Path,
    settings: &Settings,
    store: &Store,
    progress: SharedProgressReporter,
) -> Result<ExitCode> {
    let timeout = settings.timeout();
    let source = HttpFeedSource::new(timeout).context("Unable to create the HTTP client")?;
    let refresher = Refresher::new(source, timeout).with_progress(progress.clone());

    match command {
        None => {
            let cfg = config::load_config(config_path)?
                .context("No configuration found, run `cistern setup` first")?;
            let dispatcher = Dispatcher::new(TransmissionClient::new(&cfg.transmission), timeout)
                .with_progress(progress);
            let report = reconcile::run(store, &refresher, &dispatcher).await?;

            let failed = report.failed();
            if failed.is_empty() {
                return Ok(ExitCode::SUCCESS);
            }
            eprintln!("Failed to download torrents, they will be retried on the next run:");
            for name in failed {
                eprintln!("{name}");
            }
            Ok(ExitCode::from(2))
        }
        Some(StoreCommand::AddFeed {
            name,
            url,
            directory,
            mark_downloaded,
        }) => {
            let request = FeedRequest {
                name,
                url,
                download_dir: directory,
                mark_downloaded,
            };
            let (feed, summary) = feeds::onboard_feed(store, &refresher, request).await?;
            println!(
                "Added feed `{}` (id {}) reading links from `{}`, {} torrent(s) recorded",
                feed.name, feed.id, feed.tag, summary.inserted
            );
            Ok(ExitCode::SUCCESS)
        }
        Some(StoreCommand::Refresh) => {
            for (feed, result) in reconcile::refresh_all(store, &refresher).await? {
                match result {
                    Ok(summary) => println!("{}: {} new torrent(s)", feed.name, summary.inserted),
                    Err(err) => eprintln!("{}: {err}", feed.name),
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Some(StoreCommand::List { kind, json }) => {
            list(store, kind, json).await?;
            Ok(ExitCode::SUCCESS)
        }
        Some(StoreCommand::EnableFeed { feed_id }) => {
            let (feed, toggle) = feeds::enable_feed(store, &feed_id).await?;
            match toggle {
                Toggle::Changed => println!("{} enabled!", feed.name),
                Toggle::Unchanged => println!("{} is already enabled!", feed.name),
            }
            Ok(ExitCode::SUCCESS)
        }
        Some(StoreCommand::DisableFeed { feed_id }) => {
            let (feed, toggle) = feeds::disable_feed(store, &feed_id).await?;
            match toggle {
                Toggle::Changed => println!("{} disabled!", feed.name),
                Toggle::Unchanged => println!("{} is already disabled!", feed.name),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// One bar per feed stage, drawn on stderr.
#[derive(Default)]
struct ProgressBars {
    current: RefCell<Option<ProgressBar>>,
}

impl ProgressReporter for ProgressBars {
    fn report(&self, event: ProgressEvent<'_>) {
        match event {
            ProgressEvent::Started { feed, stage, total } => {
                let action = match stage {
                    Stage::Refreshing => "recording",
                    Stage::Dispatching => "sending",
                };
                let style = ProgressStyle::with_template(
                    "{prefix} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar());
                let bar = ProgressBar::new(total as u64)
                    .with_style(style)
                    .with_prefix(format!("{feed}: {action}"));
                *self.current.borrow_mut() = Some(bar);
            }
            ProgressEvent::Advanced { name } => {
                if let Some(bar) = self.current.borrow().as_ref() {
                    bar.set_message(name.to_string());
                    bar.inc(1);
                }
            }
            ProgressEvent::Finished => {
                if let Some(bar) = self.current.borrow_mut().take() {
                    bar.finish_and_clear();
                }
            }
        }
    }
}

async fn list(store: &Store, kind: ListKind, json: bool) -> Result<()> {
    match kind {
        ListKind::Feeds => {
            let feeds = store.feeds().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&feeds)?);
                return Ok(());
            }
            let rows = feeds
                .into_iter()
                .map(|feed| {
                    vec![
                        feed.id.to_string(),
                        feed.name,
                        feed.url,
                        feed.download_dir,
                        yes_no(feed.enabled).to_string(),
                    ]
                })
                .collect();
            print_table(&["ID", "Name", "URL", "Download Directory", "Enabled"], rows);
        }
        ListKind::Torrents => {
            let torrents = store.torrents().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&torrents)?);
                return Ok(());
            }
            let rows = torrents
                .into_iter()
                .map(|listing| {
                    vec![
                        listing.torrent.id.to_string(),
                        listing.torrent.name,
                        listing.feed_name,
                        yes_no(listing.torrent.downloaded).to_string(),
                        listing.torrent.date_added.format("%Y-%m-%d %H:%M").to_string(),
                    ]
                })
                .collect();
            print_table(&["ID", "Name", "Feed", "Downloaded", "Date Added"], rows);
        }
    }
    Ok(())
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "Yes"
    } else {
        "No"
    }
}

fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let mut widths: Vec<usize> = headers.iter().map(|header| header.chars().count()).collect();
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    println!("{}", format_row(headers, &widths));
    let rule: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
    println!("{}", rule.join("  "));
    for row in &rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        println!("{}", format_row(&cells, &widths));
    }
}

fn format_row(cells: &[&str], widths: &[usize]) -> String {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, &width)| format!("{cell:<width$}"))
        .collect();
    padded.join("  ").trim_end().to_string()
}

fn setup(
    path: &Path,
    url: Url,
    username: Option<String>,
    password: Option<String>,
) -> Result<ExitCode> {
    let auth = username
        .zip(password)
        .map(|(username, password)| Credentials { username, password });

    config::write_setup(path, Transmission { url, auth })?;

    println!("Successfully set up! Use the `add-feed` command to add your first RSS feed.");
    Ok(ExitCode::SUCCESS)
}

fn ensure_exists(dir: &Path) -> Result<()> {
    let exists = dir
        .try_exists()
        .with_context(|| format!("Couldn't access directory {dir:?}"))?;

    if !exists {
        log::info!("Creating directory {dir:?}");
        fs::create_dir_all(dir).with_context(|| format!("Unable to create directory {dir:?}"))?;
    }

    Ok(())
}
