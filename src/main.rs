use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

use feedstore::config::Config;
use feedstore::container::NewsContainer;
use feedstore::events::{ModelEvent, ModelListener};
use feedstore::feed::parse_feed;
use feedstore::model::{NewsBin, NewsState, StateSet};
use feedstore::persist::{PersistenceContext, Transaction};
use feedstore::store::{SqliteStore, StoreError};

/// Get the config directory path (~/.config/feedstore/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let config_dir = PathBuf::from(home).join(".config").join("feedstore");
    Ok(config_dir)
}

#[derive(Parser, Debug)]
#[command(name = "feedstore", about = "Store, merge and track RSS/Atom news items")]
struct Args {
    /// Config file (default: ~/.config/feedstore/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file, overriding the config
    #[arg(long, value_name = "FILE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse a downloaded feed document and merge it into the stored feed
    Import {
        /// The feed's URL, used as its identity
        link: Url,
        /// RSS or Atom document
        file: PathBuf,
    },
    /// Show every stored feed with its news counts
    Stats,
    /// Mark all visible news of a feed as read
    MarkRead { link: Url },
    /// Copy the unread news of a feed into a new news bin
    Archive {
        link: Url,
        /// Name of the bin to create
        name: String,
    },
    /// Delete a feed, its news and the bookmarks pointing at it
    DeleteFeed { link: Url },
}

/// Logs every committed change at debug level.
struct EventLog;

impl ModelListener for EventLog {
    fn entities_added(&self, events: &[&ModelEvent]) {
        for event in events {
            tracing::debug!(entity = ?event.key(), root = event.is_root(), "Added");
        }
    }

    fn entities_updated(&self, events: &[&ModelEvent]) {
        for event in events {
            tracing::debug!(entity = ?event.key(), root = event.is_root(), "Updated");
        }
    }

    fn entities_removed(&self, events: &[&ModelEvent]) {
        for event in events {
            tracing::debug!(entity = ?event.key(), root = event.is_root(), "Removed");
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path).context("Failed to load configuration")?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let db_path = match &args.database {
        Some(path) => path.clone(),
        None => config.database_path(&config_dir),
    };
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
    }

    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let store = match SqliteStore::open(db_path_str) {
        Ok(store) => store,
        Err(StoreError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of feedstore appears to be running. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    let context = PersistenceContext::new(Arc::new(store));
    context.add_catch_all_listener(Arc::new(EventLog));
    context.startup().context("Failed to start persistence")?;

    let outcome = run(&context, &config, args.command);

    if let Err(e) = context.shutdown() {
        tracing::warn!(error = %e, "Failed to close store cleanly");
    }
    outcome
}

fn run(context: &PersistenceContext, config: &Config, command: Command) -> Result<()> {
    let mut tx = context.begin()?;
    match command {
        Command::Import { link, file } => import(tx, config, &link, &file),
        Command::Stats => {
            for record in tx.feeds()? {
                let Some(feed) = tx.load_feed(record.id, 1)? else {
                    continue;
                };
                let mut container = NewsContainer::new(false);
                for news in &feed.news {
                    if let Some(id) = news.id() {
                        container.add_news(id, news.state())?;
                    }
                }
                println!(
                    "{:>6}  {:>6} unread  {:>6} visible  {}  {}",
                    record.id,
                    container.news_count(StateSet::unread()),
                    container.news_count(StateSet::visible()),
                    feed.title.as_deref().unwrap_or("(untitled)"),
                    feed.link,
                );
            }
            tx.rollback();
            Ok(())
        }
        Command::MarkRead { link } => {
            let feed = tx
                .load_feed_by_link(&link, config.activation_depth.max(1))?
                .with_context(|| format!("No feed stored for {link}"))?;
            let mut marked = 0;
            for news in feed.news.iter().filter(|n| n.is_visible()) {
                if news.state() != NewsState::Read {
                    news.set_state(NewsState::Read);
                    marked += 1;
                }
            }
            tx.save_and_cascade_all_news(&feed.news, true)?;
            tx.commit()?;
            println!("Marked {marked} news read");
            Ok(())
        }
        Command::Archive { link, name } => {
            let feed = tx
                .load_feed_by_link(&link, config.activation_depth.max(1))?
                .with_context(|| format!("No feed stored for {link}"))?;
            let bin = NewsBin::new(name, None, config.sorted_bins);
            tx.save_news_bin(&bin)?;
            let mut copied = 0;
            for news in feed
                .news
                .iter()
                .filter(|n| StateSet::unread().contains(n.state()))
            {
                tx.copy_to_bin(&bin, news)?;
                copied += 1;
            }
            tx.commit()?;
            println!("Copied {copied} news into bin {}", bin.id().unwrap_or_default());
            Ok(())
        }
        Command::DeleteFeed { link } => {
            if tx.delete_feed_by_link(&link)? {
                let events = tx.commit()?;
                println!("Deleted {link} ({} entities removed)", events.len());
            } else {
                tx.rollback();
                println!("No feed stored for {link}");
            }
            Ok(())
        }
    }
}

fn import(
    mut tx: Transaction<'_>,
    config: &Config,
    link: &Url,
    file: &std::path::Path,
) -> Result<()> {
    let bytes = std::fs::read(file)
        .with_context(|| format!("Failed to read feed document '{}'", file.display()))?;
    let parsed = parse_feed(link, &bytes, Utc::now())
        .with_context(|| format!("Failed to parse '{}'", file.display()))?;

    // Equivalence matching needs the stored news, so never load shallower.
    let feed = match tx.load_feed_by_link(link, config.activation_depth.max(1))? {
        Some(mut stored) => {
            let merged = stored.merge(&parsed);
            println!(
                "Merged {}: {} added, {} updated",
                link,
                merged.result.added().len(),
                merged.result.updated().len()
            );
            stored
        }
        None => {
            println!("Imported new feed {} with {} news", link, parsed.news.len());
            parsed
        }
    };

    tx.save_feed(&feed)?;
    let events = tx.commit()?;
    tracing::info!(feed = %link, events = events.len(), "Import finished");
    Ok(())
}
