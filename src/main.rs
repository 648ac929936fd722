use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Serialize;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use feedscope::config::{Config, OutputFormat};
use feedscope::feed::{Enclosure, FeedDocument, FeedItem, FeedType};
use feedscope::util::{strip_control_chars, truncate_to_width};

/// Get the config file path (~/.config/feedscope/config.toml)
fn default_config_path() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("feedscope")
        .join("config.toml"))
}

#[derive(Parser, Debug)]
#[command(
    name = "feedscope",
    about = "Inspect RSS 2.0, RSS 1.0 (RDF) and Atom feeds"
)]
struct Args {
    /// Feed file to read, or "-" for stdin
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Only list feed links with this relation (e.g. "self", "hub")
    #[arg(long, value_name = "REL")]
    rel: Option<String>,

    /// Print a JSON report instead of text
    #[arg(long)]
    json: bool,

    /// Config file (defaults to ~/.config/feedscope/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Serialize)]
struct FeedReport<'a> {
    feed_type: Option<FeedType>,
    title: Option<&'a str>,
    link: Option<&'a str>,
    links: Vec<String>,
    items: Vec<ItemReport>,
}

#[derive(Serialize)]
struct ItemReport {
    id: String,
    title: Option<String>,
    link: Option<String>,
    published: Option<DateTime<Utc>>,
    author: Option<String>,
    summary: Option<String>,
    comments_url: Option<String>,
    comments_count: Option<u32>,
    categories: Vec<String>,
    enclosures: Vec<Enclosure>,
}

impl From<&FeedItem<'_>> for ItemReport {
    fn from(item: &FeedItem<'_>) -> Self {
        Self {
            id: item.id(),
            title: item.title(),
            link: item.link(),
            published: item.published(),
            author: item.author(),
            summary: item.summary(),
            comments_url: item.comments_url(),
            comments_count: item.comments_count(),
            categories: item.categories(),
            enclosures: item.enclosures(),
        }
    }
}

fn read_input(input: &Path) -> Result<Vec<u8>> {
    if input.as_os_str() == "-" {
        let mut raw = Vec::new();
        std::io::stdin()
            .read_to_end(&mut raw)
            .context("Failed to read feed from stdin")?;
        return Ok(raw);
    }
    std::fs::read(input).with_context(|| format!("Failed to read feed '{}'", input.display()))
}

fn print_text(out: &mut impl Write, feed: &FeedDocument, config: &Config) -> Result<()> {
    let feed_type = feed
        .feed_type()
        .map(|t| t.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    writeln!(out, "Type:  {feed_type}")?;
    writeln!(out, "Title: {}", feed.title().unwrap_or("(untitled)"))?;
    writeln!(out, "Link:  {}", feed.link().unwrap_or("-"))?;

    let links = feed.links_by_relation(config.rel.as_deref());
    if !links.is_empty() {
        match config.rel.as_deref() {
            Some(rel) if !rel.is_empty() => writeln!(out, "Links (rel={rel}):")?,
            _ => writeln!(out, "Links:")?,
        }
        for href in links {
            writeln!(out, "  {href}")?;
        }
    }

    let items = feed.items();
    writeln!(out, "Items: {}", items.len())?;
    for item in items.iter().take(item_limit(config, items.len())) {
        let title = item.title().unwrap_or_else(|| "(untitled)".to_string());
        let date = item
            .published()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "----------".to_string());
        writeln!(
            out,
            "  {date}  {}",
            truncate_to_width(&title, config.title_width)
        )?;
    }
    Ok(())
}

fn print_json(out: &mut impl Write, feed: &FeedDocument, config: &Config) -> Result<()> {
    let items = feed.items();
    let report = FeedReport {
        feed_type: feed.feed_type(),
        title: feed.title(),
        link: feed.link(),
        links: feed.links_by_relation(config.rel.as_deref()),
        items: items
            .iter()
            .take(item_limit(config, items.len()))
            .map(ItemReport::from)
            .collect(),
    };
    serde_json::to_writer_pretty(&mut *out, &report).context("Failed to write JSON report")?;
    writeln!(out)?;
    Ok(())
}

fn item_limit(config: &Config, total: usize) -> usize {
    match config.max_items {
        0 => total,
        n => n,
    }
}

fn main() -> Result<()> {
    // Logs go to stderr so stdout stays parseable in --json mode
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config '{}'", config_path.display()))?;
    if args.rel.is_some() {
        config.rel = args.rel;
    }
    if args.json {
        config.format = OutputFormat::Json;
    }

    let raw = read_input(&args.input)?;
    tracing::debug!(bytes = raw.len(), input = %args.input.display(), "Read feed");

    let feed = FeedDocument::parse(raw, |s: &str| strip_control_chars(s).into_owned());

    if let Some(err) = feed.primary_error() {
        eprintln!("Error: {err}");
        for extra in feed.all_errors().iter().skip(1) {
            eprintln!("  {}", strip_control_chars(extra));
        }
        std::process::exit(1);
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match config.format {
        OutputFormat::Text => print_text(&mut out, &feed, &config)?,
        OutputFormat::Json => print_json(&mut out, &feed, &config)?,
    }
    Ok(())
}
