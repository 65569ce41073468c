use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use tabtime::aggregate::{Aggregator, Report, Summary};
use tabtime::browser::{Message, Tabs};
use tabtime::cache::DurationCache;
use tabtime::cascade::Resolver;
use tabtime::config::{self, Config};
use tabtime::coordinator::Coordinator;
use tabtime::duration::format_clock;
use tabtime::fetch::HttpFetcher;
use tabtime::logging;
use tabtime::session::SessionTabs;
use tabtime::store::{JsonFileStore, KeyValueStore};
use tabtime::video_url::{extract_video_id, is_video_url, normalize_video_url};

// --- CLI ---

#[derive(Parser, Debug)]
#[command(author, version = env!("CARGO_PKG_VERSION"), about = "Total playback time of open YouTube tabs", long_about = None)]
struct Args {
  /// Directory for the duration cache and summary (overrides prefs.toml)
  #[arg(long, global = true)]
  store_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Resolve every video tab in a session file and store the totals
  Refresh {
    /// JSON session file exported from the browser
    #[arg(long)]
    tabs: PathBuf,
    /// Print one line per tab
    #[arg(short, long)]
    verbose: bool,
  },
  /// Re-aggregate whenever the session file changes
  Watch {
    #[arg(long)]
    tabs: PathBuf,
    /// Seconds between polls of the session file
    #[arg(long)]
    interval: Option<u64>,
  },
  /// Show the last stored totals
  Summary,
  /// List cached durations
  Cache {
    /// Forget every cached duration
    #[arg(long)]
    clear: bool,
  },
  /// Show how a URL is classified
  Inspect { url: String },
  /// Save preferences to prefs.toml
  Config {
    #[arg(long)]
    user_agent: Option<String>,
    #[arg(long)]
    watch_interval: Option<u64>,
  },
  /// Print shell completions
  Completions { shell: Shell },
}

// --- Wiring ---

struct Pipeline {
  aggregator: Arc<Aggregator>,
}

impl Pipeline {
  fn new(config: &Config, store_dir: PathBuf, tabs: Arc<dyn Tabs>) -> Result<Self> {
    let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::new(store_dir));
    let fetcher = Arc::new(HttpFetcher::new(config.user_agent.as_deref())?);
    let cache = DurationCache::new(Arc::clone(&store));
    let resolver = Resolver::new(cache, tabs, fetcher);
    let aggregator = Arc::new(Aggregator::new(resolver, Arc::clone(&store)));
    Ok(Self { aggregator })
  }

  fn cache(&self) -> &DurationCache {
    self.aggregator.resolver().cache()
  }
}

/// Tab source for commands that never enumerate tabs.
fn no_tabs() -> Arc<dyn Tabs> {
  Arc::new(SessionTabs::empty())
}

// --- Output ---

fn print_summary(summary: &Summary) {
  println!("Tabs:     {}", summary.total_tabs);
  println!("Known:    {}", summary.known_count);
  println!("Unknown:  {}", summary.unknown_count);
  println!("Total:    {}", format_clock(summary.total_seconds));
  if let Some(at) = chrono::DateTime::from_timestamp_millis(summary.updated_at) {
    println!("Updated:  {}", at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"));
  }
}

fn print_tabs(report: &Report) {
  for t in &report.tabs {
    let id = t.tab.id.map_or_else(|| "-".to_string(), |id| id.to_string());
    let video = t.video_id.as_deref().unwrap_or("-");
    match t.resolution {
      Some(r) => println!("{:>6}  {:<14} {:>9}  {}", id, video, format_clock(r.seconds), r.strategy.label()),
      None => println!("{:>6}  {:<14} {:>9}  unknown", id, video, "?"),
    }
  }
  println!();
}

// --- Commands ---

async fn refresh(config: &Config, store_dir: PathBuf, tabs: PathBuf, verbose: bool) -> Result<()> {
  let session: Arc<dyn Tabs> = Arc::new(SessionTabs::open(&tabs).await?);
  let pipeline = Pipeline::new(config, store_dir, session)?;
  let coordinator = Coordinator::new(Arc::clone(&pipeline.aggregator));

  let report = coordinator.handle_message(Message::RefreshTotals).await.context("Refresh was not handled")??;
  pipeline.cache().flush().await?;

  if verbose {
    print_tabs(&report);
  }
  print_summary(&report.summary);
  Ok(())
}

async fn watch(config: &Config, store_dir: PathBuf, tabs: PathBuf, interval: u64) -> Result<()> {
  let session = Arc::new(SessionTabs::open(&tabs).await?);
  let pipeline = Pipeline::new(config, store_dir, session.clone())?;
  let coordinator = Arc::new(Coordinator::new(Arc::clone(&pipeline.aggregator)));

  let report = coordinator.on_startup().await?;
  print_summary(&report.summary);

  let runner = {
    let coordinator = Arc::clone(&coordinator);
    let events = session.subscribe();
    tokio::spawn(async move { coordinator.run(events).await })
  };

  let mut ticker = tokio::time::interval(Duration::from_secs(interval));
  let mut last_printed = report.summary.updated_at;
  info!(path = %session.path().display(), interval, "watch: polling session file");
  loop {
    tokio::select! {
      _ = ticker.tick() => {
        match session.reload().await {
          Ok(0) => {}
          Ok(changes) => info!(changes, "watch: session changed"),
          Err(e) => warn!(err = %format!("{:#}", e), "watch: failed to reload session"),
        }
        // Scheduled refreshes land in the store; report each new one once.
        if let Some(summary) = coordinator.aggregator().last_summary().await?
          && summary.updated_at != last_printed
        {
          last_printed = summary.updated_at;
          println!("--");
          print_summary(&summary);
        }
      }
      _ = tokio::signal::ctrl_c() => break,
    }
  }

  runner.abort();
  pipeline.cache().flush().await?;
  Ok(())
}

async fn show_cache(config: &Config, store_dir: PathBuf, clear: bool) -> Result<()> {
  let pipeline = Pipeline::new(config, store_dir, no_tabs())?;
  let cache = pipeline.cache();
  cache.load().await;

  if clear {
    let count = cache.len();
    cache.clear().await?;
    println!("Cleared {} cached durations.", count);
    return Ok(());
  }

  for (id, entry) in cache.entries() {
    println!("{:<14} {:>9}  {}", id, format_clock(entry.duration_seconds), entry.source.label());
  }
  println!("{} cached durations.", cache.len());
  Ok(())
}

async fn show_summary(config: &Config, store_dir: PathBuf) -> Result<()> {
  let pipeline = Pipeline::new(config, store_dir, no_tabs())?;
  match pipeline.aggregator.last_summary().await? {
    Some(summary) => print_summary(&summary),
    None => println!("No totals stored yet. Run `tabtime refresh --tabs <file>` first."),
  }
  Ok(())
}

fn inspect(url: &str) {
  println!("Video URL:  {}", is_video_url(url));
  println!("Video id:   {}", extract_video_id(url).as_deref().unwrap_or("-"));
  println!("Normalized: {}", normalize_video_url(url));
}

// --- Main ---

#[tokio::main]
async fn main() -> Result<()> {
  let args = Args::parse();
  let mut config = Config::load();
  let store_dir = args.store_dir.clone().unwrap_or_else(|| config.store_dir());

  // Logging is best-effort; the commands work without it.
  let _log_guard = logging::init(&config::log_dir()).ok();

  match args.command {
    Command::Refresh { tabs, verbose } => refresh(&config, store_dir, tabs, verbose).await,
    Command::Watch { tabs, interval } => {
      let interval = interval.filter(|s| *s > 0).unwrap_or_else(|| config.watch_interval_secs());
      watch(&config, store_dir, tabs, interval).await
    }
    Command::Summary => show_summary(&config, store_dir).await,
    Command::Cache { clear } => show_cache(&config, store_dir, clear).await,
    Command::Inspect { url } => {
      inspect(&url);
      Ok(())
    }
    Command::Config { user_agent, watch_interval } => {
      if let Some(dir) = args.store_dir {
        config.store_dir = Some(dir);
      }
      if user_agent.is_some() {
        config.user_agent = user_agent;
      }
      if watch_interval.is_some() {
        config.watch_interval_secs = watch_interval;
      }
      config.save();
      print!("{}", toml::to_string(&config).context("Failed to render preferences")?);
      Ok(())
    }
    Command::Completions { shell } => {
      clap_complete::generate(shell, &mut Args::command(), "tabtime", &mut std::io::stdout());
      Ok(())
    }
  }
}
