use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use console::Emoji;
use directories::ProjectDirs;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing_subscriber::{EnvFilter, fmt};

use podkeep::{
    CastStore, Config, DownloadScheduler, HttpClient, JsonStatePort, NoopReporter, ProgressEvent,
    ProgressReporter, ReqwestClient, RetryPolicy, SharedProgressReporter, TaskKey,
    scheduler::SchedulerStatus, sync,
};

// Emoji with fallback for terminals without Unicode support
static MICROPHONE: Emoji<'_, '_> = Emoji("🎙️  ", "");
static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[~] ");
static HEADPHONES: Emoji<'_, '_> = Emoji("🎧 ", "[i] ");
static DOWNLOAD: Emoji<'_, '_> = Emoji("📥 ", "[v] ");
static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "[+] ");
static FAILURE: Emoji<'_, '_> = Emoji("❌ ", "[!] ");
static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");
static CROSS: Emoji<'_, '_> = Emoji("✗ ", "x ");

/// Manage podcast subscriptions and download new episodes
#[derive(Parser, Debug)]
#[command(name = "podkeep")]
#[command(about = "Manage podcast subscriptions and download new episodes")]
#[command(version)]
struct Args {
    /// Application data directory
    #[arg(long, global = true)]
    appdata_dir: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Refresh all feeds, then download every pending episode
    Download {
        /// Re-download episodes that already have a file recorded
        #[arg(long)]
        force: bool,

        /// Replace files on disk instead of reusing them
        #[arg(long)]
        overwrite: bool,

        /// Quiet mode - suppress progress output
        #[arg(short, long)]
        quiet: bool,
    },

    /// Subscribe to a feed
    AddFeed {
        /// Feed URL
        #[arg(long)]
        url: String,

        /// Cast name; defaults to the feed's own title
        #[arg(long)]
        title: Option<String>,
    },

    /// Drop a subscription
    RemoveFeed {
        /// Cast name
        #[arg(long)]
        title: String,

        /// Also delete downloaded files
        #[arg(long)]
        delete_files: bool,
    },

    /// Rename a cast along with its directory
    RenameFeed {
        /// Current cast name
        #[arg(long)]
        title: String,

        /// New cast name
        #[arg(long)]
        new_title: String,
    },

    /// Refresh a single feed
    UpdateFeed {
        /// Cast name
        #[arg(long)]
        title: String,
    },

    /// Refresh every feed
    UpdateFeeds,

    /// Point a subscription at a different feed URL
    UpdateFeedUrl {
        /// Cast name
        #[arg(long)]
        title: String,

        /// New feed URL
        #[arg(long)]
        url: String,
    },

    /// Show subscriptions and their episodes
    List,
}

/// Feed-phase progress reporter using indicatif for terminal output
struct IndicatifReporter {
    main_bar: ProgressBar,
}

impl IndicatifReporter {
    fn new() -> Self {
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} {wide_msg}")
            .unwrap();

        let main_bar = ProgressBar::new_spinner();
        main_bar.set_style(style);
        main_bar.enable_steady_tick(Duration::from_millis(100));

        Self { main_bar }
    }

    fn finish(&self) {
        self.main_bar.finish_and_clear();
    }
}

impl ProgressReporter for IndicatifReporter {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::FetchingFeed { cast_uid, url } => {
                self.main_bar.set_message(format!(
                    "{SEARCH}Fetching {}: {}",
                    cast_uid.bold(),
                    url.cyan()
                ));
            }

            ProgressEvent::FeedReconciled {
                cast_uid,
                total_episodes,
                new_episodes,
            } => {
                self.main_bar.set_message(format!(
                    "{HEADPHONES}{} • {} episodes, {} new",
                    cast_uid.bold().green(),
                    total_episodes.to_string().cyan(),
                    new_episodes.to_string().yellow()
                ));
            }

            ProgressEvent::FeedFailed { cast_uid, error } => {
                self.main_bar
                    .println(format!("{FAILURE}{} - {}", cast_uid.red(), error.dimmed()));
            }

            // Transfer events are consumed by the scheduler's registry; the
            // download phase renders from status snapshots instead
            _ => {}
        }
    }
}

/// Terminal rendering of the scheduler registry, one bar per active transfer
struct DownloadDisplay {
    multi: MultiProgress,
    bars: HashMap<TaskKey, ProgressBar>,
    summary_bar: ProgressBar,
}

impl DownloadDisplay {
    fn new() -> Self {
        let multi = MultiProgress::new();

        let summary_style = ProgressStyle::default_bar()
            .template("{spinner:.green} {wide_msg}")
            .unwrap();

        let summary_bar = multi.add(ProgressBar::new_spinner());
        summary_bar.set_style(summary_style);
        summary_bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            multi,
            bars: HashMap::new(),
            summary_bar,
        }
    }

    fn update(&mut self, status: &SchedulerStatus) {
        for task in &status.running {
            let bar = self.bars.entry(task.key.clone()).or_insert_with(|| {
                let style = ProgressStyle::default_bar()
                    .template(&format!(
                        "  {DOWNLOAD}[{{bar:30.cyan/blue}}] {{bytes}}/{{total_bytes}} {{wide_msg}}"
                    ))
                    .unwrap()
                    .progress_chars("█▓░");

                let bar = self.multi.add(ProgressBar::new(task.expected.unwrap_or(0)));
                bar.set_style(style);
                bar.set_message(truncate_label(&task.key.episode_uid, 40));
                bar
            });

            if let Some(total) = task.expected {
                bar.set_length(total);
            }
            bar.set_position(task.received);
        }

        // Drop bars for transfers that reached a terminal state
        let running: Vec<&TaskKey> = status.running.iter().map(|task| &task.key).collect();
        self.bars.retain(|key, bar| {
            if running.contains(&key) {
                true
            } else {
                bar.finish_and_clear();
                false
            }
        });

        self.summary_bar.set_message(format!(
            "queued: {}, active: {}, completed: {}, failed: {}",
            status.waiting.len().to_string().cyan(),
            status.running.len().to_string().cyan(),
            status.completed.len().to_string().green(),
            if status.failed.is_empty() {
                status.failed.len().to_string().green()
            } else {
                status.failed.len().to_string().red()
            }
        ));
    }

    fn finish(&mut self) {
        for bar in self.bars.values() {
            bar.finish_and_clear();
        }
        self.bars.clear();
        self.summary_bar.finish_and_clear();
    }
}

fn truncate_label(label: &str, max_len: usize) -> String {
    if label.chars().count() <= max_len {
        label.to_string()
    } else {
        let kept: String = label.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

fn default_appdata_dir() -> PathBuf {
    ProjectDirs::from("", "", "podkeep")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    fmt().with_env_filter(filter).with_target(false).init();

    let appdata_dir = args.appdata_dir.clone().unwrap_or_else(default_appdata_dir);
    std::fs::create_dir_all(&appdata_dir).with_context(|| {
        format!(
            "Failed to create appdata directory {}",
            appdata_dir.display()
        )
    })?;

    let config = Config::load_or_init(&appdata_dir.join("config.json"))
        .context("Failed to load configuration")?;

    let client = ReqwestClient::new(&config.user_agent, config.network_timeout())
        .context("Failed to build HTTP client")?;

    let port = JsonStatePort::new(&appdata_dir);
    let mut store =
        CastStore::load(&port, &config.casts_directory).context("Failed to load store state")?;

    let retry = RetryPolicy::default();

    match args.command {
        Command::Download {
            force,
            overwrite,
            quiet,
        } => {
            run_download(&client, &mut store, &config, &retry, force, overwrite, quiet).await?;
            store.save(&port)?;
        }

        Command::AddFeed { url, title } => {
            let (cast_uid, stats) =
                sync::add_feed(&client, &mut store, &retry, &url, title.as_deref())
                    .await
                    .context("Failed to add feed")?;
            store.save(&port)?;

            println!(
                "{SUCCESS}Subscribed to {} • {} episodes",
                cast_uid.bold().green(),
                stats.new_episodes.to_string().cyan()
            );
        }

        Command::RemoveFeed {
            title,
            delete_files,
        } => {
            store
                .remove_cast(&title, delete_files)
                .context("Failed to remove feed")?;
            store.save(&port)?;

            println!(
                "{SUCCESS}Removed {} (downloaded files were kept)",
                title.bold()
            );
        }

        Command::RenameFeed { title, new_title } => {
            store
                .rename_cast(&title, &new_title)
                .context("Failed to rename feed")?;
            store.save(&port)?;

            println!("{SUCCESS}Renamed {} to {}", title.bold(), new_title.bold());
        }

        Command::UpdateFeed { title } => {
            let stats = sync::refresh_feed(&client, &mut store, &retry, &title, &NoopReporter::shared())
                .await
                .context("Failed to update feed")?;
            store.save(&port)?;

            println!(
                "{HEADPHONES}{} • {} entries, {} new",
                title.bold().green(),
                stats.total_entries.to_string().cyan(),
                stats.new_episodes.to_string().yellow()
            );
        }

        Command::UpdateFeeds => {
            let reporter: SharedProgressReporter = Arc::new(IndicatifReporter::new());
            let summary = sync::refresh_all_feeds(
                &client,
                &mut store,
                &retry,
                &sync::RefreshOptions::default(),
                &reporter,
            )
            .await;
            store.save(&port)?;

            println!(
                "{SUCCESS}{} feeds refreshed, {} new episodes",
                summary.refreshed.to_string().green(),
                summary.new_episodes.to_string().cyan()
            );
            for cast_uid in &summary.failed {
                println!("  {CROSS}{}", cast_uid.red());
            }
        }

        Command::UpdateFeedUrl { title, url } => {
            store
                .set_feed_url(&title, &url)
                .context("Failed to update feed URL")?;
            store.save(&port)?;

            println!("{SUCCESS}{} now points at {}", title.bold(), url.cyan());
        }

        Command::List => {
            print_listing(&store, &config);
        }
    }

    Ok(())
}

/// The full download cycle: refresh every feed, queue everything pending,
/// then watch the scheduler until it runs dry.
async fn run_download<C: HttpClient + Clone + 'static>(
    client: &C,
    store: &mut CastStore,
    config: &Config,
    retry: &RetryPolicy,
    force: bool,
    overwrite: bool,
    quiet: bool,
) -> Result<()> {
    if !quiet {
        println!(
            "\n{}{} {}\n",
            MICROPHONE,
            "podkeep".bold().magenta(),
            "- Podcast Downloader".dimmed()
        );
    }

    let feed_reporter: SharedProgressReporter = if quiet {
        NoopReporter::shared()
    } else {
        Arc::new(IndicatifReporter::new())
    };

    let refresh = sync::refresh_all_feeds(
        client,
        store,
        retry,
        &sync::RefreshOptions::default(),
        &feed_reporter,
    )
    .await;

    if !quiet {
        println!(
            "{HEADPHONES}{} feeds refreshed, {} new episodes",
            refresh.refreshed.to_string().green(),
            refresh.new_episodes.to_string().cyan()
        );
        for cast_uid in &refresh.failed {
            println!("  {CROSS}{} could not be refreshed", cast_uid.red());
        }
    }

    let (scheduler, mut completions) =
        DownloadScheduler::new(Arc::new(client.clone()), config.concurrent_downloads);
    let queued = sync::enqueue_pending(store, &scheduler, force, overwrite);

    if !quiet {
        println!(
            "{DOWNLOAD}{} transfers queued, {} skipped",
            queued.submitted.to_string().cyan(),
            queued.skipped.to_string().dimmed()
        );
    }

    let mut display = if quiet {
        None
    } else {
        Some(DownloadDisplay::new())
    };

    loop {
        sync::drain_completions(store, &mut completions);

        let status = scheduler.status();
        if let Some(ref mut display) = display {
            display.update(&status);
        }

        if scheduler.is_idle() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    sync::drain_completions(store, &mut completions);

    if let Some(ref mut display) = display {
        display.finish();
    }

    let status = scheduler.status();
    if !quiet {
        println!(
            "\n{SUCCESS}{} {} downloaded, {} failed",
            "Download complete:".bold().green(),
            status.completed.len().to_string().green().bold(),
            if status.failed.is_empty() {
                status.failed.len().to_string().green()
            } else {
                status.failed.len().to_string().red().bold()
            }
        );
        for key in &status.failed {
            println!(
                "  {CROSS}{} / {}",
                key.cast_uid.yellow(),
                truncate_label(&key.episode_uid, 60).dimmed()
            );
        }
        println!(
            "\n{FOLDER}Output: {}\n",
            config.casts_directory.display().to_string().cyan()
        );
    }

    if !status.failed.is_empty() && status.completed.is_empty() {
        std::process::exit(1);
    }

    Ok(())
}

fn print_listing(store: &CastStore, config: &Config) {
    if store.casts().is_empty() {
        println!("No subscriptions yet");
        return;
    }

    for (cast_uid, cast) in store.casts() {
        println!("{} {}", cast_uid.bold().magenta(), cast.url.dimmed());

        let Some(entry) = store.episodes().get(cast_uid) else {
            continue;
        };

        let mut episodes: Vec<_> = entry.items.iter().collect();
        episodes.sort_by_key(|(_, record)| record.date);
        if config.descending {
            episodes.reverse();
        }

        for (episode_uid, record) in episodes {
            let date = record
                .date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "????-??-??".to_string());
            let title = record.title.as_deref().unwrap_or(episode_uid);

            let mut markers = String::new();
            if record.localname.is_some() {
                markers.push_str(&format!(" {}", "[downloaded]".green()));
            }
            if record.listened.is_some() {
                markers.push_str(&format!(" {}", "[listened]".cyan()));
            }

            println!("  {} {}{}", date.dimmed(), title, markers);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_label_keeps_short_labels() {
        assert_eq!(truncate_label("short", 40), "short");
    }

    #[test]
    fn truncate_label_shortens_long_labels() {
        let long = "x".repeat(60);
        let result = truncate_label(&long, 40);
        assert_eq!(result.chars().count(), 40);
        assert!(result.ends_with("..."));
    }

    // Episode uids come from guids, links, and titles, which are free to
    // carry multibyte characters; truncation must not cut inside one
    #[test]
    fn truncate_label_cuts_multibyte_labels_on_character_boundaries() {
        let accented = "é".repeat(30);
        let result = truncate_label(&accented, 40);
        assert_eq!(result, accented);

        let long = "é".repeat(60);
        let result = truncate_label(&long, 40);
        assert_eq!(result.chars().count(), 40);
        assert!(result.ends_with("..."));

        let mixed = format!("Folge {} Sondersendung", "ü".repeat(80));
        let result = truncate_label(&mixed, 40);
        assert_eq!(result.chars().count(), 40);
    }
}
