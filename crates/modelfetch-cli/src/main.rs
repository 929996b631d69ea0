//! modelfetch - command-line front end for the model cache and downloader.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use modelfetch_core::hashing::verify_sha256;
use modelfetch_core::network::retry_async;
use modelfetch_core::{
    BatchEvent, BatchScheduler, CacheKey, CacheStore, ClearResult, DownloadItem, DownloadProgress,
    DownloadStatus, Downloader, FetchConfig, HubResolver, ProgressSink,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "modelfetch")]
#[command(about = "Download and cache model files from a Hugging Face compatible hub")]
#[command(version)]
struct Cli {
    /// Cache root (defaults to the Hugging Face hub cache)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Hub endpoint
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// JSON config file; environment variables are ignored when set
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show cache statistics
    Stats,
    /// List cached repositories
    List,
    /// Remove cached repositories
    Clear {
        #[command(flatten)]
        target: ClearTarget,
    },
    /// Delete partial files left by interrupted downloads
    CleanPartials,
    /// Download one file, resuming and retrying as needed
    Get {
        repo: String,
        file: String,
        #[arg(long, default_value = "main")]
        revision: String,
        /// Expected SHA-256 of the file
        #[arg(long)]
        sha256: Option<String>,
        /// Retries on transient failures (defaults to the configured value)
        #[arg(long)]
        retries: Option<u32>,
        /// Write into this directory instead of the cache
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Download several files of one repository concurrently
    Fetch {
        repo: String,
        #[arg(required = true)]
        files: Vec<String>,
        #[arg(long, default_value = "main")]
        revision: String,
        /// Number of concurrent workers
        #[arg(short, long)]
        workers: Option<usize>,
        /// Write into this directory instead of the cache
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct ClearTarget {
    /// Remove every cached repository
    #[arg(long)]
    all: bool,
    /// Remove one repository, e.g. TheBloke/Llama-2-7B-GGUF
    #[arg(long)]
    repo: Option<String>,
    /// Remove repositories matching a wildcard pattern, e.g. "TheBloke/*"
    #[arg(long)]
    pattern: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let default_level = if cli.debug { "debug" } else { "info" };
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let config = load_config(&cli)?;
    debug!(cache_dir = %config.cache_dir.display(), endpoint = %config.endpoint, "Configuration loaded");

    match cli.command {
        Command::Stats => stats(&config, cli.json),
        Command::List => list(&config, cli.json),
        Command::Clear { ref target } => clear(&config, target, cli.json),
        Command::CleanPartials => {
            let freed = CacheStore::from_config(&config).clean_partials()?;
            println!("Removed partial downloads: {} freed", format_bytes(freed));
            Ok(())
        }
        Command::Get {
            ref repo,
            ref file,
            ref revision,
            ref sha256,
            retries,
            ref output_dir,
        } => {
            let key = CacheKey::new(repo.as_str(), file.as_str(), revision.as_str());
            get(&config, &key, sha256.clone(), retries, output_dir.clone(), cli.json).await
        }
        Command::Fetch {
            ref repo,
            ref files,
            ref revision,
            workers,
            ref output_dir,
        } => {
            let items = files
                .iter()
                .map(|file| {
                    let item = DownloadItem::new(repo.as_str(), file.as_str())
                        .with_revision(revision.as_str());
                    match output_dir {
                        Some(dir) => item.with_output_dir(dir),
                        None => item,
                    }
                })
                .collect();
            fetch(&config, items, workers, cli.json).await
        }
    }
}

fn load_config(cli: &Cli) -> Result<FetchConfig> {
    let mut config = match &cli.config {
        Some(path) => FetchConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => FetchConfig::from_env()?,
    };
    if let Some(dir) = &cli.cache_dir {
        config = config.with_cache_dir(dir);
    }
    if let Some(endpoint) = &cli.endpoint {
        config = config.with_endpoint(endpoint.as_str());
    }
    config.validate()?;
    Ok(config)
}

fn stats(config: &FetchConfig, json: bool) -> Result<()> {
    let stats = CacheStore::from_config(config).stats()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Cache:        {}", config.cache_dir.display());
    println!("Repositories: {}", stats.num_repos);
    println!("Files:        {} ({})", stats.total_files, format_bytes(stats.total_size));
    println!("GGUF files:   {} ({})", stats.num_gguf_files, format_bytes(stats.gguf_size));
    Ok(())
}

fn list(config: &FetchConfig, json: bool) -> Result<()> {
    let repos = CacheStore::from_config(config).list_repos()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&repos)?);
        return Ok(());
    }

    if repos.is_empty() {
        println!("Cache is empty");
    }
    for repo in repos {
        println!(
            "{:<60} {:>6} files {:>12}",
            repo.repo_id,
            repo.files,
            format_bytes(repo.size_bytes)
        );
    }
    Ok(())
}

fn clear(config: &FetchConfig, target: &ClearTarget, json: bool) -> Result<()> {
    let cache = CacheStore::from_config(config);

    let result = if target.all {
        cache.clear_all()?
    } else if let Some(repo) = &target.repo {
        let existed = cache.repo_dir(repo).is_dir();
        let bytes_freed = cache.clear_repo(repo)?;
        ClearResult {
            repos_removed: if existed { vec![repo.clone()] } else { Vec::new() },
            bytes_freed,
        }
    } else if let Some(pattern) = &target.pattern {
        cache.clear_pattern(pattern)?
    } else {
        bail!("one of --all, --repo or --pattern is required");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for repo in &result.repos_removed {
            println!("Removed {}", repo);
        }
        println!(
            "{} repositories removed, {} freed",
            result.repos_removed.len(),
            format_bytes(result.bytes_freed)
        );
    }
    Ok(())
}

async fn get(
    config: &FetchConfig,
    key: &CacheKey,
    sha256: Option<String>,
    retries: Option<u32>,
    output_dir: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let cache = CacheStore::from_config(config);
    let destination = match output_dir {
        Some(dir) => {
            key.validate()?;
            dir.join(&key.filename)
        }
        None => cache.prepare_cache_path(key)?,
    };

    if destination.is_file() {
        if let Some(expected) = &sha256 {
            verify_sha256(&destination, expected)?;
        }
        info!(path = %destination.display(), "Already downloaded");
        println!("{}", destination.display());
        return Ok(());
    }

    let url = HubResolver::from_config(config).file_url(&key.repo_id, &key.filename, &key.revision)?;
    let downloader = Downloader::new(config)?;
    let mut policy = config.retry_policy();
    if let Some(retries) = retries {
        policy = policy.with_max_retries(retries);
    }

    let show_progress = !json;
    let on_progress = move |p: &DownloadProgress| {
        if show_progress {
            eprint!("\r{}", progress_line(p));
            let _ = std::io::stderr().flush();
        }
    };
    let sink: &dyn ProgressSink = &on_progress;

    // A checksum mismatch is terminal, so only transfer failures are retried.
    let mut options = downloader.default_options().clone().with_resume(true);
    options.expected_sha256 = sha256;

    info!(key = %key, url = %url, "Downloading");
    let (result, stats) = retry_async(&policy, || {
        downloader.download_with_options(&url, &destination, &options, Some(sink))
    })
    .await;
    if show_progress {
        eprintln!();
    }
    if stats.attempts > 1 {
        info!(attempts = stats.attempts, "Download needed retries");
    }
    let result = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "{} ({}{}{})",
            result.path.display(),
            format_bytes(result.total_size),
            if result.was_resumed { ", resumed" } else { "" },
            if result.checksum_verified { ", sha256 ok" } else { "" },
        );
    }
    Ok(())
}

async fn fetch(
    config: &FetchConfig,
    items: Vec<DownloadItem>,
    workers: Option<usize>,
    json: bool,
) -> Result<()> {
    let total = items.len();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut scheduler = BatchScheduler::with_events(
        config,
        Arc::new(HubResolver::from_config(config)),
        CacheStore::from_config(config),
        tx,
    );

    let names: Vec<String> = items.iter().map(|i| i.filename.clone()).collect();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                BatchEvent::Started { index } => {
                    debug!(index, file = %names[index], "Started");
                }
                BatchEvent::Progress { .. } => {}
                BatchEvent::Finished { index, status } => {
                    if !json {
                        eprintln!("[{}] {}", status, names[index]);
                    }
                }
            }
        }
    });

    scheduler.start(workers.unwrap_or(config.max_workers).max(1))?;
    scheduler.submit_batch(items)?;

    let results = tokio::select! {
        results = scheduler.wait_for_results() => results?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; cancelling queued downloads");
            scheduler.stop();
            scheduler.wait_for_results().await?
        }
    };
    let summary = scheduler.summary();
    scheduler.shutdown().await;
    drop(scheduler);
    let _ = printer.await;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for r in results.iter().filter(|r| r.status == DownloadStatus::Failed) {
            println!(
                "FAILED {}: {}",
                r.item.filename,
                r.error.as_deref().unwrap_or("unknown error")
            );
        }
        println!(
            "{} succeeded, {} skipped, {} failed, {} cancelled; {} at {}/s",
            summary.success,
            summary.skipped,
            summary.failed,
            summary.cancelled,
            format_bytes(summary.total_bytes),
            format_bytes(summary.average_throughput() as u64)
        );
    }

    if summary.failed > 0 || summary.cancelled > 0 {
        bail!("{} of {} downloads did not complete", summary.failed + summary.cancelled, total);
    }
    Ok(())
}

fn progress_line(p: &DownloadProgress) -> String {
    let eta = p
        .eta_seconds()
        .map(|s| format!(", eta {:.0}s", s))
        .unwrap_or_default();
    match p.total_bytes {
        Some(total) => format!(
            "{:>3}% {} / {} at {}/s{}",
            p.percent_complete(),
            format_bytes(p.bytes_downloaded),
            format_bytes(total),
            format_bytes(p.speed_bytes_per_sec() as u64),
            eta
        ),
        None => format!(
            "{} at {}/s",
            format_bytes(p.bytes_downloaded),
            format_bytes(p.speed_bytes_per_sec() as u64)
        ),
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
