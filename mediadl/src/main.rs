mod cli;

use std::collections::HashSet;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use mediadl::MediaDownloader;
use mediadl::config::AppConfig;
use mediadl::downloader::{ProgressPhase, ProgressSnapshot};
use mediadl::extractor::{MediaResolver, YtDlpResolver};
use mediadl::logging::{self, LOG_RETENTION_DAYS};
use mediadl::media::MediaInfo;
use mediadl::queue::PendingQueue;

use crate::cli::{Args, Commands, DownloadArgs};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(dir) = &args.log_dir {
        config.logging.dir = Some(dir.clone());
    }

    let filter = args
        .verbosity_filter()
        .map(str::to_string)
        .or_else(|| config.logging.filter.clone());
    let _logging = logging::init_logging(config.logging.dir.as_deref(), filter.as_deref())?;
    if let Some(dir) = &config.logging.dir
        && let Err(e) = logging::cleanup_old_logs(dir, LOG_RETENTION_DAYS).await
    {
        warn!(error = %e, "Failed to clean up old logs");
    }

    let result = match args.command {
        Commands::Download(download) => run_download(config, download).await,
        Commands::Resume => run_resume(config).await,
        Commands::Queue => run_queue(&config).await,
        Commands::Info { url, json } => run_info(&config, &url, json).await,
    };

    if let Err(e) = &result {
        error!("{e:#}");
    }
    result
}

async fn run_download(mut config: AppConfig, args: DownloadArgs) -> anyhow::Result<()> {
    if args.keep_intermediates {
        config.pipeline.keep_intermediates = true;
    }
    let policy = args.policy()?;

    let downloader = MediaDownloader::builder(config).build().await?;
    let options = args.options(downloader.default_options());
    let reporters = spawn_reporters(&downloader);

    let result = tokio::select! {
        result = downloader.download(&args.url, options, policy.as_ref()) => result.map_err(anyhow::Error::from),
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, cancelling");
            downloader.cancel().await?;
            Err(anyhow::anyhow!("interrupted"))
        }
    };

    downloader.shutdown().await;
    reporters.into_iter().for_each(|r| r.abort());

    let path = result?;
    println!("{}", path.display());
    Ok(())
}

async fn run_resume(config: AppConfig) -> anyhow::Result<()> {
    let downloader = MediaDownloader::builder(config).build().await?;

    let mut seen = HashSet::new();
    let waiters: Vec<_> = downloader
        .pending()
        .await?
        .into_iter()
        .map(|job| job.key())
        .filter(|key| seen.insert(key.clone()))
        .map(|key| {
            let completion = downloader.watch_completion(&key);
            (key, completion)
        })
        .collect();

    if waiters.is_empty() {
        info!("Nothing to resume");
        downloader.shutdown().await;
        return Ok(());
    }

    let reporters = spawn_reporters(&downloader);
    if let Err(e) = downloader.resume().await {
        warn!(error = %e, "Resume reported an error");
    }

    let mut failures = 0usize;
    let wait_all = async {
        for (key, completion) in waiters {
            match MediaDownloader::await_completion(completion).await {
                Ok(path) => println!("{}", path.display()),
                Err(e) => {
                    failures += 1;
                    error!(key = %key, error = %e, "Download failed");
                }
            }
        }
    };

    tokio::select! {
        _ = wait_all => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, cancelling");
            downloader.cancel().await?;
        }
    }

    downloader.shutdown().await;
    reporters.into_iter().for_each(|r| r.abort());

    anyhow::ensure!(failures == 0, "{failures} download(s) failed");
    Ok(())
}

async fn run_queue(config: &AppConfig) -> anyhow::Result<()> {
    let queue = PendingQueue::load(&config.downloads_dir).await;
    if queue.is_empty() {
        println!("Queue is empty ({})", queue.path().display());
        return Ok(());
    }

    for (index, job) in queue.jobs().enumerate() {
        let formats: Vec<_> = job.formats.iter().map(|f| f.label()).collect();
        println!(
            "{:>3}. {} [{:?}] {}",
            index + 1,
            job.key(),
            job.options,
            formats.join(", ")
        );
    }
    Ok(())
}

async fn run_info(config: &AppConfig, url: &str, json: bool) -> anyhow::Result<()> {
    let resolver = YtDlpResolver::from_config(&config.tools);
    resolver.probe().await?;
    let info = resolver.resolve(url).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        print_info(config, &info);
    }
    Ok(())
}

fn print_info(config: &AppConfig, info: &MediaInfo) {
    println!("{} ({})", info.title, info.id);
    if let Some(uploader) = &info.uploader {
        println!("uploader: {uploader}");
    }
    if let Some(duration) = info.duration {
        println!("duration: {duration:.0}s");
    }

    let requested: HashSet<_> = info.requested.iter().map(|f| f.format_id.as_str()).collect();
    println!("{:<3}{:<12}{:<6}{:<18}{:<18}{:>10}  kind", "", "id", "ext", "vcodec", "acodec", "size");
    for format in &info.formats {
        let marker = if requested.contains(format.format_id.as_str()) { "*" } else { "" };
        let size = format
            .filesize
            .map(|s| format!("{:.1}MiB", s as f64 / 1_048_576.0))
            .unwrap_or_default();
        println!(
            "{marker:<3}{:<12}{:<6}{:<18}{:<18}{size:>10}  {}",
            format.format_id,
            format.ext,
            format.vcodec,
            format.acodec,
            config.transcode_policy.classify(format),
        );
    }
}

fn spawn_reporters(downloader: &MediaDownloader) -> Vec<JoinHandle<()>> {
    vec![
        spawn_reporter(downloader.transfer_progress()),
        spawn_reporter(downloader.pipeline_progress()),
    ]
}

fn spawn_reporter(mut rx: watch::Receiver<ProgressSnapshot>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last: Option<Instant> = None;
        while rx.changed().await.is_ok() {
            let snapshot = rx.borrow_and_update().clone();
            if snapshot.phase == ProgressPhase::Idle
                || last.is_some_and(|t| t.elapsed() < PROGRESS_INTERVAL)
            {
                continue;
            }
            last = Some(Instant::now());
            info!(
                phase = ?snapshot.phase,
                label = %snapshot.label,
                percent = snapshot.fraction.map(|f| (f * 1000.0).round() / 10.0),
                eta_secs = snapshot.eta_secs.map(|e| e.round()),
                "Progress"
            );
        }
    })
}
