use anyhow::{bail, Context, Result};
use clap::Parser;
use kagane_dl::config::{AcquisitionMode, Config};
use kagane_dl::models::Chapter;
use kagane_dl::pipeline::ChapterPipeline;
use kagane_dl::progress::{self, DownloadEvent};
use kagane_dl::renderer::chromium::ChromiumRenderer;
use kagane_dl::renderer::Renderer;
use kagane_dl::session::registry;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "kagane-dl",
    about = "Concurrent chapter image downloader driving headless Chromium tabs",
    version
)]
struct Cli {
    /// Chapter reader URLs, in the order their chapters should be numbered
    urls: Vec<String>,

    /// Series title used for the output directory
    #[arg(long, default_value = "series")]
    title: String,

    /// Expected page count, applied to every chapter for validation
    #[arg(long)]
    pages: Option<u32>,

    /// Acquisition mode: "rendered" or "network" (overrides config)
    #[arg(long)]
    mode: Option<String>,

    /// Root output directory (overrides config)
    #[arg(long)]
    out: Option<String>,

    /// Config file path
    #[arg(long, default_value = "config.json")]
    config: String,

    /// Enable verbose/debug logging
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "kagane_dl=debug"
    } else {
        "kagane_dl=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(default_level.parse().context("invalid log directive")?),
        )
        .init();

    if cli.urls.is_empty() {
        bail!("no chapter URLs given; see --help");
    }

    let mut config = Config::load(Path::new(&cli.config));
    if let Some(out) = cli.out {
        config.download_directory = out;
    }
    if let Some(mode) = &cli.mode {
        config.mode = match mode.to_lowercase().as_str() {
            "rendered" => AcquisitionMode::Rendered,
            "network" => AcquisitionMode::Network,
            other => bail!("unknown mode '{other}', expected 'rendered' or 'network'"),
        };
    }

    let chapters: Vec<Chapter> = cli
        .urls
        .iter()
        .enumerate()
        .map(|(i, url)| Chapter {
            id: url
                .rsplit('/')
                .find(|s| !s.is_empty())
                .unwrap_or(url)
                .to_string(),
            number: (i + 1).to_string(),
            title: String::new(),
            url: url.clone(),
            expected_pages: cli.pages,
        })
        .collect();

    // The browser is the one resource whose absence fails the whole run.
    let renderer: Arc<dyn Renderer> = Arc::new(
        ChromiumRenderer::new()
            .await
            .context("failed to start Chromium")?,
    );

    let (tx, mut rx) = progress::channel();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            log_event(event);
        }
    });

    let pipeline = ChapterPipeline::new(Arc::clone(&renderer), config)?.with_progress(tx);

    let stop = pipeline.stop_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current batch");
            stop.store(true, Ordering::Relaxed);
        }
    });

    let results = pipeline.download(&cli.title, &chapters).await;

    if let Err(e) = renderer.shutdown().await {
        warn!("browser shutdown failed: {e}");
    }
    registry::clear();

    let failed: Vec<_> = results.iter().filter(|r| !r.success).collect();
    info!(
        "finished: {} ok, {} failed of {} chapters",
        results.len() - failed.len(),
        failed.len(),
        results.len()
    );
    for r in &failed {
        warn!(
            "chapter {} failed ({} pages saved): {}",
            r.chapter.number,
            r.pages_saved,
            r.error.as_deref().unwrap_or("unknown")
        );
    }

    if !failed.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

fn log_event(event: DownloadEvent) {
    match event {
        DownloadEvent::BatchStarted {
            batch_index,
            chapters,
        } => info!("batch {} started ({chapters} chapters)", batch_index + 1),
        DownloadEvent::SessionOpened {
            chapter,
            position,
            total,
        } => info!("[{position}/{total}] chapter {chapter}: session opened"),
        DownloadEvent::ExtractionStarted {
            chapter,
            target_pages,
        } => info!("chapter {chapter}: extracting {target_pages} pages"),
        DownloadEvent::PagesSaved {
            chapter,
            saved,
            target,
        } => info!("chapter {chapter}: {saved}/{target} pages saved"),
        DownloadEvent::RetryingShortfall {
            chapter,
            attempt,
            saved,
            required,
        } => warn!("chapter {chapter}: {saved}/{required} pages, retry {attempt}"),
        DownloadEvent::ChapterFinished {
            chapter,
            success,
            saved,
        } => {
            if success {
                info!("chapter {chapter}: done ({saved} pages)");
            } else {
                warn!("chapter {chapter}: failed ({saved} pages)");
            }
        }
        DownloadEvent::BatchFinished { batch_index } => {
            info!("batch {} finished, sessions released", batch_index + 1)
        }
        DownloadEvent::Warning { message } => warn!("{message}"),
    }
}
