use anyhow::{Context, Result};
use car_scout::config::ScoutConfig;
use car_scout::models::{EnrichReport, HarvestReport};
use car_scout::scrapers::{
    BrowserPool, Enricher, FsImageStore, Harvester, HttpByteFetcher, ImageDownloader,
};
use car_scout::storage;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "car-scout", about = "Two-stage used-car catalog scraper for moteur.ma")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Walk the paginated catalog and write the listings CSV
    Harvest {
        #[arg(long, default_value_t = 4)]
        max_pages: usize,
        #[arg(long, default_value = "moteur_listings.csv")]
        out: PathBuf,
        /// Seconds to pause between catalog pages (0 disables pacing)
        #[arg(long, default_value_t = 3)]
        page_delay_secs: u64,
        /// Run Chrome with a visible window
        #[arg(long)]
        no_headless: bool,
    },
    /// Read a harvested listings CSV, scrape detail pages and download images
    Enrich {
        #[arg(long, default_value = "moteur_listings.csv")]
        input: PathBuf,
        #[arg(long, default_value = "moteur_details.csv")]
        out: PathBuf,
        #[arg(long, default_value = "car_images")]
        image_dir: PathBuf,
        /// Concurrent per-listing workers
        #[arg(long, default_value_t = 4)]
        workers: usize,
        #[arg(long)]
        no_headless: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();

    // Ctrl-C cancels in-flight work promptly; whatever was gathered so far
    // is still written out.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    match cli.command {
        Command::Harvest {
            max_pages,
            out,
            page_delay_secs,
            no_headless,
        } => run_harvest(max_pages, out, page_delay_secs, no_headless, cancel).await,
        Command::Enrich {
            input,
            out,
            image_dir,
            workers,
            no_headless,
        } => run_enrich(input, out, image_dir, workers, no_headless, cancel).await,
    }
}

async fn run_harvest(
    max_pages: usize,
    out: PathBuf,
    page_delay_secs: u64,
    no_headless: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let config = ScoutConfig {
        page_delay: Duration::from_secs(page_delay_secs),
        headless: !no_headless,
        ..ScoutConfig::default()
    };
    preflight(&config, &out)?;

    info!("🚗 Car Scout - catalog harvest");
    info!("==============================");
    info!("Scraping up to {} catalog page(s) from {}", max_pages, config.base_url);

    let pool = Arc::new(BrowserPool::launch(config.browser_pool_size, &config)?);
    let harvester = Harvester::new(pool, config);
    let outcome = harvester.harvest(max_pages, &cancel).await;

    info!(
        "✅ Harvested {} listing(s) from {} page(s) ({} empty)",
        outcome.listings.len(),
        outcome.pages_fetched,
        outcome.pages_empty
    );

    storage::write_listings(&out, &outcome.listings)?;
    info!("💾 Saved listings to {}", out.display());

    let report = HarvestReport {
        scraped_at: Utc::now(),
        pages_fetched: outcome.pages_fetched,
        pages_empty: outcome.pages_empty,
        listings: outcome.listings,
    };
    let report_path = out.with_extension("json");
    storage::write_json_report(&report_path, &report)?;
    info!("💾 Saved run report to {}", report_path.display());

    Ok(())
}

async fn run_enrich(
    input: PathBuf,
    out: PathBuf,
    image_dir: PathBuf,
    workers: usize,
    no_headless: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let config = ScoutConfig {
        enrich_workers: workers,
        headless: !no_headless,
        ..ScoutConfig::default()
    };
    preflight(&config, &out)?;

    let listings = storage::read_listings(&input)?;

    info!("🚗 Car Scout - detail enrichment");
    info!("================================");
    info!("Enriching {} harvested listing(s)", listings.len());

    std::fs::create_dir_all(&image_dir)
        .with_context(|| format!("Image directory {} is not writable", image_dir.display()))?;

    let pool = Arc::new(BrowserPool::launch(config.browser_pool_size, &config)?);
    let downloader = Arc::new(ImageDownloader::new(
        Arc::new(HttpByteFetcher::new()?),
        Arc::new(FsImageStore),
        &config,
    ));
    let enricher = Enricher::new(pool, downloader, config, image_dir);
    let outcome = enricher.enrich(&listings, &cancel).await;

    info!(
        "✅ Enriched {} listing(s) ({} soft failure(s), {} unresolvable skipped)",
        outcome.details.len(),
        outcome.soft_failures,
        outcome.skipped_unresolvable
    );

    storage::write_details(&out, &outcome.details)?;
    info!("💾 Saved details to {}", out.display());

    let report = EnrichReport {
        scraped_at: Utc::now(),
        enriched: outcome.details.len(),
        soft_failures: outcome.soft_failures,
        skipped_unresolvable: outcome.skipped_unresolvable,
        details: outcome.details,
    };
    let report_path = out.with_extension("json");
    storage::write_json_report(&report_path, &report)?;
    info!("💾 Saved run report to {}", report_path.display());

    Ok(())
}

/// The only run-fatal checks: a base URL that parses and a reachable output
/// location, verified before any page work begins.
fn preflight(config: &ScoutConfig, out: &Path) -> Result<()> {
    reqwest::Url::parse(&config.base_url)
        .with_context(|| format!("Base URL '{}' is not a valid URL", config.base_url))?;

    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        anyhow::ensure!(
            parent.is_dir(),
            "Output directory {} does not exist",
            parent.display()
        );
    }
    Ok(())
}
