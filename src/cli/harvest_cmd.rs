//! `palate harvest` — the full pipeline: listing walk, pooled detail
//! fetches, aggregation, and output.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::aggregate::ResultAggregator;
use crate::config::HarvestConfig;
use crate::dispatch::{BatchDispatcher, DispatchConfig};
use crate::events::{self, HarvestEvent};
use crate::fetch::guide::GuideDetailFetcher;
use crate::http::HttpClient;
use crate::listing::ListingCollector;
use crate::pool::RendererPool;
use crate::renderer::chromium::ChromiumRenderer;
use crate::renderer::Renderer;

/// Buffered results between dispatcher and aggregator.
const RESULT_CHANNEL_CAPACITY: usize = 64;

pub async fn run(config: HarvestConfig, from_file: Option<PathBuf>) -> Result<()> {
    let config = config.normalized()?;
    let http = HttpClient::new(config.fetch_timeout_ms);
    let (events_tx, _events_rx) = events::channel();

    // ── Collect detail URLs ──
    let mut urls = match from_file {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading URL list {}", path.display()))?;
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(String::from)
                .collect()
        }
        None => {
            ListingCollector::new(http.clone(), config.start_url.clone(), config.page_delay())
                .with_events(events_tx.clone())
                .collect()
                .await?
        }
    };
    if let Some(limit) = config.limit {
        urls.truncate(limit);
    }
    if urls.is_empty() {
        anyhow::bail!("no restaurant URLs to process");
    }
    info!("{} restaurant URLs queued", urls.len());

    // ── Renderer + pool ──
    let renderer: Arc<dyn Renderer> = Arc::new(
        ChromiumRenderer::new()
            .await
            .context("starting headless Chromium")?,
    );
    let pool = RendererPool::new(
        Arc::clone(&renderer),
        config.pool_capacity,
        config.max_overflow,
    )
    .await
    .context("initializing renderer pool")?;

    let fetcher = Arc::new(GuideDetailFetcher::new(
        http.clone(),
        config.images_dir.clone(),
    ));

    let dispatcher = BatchDispatcher::new(
        pool.clone(),
        fetcher,
        DispatchConfig {
            workers: config.workers,
            batch_size: config.batch_size,
            cooldown: config.cooldown(),
            fetch_timeout: config.fetch_timeout(),
            acquire_timeout: config.acquire_timeout(),
        },
    )
    .with_events(events_tx.clone());

    // ── Ctrl-C → cooperative cancellation ──
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received: finishing in-flight tasks, then flushing partial output");
                cancel.cancel();
            }
        });
    }

    // ── Progress bar fed from the event bus ──
    let bar = ProgressBar::new(urls.len() as u64);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner} [{elapsed_precise}] [{bar:30}] {pos}/{len} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    let bar_task = {
        let bar = bar.clone();
        let mut rx = events_tx.subscribe();
        tokio::spawn(async move {
            use tokio::sync::broadcast::error::RecvError;
            loop {
                match rx.recv().await {
                    Ok(HarvestEvent::UrlProcessed { ok, .. }) => {
                        bar.inc(1);
                        if !ok {
                            bar.set_message("(some failures)");
                        }
                    }
                    Ok(HarvestEvent::HarvestComplete { .. }) => break,
                    Ok(_) => {}
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
            }
            bar.finish_and_clear();
        })
    };

    // ── Dispatch + aggregate ──
    let (results_tx, results_rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
    let aggregator = ResultAggregator::new("", config.output_stem.clone());
    let aggregator_task = tokio::spawn(aggregator.run(results_rx));

    let summary = dispatcher.run(urls, cancel.clone(), results_tx).await;

    let mut aggregator = aggregator_task.await.context("aggregator task panicked")?;
    let _ = bar_task.await;

    let paths = aggregator.flush(summary.interrupted)?;

    pool.shutdown().await;
    if renderer.active_contexts() > 0 {
        warn!(
            "{} renderer contexts still active after pool shutdown",
            renderer.active_contexts()
        );
    }
    let _ = renderer.shutdown().await;

    // ── End-of-run summary ──
    println!();
    if summary.interrupted {
        println!("Harvest interrupted: partial results written");
    } else {
        println!("Harvest complete");
    }
    println!("  Attempted: {}", summary.attempted);
    println!("  Succeeded: {}", summary.succeeded);
    println!("  Failed:    {}", summary.failed);
    println!("  Batches:   {}", summary.batches);
    if summary.overflow_contexts > 0 {
        println!("  Overflow renderer contexts: {}", summary.overflow_contexts);
    }
    println!("  Elapsed:   {:.1}s", summary.elapsed.as_secs_f64());
    println!("  Output:    {} / {}", paths.json.display(), paths.csv.display());
    println!("  Images:    {}", config.images_dir.display());

    Ok(())
}
