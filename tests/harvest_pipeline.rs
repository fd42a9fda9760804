//! Pool + dispatcher integration tests.
//!
//! Uses a stub renderer and a configurable stub fetcher so every
//! concurrency property can be checked without a browser or network.
//! Timing-sensitive scenarios run under tokio's paused clock.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use palate::aggregate::ResultAggregator;
use palate::dispatch::{BatchDispatcher, DispatchConfig, FetchOutcome, TaskResult};
use palate::fetch::{DetailFetcher, MediaRef, RestaurantRecord};
use palate::pool::RendererPool;
use palate::renderer::{NavigationResult, RenderContext, Renderer};

// ── Stubs ──

struct StubRenderer {
    created: AtomicUsize,
    closed: Arc<AtomicUsize>,
}

impl StubRenderer {
    fn new() -> Self {
        Self {
            created: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }
}

struct StubContext {
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl Renderer for StubRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubContext {
            closed: Arc::clone(&self.closed),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.created.load(Ordering::SeqCst) - self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RenderContext for StubContext {
    async fn navigate(&mut self, url: &str, _timeout_ms: u64) -> Result<NavigationResult> {
        Ok(NavigationResult {
            final_url: url.to_string(),
            load_time_ms: 0,
        })
    }

    async fn execute_js(&self, _script: &str) -> Result<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }

    async fn get_html(&self) -> Result<String> {
        Ok(String::new())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Span of one fetch in virtual time, for batch-ordering assertions.
#[derive(Debug, Clone)]
struct FetchSpan {
    index_in_input: usize,
    started: tokio::time::Instant,
    finished: tokio::time::Instant,
}

struct StubFetcher {
    delay: Duration,
    fail_urls: HashSet<String>,
    spans: Mutex<Vec<FetchSpan>>,
    concurrent: AtomicUsize,
    max_concurrent: AtomicUsize,
}

impl StubFetcher {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            fail_urls: HashSet::new(),
            spans: Mutex::new(Vec::new()),
            concurrent: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
        }
    }

    fn failing_on(mut self, url: &str) -> Self {
        self.fail_urls.insert(url.to_string());
        self
    }

    fn spans(&self) -> Vec<FetchSpan> {
        self.spans.lock().unwrap().clone()
    }
}

fn record_for(url: &str) -> RestaurantRecord {
    RestaurantRecord {
        name: url.rsplit('/').next().unwrap_or("unknown").to_string(),
        address: "Seoul".to_string(),
        price: "₩₩ (보통)".to_string(),
        category: "한식".to_string(),
        rating: "1 Star".to_string(),
        url: url.to_string(),
        images: vec![MediaRef {
            url: format!("{url}/photo.jpg"),
            local_path: "restaurant_images/x_01.jpg".to_string(),
            filename: "x_01.jpg".to_string(),
        }],
        image_count: 1,
        scraped_at: Utc::now(),
    }
}

#[async_trait]
impl DetailFetcher for StubFetcher {
    async fn fetch(&self, url: &str, _ctx: &mut dyn RenderContext) -> Result<RestaurantRecord> {
        let started = tokio::time::Instant::now();
        let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.concurrent.fetch_sub(1, Ordering::SeqCst);
        let index_in_input: usize = url
            .rsplit('/')
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or(usize::MAX);
        self.spans.lock().unwrap().push(FetchSpan {
            index_in_input,
            started,
            finished: tokio::time::Instant::now(),
        });

        if self.fail_urls.contains(url) {
            anyhow::bail!("synthetic fetch failure");
        }
        Ok(record_for(url))
    }
}

// ── Helpers ──

fn urls(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("https://example.com/restaurant/{i}")).collect()
}

fn dispatch_config(workers: usize, batch_size: usize, cooldown_ms: u64) -> DispatchConfig {
    DispatchConfig {
        workers,
        batch_size,
        cooldown: Duration::from_millis(cooldown_ms),
        fetch_timeout: Duration::from_secs(5),
        acquire_timeout: Duration::from_secs(1),
    }
}

async fn drain(mut rx: mpsc::Receiver<TaskResult>) -> Vec<TaskResult> {
    let mut all = Vec::new();
    while let Some(result) = rx.recv().await {
        all.push(result);
    }
    all
}

// ── Tests ──

#[tokio::test(start_paused = true)]
async fn test_five_urls_three_batches_all_succeed() {
    let pool = RendererPool::new(Arc::new(StubRenderer::new()), 2, 0)
        .await
        .unwrap();
    let fetcher = Arc::new(StubFetcher::new(Duration::from_millis(100)));
    let dispatcher = BatchDispatcher::new(pool.clone(), fetcher.clone(), dispatch_config(2, 2, 50));

    let (tx, rx) = mpsc::channel(16);
    let collector = tokio::spawn(drain(rx));

    let t0 = tokio::time::Instant::now();
    let summary = dispatcher
        .run(urls(5), CancellationToken::new(), tx)
        .await;
    let elapsed = t0.elapsed();

    assert_eq!(summary.attempted, 5);
    assert_eq!(summary.succeeded, 5);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.batches, 3);
    assert!(!summary.interrupted);

    // 3 sequential batches of 100ms fetches plus 2 cooldowns of 50ms.
    assert!(
        elapsed >= Duration::from_millis(400),
        "elapsed {elapsed:?} shorter than 3 batches + 2 cooldowns"
    );

    // Worker group never exceeded the configured width.
    assert!(fetcher.max_concurrent.load(Ordering::SeqCst) <= 2);

    // Every result delivered exactly once.
    let results = collector.await.unwrap();
    assert_eq!(results.len(), 5);
    let indices: HashSet<usize> = results.iter().map(|r| r.index).collect();
    assert_eq!(indices.len(), 5);

    // No leaked leases.
    assert_eq!(pool.checked_out(), 0);
    assert_eq!(pool.overflow_created(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_batches_dispatch_in_input_order() {
    let pool = RendererPool::new(Arc::new(StubRenderer::new()), 2, 0)
        .await
        .unwrap();
    let fetcher = Arc::new(StubFetcher::new(Duration::from_millis(100)));
    let dispatcher = BatchDispatcher::new(pool, fetcher.clone(), dispatch_config(2, 2, 10));

    let (tx, rx) = mpsc::channel(16);
    let collector = tokio::spawn(drain(rx));
    dispatcher.run(urls(6), CancellationToken::new(), tx).await;
    collector.await.unwrap();

    let spans = fetcher.spans();
    assert_eq!(spans.len(), 6);

    let batch_of = |index: usize| index / 2;
    for later in &spans {
        for earlier in &spans {
            if batch_of(earlier.index_in_input) < batch_of(later.index_in_input) {
                assert!(
                    later.started >= earlier.finished,
                    "task {} started before batch holding task {} completed",
                    later.index_in_input,
                    earlier.index_in_input
                );
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_single_failure_does_not_abort_batch_or_run() {
    let pool = RendererPool::new(Arc::new(StubRenderer::new()), 2, 0)
        .await
        .unwrap();
    let fetcher = Arc::new(
        StubFetcher::new(Duration::from_millis(100))
            .failing_on("https://example.com/restaurant/1"),
    );
    let dispatcher = BatchDispatcher::new(pool, fetcher, dispatch_config(2, 2, 10));

    let (tx, rx) = mpsc::channel(16);
    let collector = tokio::spawn(drain(rx));
    let summary = dispatcher
        .run(urls(4), CancellationToken::new(), tx)
        .await;

    assert_eq!(summary.attempted, 4);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.batches, 2);

    let results = collector.await.unwrap();
    let failures: Vec<&TaskResult> = results
        .iter()
        .filter(|r| matches!(r.outcome, FetchOutcome::Failure(_)))
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].index, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_new_batches_and_releases_handles() {
    let renderer = Arc::new(StubRenderer::new());
    let pool = RendererPool::new(renderer, 2, 0).await.unwrap();
    let fetcher = Arc::new(StubFetcher::new(Duration::from_millis(200)));
    let dispatcher = BatchDispatcher::new(pool.clone(), fetcher, dispatch_config(2, 2, 50));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
    }

    let (tx, rx) = mpsc::channel(16);
    let collector = tokio::spawn(drain(rx));
    let summary = dispatcher.run(urls(6), cancel, tx).await;

    assert!(summary.interrupted);
    // Only the first batch was dispatched.
    assert_eq!(summary.batches, 1);
    assert_eq!(summary.attempted, 2);
    assert_eq!(summary.succeeded + summary.failed, summary.attempted);

    // Every dispatched task delivered a result and released its lease.
    let results = collector.await.unwrap();
    assert_eq!(results.len(), summary.attempted);
    assert_eq!(pool.checked_out(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_acquire_timeout_surfaces_as_task_failure() {
    // Capacity 1, no overflow budget: with two workers one task per pair
    // must time out waiting for the pool.
    let pool = RendererPool::new(Arc::new(StubRenderer::new()), 1, 0)
        .await
        .unwrap();
    let fetcher = Arc::new(StubFetcher::new(Duration::from_millis(200)));
    let config = DispatchConfig {
        workers: 2,
        batch_size: 2,
        cooldown: Duration::from_millis(10),
        fetch_timeout: Duration::from_secs(5),
        acquire_timeout: Duration::from_millis(50),
    };
    let dispatcher = BatchDispatcher::new(pool.clone(), fetcher, config);

    let (tx, rx) = mpsc::channel(16);
    let collector = tokio::spawn(drain(rx));
    let summary = dispatcher
        .run(urls(2), CancellationToken::new(), tx)
        .await;

    assert_eq!(summary.attempted, 2);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);

    let results = collector.await.unwrap();
    let failure = results
        .iter()
        .find(|r| matches!(r.outcome, FetchOutcome::Failure(_)))
        .expect("one task should fail on pool exhaustion");
    match &failure.outcome {
        FetchOutcome::Failure(reason) => assert!(reason.contains("exhausted")),
        FetchOutcome::Success(_) => unreachable!(),
    }
    assert_eq!(pool.checked_out(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_overflow_context_absorbs_contention() {
    // Same contention as above, but one overflow context is allowed: both
    // tasks complete and the overflow use is reported.
    let pool = RendererPool::new(Arc::new(StubRenderer::new()), 1, 1)
        .await
        .unwrap();
    let fetcher = Arc::new(StubFetcher::new(Duration::from_millis(200)));
    let config = DispatchConfig {
        workers: 2,
        batch_size: 2,
        cooldown: Duration::from_millis(10),
        fetch_timeout: Duration::from_secs(5),
        acquire_timeout: Duration::from_millis(50),
    };
    let dispatcher = BatchDispatcher::new(pool.clone(), fetcher, config);

    let (tx, rx) = mpsc::channel(16);
    let collector = tokio::spawn(drain(rx));
    let summary = dispatcher
        .run(urls(2), CancellationToken::new(), tx)
        .await;
    collector.await.unwrap();

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.overflow_contexts, 1);
    assert_eq!(pool.checked_out(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_aggregator_writes_sorted_partial_free_output() {
    let dir = tempfile::tempdir().unwrap();
    let pool = RendererPool::new(Arc::new(StubRenderer::new()), 2, 0)
        .await
        .unwrap();
    let fetcher = Arc::new(
        StubFetcher::new(Duration::from_millis(20))
            .failing_on("https://example.com/restaurant/2"),
    );
    let dispatcher = BatchDispatcher::new(pool, fetcher, dispatch_config(2, 2, 10));

    let (tx, rx) = mpsc::channel(16);
    let aggregator = ResultAggregator::new(dir.path(), "restaurants");
    let aggregator_task = tokio::spawn(aggregator.run(rx));

    let summary = dispatcher
        .run(urls(5), CancellationToken::new(), tx)
        .await;

    let mut aggregator = aggregator_task.await.unwrap();
    assert_eq!(aggregator.succeeded(), summary.succeeded);
    assert_eq!(aggregator.failed(), summary.failed);

    let paths = aggregator.flush(summary.interrupted).unwrap();
    assert_eq!(
        paths.json.file_name().unwrap().to_str().unwrap(),
        "restaurants.json"
    );

    let json = std::fs::read_to_string(&paths.json).unwrap();
    let parsed: Vec<serde_json::Value> = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.len(), 4);

    // Output is sorted by original input index even though completion
    // order inside a batch is unspecified.
    let urls_in_output: Vec<&str> = parsed.iter().map(|v| v["url"].as_str().unwrap()).collect();
    let mut sorted = urls_in_output.clone();
    sorted.sort_by_key(|u| {
        u.rsplit('/')
            .next()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(usize::MAX)
    });
    assert_eq!(urls_in_output, sorted);
}
