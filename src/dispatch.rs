// Copyright 2026 Palate Contributors
// SPDX-License-Identifier: Apache-2.0

//! Batched concurrent dispatcher.
//!
//! Drives the full detail-URL list to completion in fixed-size batches.
//! Each batch fans out across a worker group bounded by the configured
//! worker count; a barrier between batches plus a fixed cooldown bounds
//! the request rate independent of concurrency. Per-task failures are
//! recorded, never fatal; results stream to the aggregator as they
//! complete, tagged with the original input index.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::events::{self, EventSender, HarvestEvent};
use crate::fetch::{DetailFetcher, RestaurantRecord};
use crate::pool::RendererPool;

/// Concurrency and pacing knobs for one run.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Concurrent tasks per batch.
    pub workers: usize,
    /// URLs per batch.
    pub batch_size: usize,
    /// Pause between batches.
    pub cooldown: Duration,
    /// Overall budget for one fetch (navigation + parsing + media).
    pub fetch_timeout: Duration,
    /// Bounded wait for pool checkout.
    pub acquire_timeout: Duration,
}

/// One unit of work: a detail URL plus its position in the input list.
#[derive(Debug, Clone)]
pub struct FetchTask {
    pub index: usize,
    pub url: String,
}

/// What happened to one task.
#[derive(Debug)]
pub enum FetchOutcome {
    Success(RestaurantRecord),
    Failure(String),
}

/// A task's outcome, tagged for stable re-ordering by the consumer.
#[derive(Debug)]
pub struct TaskResult {
    pub index: usize,
    pub url: String,
    pub outcome: FetchOutcome,
}

/// End-of-run bookkeeping.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub batches: usize,
    pub overflow_contexts: usize,
    pub elapsed: Duration,
    pub interrupted: bool,
}

/// Batched dispatcher over a renderer pool.
pub struct BatchDispatcher {
    pool: RendererPool,
    fetcher: Arc<dyn DetailFetcher>,
    config: DispatchConfig,
    events: Option<EventSender>,
}

impl BatchDispatcher {
    pub fn new(pool: RendererPool, fetcher: Arc<dyn DetailFetcher>, config: DispatchConfig) -> Self {
        Self {
            pool,
            fetcher,
            config,
            events: None,
        }
    }

    /// Attach an event bus for batch/URL progress events.
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Run every URL through the pool, streaming results to `results`.
    ///
    /// Batches run strictly in input order with a full barrier between
    /// them; completion order inside a batch is unspecified. On
    /// cancellation no new batch starts, in-flight tasks drain (releasing
    /// their leases), and the summary is marked interrupted.
    pub async fn run(
        &self,
        urls: Vec<String>,
        cancel: CancellationToken,
        results: mpsc::Sender<TaskResult>,
    ) -> RunSummary {
        let started = Instant::now();
        let total = urls.len();
        let tasks: Vec<FetchTask> = urls
            .into_iter()
            .enumerate()
            .map(|(index, url)| FetchTask { index, url })
            .collect();

        let total_batches = total.div_ceil(self.config.batch_size.max(1));
        info!(
            "dispatching {total} URLs in {total_batches} batches of {} ({} workers)",
            self.config.batch_size, self.config.workers
        );

        let mut summary = RunSummary {
            attempted: 0,
            succeeded: 0,
            failed: 0,
            batches: 0,
            overflow_contexts: 0,
            elapsed: Duration::ZERO,
            interrupted: false,
        };

        for (batch_idx, batch) in tasks.chunks(self.config.batch_size.max(1)).enumerate() {
            if cancel.is_cancelled() {
                warn!("cancellation requested; skipping remaining batches");
                summary.interrupted = true;
                break;
            }

            let batch_started = Instant::now();
            events::emit(
                &self.events,
                HarvestEvent::BatchStarted {
                    batch: batch_idx + 1,
                    total_batches,
                    size: batch.len(),
                },
            );

            // Worker group, bounded fan-out; collect() is the batch barrier.
            let ok_flags: Vec<bool> = stream::iter(batch)
                .map(|task| {
                    let results = results.clone();
                    let cancel = cancel.clone();
                    async move {
                        let result = self.run_task(task, &cancel).await;
                        let ok = matches!(result.outcome, FetchOutcome::Success(_));
                        events::emit(
                            &self.events,
                            HarvestEvent::UrlProcessed {
                                index: result.index,
                                url: result.url.clone(),
                                ok,
                            },
                        );
                        // Delivery failure means the aggregator is gone;
                        // nothing useful left to do with the record.
                        let _ = results.send(result).await;
                        ok
                    }
                })
                .buffer_unordered(self.config.workers.max(1))
                .collect()
                .await;

            let batch_ok = ok_flags.iter().filter(|ok| **ok).count();
            let batch_failed = ok_flags.len() - batch_ok;
            summary.attempted += ok_flags.len();
            summary.succeeded += batch_ok;
            summary.failed += batch_failed;
            summary.batches += 1;

            events::emit(
                &self.events,
                HarvestEvent::BatchCompleted {
                    batch: batch_idx + 1,
                    succeeded: batch_ok,
                    failed: batch_failed,
                    duration_ms: batch_started.elapsed().as_millis() as u64,
                },
            );
            info!(
                "batch {}/{total_batches}: {batch_ok} ok, {batch_failed} failed in {:.1}s",
                batch_idx + 1,
                batch_started.elapsed().as_secs_f64()
            );

            if cancel.is_cancelled() {
                summary.interrupted = true;
                break;
            }

            // Cooldown before the next batch, cut short by cancellation.
            if batch_idx + 1 < total_batches {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.config.cooldown) => {}
                }
            }
        }

        summary.overflow_contexts = self.pool.overflow_created();
        summary.elapsed = started.elapsed();

        events::emit(
            &self.events,
            HarvestEvent::HarvestComplete {
                attempted: summary.attempted,
                succeeded: summary.succeeded,
                failed: summary.failed,
                elapsed_ms: summary.elapsed.as_millis() as u64,
                interrupted: summary.interrupted,
            },
        );

        summary
    }

    /// One task: checkout → fetch (bounded) → release via lease drop.
    ///
    /// Every error is converted to a `Failure` outcome here; nothing
    /// escapes to abort the batch.
    async fn run_task(&self, task: &FetchTask, cancel: &CancellationToken) -> TaskResult {
        let outcome = match self.pool.acquire(self.config.acquire_timeout).await {
            Ok(mut lease) => {
                let fetch = self.fetcher.fetch(&task.url, lease.context());
                tokio::select! {
                    _ = cancel.cancelled() => {
                        FetchOutcome::Failure("cancelled before completion".to_string())
                    }
                    fetched = tokio::time::timeout(self.config.fetch_timeout, fetch) => {
                        match fetched {
                            Ok(Ok(record)) => FetchOutcome::Success(record),
                            Ok(Err(e)) => FetchOutcome::Failure(format!("{e:#}")),
                            Err(_) => FetchOutcome::Failure(format!(
                                "fetch timed out after {}ms",
                                self.config.fetch_timeout.as_millis()
                            )),
                        }
                    }
                }
                // lease drops here: the context is released on success,
                // failure, timeout, and cancellation alike
            }
            Err(e) => FetchOutcome::Failure(e.to_string()),
        };

        TaskResult {
            index: task.index,
            url: task.url.clone(),
            outcome,
        }
    }
}
