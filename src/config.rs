//! Run configuration for the harvester.
//!
//! All knobs are plain numeric/duration parameters fixed for the lifetime
//! of a run; there is no dynamic reconfiguration.

use std::path::PathBuf;
use std::time::Duration;

/// Default listing entry point: the guide's Seoul restaurant list.
pub const DEFAULT_START_URL: &str =
    "https://guide.michelin.com/kr/ko/seoul-capital-area/kr-seoul/restaurants?sort=distance";

/// Configuration for a harvest run.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// Listing entry URL (page 1).
    pub start_url: String,
    /// Concurrent detail-fetch tasks per batch. Clamped to `pool_capacity`,
    /// otherwise tasks would starve waiting on checkout.
    pub workers: usize,
    /// Renderer contexts kept in the pool.
    pub pool_capacity: usize,
    /// Extra renderer contexts allowed outside the pool under contention.
    pub max_overflow: usize,
    /// URLs dispatched per batch.
    pub batch_size: usize,
    /// Pause between batches, milliseconds.
    pub cooldown_ms: u64,
    /// Pause between listing-page fetches, milliseconds.
    pub page_delay_ms: u64,
    /// Overall budget for one detail fetch, milliseconds.
    pub fetch_timeout_ms: u64,
    /// Bounded wait for pool checkout, milliseconds.
    pub acquire_timeout_ms: u64,
    /// Directory for downloaded restaurant photos.
    pub images_dir: PathBuf,
    /// Output file stem; `.json` / `.csv` (and `_partial` variants) are
    /// derived from it.
    pub output_stem: String,
    /// Optional cap on the number of detail URLs to process.
    pub limit: Option<usize>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            start_url: DEFAULT_START_URL.to_string(),
            workers: 4,
            pool_capacity: 4,
            max_overflow: 2,
            batch_size: 8,
            cooldown_ms: 500,
            page_delay_ms: 300,
            fetch_timeout_ms: 30_000,
            acquire_timeout_ms: 10_000,
            images_dir: PathBuf::from("restaurant_images"),
            output_stem: "restaurants".to_string(),
            limit: None,
        }
    }
}

impl HarvestConfig {
    /// Validate and normalize the configuration.
    ///
    /// Zero-valued knobs are rejected; a worker count above the pool
    /// capacity is clamped down with a warning.
    pub fn normalized(mut self) -> anyhow::Result<Self> {
        if self.pool_capacity == 0 {
            anyhow::bail!("pool capacity must be at least 1");
        }
        if self.workers == 0 {
            anyhow::bail!("worker count must be at least 1");
        }
        if self.batch_size == 0 {
            anyhow::bail!("batch size must be at least 1");
        }
        if self.workers > self.pool_capacity {
            tracing::warn!(
                "workers ({}) exceed pool capacity ({}); clamping",
                self.workers,
                self.pool_capacity
            );
            self.workers = self.pool_capacity;
        }
        if self.batch_size % self.workers != 0 {
            tracing::debug!(
                "batch size {} is not a multiple of worker count {}",
                self.batch_size,
                self.workers
            );
        }
        Ok(self)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = HarvestConfig::default().normalized().unwrap();
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.batch_size, 8);
        assert!(cfg.cooldown_ms > 0);
    }

    #[test]
    fn test_workers_clamped_to_capacity() {
        let cfg = HarvestConfig {
            workers: 8,
            pool_capacity: 3,
            ..Default::default()
        }
        .normalized()
        .unwrap();
        assert_eq!(cfg.workers, 3);
    }

    #[test]
    fn test_zero_values_rejected() {
        assert!(HarvestConfig {
            workers: 0,
            ..Default::default()
        }
        .normalized()
        .is_err());
        assert!(HarvestConfig {
            batch_size: 0,
            ..Default::default()
        }
        .normalized()
        .is_err());
    }
}
