//! Detail-page fetching: the trait the dispatcher drives and the record
//! types it produces.

pub mod guide;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::renderer::RenderContext;

/// A photo materialized on local disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRef {
    /// Source URL the image was downloaded from.
    pub url: String,
    /// Local path of the saved file.
    pub local_path: String,
    /// File name component of `local_path`.
    pub filename: String,
}

/// One collected restaurant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestaurantRecord {
    pub name: String,
    pub address: String,
    pub price: String,
    pub category: String,
    pub rating: String,
    pub url: String,
    pub images: Vec<MediaRef>,
    pub image_count: usize,
    pub scraped_at: DateTime<Utc>,
}

/// Fetches one restaurant detail page through a leased render context.
///
/// Implementations must treat the context as borrowed: it is returned to
/// the pool by the caller whether the fetch succeeds or fails.
#[async_trait]
pub trait DetailFetcher: Send + Sync {
    async fn fetch(&self, url: &str, ctx: &mut dyn RenderContext) -> Result<RestaurantRecord>;
}
