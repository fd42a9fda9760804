//! `palate urls` — walk the listing and print discovered detail URLs.

use anyhow::Result;

use crate::config::HarvestConfig;
use crate::http::HttpClient;
use crate::listing::ListingCollector;

pub async fn run(config: HarvestConfig) -> Result<()> {
    let config = config.normalized()?;

    let collector = ListingCollector::new(
        HttpClient::new(config.fetch_timeout_ms),
        config.start_url.clone(),
        config.page_delay(),
    );

    let mut urls = collector.collect().await?;
    if let Some(limit) = config.limit {
        urls.truncate(limit);
    }

    for url in &urls {
        println!("{url}");
    }
    eprintln!("{} restaurant URLs", urls.len());

    Ok(())
}
