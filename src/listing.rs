//! Paginated listing collector.
//!
//! Walks the guide's restaurant listing page by page over plain HTTP (no
//! renderer needed — the cards are server-rendered) and accumulates detail
//! URLs in first-seen order.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::events::{self, EventSender, HarvestEvent};
use crate::extract;
use crate::http::HttpClient;

/// How many consecutive card-less pages end the walk.
const MAX_EMPTY_PAGES: u32 = 2;

/// Per-page fetch timeout, milliseconds.
const PAGE_TIMEOUT_MS: u64 = 15_000;

/// Collects restaurant detail URLs from the paginated listing.
pub struct ListingCollector {
    http: HttpClient,
    start_url: String,
    page_delay: Duration,
    events: Option<EventSender>,
}

impl ListingCollector {
    pub fn new(http: HttpClient, start_url: impl Into<String>, page_delay: Duration) -> Self {
        Self {
            http,
            start_url: start_url.into(),
            page_delay,
            events: None,
        }
    }

    /// Attach an event bus for per-page progress events.
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Walk listing pages until two consecutive pages yield no cards or the
    /// pagination's advertised maximum is reached. Per-page failures count
    /// as empty pages and never abort the walk.
    pub async fn collect(&self) -> Result<Vec<String>> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut urls: Vec<String> = Vec::new();
        let mut page: u32 = 1;
        let mut consecutive_empty: u32 = 0;

        info!("collecting restaurant URLs from {}", self.start_url);

        while consecutive_empty < MAX_EMPTY_PAGES {
            let page_url = self.page_url(page);

            let html = match self.http.get(&page_url, PAGE_TIMEOUT_MS).await {
                Ok(resp) if resp.status == 200 => resp.body,
                Ok(resp) => {
                    warn!("listing page {page} returned {}", resp.status);
                    events::emit(
                        &self.events,
                        HarvestEvent::Warning {
                            message: format!("listing page {page} returned {}", resp.status),
                        },
                    );
                    consecutive_empty += 1;
                    page += 1;
                    continue;
                }
                Err(e) => {
                    warn!("listing page {page} fetch failed: {e:#}");
                    events::emit(
                        &self.events,
                        HarvestEvent::Warning {
                            message: format!("listing page {page} fetch failed: {e:#}"),
                        },
                    );
                    consecutive_empty += 1;
                    page += 1;
                    continue;
                }
            };

            // Parse off the async runtime: scraper's DOM is !Send.
            let base = self.base_url()?;
            let (card_urls, max_page) = tokio::task::spawn_blocking(move || {
                let cards = extract::listing_card_urls(&html, &base);
                let max_page = extract::max_listing_page(&html);
                (cards, max_page)
            })
            .await
            .context("listing parse task panicked")?;

            if card_urls.is_empty() {
                consecutive_empty += 1;
                info!(
                    "no cards on listing page {page} (consecutive empty: {consecutive_empty})"
                );
                page += 1;
                continue;
            }
            consecutive_empty = 0;

            let mut new_on_page = 0usize;
            for url in &card_urls {
                if seen.insert(url.clone()) {
                    urls.push(url.clone());
                    new_on_page += 1;
                }
            }

            info!(
                "listing page {page}: {} cards, {new_on_page} new (total {})",
                card_urls.len(),
                urls.len()
            );
            events::emit(
                &self.events,
                HarvestEvent::ListingPageScanned {
                    page,
                    cards: card_urls.len(),
                    new_urls: new_on_page,
                },
            );

            if let Some(max) = max_page {
                if page >= max {
                    info!("pagination reports {max} pages; stopping at page {page}");
                    break;
                }
            }

            page += 1;
            tokio::time::sleep(self.page_delay).await;
        }

        info!("listing walk complete: {} restaurant URLs", urls.len());
        Ok(urls)
    }

    /// URL for listing page `n`: page 1 is the start URL, later pages insert
    /// the guide's `/page/{n}` segment before the query string.
    fn page_url(&self, page: u32) -> String {
        if page == 1 {
            return self.start_url.clone();
        }
        let (path_part, query) = match self.start_url.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (self.start_url.as_str(), None),
        };
        let path_part = path_part.trim_end_matches('/');
        match query {
            Some(q) => format!("{path_part}/page/{page}?{q}"),
            None => format!("{path_part}/page/{page}"),
        }
    }

    fn base_url(&self) -> Result<String> {
        let parsed = url::Url::parse(&self.start_url)
            .with_context(|| format!("invalid start URL: {}", self.start_url))?;
        let mut base = format!("{}://{}", parsed.scheme(), parsed.host_str().unwrap_or_default());
        if let Some(port) = parsed.port() {
            base.push_str(&format!(":{port}"));
        }
        Ok(base)
    }
}
