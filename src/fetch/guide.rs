//! Guide-site detail fetcher: renders the page, parses the data sheet,
//! opens the photo gallery, and downloads the images it finds.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use regex::Regex;
use tracing::{debug, info};

use super::{DetailFetcher, MediaRef, RestaurantRecord};
use crate::extract;
use crate::http::HttpClient;
use crate::renderer::RenderContext;

/// Navigation budget for one detail page, milliseconds.
const NAVIGATE_TIMEOUT_MS: u64 = 20_000;

/// Per-image download budget, milliseconds.
const IMAGE_TIMEOUT_MS: u64 = 20_000;

/// Settle time after opening the gallery modal so lazy images populate.
const GALLERY_SETTLE: Duration = Duration::from_millis(1500);

/// Selectors tried, in order, to open the photo gallery modal.
const GALLERY_BUTTON_SELECTORS: &[&str] = &[
    "button.masthead__gallery-open.js-gallery-button",
    r##"button[data-target="#js-gallery-masthead"]"##,
    r##"button[data-target="#js-modal-gallery"]"##,
    ".js-modal-gallery-trigger",
    r#"button[aria-label*="gallery"]"#,
    r#"button[aria-label*="Gallery"]"#,
    ".gallery-trigger",
    ".image-gallery-trigger",
];

/// Production [`DetailFetcher`] for the restaurant guide.
pub struct GuideDetailFetcher {
    http: HttpClient,
    images_dir: PathBuf,
}

impl GuideDetailFetcher {
    pub fn new(http: HttpClient, images_dir: impl Into<PathBuf>) -> Self {
        Self {
            http,
            images_dir: images_dir.into(),
        }
    }

    /// Try each known gallery-button selector until one clicks.
    async fn open_gallery(&self, ctx: &dyn RenderContext) -> bool {
        for selector in GALLERY_BUTTON_SELECTORS {
            let script = format!(
                r#"(() => {{
                    const btn = document.querySelector({});
                    if (btn) {{ btn.click(); return true; }}
                    return false;
                }})()"#,
                serde_json::to_string(selector).unwrap_or_default()
            );
            match ctx.execute_js(&script).await {
                Ok(value) if value.as_bool() == Some(true) => {
                    debug!("gallery opened via selector {selector}");
                    return true;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("gallery click failed for {selector}: {e:#}");
                }
            }
        }
        false
    }

    /// Download every gallery image, skipping failures.
    async fn download_images(&self, name: &str, image_urls: &[String]) -> Vec<MediaRef> {
        if image_urls.is_empty() {
            return Vec::new();
        }

        tokio::fs::create_dir_all(&self.images_dir).await.ok();

        let mut media = Vec::new();
        for (i, image_url) in image_urls.iter().enumerate() {
            let filename = image_filename(name, i + 1, image_url);
            let dest = self.images_dir.join(&filename);

            match self.http.get_bytes(image_url, IMAGE_TIMEOUT_MS).await {
                Ok(bytes) => {
                    if let Err(e) = tokio::fs::write(&dest, &bytes).await {
                        debug!("failed to write {}: {e:#}", dest.display());
                        continue;
                    }
                    media.push(MediaRef {
                        url: image_url.clone(),
                        local_path: dest.to_string_lossy().into_owned(),
                        filename,
                    });
                }
                Err(e) => {
                    debug!("image download failed for {image_url}: {e:#}");
                }
            }
        }
        media
    }
}

#[async_trait::async_trait]
impl DetailFetcher for GuideDetailFetcher {
    async fn fetch(&self, url: &str, ctx: &mut dyn RenderContext) -> Result<RestaurantRecord> {
        ctx.navigate(url, NAVIGATE_TIMEOUT_MS)
            .await
            .with_context(|| format!("navigating to {url}"))?;

        let html = ctx.get_html().await.context("reading rendered detail page")?;
        let fields = tokio::task::spawn_blocking(move || extract::detail_fields(&html))
            .await
            .context("detail parse task panicked")?;

        // The gallery modal exposes the full-size photo set; without it we
        // still pick up whatever ci-src images the masthead carries.
        let opened = self.open_gallery(ctx).await;
        if opened {
            tokio::time::sleep(GALLERY_SETTLE).await;
        }

        let html = ctx.get_html().await.context("reading gallery DOM")?;
        let base = base_of(url);
        let image_urls =
            tokio::task::spawn_blocking(move || extract::gallery_image_urls(&html, &base))
                .await
                .context("gallery parse task panicked")?;

        debug!(
            "{}: {} gallery images discovered (modal opened: {opened})",
            fields.name,
            image_urls.len()
        );

        let images = self.download_images(&fields.name, &image_urls).await;
        info!("{}: collected {} images", fields.name, images.len());

        Ok(RestaurantRecord {
            name: fields.name,
            address: fields.address,
            price: fields.price,
            category: fields.category,
            rating: fields.rating,
            url: url.to_string(),
            image_count: images.len(),
            images,
            scraped_at: Utc::now(),
        })
    }
}

/// `<sanitized-name>_<NN>.<ext>` with the extension taken from the URL path.
fn image_filename(name: &str, index: usize, image_url: &str) -> String {
    let safe: String = sanitize_re()
        .replace_all(name, "_")
        .chars()
        .take(50)
        .collect();

    let ext = Path::new(
        url::Url::parse(image_url)
            .ok()
            .map(|u| u.path().to_string())
            .unwrap_or_default()
            .as_str(),
    )
    .extension()
    .and_then(|e| e.to_str())
    .map(|e| e.to_ascii_lowercase())
    .unwrap_or_else(|| "jpg".to_string());

    format!("{safe}_{index:02}.{ext}")
}

fn sanitize_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w\-.]").expect("valid filename regex"))
}

fn base_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.host_str()
                .map(|h| format!("{}://{}", u.scheme(), h))
        })
        .unwrap_or_else(|| "https://guide.michelin.com".to_string())
}
