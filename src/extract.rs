//! CSS-selector extraction for the guide's listing and detail pages.
//!
//! All public entry points are **synchronous** because the `scraper`
//! crate's DOM types are `!Send` — callers wrap these in
//! `tokio::task::spawn_blocking` when integrating with the async runtime.
//!
//! The selectors and text patterns here are tuned to the guide's current
//! markup; they are fragile by nature and carry no resilience guarantees.

use scraper::{Html, Selector};
use url::Url;

/// Scalar fields parsed from a restaurant detail page.
#[derive(Debug, Clone, PartialEq)]
pub struct DetailFields {
    pub name: String,
    pub address: String,
    pub price: String,
    pub category: String,
    pub rating: String,
}

/// Placeholder for fields the page does not expose.
pub const FIELD_UNKNOWN: &str = "정보 없음";

/// Rating shown when a page carries no distinction label at all.
const RATING_DEFAULT: &str = "0 Star, 추천 레스토랑";

/// Distinction phrases as they appear in the guide's Korean markup, paired
/// with the label recorded in output.
const RATING_PATTERNS: &[(&str, &str)] = &[
    ("한 개의 별", "1 Star"),
    ("두 개의 별", "2 Stars"),
    ("세 개의 별", "3 Stars"),
    ("빕 구르망", "Bib Gourmand"),
    ("스몰 숍", "Small Shop"),
];

/// Collect restaurant detail URLs from one listing page, in card order.
pub fn listing_card_urls(html: &str, base_url: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let card_sel = Selector::parse(".js-restaurant__list_item").unwrap();
    let link_sel =
        Selector::parse(r#".card__menu-content--title a[href*="/restaurant/"]"#).unwrap();

    let mut urls = Vec::new();
    for card in document.select(&card_sel) {
        let Some(link) = card.select(&link_sel).next() else {
            continue;
        };
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        if !href.contains("/restaurant/") {
            continue;
        }
        if let Some(absolute) = join_url(base_url, href) {
            urls.push(absolute);
        }
    }
    urls
}

/// Highest page number advertised by the listing's pagination block.
pub fn max_listing_page(html: &str) -> Option<u32> {
    let document = Html::parse_document(html);
    let sel =
        Selector::parse(r#"nav[aria-label="pagination"] a, div[class*="pagination"] a"#).unwrap();

    document
        .select(&sel)
        .filter_map(|a| {
            let text: String = a.text().collect::<String>().trim().to_string();
            text.parse::<u32>().ok()
        })
        .max()
}

/// Parse the scalar fields from a rendered detail page.
pub fn detail_fields(html: &str) -> DetailFields {
    let document = Html::parse_document(html);

    let name_sel = Selector::parse("h1.data-sheet__title").unwrap();
    let name = document
        .select(&name_sel)
        .next()
        .map(|el| collapse_ws(&el.text().collect::<String>()))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| FIELD_UNKNOWN.to_string());

    let block_sel = Selector::parse("div.data-sheet__block--text").unwrap();
    let blocks: Vec<String> = document
        .select(&block_sel)
        .map(|el| collapse_ws(&el.text().collect::<String>()))
        .collect();

    // Address: first block that is neither the price/category line nor a
    // separator fragment.
    let address = blocks
        .iter()
        .find(|text| {
            !text.starts_with('₩') && !text.starts_with('·') && text.chars().count() > 5
        })
        .cloned()
        .unwrap_or_else(|| FIELD_UNKNOWN.to_string());

    // Price tier and category share one "₩₩ · 한식" block.
    let mut price = FIELD_UNKNOWN.to_string();
    let mut category = FIELD_UNKNOWN.to_string();
    if let Some(text) = blocks.iter().find(|t| t.contains('₩') && t.contains('·')) {
        let parts: Vec<&str> = text.split('·').collect();
        if parts.len() >= 2 {
            price = describe_price_tier(parts[0].trim());
            category = parts[1].trim().to_string();
        }
    }

    let rating = classification_labels(&document);

    DetailFields {
        name,
        address,
        price,
        category,
        rating,
    }
}

/// Expand a raw ₩-mark tier into the annotated label used in output.
pub fn describe_price_tier(raw: &str) -> String {
    match raw {
        "₩" => "₩ (저렴)".to_string(),
        "₩₩" => "₩₩ (보통)".to_string(),
        "₩₩₩" => "₩₩₩ (다소 고가)".to_string(),
        "₩₩₩₩" => "₩₩₩₩ (고가)".to_string(),
        other => other.to_string(),
    }
}

fn classification_labels(document: &Html) -> String {
    let item_sel = Selector::parse("div.data-sheet__classification-item").unwrap();
    let content_sel =
        Selector::parse("div.data-sheet__classification-item--content").unwrap();

    let mut labels: Vec<&str> = Vec::new();
    for item in document.select(&item_sel) {
        for content in item.select(&content_sel) {
            let text = collapse_ws(&content.text().collect::<String>());
            for (pattern, label) in RATING_PATTERNS.iter().copied() {
                if text.contains(pattern) && !labels.contains(&label) {
                    labels.push(label);
                }
            }
            if text == "New" && !labels.contains(&"New") {
                labels.push("New");
            }
        }
    }

    if labels.is_empty() {
        RATING_DEFAULT.to_string()
    } else {
        labels.join(", ")
    }
}

/// Collect gallery image URLs (`img[ci-src]`) from a rendered page.
///
/// Query strings are stripped so CDN sizing parameters don't duplicate the
/// same image; only CDN-hosted originals are kept.
pub fn gallery_image_urls(html: &str, base_url: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let img_sel = Selector::parse("img[ci-src]").unwrap();

    let mut seen = std::collections::HashSet::new();
    let mut urls = Vec::new();
    for img in document.select(&img_sel) {
        let Some(raw) = img.value().attr("ci-src") else {
            continue;
        };
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let absolute = if raw.starts_with('/') {
            match join_url(base_url, raw) {
                Some(u) => u,
                None => continue,
            }
        } else {
            raw.to_string()
        };

        let original = absolute
            .split_once('?')
            .map(|(before, _)| before.to_string())
            .unwrap_or(absolute);

        if original.contains("cloudimg.io") && seen.insert(original.clone()) {
            urls.push(original);
        }
    }
    urls
}

/// Join a possibly-relative href against a base URL.
fn join_url(base: &str, href: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}

fn collapse_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://guide.michelin.com";

    #[test]
    fn test_listing_card_urls() {
        let html = r#"
            <div class="js-restaurant__list_item">
              <div class="card__menu-content--title">
                <a href="/kr/ko/seoul-capital-area/seoul/restaurant/jungsik">Jungsik</a>
              </div>
            </div>
            <div class="js-restaurant__list_item">
              <div class="card__menu-content--title">
                <a href="https://guide.michelin.com/kr/ko/seoul-capital-area/seoul/restaurant/mingles">Mingles</a>
              </div>
            </div>
            <div class="js-restaurant__list_item">
              <div class="card__menu-content--title"><a href="/kr/ko/about">not a restaurant</a></div>
            </div>
        "#;
        let urls = listing_card_urls(html, BASE);
        assert_eq!(
            urls,
            vec![
                "https://guide.michelin.com/kr/ko/seoul-capital-area/seoul/restaurant/jungsik",
                "https://guide.michelin.com/kr/ko/seoul-capital-area/seoul/restaurant/mingles",
            ]
        );
    }

    #[test]
    fn test_max_listing_page() {
        let html = r##"
            <nav aria-label="pagination">
              <a href="#">1</a><a href="#">2</a><a href="#">7</a><a href="#">다음</a>
            </nav>
        "##;
        assert_eq!(max_listing_page(html), Some(7));
        assert_eq!(max_listing_page("<div>no pagination</div>"), None);
    }

    #[test]
    fn test_detail_fields_full_page() {
        let html = r#"
            <h1 class="data-sheet__title"> 정식당 </h1>
            <div class="data-sheet__block--text">서울특별시 강남구 선릉로158길 11</div>
            <div class="data-sheet__block--text">₩₩₩₩ · 이노베이티브</div>
            <div class="data-sheet__classification-item">
              <div class="data-sheet__classification-item--content">두 개의 별</div>
            </div>
            <div class="data-sheet__classification-item">
              <div class="data-sheet__classification-item--content">New</div>
            </div>
        "#;
        let fields = detail_fields(html);
        assert_eq!(fields.name, "정식당");
        assert_eq!(fields.address, "서울특별시 강남구 선릉로158길 11");
        assert_eq!(fields.price, "₩₩₩₩ (고가)");
        assert_eq!(fields.category, "이노베이티브");
        assert_eq!(fields.rating, "2 Stars, New");
    }

    #[test]
    fn test_detail_fields_missing_everything() {
        let fields = detail_fields("<html><body><p>empty</p></body></html>");
        assert_eq!(fields.name, FIELD_UNKNOWN);
        assert_eq!(fields.address, FIELD_UNKNOWN);
        assert_eq!(fields.price, FIELD_UNKNOWN);
        assert_eq!(fields.category, FIELD_UNKNOWN);
        assert_eq!(fields.rating, RATING_DEFAULT);
    }

    #[test]
    fn test_price_tier_labels() {
        assert_eq!(describe_price_tier("₩"), "₩ (저렴)");
        assert_eq!(describe_price_tier("₩₩"), "₩₩ (보통)");
        assert_eq!(describe_price_tier("₩₩₩"), "₩₩₩ (다소 고가)");
        assert_eq!(describe_price_tier("₩₩₩₩"), "₩₩₩₩ (고가)");
        assert_eq!(describe_price_tier("₩₩₩₩₩"), "₩₩₩₩₩");
    }

    #[test]
    fn test_bib_gourmand_label() {
        let html = r#"
            <div class="data-sheet__classification-item">
              <div class="data-sheet__classification-item--content">빕 구르망 · 합리적인 가격의 훌륭한 음식</div>
            </div>
        "#;
        let fields = detail_fields(html);
        assert_eq!(fields.rating, "Bib Gourmand");
    }

    #[test]
    fn test_gallery_image_urls_dedup_and_filter() {
        let html = r#"
            <img ci-src="https://cdn.cloudimg.io/guide/photo1.jpg?w=800">
            <img ci-src="https://cdn.cloudimg.io/guide/photo1.jpg?w=400">
            <img ci-src="/images/photo2.jpg">
            <img ci-src="https://cdn.cloudimg.io/guide/photo3.png">
            <img src="https://cdn.cloudimg.io/guide/ignored.jpg">
        "#;
        let urls = gallery_image_urls(html, BASE);
        assert_eq!(
            urls,
            vec![
                "https://cdn.cloudimg.io/guide/photo1.jpg",
                "https://cdn.cloudimg.io/guide/photo3.png",
            ]
        );
    }
}
