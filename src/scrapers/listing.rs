use crate::config::ScoutConfig;
use crate::models::{ListingRecord, UNKNOWN};
use crate::scrapers::traits::PageRenderer;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Extract the numeric advert identifier from a detail-page URL.
/// The id is the path segment right after the `detail-annonce` marker.
pub fn listing_id_from_url(url: &str) -> String {
    let segments: Vec<&str> = url.split('/').collect();
    segments
        .windows(2)
        .find_map(|pair| {
            let digits = !pair[1].is_empty() && pair[1].chars().all(|c| c.is_ascii_digit());
            (pair[0] == "detail-annonce" && digits).then(|| pair[1].to_string())
        })
        .unwrap_or_else(|| UNKNOWN.to_string())
}

fn text_or_unknown(element: ElementRef<'_>, selector: &Selector) -> String {
    element
        .select(selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// Parse one rendered catalog page into listing records.
///
/// Field lookups are independent: a listing missing its price or meta rows
/// is still emitted with sentinel fields. Only a missing container drops
/// anything.
pub fn extract_listings(html: &str) -> Vec<ListingRecord> {
    let document = Html::parse_document(html);
    let container_sel = Selector::parse(".row-item").unwrap();
    let title_sel = Selector::parse("h3.title_mark_model").unwrap();
    let link_sel = Selector::parse("h3.title_mark_model a").unwrap();
    let price_sel = Selector::parse(".PriceListing").unwrap();
    let meta_sel = Selector::parse("li").unwrap();

    let mut listings = Vec::new();

    for card in document.select(&container_sel) {
        let title = text_or_unknown(card, &title_sel);
        let price_text = text_or_unknown(card, &price_sel);

        let (url, id) = match card
            .select(&link_sel)
            .next()
            .and_then(|a| a.value().attr("href"))
        {
            Some(href) if !href.is_empty() => (href.to_string(), listing_id_from_url(href)),
            _ => (UNKNOWN.to_string(), UNKNOWN.to_string()),
        };

        // Meta rows carry year / city / fuel at fixed positions.
        let meta: Vec<String> = card
            .select(&meta_sel)
            .map(|li| li.text().collect::<String>().trim().to_string())
            .collect();
        let meta_at = |idx: usize| -> String {
            meta.get(idx)
                .filter(|s| !s.is_empty())
                .cloned()
                .unwrap_or_else(|| UNKNOWN.to_string())
        };

        listings.push(ListingRecord {
            id,
            title,
            price_text,
            year_text: meta_at(1),
            city: meta_at(2),
            fuel_text: meta_at(3),
            url,
        });
    }

    listings
}

/// Outcome of one harvest run.
#[derive(Debug)]
pub struct HarvestOutcome {
    pub listings: Vec<ListingRecord>,
    pub pages_fetched: usize,
    pub pages_empty: usize,
}

/// Walks catalog pages by offset stride and accumulates deduplicated
/// listing records.
pub struct Harvester {
    renderer: Arc<dyn PageRenderer>,
    config: ScoutConfig,
}

impl Harvester {
    pub fn new(renderer: Arc<dyn PageRenderer>, config: ScoutConfig) -> Self {
        Self { renderer, config }
    }

    /// Catalog URL for page `k`. The first page carries no offset suffix.
    pub fn page_url(&self, page_index: usize) -> String {
        let offset = page_index * self.config.page_size;
        if offset == 0 {
            self.config.base_url.clone()
        } else {
            format!("{}{}", self.config.base_url, offset)
        }
    }

    /// Fetch pages `[0, max_pages)` in order. A page that fails or parses
    /// empty is logged and skipped; it never truncates the run. Between
    /// pages the configured pacing delay applies, racing cancellation.
    pub async fn harvest(&self, max_pages: usize, cancel: &CancellationToken) -> HarvestOutcome {
        let mut listings: Vec<ListingRecord> = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut pages_fetched = 0;
        let mut pages_empty = 0;

        for page in 0..max_pages {
            if cancel.is_cancelled() {
                warn!("Harvest cancelled after {} page(s)", page);
                break;
            }
            if page > 0 && !self.config.page_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        warn!("Harvest cancelled during pacing delay");
                        break;
                    }
                    _ = tokio::time::sleep(self.config.page_delay) => {}
                }
            }

            let url = self.page_url(page);
            info!("Fetching catalog page {} ({})", page, url);

            let html = match self
                .renderer
                .render(&url, &self.config.listing_ready_selector, self.config.render_timeout)
                .await
            {
                Ok(html) => html,
                Err(e) => {
                    // A transient render failure on one page must not
                    // truncate the whole run.
                    warn!("Page {} yielded no content ({}), continuing", page, e);
                    pages_empty += 1;
                    continue;
                }
            };
            pages_fetched += 1;

            let records = extract_listings(&html);
            if records.is_empty() {
                warn!("Page {} parsed to zero listings, continuing", page);
                pages_empty += 1;
                continue;
            }
            info!("Page {}: {} listing(s)", page, records.len());

            for record in records {
                if record.id == UNKNOWN {
                    // Structurally distinct even if logically a duplicate.
                    listings.push(record);
                } else if let Some(&pos) = seen.get(&record.id) {
                    // Last seen wins.
                    listings[pos] = record;
                } else {
                    seen.insert(record.id.clone(), listings.len());
                    listings.push(record);
                }
            }
        }

        HarvestOutcome {
            listings,
            pages_fetched,
            pages_empty,
        }
    }
}
