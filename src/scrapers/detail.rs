use crate::config::{canonical_names, ScoutConfig, DETAIL_LABELS};
use crate::models::{DetailRecord, ListingRecord, UNKNOWN};
use crate::scrapers::images::{image_slot, ImageDownloader};
use crate::scrapers::traits::PageRenderer;
use scraper::{Html, Selector};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Parsed detail page before images are fetched: attributes and description
/// here, image URLs handed to the downloader separately.
#[derive(Debug)]
pub struct DetailPage {
    pub attributes: BTreeMap<String, String>,
    pub description: String,
    pub image_urls: Vec<String>,
}

/// Parse one rendered detail page.
///
/// Attribute rows are matched against the label table; unmapped labels are
/// dropped, labels missing from the page keep the sentinel. Image URLs come
/// back in presentation order, https only.
pub fn extract_detail(html: &str) -> DetailPage {
    let document = Html::parse_document(html);
    let row_sel = Selector::parse(".detail_line").unwrap();
    let key_sel = Selector::parse(".col-md-6").unwrap();
    let value_sel = Selector::parse(".text_bold").unwrap();
    let description_sel = Selector::parse(".options").unwrap();
    let image_sel = Selector::parse(r#"img[data-u="image"]"#).unwrap();

    let mut attributes: BTreeMap<String, String> = canonical_names()
        .iter()
        .map(|name| (name.to_string(), UNKNOWN.to_string()))
        .collect();

    for row in document.select(&row_sel) {
        let key = row
            .select(&key_sel)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string());
        let value = row
            .select(&value_sel)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string());

        let (Some(key), Some(value)) = (key, value) else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        if let Some((_, canonical)) = DETAIL_LABELS.iter().find(|(label, _)| *label == key) {
            attributes.insert(canonical.to_string(), value);
        }
    }

    let description = document
        .select(&description_sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string());

    let image_urls: Vec<String> = document
        .select(&image_sel)
        .filter_map(|img| img.value().attr("src"))
        .filter(|src| src.starts_with("https"))
        .map(|src| src.to_string())
        .collect();

    DetailPage {
        attributes,
        description,
        image_urls,
    }
}

/// Outcome of one enrich run.
#[derive(Debug)]
pub struct EnrichOutcome {
    pub details: Vec<DetailRecord>,
    pub soft_failures: usize,
    pub skipped_unresolvable: usize,
}

/// Drives detail extraction and image download over a harvested listing set
/// with a bounded worker pool. Failures stay contained to their listing.
#[derive(Clone)]
pub struct Enricher {
    renderer: Arc<dyn PageRenderer>,
    downloader: Arc<ImageDownloader>,
    config: ScoutConfig,
    image_root: PathBuf,
}

impl Enricher {
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        downloader: Arc<ImageDownloader>,
        config: ScoutConfig,
        image_root: PathBuf,
    ) -> Self {
        Self {
            renderer,
            downloader,
            config,
            image_root,
        }
    }

    /// Enrich every resolvable listing. Records with a sentinel id or URL
    /// are terminal-skips; everything else yields a DetailRecord, sentinel
    /// when the detail page never became parseable.
    pub async fn enrich(&self, listings: &[ListingRecord], cancel: &CancellationToken) -> EnrichOutcome {
        let semaphore = Arc::new(Semaphore::new(self.config.enrich_workers.max(1)));
        let mut handles = Vec::new();
        let mut skipped_unresolvable = 0;

        for listing in listings {
            if !listing.can_enrich() {
                warn!("Listing '{}' has no resolvable id/url, skipping enrichment", listing.title);
                skipped_unresolvable += 1;
                continue;
            }

            let enricher = self.clone();
            let listing = listing.clone();
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let key = (listing.id.clone(), listing.url.clone());

            let handle = tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (DetailRecord::sentinel(&listing.id, &listing.url, &canonical_names()), true);
                };
                enricher.enrich_one(&listing, &cancel).await
            });
            handles.push((key, handle));
        }

        let mut details = Vec::new();
        let mut soft_failures = 0;
        for ((id, url), handle) in handles {
            match handle.await {
                Ok((record, soft)) => {
                    if soft {
                        soft_failures += 1;
                    }
                    details.push(record);
                }
                Err(e) => {
                    warn!("Enrichment worker for {} died: {}", id, e);
                    soft_failures += 1;
                    details.push(DetailRecord::sentinel(&id, &url, &canonical_names()));
                }
            }
        }

        EnrichOutcome {
            details,
            soft_failures,
            skipped_unresolvable,
        }
    }

    /// One listing, in isolation. Never fails: a dead detail page yields the
    /// sentinel record, a dead image drops only that image.
    async fn enrich_one(&self, listing: &ListingRecord, cancel: &CancellationToken) -> (DetailRecord, bool) {
        let canonical = canonical_names();

        let rendered = tokio::select! {
            _ = cancel.cancelled() => {
                return (DetailRecord::sentinel(&listing.id, &listing.url, &canonical), true);
            }
            r = self.renderer.render(
                &listing.url,
                &self.config.detail_ready_selector,
                self.config.render_timeout,
            ) => r,
        };

        let page = match rendered {
            Ok(html) => extract_detail(&html),
            Err(e) => {
                warn!("Detail page for {} unavailable ({}), recording sentinel", listing.id, e);
                return (DetailRecord::sentinel(&listing.id, &listing.url, &canonical), true);
            }
        };

        info!("Listing {}: {} image(s) found", listing.id, page.image_urls.len());

        let downloads = page.image_urls.iter().enumerate().map(|(idx, url)| {
            let downloader = Arc::clone(&self.downloader);
            let dest = image_slot(&self.image_root, &listing.id, idx + 1);
            let url = url.clone();
            let listing_id = listing.id.clone();
            async move {
                match downloader.download(&url, &dest).await {
                    Ok(storage_ref) => Some(storage_ref),
                    Err(e) => {
                        warn!("Image {} of listing {} failed: {}", idx + 1, listing_id, e);
                        None
                    }
                }
            }
        });

        // The record finalizes only once every image attempt has resolved
        // or the per-listing deadline passes; join_all keeps presentation
        // order.
        let image_refs: Vec<String> = tokio::select! {
            _ = cancel.cancelled() => Vec::new(),
            results = tokio::time::timeout(
                self.config.images_deadline,
                futures::future::join_all(downloads),
            ) => match results {
                Ok(resolved) => resolved.into_iter().flatten().collect(),
                Err(_) => {
                    warn!("Image downloads for {} exceeded the deadline", listing.id);
                    Vec::new()
                }
            }
        };

        let record = DetailRecord {
            id: listing.id.clone(),
            url: listing.url.clone(),
            attributes: page.attributes,
            description: page.description,
            image_refs,
        };
        (record, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrapers::images::FsImageStore;
    use crate::scrapers::traits::{ByteFetcher, ByteStream};
    use crate::scrapers::types::{DownloadError, FetchError};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::time::Duration;

    const DETAIL_PAGE: &str = r#"
    <html><body>
      <div class="car-detail">
        <div class="detail_line">
          <span class="col-md-6">Kilométrage</span>
          <span class="text_bold">120 000 - 129 999</span>
        </div>
        <div class="detail_line">
          <span class="col-md-6">Carburant</span>
          <span class="text_bold">Diesel</span>
        </div>
        <div class="detail_line">
          <span class="col-md-6">Boite de vitesses</span>
          <span class="text_bold">Manuelle</span>
        </div>
        <div class="detail_line">
          <span class="col-md-6">Couleur</span>
          <span class="text_bold">Rouge</span>
        </div>
        <div class="options">Climatisation, jantes alu, première main.</div>
        <img data-u="image" src="https://cdn.example.test/car/1.webp">
        <img data-u="image" src="https://cdn.example.test/car/2.webp">
        <img data-u="image" src="http://cdn.example.test/car/insecure.webp">
      </div>
    </body></html>
    "#;

    struct RoutedRenderer;

    #[async_trait]
    impl PageRenderer for RoutedRenderer {
        async fn render(
            &self,
            url: &str,
            _ready_selector: &str,
            timeout: Duration,
        ) -> Result<String, FetchError> {
            if url.contains("timeout") {
                Err(FetchError::Timeout(timeout))
            } else {
                Ok(DETAIL_PAGE.to_string())
            }
        }
    }

    struct StaticFetcher;

    #[async_trait]
    impl ByteFetcher for StaticFetcher {
        async fn get_bytes(
            &self,
            _url: &str,
            _headers: &[(String, String)],
            _timeout: Duration,
        ) -> Result<ByteStream, DownloadError> {
            Ok(Box::pin(futures::stream::iter(vec![Ok(Bytes::from_static(
                b"image-bytes",
            ))])))
        }
    }

    fn listing(id: &str, url: &str) -> ListingRecord {
        ListingRecord {
            id: id.to_string(),
            title: "Test Car".to_string(),
            price_text: UNKNOWN.to_string(),
            year_text: UNKNOWN.to_string(),
            city: UNKNOWN.to_string(),
            fuel_text: UNKNOWN.to_string(),
            url: url.to_string(),
        }
    }

    fn enricher(image_root: PathBuf) -> Enricher {
        let config = ScoutConfig {
            retry_base: Duration::from_millis(1),
            ..ScoutConfig::default()
        };
        let downloader = Arc::new(ImageDownloader::new(
            Arc::new(StaticFetcher),
            Arc::new(FsImageStore),
            &config,
        ));
        Enricher::new(Arc::new(RoutedRenderer), downloader, config, image_root)
    }

    #[test]
    fn mapped_labels_resolve_and_unmapped_labels_are_dropped() {
        let page = extract_detail(DETAIL_PAGE);

        assert_eq!(page.attributes["Mileage"], "120 000 - 129 999");
        assert_eq!(page.attributes["Fuel"], "Diesel");
        assert_eq!(page.attributes["Transmission"], "Manuelle");
        // "Couleur" is not in the label table.
        assert!(!page.attributes.values().any(|v| v == "Rouge"));
        // Labels absent from the page keep the sentinel, never a missing key.
        assert_eq!(page.attributes["Doors"], UNKNOWN);
        assert_eq!(page.attributes.len(), canonical_names().len());

        assert_eq!(page.description, "Climatisation, jantes alu, première main.");
    }

    #[test]
    fn image_urls_keep_presentation_order_and_drop_non_https() {
        let page = extract_detail(DETAIL_PAGE);
        assert_eq!(
            page.image_urls,
            vec![
                "https://cdn.example.test/car/1.webp",
                "https://cdn.example.test/car/2.webp",
            ]
        );
    }

    #[tokio::test]
    async fn a_timed_out_listing_does_not_poison_its_sibling() {
        let dir = tempfile::tempdir().unwrap();
        let enricher = enricher(dir.path().to_path_buf());

        let listings = vec![
            listing("111", "https://example.test/detail-annonce/111/timeout.html"),
            listing("222", "https://example.test/detail-annonce/222/ok.html"),
        ];
        let outcome = enricher.enrich(&listings, &CancellationToken::new()).await;

        assert_eq!(outcome.details.len(), 2);
        assert_eq!(outcome.soft_failures, 1);

        let dead = outcome.details.iter().find(|d| d.id == "111").unwrap();
        assert!(dead.attributes.values().all(|v| v == UNKNOWN));
        assert!(dead.image_refs.is_empty());

        let alive = outcome.details.iter().find(|d| d.id == "222").unwrap();
        assert_eq!(alive.attributes["Fuel"], "Diesel");
        assert_eq!(alive.image_refs.len(), 2);
        assert!(alive.image_refs[0].ends_with("1.jpg"));
        assert!(alive.image_refs[1].ends_with("2.jpg"));
        assert!(dir.path().join("222").join("1.jpg").exists());
    }

    #[tokio::test]
    async fn unresolvable_listings_are_terminal_skips() {
        let dir = tempfile::tempdir().unwrap();
        let enricher = enricher(dir.path().to_path_buf());

        let listings = vec![
            listing(UNKNOWN, "https://example.test/detail-annonce/000/x.html"),
            listing("333", UNKNOWN),
            listing("444", "https://example.test/detail-annonce/444/ok.html"),
        ];
        let outcome = enricher.enrich(&listings, &CancellationToken::new()).await;

        assert_eq!(outcome.skipped_unresolvable, 2);
        assert_eq!(outcome.details.len(), 1);
        assert_eq!(outcome.details[0].id, "444");
    }
}
