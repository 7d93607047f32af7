use std::time::Duration;

/// French source label -> canonical English attribute name.
///
/// Kept as data so a site relayout is an edit here, not in the extractor.
/// Labels missing from this table are dropped on purpose to bound schema
/// growth; labels present but absent from a page yield the sentinel.
pub const DETAIL_LABELS: &[(&str, &str)] = &[
    ("Kilométrage", "Mileage"),
    ("Année", "Year"),
    ("Boite de vitesses", "Transmission"),
    ("Carburant", "Fuel"),
    ("Date", "Date"),
    ("Puissance fiscale", "Fiscal Power"),
    ("Nombre de portes", "Doors"),
    ("Première main", "First Owner"),
    ("Véhicule dédouané", "Cleared Vehicle"),
];

/// Canonical attribute names in label-table order (detail CSV column order).
pub fn canonical_names() -> Vec<&'static str> {
    DETAIL_LABELS.iter().map(|(_, canonical)| *canonical).collect()
}

/// Tunables for a scrape run.
#[derive(Debug, Clone)]
pub struct ScoutConfig {
    /// Catalog base URL; page offsets are appended to this.
    pub base_url: String,
    /// Listings per catalog page (the site's pagination stride).
    pub page_size: usize,
    /// Cooperative pause between consecutive page fetches.
    pub page_delay: Duration,
    /// Bounded wait for a page's readiness marker.
    pub render_timeout: Duration,
    /// Readiness marker on catalog pages.
    pub listing_ready_selector: String,
    /// Readiness marker on detail pages.
    pub detail_ready_selector: String,
    /// Headless Chrome sessions in the pool; bounds render concurrency.
    pub browser_pool_size: usize,
    /// Concurrent per-listing enrichment workers.
    pub enrich_workers: usize,
    /// Image fetch retry schedule: first backoff delay, doubled per attempt.
    pub retry_base: Duration,
    pub retry_attempts: u32,
    /// Timeout for one image byte fetch.
    pub fetch_timeout: Duration,
    /// Ceiling on how long one listing's image set may block its record.
    pub images_deadline: Duration,
    pub user_agent: String,
    pub referer: String,
    pub headless: bool,
    pub sandbox: bool,
}

impl Default for ScoutConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.moteur.ma/fr/voiture/achat-voiture-occasion/".to_string(),
            page_size: 30,
            page_delay: Duration::from_secs(3),
            render_timeout: Duration::from_secs(10),
            listing_ready_selector: ".row-item".to_string(),
            detail_ready_selector: ".car-detail".to_string(),
            browser_pool_size: 2,
            enrich_workers: 4,
            retry_base: Duration::from_millis(500),
            retry_attempts: 3,
            fetch_timeout: Duration::from_secs(10),
            images_deadline: Duration::from_secs(60),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
            referer: "https://www.moteur.ma/".to_string(),
            headless: true,
            sandbox: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_table_covers_the_nine_detail_rows() {
        assert_eq!(DETAIL_LABELS.len(), 9);
        assert_eq!(canonical_names().first(), Some(&"Mileage"));
    }
}
