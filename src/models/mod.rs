use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sentinel marking a field that was expected but absent in the source.
/// Distinct from an empty string so omissions stay queryable downstream.
pub const UNKNOWN: &str = "unknown";

/// One catalog-page advertisement summary.
///
/// Every free-text field degrades to [`UNKNOWN`] independently; a record is
/// emitted as soon as its container node matched, no matter how many fields
/// resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingRecord {
    pub id: String,
    pub title: String,
    pub price_text: String,
    pub year_text: String,
    pub city: String,
    pub fuel_text: String,
    pub url: String,
}

impl ListingRecord {
    /// A record can only be enriched when both its identifier and its
    /// detail-page URL resolved.
    pub fn can_enrich(&self) -> bool {
        self.id != UNKNOWN && self.url != UNKNOWN
    }
}

/// One enriched listing: structured attributes plus local image references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailRecord {
    pub id: String,
    pub url: String,
    /// Canonical attribute name -> free-text value. Every canonical key from
    /// the label table is present; unresolved ones hold [`UNKNOWN`].
    pub attributes: BTreeMap<String, String>,
    pub description: String,
    /// Local storage references in source presentation order. Only images
    /// that actually landed on disk appear here.
    pub image_refs: Vec<String>,
}

impl DetailRecord {
    /// All-sentinel record for a listing whose detail page never became
    /// parseable (soft failure, kept in the output).
    pub fn sentinel(id: &str, url: &str, canonical_names: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            url: url.to_string(),
            attributes: canonical_names
                .iter()
                .map(|name| (name.to_string(), UNKNOWN.to_string()))
                .collect(),
            description: UNKNOWN.to_string(),
            image_refs: Vec::new(),
        }
    }
}

/// JSON snapshot written next to the listings CSV after a harvest run.
#[derive(Debug, Serialize, Deserialize)]
pub struct HarvestReport {
    pub scraped_at: DateTime<Utc>,
    pub pages_fetched: usize,
    pub pages_empty: usize,
    pub listings: Vec<ListingRecord>,
}

/// JSON snapshot written next to the details CSV after an enrich run.
#[derive(Debug, Serialize, Deserialize)]
pub struct EnrichReport {
    pub scraped_at: DateTime<Utc>,
    pub enriched: usize,
    pub soft_failures: usize,
    pub skipped_unresolvable: usize,
    pub details: Vec<DetailRecord>,
}
