use crate::config::canonical_names;
use crate::models::{DetailRecord, ListingRecord, UNKNOWN};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

/// Listings CSV header, matching the source site's own vocabulary.
pub const LISTING_HEADER: [&str; 7] = ["ID", "Titre", "Prix", "Année", "Ville", "Carburant", "Lien"];

/// Image references are flattened to one delimiter-joined cell so the CSV
/// stays spreadsheet-friendly.
pub const IMAGE_JOIN: &str = "; ";

pub fn join_image_refs(refs: &[String]) -> String {
    refs.join(IMAGE_JOIN)
}

pub fn split_image_refs(cell: &str) -> Vec<String> {
    if cell.is_empty() {
        return Vec::new();
    }
    cell.split(IMAGE_JOIN).map(str::to_string).collect()
}

pub fn write_listings(path: &Path, listings: &[ListingRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    writer.write_record(LISTING_HEADER)?;
    for listing in listings {
        writer.write_record([
            listing.id.as_str(),
            listing.title.as_str(),
            listing.price_text.as_str(),
            listing.year_text.as_str(),
            listing.city.as_str(),
            listing.fuel_text.as_str(),
            listing.url.as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_listings(path: &Path) -> Result<Vec<ListingRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut listings = Vec::new();
    for record in reader.records() {
        let record = record.context("Malformed listings row")?;
        let field = |idx: usize| -> String {
            record
                .get(idx)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(UNKNOWN)
                .to_string()
        };
        listings.push(ListingRecord {
            id: field(0),
            title: field(1),
            price_text: field(2),
            year_text: field(3),
            city: field(4),
            fuel_text: field(5),
            url: field(6),
        });
    }
    Ok(listings)
}

/// Detail CSV header: id and url, the canonical attribute columns in
/// label-table order, then description and the joined image cell.
pub fn detail_header() -> Vec<String> {
    let mut header = vec!["ID".to_string(), "URL".to_string()];
    header.extend(canonical_names().iter().map(|name| name.to_string()));
    header.push("Description".to_string());
    header.push("Images".to_string());
    header
}

pub fn write_details(path: &Path, details: &[DetailRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    writer.write_record(detail_header())?;
    for detail in details {
        let mut row = vec![detail.id.clone(), detail.url.clone()];
        for name in canonical_names() {
            row.push(
                detail
                    .attributes
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| UNKNOWN.to_string()),
            );
        }
        row.push(detail.description.clone());
        row.push(join_image_refs(&detail.image_refs));
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Pretty-printed JSON snapshot of a run, written next to the CSV output.
pub fn write_json_report<T: Serialize>(path: &Path, report: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
