//! CSV input/output for scraped offers.

use crate::models::{Offer, PricedPoint};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// `<data_dir>/<city>_<category>_offers.csv`
pub fn offers_csv_path(data_dir: &Path, city: &str, category: &str) -> PathBuf {
    data_dir.join(format!("{}_{}_offers.csv", city, category))
}

pub fn write_offers_csv(path: &Path, offers: &[Offer]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Could not create dir {:?}", parent))?;
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {:?}", path))?;
    for offer in offers {
        writer.serialize(offer)?;
    }
    writer.flush()?;
    info!("{} offers written to {:?}", offers.len(), path);
    Ok(())
}

/// Read a full offers file. Rows that do not parse are skipped with a warning.
pub fn read_offers_csv(path: &Path) -> Result<Vec<Offer>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {:?}", path))?;

    let mut offers = Vec::new();
    for (i, result) in reader.deserialize::<Offer>().enumerate() {
        match result {
            Ok(offer) => offers.push(offer),
            Err(e) => warn!("Row {} in {:?}: {}", i + 1, path, e),
        }
    }
    debug!("{} offers read from {:?}", offers.len(), path);
    Ok(offers)
}

/// Only the columns the grid needs; any other columns are ignored.
#[derive(Debug, Deserialize)]
struct ListingRow {
    #[serde(default, deserialize_with = "csv::invalid_option")]
    price_per_area: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    longitude: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    latitude: Option<f64>,
}

/// Listings with price and location. Rows with any of the three missing are
/// dropped.
pub fn read_priced_points(path: &Path) -> Result<Vec<PricedPoint>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {:?}", path))?;

    let mut points = Vec::new();
    let mut dropped = 0usize;
    for (i, result) in reader.deserialize::<ListingRow>().enumerate() {
        let row = match result {
            Ok(r) => r,
            Err(e) => {
                warn!("Row {} in {:?}: {}", i + 1, path, e);
                dropped += 1;
                continue;
            }
        };
        match (row.price_per_area, row.longitude, row.latitude) {
            (Some(price), Some(longitude), Some(latitude)) => {
                points.push(PricedPoint { longitude, latitude, price })
            }
            _ => dropped += 1,
        }
    }

    info!("{:?}: {} priced listings, {} incomplete rows dropped", path, points.len(), dropped);
    Ok(points)
}
