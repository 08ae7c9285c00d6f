use chrono::NaiveDateTime;
use geo::Polygon;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ── Offer ─────────────────────────────────────────────────────────────────────

/// Fields extracted from one offer page. Each one is independently optional;
/// a missing marker in the page leaves that field `None` and nothing else.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OfferFields {
    pub living_area: Option<f64>,
    pub district: Option<String>,
    pub price_per_area: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub refresh_time: Option<String>,
}

impl OfferFields {
    /// Names of the fields the page did not provide.
    pub fn missing(&self) -> Vec<&'static str> {
        let presence = [
            ("living_area", self.living_area.is_some()),
            ("district", self.district.is_some()),
            ("price_per_area", self.price_per_area.is_some()),
            ("latitude", self.latitude.is_some()),
            ("longitude", self.longitude.is_some()),
            ("refresh_time", self.refresh_time.is_some()),
        ];
        presence
            .into_iter()
            .filter(|(_, present)| !present)
            .map(|(name, _)| name)
            .collect()
    }
}

/// One scraped offer, as stored in DuckDB and in the offers CSV.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Offer {
    pub offer_id: String,
    pub city: String,
    pub category: String,
    pub price_per_area: Option<f64>,
    pub living_area: Option<f64>,
    pub district: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub refresh_time: Option<String>, // free text, e.g. "46 минут назад"
    pub scraped_at: NaiveDateTime,
}

impl Offer {
    pub fn from_fields(
        offer_id: impl Into<String>,
        city: &str,
        category: &str,
        fields: OfferFields,
        scraped_at: NaiveDateTime,
    ) -> Self {
        Self {
            offer_id: offer_id.into(),
            city: city.to_string(),
            category: category.to_string(),
            price_per_area: fields.price_per_area,
            living_area: fields.living_area,
            district: fields.district,
            latitude: fields.latitude,
            longitude: fields.longitude,
            refresh_time: fields.refresh_time,
            scraped_at,
        }
    }

    /// Price and location, if all three are present.
    pub fn priced_point(&self) -> Option<PricedPoint> {
        Some(PricedPoint {
            longitude: self.longitude?,
            latitude: self.latitude?,
            price: self.price_per_area?,
        })
    }
}

// ── Priced point ──────────────────────────────────────────────────────────────

/// A listing reduced to what the grid needs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PricedPoint {
    pub longitude: f64,
    pub latitude: f64,
    pub price: f64,
}

// ── Grid cells ────────────────────────────────────────────────────────────────

/// Lattice position of a cell: longitude sample index, latitude sample index.
/// Assigned once by the grid builder and carried unchanged through every stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellId {
    pub col: u32,
    pub row: u32,
}

impl CellId {
    pub fn new(col: u32, row: u32) -> Self {
        Self { col, row }
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.col, self.row)
    }
}

impl FromStr for CellId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (col, row) = s
            .split_once('-')
            .ok_or_else(|| format!("cell id {:?} is not <col>-<row>", s))?;
        Ok(Self {
            col: col.trim().parse().map_err(|e| format!("cell id {:?}: {}", s, e))?,
            row: row.trim().parse().map_err(|e| format!("cell id {:?}: {}", s, e))?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridCell {
    pub id: CellId,
    pub polygon: Polygon<f64>,
}

/// A cell with an observed or predicted mean price per area.
#[derive(Debug, Clone, PartialEq)]
pub struct PricedCell {
    pub id: CellId,
    pub price: Option<f64>,
    pub polygon: Polygon<f64>,
}

impl From<GridCell> for PricedCell {
    fn from(cell: GridCell) -> Self {
        Self {
            id: cell.id,
            price: None,
            polygon: cell.polygon,
        }
    }
}
