//! Minimal GeoJSON: polygon geometries in, cell feature collections in/out.

use super::GridError;
use crate::models::{CellId, GridCell, PricedCell};
use anyhow::{Context, Result};
use geo::{Coord, LineString, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::debug;

// ── Boundary input ────────────────────────────────────────────────────────────

type Position = Vec<f64>;
type Ring = Vec<Position>;

/// The GeoJSON objects a boundary file may hold. Anything non-polygonal is
/// rejected at parse time.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum GeoObject {
    Polygon { coordinates: Vec<Ring> },
    MultiPolygon { coordinates: Vec<Vec<Ring>> },
    GeometryCollection { geometries: Vec<GeoObject> },
    Feature { geometry: Box<GeoObject> },
    FeatureCollection { features: Vec<GeoObject> },
}

impl GeoObject {
    fn collect_polygons(self, out: &mut Vec<Polygon<f64>>) -> Result<(), GridError> {
        match self {
            GeoObject::Polygon { coordinates } => out.push(to_polygon(coordinates)?),
            GeoObject::MultiPolygon { coordinates } => {
                for rings in coordinates {
                    out.push(to_polygon(rings)?);
                }
            }
            GeoObject::GeometryCollection { geometries: items }
            | GeoObject::FeatureCollection { features: items } => {
                for item in items {
                    item.collect_polygons(out)?;
                }
            }
            GeoObject::Feature { geometry } => geometry.collect_polygons(out)?,
        }
        Ok(())
    }
}

fn to_ring(positions: Ring) -> Result<LineString<f64>, GridError> {
    let coords = positions
        .into_iter()
        .map(|p| match p.as_slice() {
            [x, y, ..] => Ok(Coord { x: *x, y: *y }),
            _ => Err(GridError::Geometry(format!("position {:?} needs two numbers", p))),
        })
        .collect::<Result<Vec<_>, _>>()?;
    if coords.len() < 3 {
        return Err(GridError::Geometry(format!("ring with {} positions", coords.len())));
    }
    Ok(LineString::new(coords))
}

fn to_polygon(rings: Vec<Ring>) -> Result<Polygon<f64>, GridError> {
    let mut rings = rings.into_iter();
    let exterior = rings
        .next()
        .ok_or_else(|| GridError::Geometry("polygon without rings".into()))?;
    let interiors = rings.map(to_ring).collect::<Result<Vec<_>, _>>()?;
    Ok(Polygon::new(to_ring(exterior)?, interiors))
}

/// Parse every polygon in a GeoJSON text into one multipolygon.
pub fn parse_polygons(text: &str) -> Result<MultiPolygon<f64>> {
    let object: GeoObject = serde_json::from_str(text).context("Not a polygonal GeoJSON object")?;
    let mut polygons = Vec::new();
    object.collect_polygons(&mut polygons)?;
    Ok(MultiPolygon::new(polygons))
}

// ── Cell feature collections ──────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct CellCollection {
    #[serde(rename = "type")]
    kind: String,
    features: Vec<CellFeature>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CellFeature {
    #[serde(rename = "type")]
    kind: String,
    id: String,
    #[serde(default)]
    properties: CellProperties,
    geometry: CellGeometry,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CellProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    price_per_area: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CellGeometry {
    #[serde(rename = "type")]
    kind: String,
    coordinates: Vec<Vec<[f64; 2]>>,
}

pub(crate) fn polygon_coordinates(polygon: &Polygon<f64>) -> Vec<Vec<[f64; 2]>> {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(|ring| ring.coords().map(|c| [c.x, c.y]).collect())
        .collect()
}

fn write_collection(path: &Path, features: Vec<CellFeature>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Could not create dir {:?}", parent))?;
    }
    let n = features.len();
    let collection = CellCollection { kind: "FeatureCollection".into(), features };
    let file = std::fs::File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, &collection)
        .with_context(|| format!("Failed to write {:?}", path))?;
    writer.flush()?;
    debug!("{} cells written to {:?}", n, path);
    Ok(())
}

/// Write cells with their mean price (omitted when unknown).
pub fn write_priced_cells(path: &Path, cells: &[PricedCell]) -> Result<()> {
    let features = cells
        .iter()
        .map(|cell| CellFeature {
            kind: "Feature".into(),
            id: cell.id.to_string(),
            properties: CellProperties { price_per_area: cell.price },
            geometry: CellGeometry {
                kind: "Polygon".into(),
                coordinates: polygon_coordinates(&cell.polygon),
            },
        })
        .collect();
    write_collection(path, features)
}

/// Write geometry-only cells.
pub fn write_cells(path: &Path, cells: &[GridCell]) -> Result<()> {
    let priced: Vec<PricedCell> = cells.iter().cloned().map(PricedCell::from).collect();
    write_priced_cells(path, &priced)
}

pub fn read_priced_cells(path: &Path) -> Result<Vec<PricedCell>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let collection: CellCollection =
        serde_json::from_str(&text).with_context(|| format!("{:?} is not a cell collection", path))?;

    collection
        .features
        .into_iter()
        .map(|f| {
            let id = f
                .id
                .parse::<CellId>()
                .map_err(|e: String| anyhow::anyhow!(e))
                .with_context(|| format!("in {:?}", path))?;
            let mut rings = f.geometry.coordinates.into_iter().map(|ring| {
                LineString::new(ring.into_iter().map(|[x, y]| Coord { x, y }).collect())
            });
            let exterior = rings
                .next()
                .with_context(|| format!("cell {} in {:?} has no ring", f.id, path))?;
            Ok(PricedCell {
                id,
                price: f.properties.price_per_area,
                polygon: Polygon::new(exterior, rings.collect()),
            })
        })
        .collect()
}

pub fn read_cells(path: &Path) -> Result<Vec<GridCell>> {
    Ok(read_priced_cells(path)?
        .into_iter()
        .map(|c| GridCell { id: c.id, polygon: c.polygon })
        .collect())
}
