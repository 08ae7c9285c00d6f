use super::geojson::parse_polygons;
use super::grid::Bounds;
use super::GridError;
use crate::models::GridCell;
use anyhow::{Context, Result};
use geo::{BoundingRect, Contains, Intersects, MultiPolygon, Rect};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A city outline plus the water bodies (or other areas) cut out of it.
#[derive(Debug, Clone)]
pub struct CityBoundary {
    pub inclusion: MultiPolygon<f64>,
    pub exclusions: Vec<MultiPolygon<f64>>,
}

fn load_polygons(path: &Path) -> Result<MultiPolygon<f64>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read boundary {:?}", path))?;
    let polygons = parse_polygons(&text).with_context(|| format!("In {:?}", path))?;
    if polygons.0.is_empty() {
        return Err(GridError::EmptyBoundary { path: path.to_path_buf() }.into());
    }
    debug!("{:?}: {} polygons", path, polygons.0.len());
    Ok(polygons)
}

impl CityBoundary {
    pub fn new(inclusion: MultiPolygon<f64>, exclusions: Vec<MultiPolygon<f64>>) -> Self {
        Self { inclusion, exclusions }
    }

    pub fn load(boundary: &Path, exclusions: &[PathBuf]) -> Result<Self> {
        let inclusion = load_polygons(boundary)?;
        let exclusions = exclusions
            .iter()
            .map(|p| load_polygons(p))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(inclusion, exclusions))
    }

    /// Bounding box of the city outline.
    pub fn bounds(&self) -> Result<Bounds, GridError> {
        let rect = self
            .inclusion
            .bounding_rect()
            .ok_or_else(|| GridError::Geometry("city outline has no coordinates".into()))?;
        Ok(Bounds {
            min_lon: rect.min().x,
            max_lon: rect.max().x,
            min_lat: rect.min().y,
            max_lat: rect.max().y,
        })
    }

    /// Keep the cells lying wholly inside the outline and touching no
    /// exclusion. Order and geometry of the kept cells are unchanged.
    pub fn filter(&self, cells: &[GridCell]) -> Vec<GridCell> {
        let Some(outline) = self.inclusion.bounding_rect() else {
            return vec![];
        };

        let kept: Vec<GridCell> = cells
            .iter()
            .filter(|cell| {
                let inside_box = cell
                    .polygon
                    .bounding_rect()
                    .is_some_and(|r| rect_within(&r, &outline));
                inside_box
                    && self.inclusion.contains(&cell.polygon)
                    && !self.exclusions.iter().any(|ex| ex.intersects(&cell.polygon))
            })
            .cloned()
            .collect();

        info!(
            "Boundary filter: {} of {} cells kept ({} exclusions)",
            kept.len(),
            cells.len(),
            self.exclusions.len()
        );
        kept
    }
}

fn rect_within(inner: &Rect<f64>, outer: &Rect<f64>) -> bool {
    inner.min().x >= outer.min().x
        && inner.min().y >= outer.min().y
        && inner.max().x <= outer.max().x
        && inner.max().y <= outer.max().y
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CellId;
    use crate::spatial::grid::build_grid;
    use geo::{polygon, MultiPolygon};

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: x0, y: y0),
            (x: x0, y: y1),
            (x: x1, y: y1),
            (x: x1, y: y0),
            (x: x0, y: y0),
        ]])
    }

    fn lattice(x0: f64, x1: f64, y0: f64, y1: f64, step: f64) -> Vec<GridCell> {
        build_grid(&Bounds { min_lon: x0, max_lon: x1, min_lat: y0, max_lat: y1 }, step, step).unwrap()
    }

    #[test]
    fn test_grid_outside_boundary_is_empty() {
        let boundary = CityBoundary::new(square(0.0, 0.0, 2.0, 2.0), vec![]);
        let cells = lattice(5.0, 6.0, 5.0, 6.0, 0.5);
        assert_eq!(cells.len(), 4);
        assert!(boundary.filter(&cells).is_empty());
    }

    #[test]
    fn test_cells_sharing_the_outline_edge_are_kept() {
        let boundary = CityBoundary::new(square(0.0, 0.0, 1.0, 1.0), vec![]);
        let cells = lattice(0.0, 1.0, 0.0, 1.0, 0.5);
        assert_eq!(boundary.filter(&cells), cells);
    }

    #[test]
    fn test_straddling_cells_are_dropped() {
        // Outline covers x in [0, 1.2]: the column from 1.0 to 1.5 sticks out.
        let boundary = CityBoundary::new(square(0.0, 0.0, 1.2, 1.0), vec![]);
        let cells = lattice(0.0, 1.5, 0.0, 1.0, 0.5);
        let kept: Vec<CellId> = boundary.filter(&cells).iter().map(|c| c.id).collect();
        assert_eq!(
            kept,
            vec![CellId::new(0, 0), CellId::new(0, 1), CellId::new(1, 0), CellId::new(1, 1)]
        );
    }

    #[test]
    fn test_exclusion_removes_touching_cells() {
        // A lake in the upper-right quarter, slightly inset.
        let lake = square(0.6, 0.6, 0.9, 0.9);
        let boundary = CityBoundary::new(square(0.0, 0.0, 1.0, 1.0), vec![lake]);
        let cells = lattice(0.0, 1.0, 0.0, 1.0, 0.5);
        let kept: Vec<CellId> = boundary.filter(&cells).iter().map(|c| c.id).collect();
        assert_eq!(kept, vec![CellId::new(0, 0), CellId::new(0, 1), CellId::new(1, 0)]);
    }

    #[test]
    fn test_bounds_from_outline() {
        let text = r#"{"type": "Polygon", "coordinates": [[
            [60.0073423, 56.7578451], [60.1935774, 56.79], [60.1, 56.823773], [60.0073423, 56.7578451]
        ]]}"#;
        let boundary = CityBoundary::new(parse_polygons(text).unwrap(), vec![]);
        assert_eq!(
            boundary.bounds().unwrap(),
            Bounds { min_lon: 60.0073423, max_lon: 60.1935774, min_lat: 56.7578451, max_lat: 56.823773 }
        );
    }

    #[test]
    fn test_load_from_files() {
        let dir = std::env::temp_dir().join(format!("realty_grid_boundary_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let city = dir.join("city.json");
        let lake = dir.join("lake.json");
        let empty = dir.join("empty.json");
        std::fs::write(&city, r#"{"type": "Polygon", "coordinates": [[[0,0],[0,1],[1,1],[1,0],[0,0]]]}"#).unwrap();
        std::fs::write(&lake, r#"{"type": "Polygon", "coordinates": [[[0.6,0.6],[0.6,0.9],[0.9,0.9],[0.6,0.6]]]}"#).unwrap();
        std::fs::write(&empty, r#"{"type": "FeatureCollection", "features": []}"#).unwrap();

        let boundary = CityBoundary::load(&city, &[lake]).unwrap();
        assert_eq!(boundary.exclusions.len(), 1);

        let err = CityBoundary::load(&empty, &[]).unwrap_err();
        assert!(matches!(err.downcast_ref::<GridError>(), Some(GridError::EmptyBoundary { .. })));
    }
}
