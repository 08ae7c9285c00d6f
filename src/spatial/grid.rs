use super::GridError;
use crate::models::{CellId, GridCell};
use geo::{LineString, Polygon};

/// Axis-aligned extent in degrees (x = longitude, y = latitude).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl Bounds {
    fn validate(&self) -> Result<(), GridError> {
        let check = |axis, min: f64, max: f64| {
            if min.is_finite() && max.is_finite() && min <= max {
                Ok(())
            } else {
                Err(GridError::InvalidBounds { axis, min, max })
            }
        };
        check("longitude", self.min_lon, self.max_lon)?;
        check("latitude", self.min_lat, self.max_lat)
    }
}

/// `n` evenly spaced values from `min` to `max`, both ends included.
pub fn linspace(min: f64, max: f64, n: usize) -> Vec<f64> {
    match n {
        0 => vec![],
        1 => vec![min],
        _ => {
            let step = (max - min) / (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { max } else { min + step * i as f64 })
                .collect()
        }
    }
}

/// Sample points along one axis: the span holds `trunc(span / step)` whole
/// steps, which needs one more sample than steps. A span shorter than one step
/// gives a single sample and therefore no cells.
fn axis_samples(min: f64, max: f64, step: f64) -> Vec<f64> {
    let steps = ((max - min) / step).trunc() as usize;
    if steps == 0 {
        return vec![min];
    }
    linspace(min, max, steps + 1)
}

/// Build the rectangular lattice covering `bounds`.
///
/// Cells come out column-major: all latitude rows of longitude column 0, then
/// column 1, and so on. Each cell's id is its (column, row) lattice position.
pub fn build_grid(bounds: &Bounds, step_lon: f64, step_lat: f64) -> Result<Vec<GridCell>, GridError> {
    let valid = |s: f64| s.is_finite() && s > 0.0;
    if !valid(step_lon) || !valid(step_lat) {
        return Err(GridError::InvalidStep { lon: step_lon, lat: step_lat });
    }
    bounds.validate()?;

    let lons = axis_samples(bounds.min_lon, bounds.max_lon, step_lon);
    let lats = axis_samples(bounds.min_lat, bounds.max_lat, step_lat);

    let mut cells = Vec::with_capacity(lons.len().saturating_sub(1) * lats.len().saturating_sub(1));
    for (col, lon) in lons.windows(2).enumerate() {
        for (row, lat) in lats.windows(2).enumerate() {
            cells.push(GridCell {
                id: CellId::new(col as u32, row as u32),
                polygon: rectangle(lon[0], lon[1], lat[0], lat[1]),
            });
        }
    }
    Ok(cells)
}

fn rectangle(x0: f64, x1: f64, y0: f64, y1: f64) -> Polygon<f64> {
    Polygon::new(
        LineString::from(vec![(x0, y0), (x0, y1), (x1, y1), (x1, y0), (x0, y0)]),
        vec![],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Area, BoundingRect};

    fn unit() -> Bounds {
        Bounds { min_lon: 0.0, max_lon: 1.0, min_lat: 0.0, max_lat: 1.0 }
    }

    #[test]
    fn test_linspace() {
        assert_eq!(linspace(0.0, 1.0, 3), vec![0.0, 0.5, 1.0]);
        assert_eq!(linspace(2.0, 3.0, 1), vec![2.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
        let xs = linspace(30.1, 30.7, 7);
        assert_eq!(xs.first(), Some(&30.1));
        assert_eq!(xs.last(), Some(&30.7));
    }

    #[test]
    fn test_half_step_gives_two_by_two() {
        let cells = build_grid(&unit(), 0.5, 0.5).unwrap();
        assert_eq!(cells.len(), 4);

        let ids: Vec<CellId> = cells.iter().map(|c| c.id).collect();
        assert_eq!(
            ids,
            vec![CellId::new(0, 0), CellId::new(0, 1), CellId::new(1, 0), CellId::new(1, 1)]
        );

        let total: f64 = cells.iter().map(|c| c.polygon.unsigned_area()).sum();
        assert!((total - 1.0).abs() < 1e-12);
        for cell in &cells {
            assert!((cell.polygon.unsigned_area() - 0.25).abs() < 1e-12);
        }

        let r = cells[1].polygon.bounding_rect().unwrap();
        assert_eq!((r.min().x, r.max().x, r.min().y, r.max().y), (0.0, 0.5, 0.5, 1.0));
    }

    #[test]
    fn test_cells_do_not_overlap() {
        let cells = build_grid(&unit(), 0.25, 0.5).unwrap();
        assert_eq!(cells.len(), 8);
        let rects: Vec<_> = cells.iter().map(|c| c.polygon.bounding_rect().unwrap()).collect();
        for (i, a) in rects.iter().enumerate() {
            for b in &rects[i + 1..] {
                let overlap_x = a.max().x.min(b.max().x) - a.min().x.max(b.min().x);
                let overlap_y = a.max().y.min(b.max().y) - a.min().y.max(b.min().y);
                assert!(overlap_x <= 0.0 || overlap_y <= 0.0);
            }
        }
    }

    #[test]
    fn test_span_smaller_than_step_gives_no_cells() {
        let bounds = Bounds { min_lon: 30.0, max_lon: 30.003, min_lat: 59.0, max_lat: 59.1 };
        assert!(build_grid(&bounds, 0.004, 0.0025).unwrap().is_empty());
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let bounds = Bounds { min_lon: 1.0, max_lon: 0.0, min_lat: 0.0, max_lat: 1.0 };
        assert!(matches!(
            build_grid(&bounds, 0.5, 0.5),
            Err(GridError::InvalidBounds { axis: "longitude", .. })
        ));
        let bounds = Bounds { min_lon: 0.0, max_lon: 1.0, min_lat: 1.0, max_lat: 0.5 };
        assert!(matches!(
            build_grid(&bounds, 0.5, 0.5),
            Err(GridError::InvalidBounds { axis: "latitude", .. })
        ));
    }

    #[test]
    fn test_non_positive_step_rejected() {
        assert!(matches!(build_grid(&unit(), 0.0, 0.5), Err(GridError::InvalidStep { .. })));
        assert!(matches!(build_grid(&unit(), 0.5, -1.0), Err(GridError::InvalidStep { .. })));
        assert!(matches!(build_grid(&unit(), f64::NAN, 0.5), Err(GridError::InvalidStep { .. })));
    }

    #[test]
    fn test_steps_are_truncated() {
        // 1.0 / 0.3 = 3.33 → 3 steps → 4 samples → 3 columns
        let cells = build_grid(&unit(), 0.3, 1.0).unwrap();
        assert_eq!(cells.len(), 3);
        assert_eq!(cells.last().map(|c| c.id), Some(CellId::new(2, 0)));
    }
}
