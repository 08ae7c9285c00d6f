use crate::models::{CellId, GridCell, PricedPoint};
use geo::{BoundingRect, Contains, Point, Rect};
use tracing::{debug, info};

/// A listing price attributed to the cell that contains it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellPrice {
    pub cell: CellId,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinReport {
    pub matched: usize,
    /// Listings that fell in no cell (outside the city, on water, on a cell edge).
    pub dropped: usize,
}

/// Attribute each point to the cell whose interior contains it. Cells never
/// overlap, so the first hit is the only one. Unmatched points are counted.
pub fn join_points(cells: &[GridCell], points: &[PricedPoint]) -> (Vec<CellPrice>, JoinReport) {
    let indexed: Vec<(Rect<f64>, &GridCell)> = cells
        .iter()
        .filter_map(|c| c.polygon.bounding_rect().map(|r| (r, c)))
        .collect();

    let mut joined = Vec::with_capacity(points.len());
    let mut report = JoinReport::default();

    for p in points {
        let point = Point::new(p.longitude, p.latitude);
        let hit = indexed.iter().find(|(rect, cell)| {
            rect_covers(rect, &point) && cell.polygon.contains(&point)
        });
        match hit {
            Some((_, cell)) => {
                joined.push(CellPrice { cell: cell.id, price: p.price });
                report.matched += 1;
            }
            None => {
                debug!("No cell for ({}, {})", p.longitude, p.latitude);
                report.dropped += 1;
            }
        }
    }

    info!(
        "Spatial join: {} listings matched, {} outside the grid",
        report.matched, report.dropped
    );
    (joined, report)
}

fn rect_covers(rect: &Rect<f64>, p: &Point<f64>) -> bool {
    p.x() >= rect.min().x && p.x() <= rect.max().x && p.y() >= rect.min().y && p.y() <= rect.max().y
}
