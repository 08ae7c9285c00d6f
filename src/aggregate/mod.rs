//! Mean-price aggregation, per listing location and per grid cell.

use crate::models::{CellId, GridCell, PricedCell, PricedPoint};
use crate::spatial::join::CellPrice;
use std::collections::HashMap;
use tracing::info;

/// Grouping key for a location: both coordinates rounded to `precision`
/// decimals. "30.3854268, 59.8689334"
pub fn coordinate_key(longitude: f64, latitude: f64, precision: u32) -> String {
    let p = precision as usize;
    format!("{:.*}, {:.*}", p, longitude, p, latitude)
}

#[derive(Default)]
struct Mean {
    sum: f64,
    n: usize,
}

impl Mean {
    fn add(&mut self, x: f64) {
        self.sum += x;
        self.n += 1;
    }

    fn value(&self) -> f64 {
        self.sum / self.n as f64
    }
}

/// Collapse listings at the same (rounded) location into one row with their
/// mean price. The first listing of a group supplies its coordinates; groups
/// come out in order of first appearance.
pub fn aggregate_listings(points: &[PricedPoint], precision: u32) -> Vec<PricedPoint> {
    let mut order: Vec<(String, PricedPoint)> = Vec::new();
    let mut groups: HashMap<String, Mean> = HashMap::new();

    for p in points {
        let key = coordinate_key(p.longitude, p.latitude, precision);
        let mean = groups.entry(key.clone()).or_insert_with(|| {
            order.push((key, *p));
            Mean::default()
        });
        mean.add(p.price);
    }

    let out: Vec<PricedPoint> = order
        .into_iter()
        .map(|(key, first)| PricedPoint { price: groups[&key].value(), ..first })
        .collect();

    info!("{} listings → {} distinct locations", points.len(), out.len());
    out
}

/// Mean price per cell over the joined listings. Output follows grid order and
/// only holds cells with at least one listing; every cell keeps its lattice id.
pub fn aggregate_cells(cells: &[GridCell], joined: &[CellPrice]) -> Vec<PricedCell> {
    let mut means: HashMap<CellId, Mean> = HashMap::new();
    for j in joined {
        means.entry(j.cell).or_default().add(j.price);
    }

    let priced: Vec<PricedCell> = cells
        .iter()
        .filter_map(|cell| {
            means.get(&cell.id).map(|m| PricedCell {
                id: cell.id,
                price: Some(m.value()),
                polygon: cell.polygon.clone(),
            })
        })
        .collect();

    info!(
        "{} of {} cells priced, {} without listings",
        priced.len(),
        cells.len(),
        cells.len() - priced.len()
    );
    priced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::grid::{build_grid, Bounds};

    fn pt(longitude: f64, latitude: f64, price: f64) -> PricedPoint {
        PricedPoint { longitude, latitude, price }
    }

    #[test]
    fn test_two_locations_four_listings() {
        let points = [
            pt(30.1, 59.9, 100.0),
            pt(30.2, 59.8, 300.0),
            pt(30.1, 59.9, 200.0),
            pt(30.2, 59.8, 400.0),
        ];
        let out = aggregate_listings(&points, 7);
        assert_eq!(out, vec![pt(30.1, 59.9, 150.0), pt(30.2, 59.8, 350.0)]);
    }

    #[test]
    fn test_group_mean_is_arithmetic_mean() {
        let prices = [90_000.0, 110_000.0, 130_500.0, 99_999.5, 120_000.0];
        let points: Vec<PricedPoint> = prices.iter().map(|&p| pt(37.6, 55.7, p)).collect();
        let out = aggregate_listings(&points, 7);
        assert_eq!(out.len(), 1);
        let mean = prices.iter().sum::<f64>() / prices.len() as f64;
        assert!((out[0].price - mean).abs() < 1e-9);
    }

    #[test]
    fn test_rounding_merges_float_noise() {
        let points = [pt(30.3854268, 59.8689334, 100.0), pt(30.385426799999998, 59.8689334, 200.0)];
        assert_eq!(aggregate_listings(&points, 7).len(), 1);
        // Finer precision keeps them apart.
        assert_eq!(aggregate_listings(&points, 15).len(), 2);
    }

    #[test]
    fn test_coordinate_key() {
        assert_eq!(coordinate_key(30.3854268, 59.8689334, 7), "30.3854268, 59.8689334");
        assert_eq!(coordinate_key(30.38542684, 59.8, 3), "30.385, 59.800");
    }

    #[test]
    fn test_cell_means_keep_lattice_ids() {
        let cells = build_grid(&Bounds { min_lon: 0.0, max_lon: 1.0, min_lat: 0.0, max_lat: 1.0 }, 0.5, 0.5)
            .unwrap();
        let joined = [
            CellPrice { cell: CellId::new(1, 1), price: 10.0 },
            CellPrice { cell: CellId::new(0, 0), price: 1.0 },
            CellPrice { cell: CellId::new(1, 1), price: 20.0 },
        ];
        let priced = aggregate_cells(&cells, &joined);
        assert_eq!(priced.len(), 2);
        assert_eq!((priced[0].id, priced[0].price), (CellId::new(0, 0), Some(1.0)));
        assert_eq!((priced[1].id, priced[1].price), (CellId::new(1, 1), Some(15.0)));
        assert_eq!(priced[1].polygon, cells[3].polygon);
    }

    #[test]
    fn test_no_listings_no_priced_cells() {
        let cells = build_grid(&Bounds { min_lon: 0.0, max_lon: 1.0, min_lat: 0.0, max_lat: 1.0 }, 0.5, 0.5)
            .unwrap();
        assert!(aggregate_cells(&cells, &[]).is_empty());
    }
}
