//! City grid: lattice construction, boundary filtering, point-in-cell join and
//! GeoJSON grid files.

pub mod boundary;
pub mod geojson;
pub mod grid;
pub mod join;

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GridError {
    #[error("grid step must be positive and finite, got lon={lon} lat={lat}")]
    InvalidStep { lon: f64, lat: f64 },

    #[error("{axis} bounds are inverted or not finite: min={min} max={max}")]
    InvalidBounds { axis: &'static str, min: f64, max: f64 },

    #[error("boundary {path:?} has no polygons")]
    EmptyBoundary { path: PathBuf },

    #[error("boundary geometry: {0}")]
    Geometry(String),
}

/// `<grid_dir>/<city>_grid.geojson`: the full lattice.
pub fn grid_path(grid_dir: &Path, city: &str) -> PathBuf {
    grid_dir.join(format!("{}_grid.geojson", city))
}

/// `<grid_dir>/<city>_grid_bound.geojson`: cells inside the city, off the water.
pub fn bounded_grid_path(grid_dir: &Path, city: &str) -> PathBuf {
    grid_dir.join(format!("{}_grid_bound.geojson", city))
}

/// `<grid_dir>/<city>_<category>_priced.geojson`: observed mean prices.
pub fn priced_grid_path(grid_dir: &Path, city: &str, category: &str) -> PathBuf {
    grid_dir.join(format!("{}_{}_priced.geojson", city, category))
}

/// `<grid_dir>/<city>_<category>_predicted.geojson`: model output for every cell.
pub fn predicted_grid_path(grid_dir: &Path, city: &str, category: &str) -> PathBuf {
    grid_dir.join(format!("{}_{}_predicted.geojson", city, category))
}
