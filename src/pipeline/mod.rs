//! Pipeline orchestrator: ties scraper → storage → grid → model → render.
//!
//! ## Stages
//!
//! `scrape()` (online): listing pages → offer pages → DuckDB upsert → offers CSV.
//!   Failed URLs are counted and logged; the run is recorded as "partial".
//!   A stage error closes the run as "failed".
//!
//! `build_grid()` → `price_grid()` → `predict()` → `render()` (offline):
//!   each stage reads the files the previous one wrote, so any stage can be
//!   re-run on its own. `run()` chains them for one city/category.

use crate::aggregate::{aggregate_cells, aggregate_listings};
use crate::config::{AppConfig, CategoryConfig, CityConfig};
use crate::loader::{offers_csv_path, read_offers_csv, read_priced_points, write_offers_csv};
use crate::model::{predict_cells, Weighting};
use crate::render::chart::{district_means, render_chart, ChartRow};
use crate::render::map::{render_map, MapLayer};
use crate::render::{chart_path, map_path, write_document};
use crate::scraper::{ListingSource, RealtymagScraper};
use crate::spatial::boundary::CityBoundary;
use crate::spatial::geojson::{read_cells, read_priced_cells, write_cells, write_priced_cells};
use crate::spatial::grid::build_grid;
use crate::spatial::join::join_points;
use crate::spatial::{bounded_grid_path, grid_path, predicted_grid_path, priced_grid_path};
use crate::storage::Repository;
use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use tracing::{info, warn};

pub struct Pipeline {
    config: AppConfig,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// One city by key, or all configured cities.
    pub fn cities(&self, key: Option<&str>) -> Result<Vec<&CityConfig>> {
        match key {
            Some(k) => {
                let city = self.config.city(k).ok_or_else(|| anyhow!("Unknown city {:?}", k))?;
                Ok(vec![city])
            }
            None => Ok(self.config.cities.iter().collect()),
        }
    }

    /// One category by key, or all configured categories.
    pub fn categories(&self, key: Option<&str>) -> Result<Vec<&CategoryConfig>> {
        match key {
            Some(k) => {
                let category = self
                    .config
                    .category(k)
                    .ok_or_else(|| anyhow!("Unknown category {:?}", k))?;
                Ok(vec![category])
            }
            None => Ok(self.config.categories.iter().collect()),
        }
    }

    pub fn open_repository(&self) -> Result<Repository> {
        let repo = Repository::open(&self.config.storage.db_path).context("Failed to open DuckDB")?;
        if self.config.storage.run_migrations {
            repo.run_migrations()?;
        }
        Ok(repo)
    }

    // ── Online ───────────────────────────────────────────────────────────────

    pub async fn scrape(&self, city: &CityConfig, category: &CategoryConfig) -> Result<ScrapeStats> {
        let repo = self.open_repository()?;
        let scraper = RealtymagScraper::new(&self.config.scraper).context("Failed to build scraper")?;
        self.scrape_with(&scraper, &repo, city, category).await
    }

    pub async fn scrape_with<S: ListingSource>(
        &self,
        source: &S,
        repo: &Repository,
        city: &CityConfig,
        category: &CategoryConfig,
    ) -> Result<ScrapeStats> {
        let run_id = repo.begin_scrape_run(&city.key, &category.key)?;
        match self.scrape_run(source, repo, run_id, city, category).await {
            Ok(stats) => Ok(stats),
            Err(e) => {
                if let Err(mark) = repo.fail_scrape_run(run_id) {
                    warn!("Could not mark scrape run {} as failed: {:#}", run_id, mark);
                }
                Err(e)
            }
        }
    }

    async fn scrape_run<S: ListingSource>(
        &self,
        source: &S,
        repo: &Repository,
        run_id: i64,
        city: &CityConfig,
        category: &CategoryConfig,
    ) -> Result<ScrapeStats> {
        info!("=== Step 1: Offer links for {}/{} ===", city.key, category.key);
        let links = source
            .fetch_offer_links(city, category)
            .await
            .context("Offer link collection failed")?;

        info!("=== Step 2: Offer pages ({} links) ===", links.items.len());
        let offers = source
            .fetch_offers(city, category, &links.items)
            .await
            .context("Offer collection failed")?;

        let failed_urls = links.failed.len() + offers.failed.len();
        for f in links.failed.iter().chain(&offers.failed) {
            warn!("Failed {}: {}", f.url, f.error);
        }

        let stored = repo.upsert_offers(&offers.items)?;
        let csv = offers_csv_path(&self.config.paths.data_dir, &city.key, &category.key);
        write_offers_csv(&csv, &offers.items)?;
        repo.finish_scrape_run(run_id, stored, failed_urls)?;
        let status = repo.scrape_run_status(run_id)?.unwrap_or_default();

        let stats = ScrapeStats {
            links: links.items.len(),
            offers: stored,
            geolocated: offers.items.iter().filter(|o| o.priced_point().is_some()).count(),
            failed_urls,
            status,
            csv,
        };
        info!(
            "=== Done {}/{} ({}): {} links | {} offers ({} priced + located) | {} failed URLs ===",
            city.key, category.key, stats.status, stats.links, stats.offers, stats.geolocated, stats.failed_urls
        );
        Ok(stats)
    }

    // ── Offline ──────────────────────────────────────────────────────────────

    /// Lattice over the city's bounding box, then the cells inside its outline.
    pub fn build_grid(&self, city: &CityConfig) -> Result<GridStats> {
        let boundary = CityBoundary::load(&city.boundary, &city.exclusions)?;
        let bounds = boundary.bounds()?;
        let step = self.config.grid;

        let cells = build_grid(&bounds, step.step_lon, step.step_lat)?;
        let full = grid_path(&self.config.paths.grid_dir, &city.key);
        write_cells(&full, &cells)?;

        let bounded = boundary.filter(&cells);
        let bounded_path = bounded_grid_path(&self.config.paths.grid_dir, &city.key);
        write_cells(&bounded_path, &bounded)?;

        info!("{}: {} cells, {} inside the boundary", city.key, cells.len(), bounded.len());
        Ok(GridStats { cells: cells.len(), bounded: bounded.len(), path: bounded_path })
    }

    /// Mean listing price per bounded cell.
    pub fn price_grid(&self, city: &CityConfig, category: &CategoryConfig) -> Result<PriceStats> {
        let paths = &self.config.paths;
        let points = read_priced_points(&offers_csv_path(&paths.data_dir, &city.key, &category.key))?;
        let locations = aggregate_listings(&points, self.config.aggregate.coordinate_precision);

        let cells = read_cells(&bounded_grid_path(&paths.grid_dir, &city.key))
            .context("Bounded grid missing; run the grid stage first")?;
        let (joined, report) = join_points(&cells, &locations);
        let priced = aggregate_cells(&cells, &joined);

        let path = priced_grid_path(&paths.grid_dir, &city.key, &category.key);
        write_priced_cells(&path, &priced)?;

        Ok(PriceStats {
            listings: points.len(),
            locations: locations.len(),
            matched: report.matched,
            dropped: report.dropped,
            priced_cells: priced.len(),
            path,
        })
    }

    /// Predicted price for every bounded cell.
    pub fn predict(&self, city: &CityConfig, category: &CategoryConfig) -> Result<PredictStats> {
        let grid_dir = &self.config.paths.grid_dir;
        let observed = read_priced_cells(&priced_grid_path(grid_dir, &city.key, &category.key))
            .context("Priced grid missing; run the price stage first")?;
        let cells = read_cells(&bounded_grid_path(grid_dir, &city.key))?;

        let (predicted, outcome) = predict_cells(&observed, &cells, &self.config.model)
            .with_context(|| format!("Prediction failed for {}/{}", city.key, category.key))?;

        let path = predicted_grid_path(grid_dir, &city.key, &category.key);
        write_priced_cells(&path, &predicted)?;

        Ok(PredictStats {
            training_cells: outcome.samples,
            predicted_cells: predicted.len(),
            k: outcome.model.k(),
            weighting: outcome.model.weighting(),
            score: outcome.score,
            path,
        })
    }

    /// District chart for the city plus one map per category that has both
    /// priced and predicted grids.
    pub fn render(&self, city: &CityConfig) -> Result<Vec<PathBuf>> {
        let paths = &self.config.paths;
        let mut written = Vec::new();

        let mut per_category = Vec::new();
        for category in &self.config.categories {
            let csv = offers_csv_path(&paths.data_dir, &city.key, &category.key);
            let stats = if csv.exists() {
                district_means(&read_offers_csv(&csv)?)
            } else {
                warn!("{:?} not found; empty chart row for {}", csv, category.label);
                Vec::new()
            };
            per_category.push((category.label.as_str(), stats));
        }
        let rows: Vec<ChartRow<'_>> = per_category
            .iter()
            .map(|(label, stats)| ChartRow { label, stats })
            .collect();
        let chart = chart_path(&paths.output_dir, &city.key);
        write_document(&chart, &render_chart(&city.name, &rows))?;
        written.push(chart);

        for category in &self.config.categories {
            let priced = priced_grid_path(&paths.grid_dir, &city.key, &category.key);
            let predicted = predicted_grid_path(&paths.grid_dir, &city.key, &category.key);
            if !priced.exists() || !predicted.exists() {
                warn!("No grids for {}/{}; map skipped", city.key, category.key);
                continue;
            }
            let real = read_priced_cells(&priced)?;
            let predict = read_priced_cells(&predicted)?;
            let legend = format!("{}: цена за м², ₽", category.label);
            let html = render_map(
                &format!("{} {}", city.name, category.label),
                city.center,
                &[
                    MapLayer {
                        name: format!("{}_real", category.label),
                        legend: legend.clone(),
                        cells: &real,
                        show: true,
                    },
                    MapLayer {
                        name: format!("{}_predict", category.label),
                        legend,
                        cells: &predict,
                        show: false,
                    },
                ],
            )?;
            let map = map_path(&paths.output_dir, &city.key, &category.key);
            write_document(&map, &html)?;
            written.push(map);
        }

        Ok(written)
    }

    /// All offline stages for one city and category.
    pub fn run(&self, city: &CityConfig, category: &CategoryConfig) -> Result<RunStats> {
        info!("=== Step 1: Grid for {} ===", city.key);
        let grid = self.build_grid(city)?;
        info!("=== Step 2: Cell prices for {}/{} ===", city.key, category.key);
        let price = self.price_grid(city, category)?;
        info!("=== Step 3: Prediction ===");
        let predict = self.predict(city, category)?;
        info!("=== Step 4: Charts and maps ===");
        let outputs = self.render(city)?;
        Ok(RunStats { grid, price, predict, outputs })
    }
}

#[derive(Debug)]
pub struct ScrapeStats {
    pub links: usize,
    pub offers: usize,
    pub geolocated: usize,
    pub failed_urls: usize,
    /// "success" or "partial"
    pub status: String,
    pub csv: PathBuf,
}

#[derive(Debug)]
pub struct GridStats {
    pub cells: usize,
    pub bounded: usize,
    pub path: PathBuf,
}

#[derive(Debug)]
pub struct PriceStats {
    pub listings: usize,
    pub locations: usize,
    pub matched: usize,
    pub dropped: usize,
    pub priced_cells: usize,
    pub path: PathBuf,
}

#[derive(Debug)]
pub struct PredictStats {
    pub training_cells: usize,
    pub predicted_cells: usize,
    pub k: usize,
    pub weighting: Weighting,
    pub score: f64,
    pub path: PathBuf,
}

#[derive(Debug)]
pub struct RunStats {
    pub grid: GridStats,
    pub price: PriceStats,
    pub predict: PredictStats,
    pub outputs: Vec<PathBuf>,
}
