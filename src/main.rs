mod aggregate;
mod config;
mod loader;
mod model;
mod models;
mod pipeline;
mod render;
mod scraper;
mod spatial;
mod storage;
mod utils;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;
use crate::loader::{offers_csv_path, write_offers_csv};
use crate::pipeline::Pipeline;

#[derive(Parser)]
#[command(name = "realty-grid", about = "Apartment price-per-area grids and maps", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

/// City/category selection; omitted means all configured ones.
#[derive(Args, Clone)]
struct Target {
    /// City key (Mos, SPb, Ekb, …)
    #[arg(short, long)]
    city: Option<String>,

    /// Listing category key (sec, new)
    #[arg(short = 't', long)]
    category: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape offers into DuckDB and the offers CSV
    Scrape(Target),

    /// Build the lattice for a city and cut it to the city boundary
    Grid {
        #[arg(short, long)]
        city: Option<String>,
    },

    /// Mean listing price per grid cell
    Price(Target),

    /// Fit the KNN model and predict every cell
    Predict(Target),

    /// District charts and choropleth maps
    Render {
        #[arg(short, long)]
        city: Option<String>,
    },

    /// grid → price → predict → render
    Run(Target),

    /// Show offer counts per city and category
    Stats,

    /// Re-export the offers CSV from DuckDB
    Export(Target),

    /// Apply schema migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "realty_grid=info,warn",
        1 => "realty_grid=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let pipeline = Pipeline::new(AppConfig::load()?);

    match cli.command {
        Command::Scrape(target) => {
            let _t = utils::Timer::start("Scrape");
            let mut failed = 0usize;
            for city in pipeline.cities(target.city.as_deref())? {
                for category in pipeline.categories(target.category.as_deref())? {
                    match pipeline.scrape(city, category).await {
                        Ok(stats) => failed += stats.failed_urls,
                        Err(e) => error!("{}/{}: {:#}", city.key, category.key, e),
                    }
                }
            }
            info!("Done: {} failed URLs in total", failed);
        }

        Command::Grid { city } => {
            let _t = utils::Timer::start("Grid");
            for city in pipeline.cities(city.as_deref())? {
                let stats = pipeline.build_grid(city)?;
                info!("{}: {} of {} cells kept → {:?}", city.key, stats.bounded, stats.cells, stats.path);
            }
        }

        Command::Price(target) => {
            let _t = utils::Timer::start("Price");
            for city in pipeline.cities(target.city.as_deref())? {
                for category in pipeline.categories(target.category.as_deref())? {
                    let s = pipeline.price_grid(city, category)?;
                    info!(
                        "{}/{}: {} listings at {} locations, {} in cells, {} outside the grid → {} priced cells in {:?}",
                        city.key, category.key, s.listings, s.locations, s.matched, s.dropped, s.priced_cells, s.path
                    );
                }
            }
        }

        Command::Predict(target) => {
            let _t = utils::Timer::start("Predict");
            for city in pipeline.cities(target.city.as_deref())? {
                for category in pipeline.categories(target.category.as_deref())? {
                    let s = pipeline.predict(city, category)?;
                    info!(
                        "{}/{}: k={} weights={} R² {:.3} ({} training cells) → {:?}",
                        city.key, category.key, s.k, s.weighting, s.score, s.training_cells, s.path
                    );
                }
            }
        }

        Command::Render { city } => {
            let _t = utils::Timer::start("Render");
            for city in pipeline.cities(city.as_deref())? {
                for path in pipeline.render(city)? {
                    println!("{}", path.display());
                }
            }
        }

        Command::Run(target) => {
            let _t = utils::Timer::start("Offline pipeline");
            for city in pipeline.cities(target.city.as_deref())? {
                for category in pipeline.categories(target.category.as_deref())? {
                    let s = pipeline.run(city, category)?;
                    info!(
                        "{}/{}: {} cells | {} priced | k={} {} | {} outputs",
                        city.key,
                        category.key,
                        s.grid.bounded,
                        s.price.priced_cells,
                        s.predict.k,
                        s.predict.weighting,
                        s.outputs.len()
                    );
                }
            }
        }

        Command::Stats => {
            let repo = pipeline.open_repository()?;
            let counts = repo.offer_counts()?;
            println!("─────────────────────────────────────────");
            println!("  realty-grid: offers");
            println!("─────────────────────────────────────────");
            if counts.is_empty() {
                println!("  No offers; run `realty-grid scrape` first.");
            }
            for c in &counts {
                println!(
                    "  {:<5} {:<4} : {:>9} offers, {:>9} located",
                    c.city,
                    c.category,
                    utils::fmt_number(c.offers),
                    utils::fmt_number(c.geolocated)
                );
            }
            println!("─────────────────────────────────────────");
        }

        Command::Export(target) => {
            let repo = pipeline.open_repository()?;
            for city in pipeline.cities(target.city.as_deref())? {
                for category in pipeline.categories(target.category.as_deref())? {
                    let offers = repo.offers_for(&city.key, &category.key)?;
                    let path = offers_csv_path(&pipeline.config().paths.data_dir, &city.key, &category.key);
                    write_offers_csv(&path, &offers)?;
                    println!("{} offers → {}", offers.len(), path.display());
                }
            }
        }

        Command::Migrate => {
            pipeline.open_repository()?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}
