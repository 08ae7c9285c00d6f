use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub aggregate: AggregateConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default = "default_cities")]
    pub cities: Vec<CityConfig>,
    #[serde(default = "default_categories")]
    pub categories: Vec<CategoryConfig>,
}

/// Scraper configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// In-flight requests per batch.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_listing_pages")]
    pub listing_pages: u32,

    #[serde(default = "default_listing_batch")]
    pub listing_batch: usize,

    #[serde(default = "default_offer_batch")]
    pub offer_batch: usize,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    /// Offers CSV files and boundary files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_grid_dir")]
    pub grid_dir: PathBuf,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

/// Lattice step sizes in degrees.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct GridConfig {
    #[serde(default = "default_step_lon")]
    pub step_lon: f64,

    #[serde(default = "default_step_lat")]
    pub step_lat: f64,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct AggregateConfig {
    /// Decimal places kept when grouping listings by location.
    #[serde(default = "default_coordinate_precision")]
    pub coordinate_precision: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelConfig {
    /// Cells priced at or below this are left out of training.
    #[serde(default = "default_train_threshold")]
    pub train_threshold: f64,

    #[serde(default = "default_k_min")]
    pub k_min: usize,

    #[serde(default = "default_k_max")]
    pub k_max: usize,

    #[serde(default = "default_k_step")]
    pub k_step: usize,

    #[serde(default = "default_folds")]
    pub folds: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CityConfig {
    /// Short key used in file names, e.g. "SPb".
    pub key: String,
    /// Path segment on the listing site, e.g. "sankt-peterburg".
    pub slug: String,
    pub name: String,
    /// Map centre as [lat, lon].
    pub center: [f64; 2],
    pub boundary: PathBuf,
    #[serde(default)]
    pub exclusions: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CategoryConfig {
    pub key: String,
    pub slug: String,
    pub label: String,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "https://www.realtymag.ru".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    500
}
fn default_user_agent() -> String {
    "realty-grid/0.1 (research project; price-per-area mapping)".to_string()
}
fn default_concurrency() -> usize {
    20
}
fn default_listing_pages() -> u32 {
    240
}
fn default_listing_batch() -> usize {
    20
}
fn default_offer_batch() -> usize {
    50
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/offers.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_grid_dir() -> PathBuf {
    PathBuf::from("data/grid")
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}
fn default_step_lon() -> f64 {
    0.004
}
fn default_step_lat() -> f64 {
    0.0025
}
fn default_coordinate_precision() -> u32 {
    7
}
fn default_train_threshold() -> f64 {
    50_000.0
}
fn default_k_min() -> usize {
    2
}
fn default_k_max() -> usize {
    38
}
fn default_k_step() -> usize {
    2
}
fn default_folds() -> usize {
    5
}

fn default_cities() -> Vec<CityConfig> {
    let boundary = |name: &str| PathBuf::from(format!("data/boundaries/{}.json", name));
    vec![
        CityConfig {
            key: "Mos".into(),
            slug: "moskva".into(),
            name: "Москва".into(),
            center: [55.755819, 37.617644],
            boundary: boundary("Mos_geo"),
            exclusions: vec![],
        },
        CityConfig {
            key: "SPb".into(),
            slug: "sankt-peterburg".into(),
            name: "Санкт Петербург".into(),
            center: [59.939099, 30.315877],
            boundary: boundary("SPb_geo"),
            exclusions: vec![boundary("Fin_gulf_geo")],
        },
        CityConfig {
            key: "Ekb".into(),
            slug: "sverdlovskaya-oblast/ekaterinburg".into(),
            name: "Екатеринбург".into(),
            center: [56.838011, 60.597474],
            boundary: boundary("Ekb_geo"),
            exclusions: (1..=5).map(|i| boundary(&format!("Ekb_vod{}", i))).collect(),
        },
    ]
}

fn default_categories() -> Vec<CategoryConfig> {
    vec![
        CategoryConfig {
            key: "sec".into(),
            slug: "kvartira".into(),
            label: "Secondary".into(),
        },
        CategoryConfig {
            key: "new".into(),
            slug: "novostroyka".into(),
            label: "New".into(),
        },
    ]
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            user_agent: default_user_agent(),
            concurrency: default_concurrency(),
            listing_pages: default_listing_pages(),
            listing_batch: default_listing_batch(),
            offer_batch: default_offer_batch(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            run_migrations: true,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            grid_dir: default_grid_dir(),
            output_dir: default_output_dir(),
        }
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            step_lon: default_step_lon(),
            step_lat: default_step_lat(),
        }
    }
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            coordinate_precision: default_coordinate_precision(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            train_threshold: default_train_threshold(),
            k_min: default_k_min(),
            k_max: default_k_max(),
            k_step: default_k_step(),
            folds: default_folds(),
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("REALTY").separator("__"))
            .build()?;

        cfg.try_deserialize()
            .context("Invalid configuration (config/*.toml or REALTY__* env)")
    }

    pub fn city(&self, key: &str) -> Option<&CityConfig> {
        self.cities.iter().find(|c| c.key.eq_ignore_ascii_case(key))
    }

    pub fn category(&self, key: &str) -> Option<&CategoryConfig> {
        self.categories.iter().find(|c| c.key.eq_ignore_ascii_case(key))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scraper: ScraperConfig::default(),
            storage: StorageConfig::default(),
            paths: PathsConfig::default(),
            grid: GridConfig::default(),
            aggregate: AggregateConfig::default(),
            model: ModelConfig::default(),
            cities: default_cities(),
            categories: default_categories(),
        }
    }
}
