pub mod cleaner;
pub mod http_client;
pub mod parsers;

use crate::config::{CategoryConfig, CityConfig, ScraperConfig};
use crate::models::Offer;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use tracing::{debug, info, warn};
use url::Url;

use self::cleaner::offer_id_from_link;
use self::http_client::{fetch_all, FailedFetch, FetchReport, FetchedPage, HttpClient, PageFetcher};
use self::parsers::{parse_offer_links, parse_offer_page};

// ── Source trait ──────────────────────────────────────────────────────────────

/// What one scrape step produced, plus the URLs that failed along the way.
#[derive(Debug)]
pub struct Harvest<T> {
    pub items: Vec<T>,
    pub failed: Vec<FailedFetch>,
}

/// Swappable listing-site abstraction.
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Offer URLs found on the search-results pages of a city/category.
    async fn fetch_offer_links(
        &self,
        city: &CityConfig,
        category: &CategoryConfig,
    ) -> Result<Harvest<String>>;

    /// Fetch and parse the given offer pages.
    async fn fetch_offers(
        &self,
        city: &CityConfig,
        category: &CategoryConfig,
        links: &[String],
    ) -> Result<Harvest<Offer>>;
}

// ── realtymag scraper ─────────────────────────────────────────────────────────

pub struct RealtymagScraper<F: PageFetcher = HttpClient> {
    fetcher: F,
    base: Url,
    config: ScraperConfig,
}

impl RealtymagScraper<HttpClient> {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        Self::with_fetcher(HttpClient::new(config)?, config)
    }
}

impl<F: PageFetcher> RealtymagScraper<F> {
    pub fn with_fetcher(fetcher: F, config: &ScraperConfig) -> Result<Self> {
        let base = Url::parse(&format!("{}/", config.base_url.trim_end_matches('/')))
            .with_context(|| format!("Invalid base URL {:?}", config.base_url))?;
        Ok(Self {
            fetcher,
            base,
            config: config.clone(),
        })
    }

    /// Search-results page for a city/category.
    /// e.g. /sankt-peterburg/kvartira/prodazha/?type=1&currency=RUR&price_type=all&page=3
    pub fn listing_url(&self, city: &CityConfig, category: &CategoryConfig, page: u32) -> Result<Url> {
        let mut url = self
            .base
            .join(&format!("{}/{}/prodazha/", city.slug, category.slug))?;
        url.query_pairs_mut()
            .append_pair("type", "1")
            .append_pair("currency", "RUR")
            .append_pair("price_type", "all")
            .append_pair("page", &page.to_string());
        Ok(url)
    }

    /// Offer page for an id. e.g. 2517553691 → /kvartira/prodazha/2517553691
    pub fn offer_url(&self, category: &CategoryConfig, offer_id: &str) -> Result<Url> {
        Ok(self
            .base
            .join(&format!("{}/prodazha/{}", category.slug, offer_id))?)
    }

    async fn fetch_batches(&self, urls: &[String], batch: usize) -> FetchReport {
        let mut report = FetchReport::default();
        for (i, chunk) in urls.chunks(batch.max(1)).enumerate() {
            let part = fetch_all(&self.fetcher, chunk, self.config.concurrency).await;
            debug!(
                "Batch {}: {} pages, {} failed",
                i + 1,
                part.pages.len(),
                part.failed.len()
            );
            report.extend(part);
        }
        report
    }
}

#[async_trait]
impl<F: PageFetcher> ListingSource for RealtymagScraper<F> {
    async fn fetch_offer_links(
        &self,
        city: &CityConfig,
        category: &CategoryConfig,
    ) -> Result<Harvest<String>> {
        let urls = (1..=self.config.listing_pages)
            .map(|page| self.listing_url(city, category, page).map(String::from))
            .collect::<Result<Vec<_>>>()?;

        info!("Fetching {} listing pages for {}/{}", urls.len(), city.key, category.key);
        let report = self.fetch_batches(&urls, self.config.listing_batch).await;

        let base = self.base.clone();
        let found = parse_off_io(report.pages, move |page| {
            parse_offer_links(&page.html, &base).unwrap_or_else(|e| {
                warn!("{}: {:#}", page.url, e);
                vec![]
            })
        })
        .await?;

        let mut seen = HashSet::new();
        let mut links = Vec::new();
        for link in found.into_iter().flatten() {
            let Some(id) = offer_id_from_link(&link) else { continue };
            if seen.insert(id.clone()) {
                links.push(self.offer_url(category, &id)?.to_string());
            }
        }

        info!(
            "{}/{}: {} offer links ({} listing pages failed)",
            city.key,
            category.key,
            links.len(),
            report.failed.len()
        );
        Ok(Harvest { items: links, failed: report.failed })
    }

    async fn fetch_offers(
        &self,
        city: &CityConfig,
        category: &CategoryConfig,
        links: &[String],
    ) -> Result<Harvest<Offer>> {
        info!("Fetching {} offer pages for {}/{}", links.len(), city.key, category.key);
        let report = self.fetch_batches(links, self.config.offer_batch).await;

        let now = Utc::now().naive_utc();
        let (city_key, category_key) = (city.key.clone(), category.key.clone());
        let offers = parse_off_io(report.pages, move |page| {
            let id = offer_id_from_link(&page.url)?;
            let fields = parse_offer_page(&page.html);
            let missing = fields.missing();
            if !missing.is_empty() {
                debug!("{}: missing {:?}", id, missing);
            }
            Some(Offer::from_fields(id, &city_key, &category_key, fields, now))
        })
        .await?;

        let offers: Vec<Offer> = offers.into_iter().flatten().collect();
        info!(
            "{}/{}: {} offers parsed ({} offer pages failed)",
            city.key,
            category.key,
            offers.len(),
            report.failed.len()
        );
        Ok(Harvest { items: offers, failed: report.failed })
    }
}

/// Run page parsing on a blocking worker so it stays off the I/O tasks.
async fn parse_off_io<T, P>(pages: Vec<FetchedPage>, parse: P) -> Result<Vec<T>>
where
    T: Send + 'static,
    P: Fn(&FetchedPage) -> T + Send + 'static,
{
    tokio::task::spawn_blocking(move || pages.iter().map(parse).collect())
        .await
        .context("Parser worker panicked")
}
