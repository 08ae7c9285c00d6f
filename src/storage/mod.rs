use crate::models::Offer;
use anyhow::{Context, Result};
use chrono::Utc;
use duckdb::{params, Connection};
use std::path::Path;
use tracing::info;

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS offers (
    offer_id        VARCHAR   NOT NULL,
    city            VARCHAR   NOT NULL,
    category        VARCHAR   NOT NULL,
    -- Any of these may be missing on the offer page
    price_per_area  DOUBLE,
    living_area     DOUBLE,
    district        VARCHAR,
    latitude        DOUBLE,
    longitude       DOUBLE,
    refresh_time    VARCHAR,
    scraped_at      TIMESTAMP NOT NULL,
    PRIMARY KEY (offer_id, category)
);

CREATE SEQUENCE IF NOT EXISTS scrape_run_ids START 1;

CREATE TABLE IF NOT EXISTS scrape_runs (
    id               INTEGER PRIMARY KEY DEFAULT nextval('scrape_run_ids'),
    city             VARCHAR NOT NULL,
    category         VARCHAR NOT NULL,
    started_at       TIMESTAMP NOT NULL,
    finished_at      TIMESTAMP,
    status           VARCHAR NOT NULL DEFAULT 'running',
    offers_stored    INTEGER DEFAULT 0,
    failed_urls      INTEGER DEFAULT 0
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_offers_city ON offers (city, category);
"#;

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Connection,
}

/// Offer count for one city/category.
#[derive(Debug, Clone, PartialEq)]
pub struct OfferCount {
    pub city: String,
    pub category: String,
    pub offers: i64,
    pub geolocated: i64,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        self.conn.execute_batch(DDL).context("DDL failed")?;
        self.conn.execute_batch(INDEXES).context("Index creation failed")?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Offers ────────────────────────────────────────────────────────────────

    /// Upsert offers. A re-scraped offer keeps earlier values for fields the
    /// new page no longer shows.
    pub fn upsert_offers(&self, offers: &[Offer]) -> Result<usize> {
        if offers.is_empty() { return Ok(0); }

        let tx = self.conn.unchecked_transaction()?;
        let sql = r#"
            INSERT INTO offers
                (offer_id, city, category, price_per_area, living_area, district,
                 latitude, longitude, refresh_time, scraped_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (offer_id, category) DO UPDATE SET
                city           = excluded.city,
                price_per_area = COALESCE(excluded.price_per_area, offers.price_per_area),
                living_area    = COALESCE(excluded.living_area,    offers.living_area),
                district       = COALESCE(excluded.district,       offers.district),
                latitude       = COALESCE(excluded.latitude,       offers.latitude),
                longitude      = COALESCE(excluded.longitude,      offers.longitude),
                refresh_time   = COALESCE(excluded.refresh_time,   offers.refresh_time),
                scraped_at     = excluded.scraped_at
        "#;

        for o in offers {
            tx.execute(sql, params![
                o.offer_id, o.city, o.category,
                o.price_per_area, o.living_area, o.district,
                o.latitude, o.longitude, o.refresh_time,
                o.scraped_at,
            ]).with_context(|| format!("upsert offer {}", o.offer_id))?;
        }

        tx.commit()?;
        Ok(offers.len())
    }

    pub fn offers_for(&self, city: &str, category: &str) -> Result<Vec<Offer>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT offer_id, city, category, price_per_area, living_area, district,
                      latitude, longitude, refresh_time, scraped_at
               FROM offers WHERE city = ? AND category = ?
               ORDER BY offer_id"#,
        )?;
        let offers = stmt
            .query_map(params![city, category], |r| {
                Ok(Offer {
                    offer_id: r.get(0)?,
                    city: r.get(1)?,
                    category: r.get(2)?,
                    price_per_area: r.get(3)?,
                    living_area: r.get(4)?,
                    district: r.get(5)?,
                    latitude: r.get(6)?,
                    longitude: r.get(7)?,
                    refresh_time: r.get(8)?,
                    scraped_at: r.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(offers)
    }

    pub fn offer_counts(&self) -> Result<Vec<OfferCount>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT city, category, COUNT(*),
                      COUNT(*) FILTER (WHERE latitude IS NOT NULL AND longitude IS NOT NULL)
               FROM offers GROUP BY city, category ORDER BY city, category"#,
        )?;
        let counts = stmt
            .query_map([], |r| {
                Ok(OfferCount {
                    city: r.get(0)?,
                    category: r.get(1)?,
                    offers: r.get(2)?,
                    geolocated: r.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts)
    }

    // ── Scrape run log ────────────────────────────────────────────────────────

    pub fn begin_scrape_run(&self, city: &str, category: &str) -> Result<i64> {
        let id: i64 = self.conn.query_row(
            "INSERT INTO scrape_runs (city, category, started_at) VALUES (?, ?, ?) RETURNING id",
            params![city, category, Utc::now().naive_utc()],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn finish_scrape_run(&self, run_id: i64, offers: usize, failed: usize) -> Result<()> {
        self.conn.execute(
            r#"UPDATE scrape_runs SET
               finished_at = ?, status = ?,
               offers_stored = ?, failed_urls = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                if failed == 0 { "success" } else { "partial" },
                offers as i64, failed as i64, run_id,
            ],
        )?;
        Ok(())
    }

    /// Close a run that stopped on an error.
    pub fn fail_scrape_run(&self, run_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE scrape_runs SET finished_at = ?, status = 'failed' WHERE id = ?",
            params![Utc::now().naive_utc(), run_id],
        )?;
        Ok(())
    }

    pub fn scrape_run_status(&self, run_id: i64) -> Result<Option<String>> {
        let mut stmt = self.conn.prepare("SELECT status FROM scrape_runs WHERE id = ?")?;
        let mut rows = stmt.query(params![run_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }
}
