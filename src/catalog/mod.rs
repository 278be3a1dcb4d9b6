// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Kaapi Contributors

//! Coffee catalog store
//!
//! Read-only catalog backing the search tool. The catalog is populated by
//! a separate ingestion job; this module only queries it. `CatalogStore`
//! is the seam behind which a different store could be substituted without
//! touching the orchestrator.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, types::Value, Connection};
use serde::{Deserialize, Serialize};

use crate::error::{KaapiError, Result};

/// One retrievable record in the coffee catalog
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogItem {
    pub name: String,
    pub roaster: String,
    pub roast_level: String,
    pub process: String,
    pub origin: String,
    pub flavor_notes: String,
    pub brew_methods: String,
    pub description: String,
    pub price_min: f64,
    pub is_available: bool,
    pub source_url: String,
}

/// Structured filter criteria for a catalog search
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilters {
    pub brew_method: Option<String>,
    pub roast_level: Option<String>,
    pub process: Option<String>,
    pub flavor_keywords: Vec<String>,
    pub max_price: Option<f64>,
}

/// Narrow interface the orchestrator talks to
pub trait CatalogStore: Send + Sync {
    /// Search available items with each supplied filter applied
    /// conjunctively. When the conjunction yields zero rows the store falls
    /// back to an unfiltered sample of size `limit`, so callers must not
    /// assume returned items satisfy the filters.
    fn search(&self, filters: &SearchFilters, limit: usize) -> Result<Vec<CatalogItem>>;
}

/// SQLite-backed catalog
pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS coffees (
    id            INTEGER PRIMARY KEY,
    name          TEXT NOT NULL,
    roaster       TEXT NOT NULL,
    handle        TEXT DEFAULT '',
    source_url    TEXT UNIQUE,
    affiliate_url TEXT DEFAULT '',
    image_url     TEXT DEFAULT '',
    description   TEXT DEFAULT '',
    roast_level   TEXT DEFAULT 'unknown',
    process       TEXT DEFAULT 'unknown',
    origin        TEXT DEFAULT 'India',
    acidity       TEXT DEFAULT 'unknown',
    body          TEXT DEFAULT 'unknown',
    flavor_notes  TEXT DEFAULT '',
    brew_methods  TEXT DEFAULT '',
    tags          TEXT DEFAULT '',
    price_min     REAL DEFAULT 0,
    is_available  INTEGER DEFAULT 1,
    scraped_at    TEXT DEFAULT ''
)";

const ITEM_COLUMNS: &str = "name, roaster, roast_level, process, origin, \
     flavor_notes, brew_methods, description, price_min, is_available, source_url";

impl SqliteCatalog {
    /// Open (or create) the catalog database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| KaapiError::Catalog(e.to_string()))?;
        conn.execute(SCHEMA, [])
            .map_err(|e| KaapiError::Catalog(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory catalog (used by tests and local development).
    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| KaapiError::Catalog(e.to_string()))?;
        conn.execute(SCHEMA, [])
            .map_err(|e| KaapiError::Catalog(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert one item. The ingestion job is the intended caller; the chat
    /// path never writes.
    pub fn insert(&self, item: &CatalogItem) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO coffees (name, roaster, source_url, description, roast_level, \
             process, origin, flavor_notes, brew_methods, price_min, is_available) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                item.name,
                item.roaster,
                item.source_url,
                item.description,
                item.roast_level,
                item.process,
                item.origin,
                item.flavor_notes,
                item.brew_methods,
                item.price_min,
                item.is_available,
            ],
        )
        .map_err(|e| KaapiError::Catalog(e.to_string()))?;
        Ok(())
    }

    fn query(&self, sql: &str, bound: Vec<Value>) -> Result<Vec<CatalogItem>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| KaapiError::Catalog(e.to_string()))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(bound), |row| {
                Ok(CatalogItem {
                    name: row.get(0)?,
                    roaster: row.get(1)?,
                    roast_level: row.get(2)?,
                    process: row.get(3)?,
                    origin: row.get(4)?,
                    flavor_notes: row.get(5)?,
                    brew_methods: row.get(6)?,
                    description: row.get(7)?,
                    price_min: row.get(8)?,
                    is_available: row.get(9)?,
                    source_url: row.get(10)?,
                })
            })
            .map_err(|e| KaapiError::Catalog(e.to_string()))?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row.map_err(|e| KaapiError::Catalog(e.to_string()))?);
        }
        Ok(items)
    }
}

impl CatalogStore for SqliteCatalog {
    fn search(&self, filters: &SearchFilters, limit: usize) -> Result<Vec<CatalogItem>> {
        let mut clauses = vec!["is_available = 1".to_string()];
        let mut bound: Vec<Value> = Vec::new();

        // "unknown" is the catalog's null; treat it as no filter.
        if let Some(roast) = filters.roast_level.as_deref().filter(|r| *r != "unknown") {
            bound.push(Value::Text(roast.to_string()));
            clauses.push(format!("roast_level = ?{}", bound.len()));
        }
        if let Some(method) = filters.brew_method.as_deref() {
            bound.push(Value::Text(format!("%{}%", method)));
            clauses.push(format!("brew_methods LIKE ?{}", bound.len()));
        }
        if let Some(process) = filters.process.as_deref().filter(|p| *p != "unknown") {
            bound.push(Value::Text(process.to_string()));
            clauses.push(format!("process = ?{}", bound.len()));
        }
        if let Some(max_price) = filters.max_price {
            bound.push(Value::Real(max_price));
            clauses.push(format!("price_min <= ?{}", bound.len()));
        }
        for keyword in &filters.flavor_keywords {
            bound.push(Value::Text(format!("%{}%", keyword)));
            let n = bound.len();
            bound.push(Value::Text(format!("%{}%", keyword)));
            clauses.push(format!(
                "(flavor_notes LIKE ?{} OR description LIKE ?{})",
                n,
                bound.len()
            ));
        }

        let sql = format!(
            "SELECT {} FROM coffees WHERE {} LIMIT {}",
            ITEM_COLUMNS,
            clauses.join(" AND "),
            limit
        );
        let items = self.query(&sql, bound)?;
        if !items.is_empty() {
            return Ok(items);
        }

        // Filters too strict: fall back to an unfiltered sample rather than
        // an empty result.
        let fallback = format!(
            "SELECT {} FROM coffees WHERE is_available = 1 ORDER BY RANDOM() LIMIT {}",
            ITEM_COLUMNS, limit
        );
        self.query(&fallback, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str) -> CatalogItem {
        CatalogItem {
            name: name.to_string(),
            roaster: "Blue Tokai".to_string(),
            roast_level: "light".to_string(),
            process: "washed".to_string(),
            origin: "Chikmagalur".to_string(),
            flavor_notes: "Citrus, Floral".to_string(),
            brew_methods: "Pour Over, AeroPress".to_string(),
            description: "A bright and juicy lot".to_string(),
            price_min: 450.0,
            is_available: true,
            source_url: format!("https://example.com/{}", name),
        }
    }

    fn seeded() -> SqliteCatalog {
        let catalog = SqliteCatalog::in_memory().unwrap();
        catalog.insert(&item("Attikan Estate")).unwrap();

        let mut dark = item("Monsoon Malabar");
        dark.roast_level = "dark".to_string();
        dark.flavor_notes = "Chocolate, Spice".to_string();
        dark.brew_methods = "Espresso, Moka Pot".to_string();
        dark.price_min = 380.0;
        catalog.insert(&dark).unwrap();

        let mut unavailable = item("Sold Out Lot");
        unavailable.is_available = false;
        catalog.insert(&unavailable).unwrap();

        catalog
    }

    #[test]
    fn test_search_without_filters_returns_available_only() {
        let catalog = seeded();
        let items = catalog.search(&SearchFilters::default(), 5).unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.is_available));
        assert!(items.iter().all(|i| i.name != "Sold Out Lot"));
    }

    #[test]
    fn test_search_roast_level_filter() {
        let catalog = seeded();
        let filters = SearchFilters {
            roast_level: Some("dark".to_string()),
            ..Default::default()
        };
        let items = catalog.search(&filters, 5).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Monsoon Malabar");
    }

    #[test]
    fn test_search_unknown_roast_level_is_ignored() {
        let catalog = seeded();
        let filters = SearchFilters {
            roast_level: Some("unknown".to_string()),
            ..Default::default()
        };
        let items = catalog.search(&filters, 5).unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_search_brew_method_substring_match() {
        let catalog = seeded();
        let filters = SearchFilters {
            brew_method: Some("Espresso".to_string()),
            ..Default::default()
        };
        let items = catalog.search(&filters, 5).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Monsoon Malabar");
    }

    #[test]
    fn test_search_flavor_keyword_matches_notes_or_description() {
        let catalog = seeded();

        let by_notes = SearchFilters {
            flavor_keywords: vec!["chocolate".to_string()],
            ..Default::default()
        };
        let items = catalog.search(&by_notes, 5).unwrap();
        assert_eq!(items[0].name, "Monsoon Malabar");

        let by_description = SearchFilters {
            flavor_keywords: vec!["juicy".to_string()],
            ..Default::default()
        };
        let items = catalog.search(&by_description, 5).unwrap();
        assert_eq!(items[0].name, "Attikan Estate");
    }

    #[test]
    fn test_search_conjunctive_filters() {
        let catalog = seeded();
        let filters = SearchFilters {
            roast_level: Some("light".to_string()),
            flavor_keywords: vec!["citrus".to_string()],
            max_price: Some(500.0),
            ..Default::default()
        };
        let items = catalog.search(&filters, 5).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Attikan Estate");
    }

    #[test]
    fn test_search_max_price_filter() {
        let catalog = seeded();
        let filters = SearchFilters {
            max_price: Some(400.0),
            ..Default::default()
        };
        let items = catalog.search(&filters, 5).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Monsoon Malabar");
    }

    #[test]
    fn test_search_zero_matches_falls_back_to_sample() {
        let catalog = seeded();
        let filters = SearchFilters {
            roast_level: Some("green".to_string()),
            flavor_keywords: vec!["durian".to_string()],
            ..Default::default()
        };
        let items = catalog.search(&filters, 2).unwrap();
        // Fallback sample, not an empty list; capped at limit.
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.is_available));
    }

    #[test]
    fn test_search_fallback_returns_all_when_fewer_than_limit() {
        let catalog = seeded();
        let filters = SearchFilters {
            roast_level: Some("green".to_string()),
            ..Default::default()
        };
        let items = catalog.search(&filters, 10).unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_search_respects_limit() {
        let catalog = SqliteCatalog::in_memory().unwrap();
        for i in 0..6 {
            catalog.insert(&item(&format!("Lot {}", i))).unwrap();
        }
        let items = catalog.search(&SearchFilters::default(), 3).unwrap();
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn test_open_creates_schema_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coffees.db");
        let catalog = SqliteCatalog::open(&path).unwrap();
        catalog.insert(&item("Disk Lot")).unwrap();

        // Reopen and read back.
        drop(catalog);
        let reopened = SqliteCatalog::open(&path).unwrap();
        let items = reopened.search(&SearchFilters::default(), 5).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Disk Lot");
    }
}
